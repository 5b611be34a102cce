use crate::error::RpcError;
use std::path::PathBuf;
use std::time::SystemTime;

/// Either fixed basic-auth credentials, or a `bitcoind` `.cookie` file that
/// is re-read whenever its mtime changes (`bitcoind` rewrites the cookie on
/// every restart, rotating the password underneath a long-lived client).
#[derive(Clone, Debug)]
pub enum Auth {
    UserPass { user: String, password: String },
    CookieFile(PathBuf),
}

impl Auth {
    pub fn basic_header_value(&self, cached: &mut CachedCookie) -> Result<String, RpcError> {
        match self {
            Auth::UserPass { user, password } => {
                Ok(basic_auth_header(user, password))
            }
            Auth::CookieFile(path) => {
                cached.refresh_if_rotated(path)?;
                Ok(cached.header_value.clone())
            }
        }
    }
}

fn basic_auth_header(user: &str, password: &str) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Basic {encoded}")
}

/// Caches the last-read cookie file's content and mtime so a hot path
/// (every RPC call) doesn't stat and re-read the file unless it actually
/// rotated.
#[derive(Default, Debug)]
pub struct CachedCookie {
    mtime: Option<SystemTime>,
    header_value: String,
}

impl CachedCookie {
    fn refresh_if_rotated(&mut self, path: &std::path::Path) -> Result<(), RpcError> {
        let metadata = std::fs::metadata(path).map_err(|e| RpcError::CookieFile {
            path: path.display().to_string(),
            source: e,
        })?;
        let mtime = metadata.modified().ok();
        if mtime == self.mtime && !self.header_value.is_empty() {
            return Ok(());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| RpcError::CookieFile {
            path: path.display().to_string(),
            source: e,
        })?;
        let trimmed = contents.trim();
        let (user, password) = trimmed.split_once(':').unwrap_or(("__cookie__", trimmed));
        self.header_value = basic_auth_header(user, password);
        self.mtime = mtime;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cookie_rotation_is_detected_by_mtime() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("pool-rpc-test-cookie-{}", std::process::id()));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"user:pass1")
            .unwrap();

        let mut cache = CachedCookie::default();
        cache.refresh_if_rotated(&path).unwrap();
        let first = cache.header_value.clone();

        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"user:pass2")
            .unwrap();
        cache.refresh_if_rotated(&path).unwrap();
        let second = cache.header_value.clone();

        assert_ne!(first, second);
        std::fs::remove_file(&path).ok();
    }
}
