//! A thin wrapper around `slog` providing a single process-global logger and
//! a `macros` module that lets every other crate write `info!(...)`,
//! `warn!(...)`, etc. against that global logger without threading a
//! `Logger` value through every function signature.
//!
//! Call [`init`] once at process startup before spawning any component.
//! Every call site is expected to attach its own key-value pairs
//! (`component`, `kind`, `worker`, `job_id`, ...) rather than interpolating
//! them into the message string, so logs stay machine-parseable.

use lazy_static::lazy_static;
use slog::{Drain, Logger, o};
use std::sync::{Mutex, RwLock};

lazy_static! {
    static ref GLOBAL_LOGGER: RwLock<Logger> = RwLock::new(null_logger());
}

fn null_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Output mode for the global logger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Human-readable, colored terminal output. Good for interactive use.
    Term,
    /// Newline-delimited JSON. Good for piping into a log aggregator.
    Json,
}

/// Builds and installs the process-global logger. Subsequent calls replace
/// the previous logger; tests typically call this once per process via a
/// `std::sync::Once` guard in their harness.
pub fn init(format: Format, level: slog::Level) {
    let logger = match format {
        Format::Term => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            let drain = Mutex::new(drain).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            Logger::root(drain, o!())
        }
        Format::Json => {
            let drain = slog_json::Json::default(std::io::stdout()).fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            let drain = Mutex::new(drain).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            Logger::root(drain, o!())
        }
    };
    *GLOBAL_LOGGER.write().expect("logger lock poisoned") = logger;
}

/// Returns a clone of the current global logger. Cheap: `slog::Logger` is an
/// `Arc` internally.
pub fn global() -> Logger {
    GLOBAL_LOGGER.read().expect("logger lock poisoned").clone()
}

/// Returns a child logger with the given key-value pairs attached, rooted at
/// the global logger. Components use this to tag every log line they emit
/// with a stable `component` key without repeating it at every call site.
pub fn component(name: &'static str) -> Logger {
    global().new(o!("component" => name))
}

/// Re-exports `slog`'s logging macros bound to [`global()`] so call sites can
/// write `use pool_logging::macros::*;` once and then just call `info!(...)`.
pub mod macros {
    #[macro_export]
    macro_rules! trace {
        ($($args:tt)+) => { slog::trace!($crate::global(), $($args)+) };
    }
    #[macro_export]
    macro_rules! debug {
        ($($args:tt)+) => { slog::debug!($crate::global(), $($args)+) };
    }
    #[macro_export]
    macro_rules! info {
        ($($args:tt)+) => { slog::info!($crate::global(), $($args)+) };
    }
    #[macro_export]
    macro_rules! warn {
        ($($args:tt)+) => { slog::warn!($crate::global(), $($args)+) };
    }
    #[macro_export]
    macro_rules! error {
        ($($args:tt)+) => { slog::error!($crate::global(), $($args)+) };
    }

    pub use crate::debug;
    pub use crate::error;
    pub use crate::info;
    pub use crate::trace;
    pub use crate::warn;
}

pub use slog;
