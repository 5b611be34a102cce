//! Integration-test doubles: an in-process `bitcoind` JSON-RPC stand-in
//! (`FakeNode`) and a bare Stratum client (`StratumTestClient`) speaking the
//! newline-JSON wire format directly, without pulling in the pool's own
//! server code. Mirrors the shape of the pack's fake-node-plus-bare-client
//! harnesses: a real `TcpListener`/`TcpStream` pair, no mocked traits.

use pool_async::tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use pool_async::tokio::net::{TcpListener, TcpStream};
use pool_async::tokio::task::JoinHandle;
use pool_async::tokio_util::sync::CancellationToken;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

/// What a `FakeNode` handler returns for one JSON-RPC call.
pub enum FakeResponse {
    Result(Value),
    Error { code: i64, message: String },
    /// Sleeps for the given duration before responding with `Result(Value::Null)`,
    /// used to exercise a caller's own timeout handling.
    DelayThenNull(std::time::Duration),
}

impl FakeResponse {
    pub fn ok(value: Value) -> Self {
        FakeResponse::Result(value)
    }
}

pub type FakeHandler = dyn Fn(&str, Value) -> FakeResponse + Send + Sync;

/// A minimal single-connection-at-a-time HTTP/JSON-RPC server standing in
/// for `bitcoind`: parses just enough HTTP to extract the request body
/// (which is all `reqwest`'s POST requests need), routes by JSON-RPC
/// `method`, and replies with whatever the handler returns.
pub struct FakeNode {
    pub addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FakeNode {
    pub async fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&str, Value) -> FakeResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake node listener");
        let addr = listener.local_addr().expect("fake node local addr");
        let cancel = CancellationToken::new();
        let handler: Arc<FakeHandler> = Arc::new(handler);

        let accept_cancel = cancel.clone();
        let task = pool_async::tokio::spawn(async move {
            loop {
                let accepted = pool_async::tokio::select! {
                    result = listener.accept() => result,
                    _ = accept_cancel.cancelled() => return,
                };
                let Ok((stream, _peer)) = accepted else { continue };
                let handler = handler.clone();
                pool_async::tokio::spawn(async move {
                    let _ = serve_one(stream, handler.as_ref()).await;
                });
            }
        });

        FakeNode { addr, cancel, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn shutdown(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn serve_one(mut stream: TcpStream, handler: &FakeHandler) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let envelope: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let id = envelope.get("id").cloned().unwrap_or(Value::Null);
    let method = envelope.get("method").and_then(Value::as_str).unwrap_or("").to_string();
    let params = envelope.get("params").cloned().unwrap_or(Value::Null);

    let response_body = match handler(&method, params) {
        FakeResponse::Result(result) => serde_json::json!({ "result": result, "error": Value::Null, "id": id }),
        FakeResponse::Error { code, message } => {
            serde_json::json!({ "result": Value::Null, "error": { "code": code, "message": message }, "id": id })
        }
        FakeResponse::DelayThenNull(delay) => {
            pool_async::tokio::time::sleep(delay).await;
            serde_json::json!({ "result": Value::Null, "error": Value::Null, "id": id })
        }
    };

    let body = serde_json::to_vec(&response_body).unwrap_or_default();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// A bare-bones Stratum V1 client for integration tests: connects over a
/// loopback `TcpStream`, speaks newline-delimited JSON directly rather than
/// going through `pool-wire`'s codec, so a test failure points at the
/// server under test instead of at a shared client-side dependency.
pub struct StratumTestClient {
    reader: BufReader<pool_async::tokio::net::tcp::OwnedReadHalf>,
    writer: pool_async::tokio::net::tcp::OwnedWriteHalf,
    next_id: u64,
}

impl StratumTestClient {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_id: 1,
        })
    }

    async fn call(&mut self, method: &str, params: Value) -> std::io::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let request = serde_json::json!({ "id": id, "method": method, "params": params });
        let mut line = serde_json::to_string(&request).expect("serialize stratum request");
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        loop {
            let value = self.read_line_json().await?;
            if value.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(value);
            }
            // Not our reply (a notification raced ahead of it); keep reading.
        }
    }

    /// Reads the next line off the wire regardless of whether it's a
    /// response or a notification, for tests asserting on `mining.notify`/
    /// `mining.set_difficulty` ordering.
    pub async fn read_next(&mut self) -> std::io::Result<Value> {
        self.read_line_json().await
    }

    async fn read_line_json(&mut self) -> std::io::Result<Value> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stratum connection closed"));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(trimmed).unwrap_or(Value::Null));
        }
    }

    pub async fn subscribe(&mut self, user_agent: &str) -> std::io::Result<Value> {
        self.call("mining.subscribe", serde_json::json!([user_agent])).await
    }

    pub async fn authorize(&mut self, worker: &str, password: &str) -> std::io::Result<Value> {
        self.call("mining.authorize", serde_json::json!([worker, password])).await
    }

    pub async fn configure(&mut self, extensions: Value, params: Value) -> std::io::Result<Value> {
        self.call("mining.configure", serde_json::json!([extensions, params])).await
    }

    pub async fn suggest_difficulty(&mut self, difficulty: f64) -> std::io::Result<Value> {
        self.call("mining.suggest_difficulty", serde_json::json!([difficulty])).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &mut self,
        worker: &str,
        job_id: &str,
        extranonce2_hex: &str,
        ntime_hex: &str,
        nonce_hex: &str,
        version_bits_hex: Option<&str>,
    ) -> std::io::Result<Value> {
        let mut params = vec![
            Value::String(worker.to_string()),
            Value::String(job_id.to_string()),
            Value::String(extranonce2_hex.to_string()),
            Value::String(ntime_hex.to_string()),
            Value::String(nonce_hex.to_string()),
        ];
        if let Some(v) = version_bits_hex {
            params.push(Value::String(v.to_string()));
        }
        self.call("mining.submit", Value::Array(params)).await
    }
}
