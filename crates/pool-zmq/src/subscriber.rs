use crate::error::ZmqError;
use crate::event::ZmqEvent;
use crate::health::ZmqHealth;
use pool_async::{tokio, tokio_util};
use pool_logging::macros::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Endpoints to subscribe to. Either may be absent; an absent one simply
/// never fires its corresponding event.
#[derive(Clone, Debug, Default)]
pub struct ZmqEndpoints {
    pub hashblock_addr: Option<String>,
    pub rawblock_addr: Option<String>,
}

const POLL_TIMEOUT_MS: i32 = 500;
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Subscribes to `bitcoind`'s ZMQ `hashblock`/`rawblock` publishers on a
/// dedicated blocking thread (the `zmq` crate is synchronous) and forwards
/// decoded events to an async channel. Reconnects with exponential backoff
/// on any socket error; a slow or silent node is not an error; a genuine
/// socket failure is.
pub struct ZmqSubscriber {
    health: Arc<ZmqHealth>,
}

impl ZmqSubscriber {
    pub fn spawn(
        endpoints: ZmqEndpoints,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<ZmqEvent>), ZmqError> {
        if endpoints.hashblock_addr.is_none() && endpoints.rawblock_addr.is_none() {
            return Err(ZmqError::NoEndpoints);
        }

        let (tx, rx) = mpsc::channel(256);
        let health = Arc::new(ZmqHealth::default());
        let health_for_thread = health.clone();

        tokio::task::spawn_blocking(move || run(endpoints, tx, health_for_thread, cancel));

        Ok((Self { health }, rx))
    }

    pub fn health(&self) -> &ZmqHealth {
        &self.health
    }
}

fn run(
    endpoints: ZmqEndpoints,
    tx: mpsc::Sender<ZmqEvent>,
    health: Arc<ZmqHealth>,
    cancel: CancellationToken,
) {
    let mut backoff = RECONNECT_BACKOFF_MIN;
    let mut first_attempt = true;

    while !cancel.is_cancelled() {
        match run_once(&endpoints, &tx, &health, &cancel) {
            Ok(()) => {
                // Clean shutdown requested by the caller.
                return;
            }
            Err(e) => {
                health.set_hashblock_connected(false);
                health.set_rawblock_connected(false);
                health.record_disconnect();
                if !first_attempt {
                    health.record_reconnect();
                }
                first_attempt = false;
                error!("zmq subscriber error, reconnecting: {e}"; "backoff_ms" => backoff.as_millis() as u64);
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
}

fn run_once(
    endpoints: &ZmqEndpoints,
    tx: &mpsc::Sender<ZmqEvent>,
    health: &ZmqHealth,
    cancel: &CancellationToken,
) -> Result<(), ZmqError> {
    let ctx = zmq::Context::new();
    let socket = ctx.socket(zmq::SUB)?;
    socket.set_rcvtimeo(POLL_TIMEOUT_MS)?;

    if let Some(addr) = &endpoints.hashblock_addr {
        socket.connect(addr)?;
        socket.set_subscribe(b"hashblock")?;
        health.set_hashblock_connected(true);
    }
    if let Some(addr) = &endpoints.rawblock_addr {
        socket.connect(addr)?;
        socket.set_subscribe(b"rawblock")?;
        health.set_rawblock_connected(true);
    }

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let parts = match socket.recv_multipart(0) {
            Ok(parts) => parts,
            Err(zmq::Error::EAGAIN) => continue, // poll timeout, nothing published yet
            Err(e) => return Err(ZmqError::Zmq(e)),
        };

        if let Some(event) = decode(&parts) {
            if tx.blocking_send(event).is_err() {
                // Receiver dropped: the owning job manager shut down.
                return Ok(());
            }
        }
    }
}

fn decode(parts: &[Vec<u8>]) -> Option<ZmqEvent> {
    let topic = parts.first()?;
    let payload = parts.get(1)?;
    let sequence = parts
        .get(2)
        .filter(|s| s.len() == 4)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
        .unwrap_or(0);

    match topic.as_slice() {
        b"hashblock" => Some(ZmqEvent::HashBlock {
            hash_hex: hex::encode(payload),
            sequence,
        }),
        b"rawblock" => Some(ZmqEvent::RawBlock {
            block_hex: hex::encode(payload),
            sequence,
        }),
        _ => None,
    }
}
