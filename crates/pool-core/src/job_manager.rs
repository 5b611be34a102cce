//! Keeps the current [`Job`] fresh against `bitcoind`: three drivers (a
//! `getblocktemplate` long-poll loop, a ZMQ-triggered refresh, and a
//! heartbeat forcing both a refresh and a node-sync snapshot) race the
//! same `refresh` entry point, serialized by a mutex with a minimum
//! inter-attempt interval. A fresh job is fanned out to every subscriber
//! through a small pool of notify workers.

use crate::job::{build_job, template_changed, Job, JobBuildConfig};
use crate::registry::{Registry, SessionEvent};
use pool_async::tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use pool_async::tokio_util::sync::CancellationToken;
use pool_logging::macros::*;
use pool_rpc::RpcClient;
use pool_zmq::{ZmqEvent, ZmqHealthSnapshot, ZmqSubscriber};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);
const HEARTBEAT_CHAINGINFO_TIMEOUT: Duration = Duration::from_secs(3);
const ERROR_RING_CAPACITY: usize = 3;
const NOTIFY_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Default)]
pub struct NodeSyncSnapshot {
    pub blocks: u64,
    pub headers: u64,
    pub ibd: bool,
    pub best_block_hash_known: bool,
}

#[derive(Clone, Debug, Default)]
pub struct FeedStatus {
    pub has_job: bool,
    pub last_error: Option<String>,
    pub last_error_at_unix: Option<u64>,
    pub recent_errors: Vec<String>,
}

struct RefreshState {
    last_attempt: Option<Instant>,
    backoff: Duration,
}

/// Template ingestion, freshness, change detection, job build and
/// broadcast. Owns the current [`Job`] and the subscriber registry; the
/// Stratum listener only ever reads from here, it never mutates the
/// template lifecycle itself.
pub struct JobManager {
    rpc: Arc<RpcClient>,
    registry: Arc<Registry>,
    cfg: JobBuildConfig,
    current: RwLock<Option<Arc<Job>>>,
    refresh_gate: AsyncMutex<RefreshState>,
    error_ring: Mutex<VecDeque<String>>,
    last_error_at: AtomicU64,
    node_sync: Mutex<NodeSyncSnapshot>,
    retry_delay_min: Duration,
    retry_delay_max: Duration,
    notify_tx: mpsc::Sender<Arc<Job>>,
    notify_rx_taken: AtomicBool,
}

impl JobManager {
    pub fn new(
        rpc: Arc<RpcClient>,
        registry: Arc<Registry>,
        cfg: JobBuildConfig,
        retry_delay_min: Duration,
        retry_delay_max: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<Job>>) {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);
        let manager = Arc::new(Self {
            rpc,
            registry,
            cfg,
            current: RwLock::new(None),
            refresh_gate: AsyncMutex::new(RefreshState {
                last_attempt: None,
                backoff: retry_delay_min,
            }),
            error_ring: Mutex::new(VecDeque::with_capacity(ERROR_RING_CAPACITY)),
            last_error_at: AtomicU64::new(0),
            node_sync: Mutex::new(NodeSyncSnapshot::default()),
            retry_delay_min,
            retry_delay_max,
            notify_tx,
            notify_rx_taken: AtomicBool::new(false),
        });
        (manager, notify_rx)
    }

    pub async fn current_job(&self) -> Option<Arc<Job>> {
        self.current.read().await.clone()
    }

    /// Best-effort current job height, used by the fast-retry submit loop
    /// to detect a competitor's block overtaking the one being submitted.
    /// Falls back to `0` if the job lock is momentarily held by a refresh,
    /// which only makes the overtake check marginally less eager.
    pub fn current_height(&self) -> u64 {
        self.current.try_read().ok().and_then(|g| g.as_ref().map(|j| j.height)).unwrap_or(0)
    }

    pub fn feed_status(&self) -> FeedStatus {
        let ring = self.error_ring.lock().expect("error ring mutex poisoned");
        let last_error_at = self.last_error_at.load(Ordering::Relaxed);
        let has_job = self.current.try_read().map(|g| g.is_some()).unwrap_or(true);
        FeedStatus {
            has_job,
            last_error: ring.back().cloned(),
            last_error_at_unix: if last_error_at == 0 { None } else { Some(last_error_at) },
            recent_errors: ring.iter().cloned().collect(),
        }
    }

    pub fn node_sync_snapshot(&self) -> NodeSyncSnapshot {
        *self.node_sync.lock().expect("node sync mutex poisoned")
    }

    /// Spawns the long-poll loop, the heartbeat loop, and `NumCPU()` notify
    /// workers. The caller is expected to separately spawn a ZMQ event
    /// pump that calls [`JobManager::on_zmq_event`].
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken, heartbeat_interval: Duration) {
        let long_poll = self.clone();
        let long_poll_cancel = cancel.clone();
        pool_async::tokio::spawn(async move { long_poll.run_long_poll(long_poll_cancel).await });

        let heartbeat = self.clone();
        let heartbeat_cancel = cancel.clone();
        pool_async::tokio::spawn(async move {
            heartbeat.run_heartbeat(heartbeat_cancel, heartbeat_interval).await
        });
    }

    /// Spawns `NumCPU()` notify workers draining `notify_rx` and fanning
    /// each job out through the registry. Call once; `notify_rx` is moved
    /// in, so a second call would have nothing to drain.
    pub fn spawn_notify_workers(self: &Arc<Self>, notify_rx: mpsc::Receiver<Arc<Job>>, cancel: CancellationToken) {
        if self.notify_rx_taken.swap(true, Ordering::SeqCst) {
            return;
        }
        let rx = Arc::new(AsyncMutex::new(notify_rx));
        let workers = num_cpus::get().max(1);
        for _ in 0..workers {
            let registry = self.registry.clone();
            let rx = rx.clone();
            let cancel = cancel.clone();
            pool_async::tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        pool_async::tokio::select! {
                            job = guard.recv() => job,
                            _ = cancel.cancelled() => None,
                        }
                    };
                    match job {
                        Some(job) => registry.broadcast(SessionEvent::NewJob(job)),
                        None => return,
                    }
                }
            });
        }
    }

    pub async fn on_zmq_event(self: &Arc<Self>, event: ZmqEvent, cancel: &CancellationToken) {
        match event {
            ZmqEvent::HashBlock { .. } | ZmqEvent::RawBlock { .. } => {
                if let Err(e) = self.refresh(cancel, false).await {
                    warn!("zmq-triggered refresh failed: {e}"; "component" => "job_manager");
                }
            }
        }
    }

    /// Drives the `getblocktemplate` long-poll loop: waits on whatever
    /// `longpollid` the current job carries (or none, the first time),
    /// then triggers a refresh on every response.
    async fn run_long_poll(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let longpoll_id = self.current_job().await.map(|j| j.longpollid.clone());
            let result = self
                .rpc
                .get_block_template(&["segwit"], longpoll_id.as_deref(), &cancel)
                .await;
            match result {
                Ok(template) => {
                    if let Err(e) = self.apply_template(template, &cancel).await {
                        self.record_error(e.to_string());
                    } else {
                        self.reset_backoff().await;
                    }
                }
                Err(e) => {
                    self.record_error(e.to_string());
                    let backoff = self.next_backoff().await;
                    pool_async::tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken, interval: Duration) {
        loop {
            pool_async::tokio::select! {
                _ = pool_async::tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return,
            }

            if let Err(e) = self.refresh(&cancel, true).await {
                warn!("heartbeat refresh failed: {e}"; "component" => "job_manager");
            }

            match self
                .rpc
                .call_ctx::<pool_rpc::BlockchainInfo>(
                    "getblockchaininfo",
                    serde_json::json!([]),
                    &cancel,
                    HEARTBEAT_CHAINGINFO_TIMEOUT,
                )
                .await
            {
                Ok(info) => {
                    let mut snapshot = self.node_sync.lock().expect("node sync mutex poisoned");
                    *snapshot = NodeSyncSnapshot {
                        blocks: info.blocks,
                        headers: info.headers,
                        ibd: info.ibd,
                        best_block_hash_known: true,
                    };
                }
                Err(e) => {
                    // A getblockchaininfo hiccup must not flap miner disconnects
                    // when a current job already exists.
                    if self.current_job().await.is_none() {
                        self.record_error(e.to_string());
                    } else {
                        debug!("getblockchaininfo transient error, current job retained: {e}");
                    }
                }
            }
        }
    }

    /// Forced or opportunistic refresh entry point: fetches a fresh
    /// template and applies it if it passes freshness and change
    /// detection. Serialized by `refresh_gate` with a minimum inter-attempt
    /// interval (skipped when `forced`).
    pub async fn refresh(self: &Arc<Self>, cancel: &CancellationToken, forced: bool) -> Result<(), crate::CoreError> {
        {
            let mut gate = self.refresh_gate.lock().await;
            if !forced {
                if let Some(last) = gate.last_attempt {
                    if last.elapsed() < MIN_REFRESH_INTERVAL {
                        return Ok(());
                    }
                }
            }
            gate.last_attempt = Some(Instant::now());
        }

        let template = self
            .rpc
            .get_block_template(&["segwit"], None, cancel)
            .await
            .map_err(|e| crate::CoreError::StaleTemplate(e.to_string()))?;

        self.apply_template(template, cancel).await
    }

    async fn apply_template(
        self: &Arc<Self>,
        template: pool_rpc::BlockTemplate,
        _cancel: &CancellationToken,
    ) -> Result<(), crate::CoreError> {
        if template.curtime == 0 {
            return Err(crate::CoreError::StaleTemplate("curtime is zero".into()));
        }

        let best_hash = self
            .rpc
            .get_best_block_hash()
            .await
            .map_err(|e| crate::CoreError::StaleTemplate(e.to_string()))?;
        if !best_hash.eq_ignore_ascii_case(&template.previousblockhash) {
            return Err(crate::CoreError::StaleTemplate(
                "template previousblockhash does not match node best hash".into(),
            ));
        }

        let current = self.current_job().await;
        if let Some(current) = &current {
            if template.height < current.height || template.curtime < current.curtime {
                return Err(crate::CoreError::StaleTemplate(
                    "template height/curtime regressed".into(),
                ));
            }
        }

        let txids: Vec<String> = template.transactions.iter().map(|t| t.txid.clone()).collect();
        let (needs_new_job, clean) = template_changed(current.as_deref(), &template, &txids);
        if !needs_new_job {
            return Ok(());
        }

        let job = build_job(&template, &self.cfg, clean)?;
        let job = Arc::new(job);

        {
            let mut guard = self.current.write().await;
            *guard = Some(job.clone());
        }

        if self.notify_tx.try_send(job.clone()).is_err() {
            // Notify queue itself is full: fall back to a synchronous
            // broadcast so miners still converge to the new job.
            self.registry.broadcast(SessionEvent::NewJob(job));
        }

        Ok(())
    }

    fn record_error(&self, message: String) {
        let mut ring = self.error_ring.lock().expect("error ring mutex poisoned");
        if ring.len() == ERROR_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(message);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_error_at.store(now, Ordering::Relaxed);
    }

    async fn next_backoff(&self) -> Duration {
        let mut gate = self.refresh_gate.lock().await;
        let delay = gate.backoff;
        gate.backoff = (gate.backoff * 2).min(self.retry_delay_max);
        delay
    }

    pub async fn reset_backoff(&self) {
        let mut gate = self.refresh_gate.lock().await;
        gate.backoff = self.retry_delay_min;
    }
}

/// Drains ZMQ events from the subscriber and triggers refreshes. Lives as
/// its own task so the job manager doesn't depend on `pool-zmq`'s channel
/// type beyond this pump.
pub async fn run_zmq_pump(
    manager: Arc<JobManager>,
    mut rx: mpsc::Receiver<ZmqEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = pool_async::tokio::select! {
            event = rx.recv() => event,
            _ = cancel.cancelled() => None,
        };
        match event {
            Some(event) => manager.on_zmq_event(event, &cancel).await,
            None => return,
        }
    }
}

pub fn zmq_health_summary(subscriber: &ZmqSubscriber) -> ZmqHealthSnapshot {
    subscriber.health().snapshot()
}
