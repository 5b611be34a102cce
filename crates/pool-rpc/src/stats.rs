use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-call latency and connection-health bookkeeping for the RPC client.
/// The hot counters (`last`, `max`, call/error totals) are plain atomics;
/// the rolling 1h min/avg/max is a small pruned ring behind a mutex, since
/// it's only read by the health snapshot, not on every call.
#[derive(Default)]
pub struct RpcStats {
    last_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
    calls_total: AtomicU64,
    errors_total: AtomicU64,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
    window: Mutex<VecDeque<(Instant, Duration)>>,
}

const WINDOW: Duration = Duration::from_secs(3600);

impl RpcStats {
    pub fn record_call(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        self.last_latency_ms.store(ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(ms, Ordering::Relaxed);

        let now = Instant::now();
        let mut window = self.window.lock().expect("rpc stats mutex poisoned");
        window.push_back((now, latency));
        while let Some((t, _)) = window.front() {
            if now.duration_since(*t) > WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RpcStatsSnapshot {
        let window = self.window.lock().expect("rpc stats mutex poisoned");
        let (min, avg, max) = if window.is_empty() {
            (0, 0, 0)
        } else {
            let mut min = u64::MAX;
            let mut max = 0u64;
            let mut sum = 0u64;
            for (_, d) in window.iter() {
                let ms = d.as_millis() as u64;
                min = min.min(ms);
                max = max.max(ms);
                sum += ms;
            }
            (min, sum / window.len() as u64, max)
        };

        RpcStatsSnapshot {
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            calls_total: self.calls_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            window_min_ms: min,
            window_avg_ms: avg,
            window_max_ms: max,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RpcStatsSnapshot {
    pub last_latency_ms: u64,
    pub max_latency_ms: u64,
    pub calls_total: u64,
    pub errors_total: u64,
    pub disconnects: u64,
    pub reconnects: u64,
    pub window_min_ms: u64,
    pub window_avg_ms: u64,
    pub window_max_ms: u64,
}
