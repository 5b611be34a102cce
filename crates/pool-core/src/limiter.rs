//! Accept-rate limiter: a token bucket guarding how fast the listener
//! hands out new connections, so a connect flood can't exhaust file
//! descriptors or the registry's extranonce1 space in a burst.

use std::sync::Mutex;
use std::time::Instant;

pub struct AcceptLimiter {
    max_rate: f64,
    max_burst: f64,
    state: Mutex<State>,
}

struct State {
    tokens: f64,
    last_refill: Instant,
}

impl AcceptLimiter {
    pub fn new(max_accepts_per_second: f64, max_burst: u32) -> Self {
        Self {
            max_rate: max_accepts_per_second,
            max_burst: max_burst as f64,
            state: Mutex::new(State {
                tokens: max_burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempts to consume one token for a new accept. Returns `false` if
    /// the bucket is empty, meaning the caller should close the connection
    /// immediately rather than let a Stratum session start.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("limiter mutex poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.max_rate).min(self.max_burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_consumed_then_refused() {
        let limiter = AcceptLimiter::new(1.0, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = AcceptLimiter::new(1000.0, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(limiter.try_acquire());
    }
}
