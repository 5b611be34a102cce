//! Per-miner variable-difficulty controller: an EMA hashrate estimate
//! driving a target-shares-per-minute control loop, bounded by
//! `[min_diff, max_diff]`.

use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct VardiffParams {
    pub target_shares_per_min: f64,
    pub adjustment_window: Duration,
    pub step: f64,
    pub damping_factor: f64,
    pub min_diff: f64,
    pub max_diff: f64,
    pub hashrate_ema_tau: Duration,
    pub initial_hashrate_ema_tau: Duration,
}

const HASHES_PER_DIFFICULTY_1: f64 = 4_294_967_296.0;

/// One instance lives on each `MinerConn`. Not `Send`-shared; the owning
/// session drives it from its single read loop.
pub struct Vardiff {
    params: VardiffParams,
    current_diff: f64,
    ema_hashrate: f64,
    bootstrap_started_at: Instant,
    last_share_at: Option<Instant>,
    last_change_at: Instant,
    adjustment_count: u32,
}

impl Vardiff {
    pub fn new(params: VardiffParams, initial_diff: f64) -> Self {
        let now = Instant::now();
        Self {
            current_diff: initial_diff.clamp(params.min_diff, params.max_diff),
            params,
            ema_hashrate: 0.0,
            bootstrap_started_at: now,
            last_share_at: None,
            last_change_at: now,
            adjustment_count: 0,
        }
    }

    pub fn current_difficulty(&self) -> f64 {
        self.current_diff
    }

    /// The rolling hashrate EMA driving the control loop, in hashes/second.
    /// Zero until the first accepted share.
    pub fn ema_hashrate(&self) -> f64 {
        self.ema_hashrate
    }

    /// Call on every accepted (or low-difficulty-but-validatable) share.
    /// Updates the hashrate EMA and, if both the adjustment window and the
    /// bootstrap interval have elapsed, may return a new difficulty.
    pub fn on_share(&mut self, share_difficulty: f64, now: Instant) -> Option<f64> {
        let dt = match self.last_share_at {
            Some(last) => now.duration_since(last).as_secs_f64().max(0.001),
            None => {
                self.last_share_at = Some(now);
                return None;
            }
        };
        self.last_share_at = Some(now);

        let instantaneous_hashrate = share_difficulty * HASHES_PER_DIFFICULTY_1 / dt;
        let bootstrapping = now.duration_since(self.bootstrap_started_at) < self.params.initial_hashrate_ema_tau;
        if bootstrapping || self.ema_hashrate == 0.0 {
            self.ema_hashrate = instantaneous_hashrate;
        } else {
            let tau = self.params.hashrate_ema_tau.as_secs_f64().max(1.0);
            let alpha = 1.0 - (-dt / tau).exp();
            self.ema_hashrate += alpha * (instantaneous_hashrate - self.ema_hashrate);
        }

        if now.duration_since(self.last_change_at) < self.params.adjustment_window {
            return None;
        }

        self.apply_adjustment(now)
    }

    fn apply_adjustment(&mut self, now: Instant) -> Option<f64> {
        if self.ema_hashrate <= 0.0 {
            return None;
        }

        let suggested = self.ema_hashrate * 60.0 / self.params.target_shares_per_min / HASHES_PER_DIFFICULTY_1;
        let mut next = self.current_diff + (suggested - self.current_diff) * self.params.damping_factor;

        // The first two adjustments use step^2 to accelerate convergence
        // out of a deliberately conservative starting difficulty.
        if self.adjustment_count < 2 {
            let ratio = (next / self.current_diff).max(1e-9);
            let accelerated_ratio = ratio.powf(self.params.step);
            next = self.current_diff * accelerated_ratio;
        }

        next = next.clamp(self.params.min_diff, self.params.max_diff);

        if (next - self.current_diff).abs() / self.current_diff < 1e-9 {
            return None;
        }

        self.current_diff = next;
        self.last_change_at = now;
        self.adjustment_count += 1;
        Some(self.current_diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> VardiffParams {
        VardiffParams {
            target_shares_per_min: 5.0,
            adjustment_window: Duration::from_secs(0),
            step: 2.0,
            damping_factor: 1.0,
            min_diff: 1.0,
            max_diff: 1_000_000.0,
            hashrate_ema_tau: Duration::from_secs(300),
            initial_hashrate_ema_tau: Duration::from_secs(1),
        }
    }

    #[test]
    fn never_emits_outside_bounds() {
        let mut vd = Vardiff::new(params(), 1.0);
        let mut now = Instant::now();
        for _ in 0..20 {
            now += Duration::from_millis(500);
            if let Some(d) = vd.on_share(1.0, now) {
                assert!(d >= params().min_diff && d <= params().max_diff);
            }
        }
    }

    #[test]
    fn converges_upward_for_fast_miner() {
        let mut vd = Vardiff::new(params(), 1.0);
        let mut now = Instant::now();
        let mut last = vd.current_difficulty();
        for _ in 0..10 {
            now += Duration::from_millis(100); // far faster than 5/min target
            if let Some(d) = vd.on_share(1.0, now) {
                assert!(d >= last);
                last = d;
            }
        }
        assert!(last > 1.0);
    }
}
