//! Airtime accountant: rolling-window duty-cycle bookkeeping.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::RuntimeFlags;

const WINDOW: Duration = Duration::from_secs(60);

/// Estimate on-air time for a frame from the spreading-factor-parameterised
/// symbol time: `symbol_ms = 2^SF / bw_khz`, preamble of 8 symbols, payload
/// of `(len + 4.25) * 8` symbols.
pub fn estimate_airtime_ms(frame_len: usize, spreading_factor: u8, bandwidth_hz: u32) -> f64 {
    let bw_khz = f64::from(bandwidth_hz) / 1000.0;
    let symbol_ms = f64::from(1u32 << u32::from(spreading_factor)) / bw_khz;
    let preamble_ms = 8.0 * symbol_ms;
    let payload_symbols = (frame_len as f64 + 4.25) * 8.0;
    preamble_ms + payload_symbols * symbol_ms
}

#[derive(Debug, Clone, Serialize)]
pub struct AirtimeStats {
    pub current_airtime_ms: f64,
    pub max_airtime_ms: f64,
    pub utilization_percent: f64,
    pub total_airtime_ms: f64,
}

pub struct AirtimeAccountant {
    history: VecDeque<(Instant, f64)>,
    max_airtime_per_minute: f64,
    flags: Arc<RuntimeFlags>,
    total_airtime_ms: f64,
}

impl AirtimeAccountant {
    pub fn new(max_airtime_per_minute: f64, flags: Arc<RuntimeFlags>) -> Self {
        Self {
            history: VecDeque::new(),
            max_airtime_per_minute,
            flags,
            total_airtime_ms: 0.0,
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((ts, _)) = self.history.front() {
            if now.duration_since(*ts) >= WINDOW {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_sum(&self) -> f64 {
        self.history.iter().map(|(_, ms)| ms).sum()
    }

    /// Admission check: `(ok, wait_secs)`. With enforcement off every frame
    /// is admitted. When denied, the wait is the time until the oldest
    /// window entry expires.
    pub fn can_transmit(&mut self, airtime_ms: f64) -> (bool, f64) {
        if !self.flags.duty_cycle_enforced() {
            return (true, 0.0);
        }
        let now = Instant::now();
        self.evict_expired(now);

        if self.window_sum() + airtime_ms <= self.max_airtime_per_minute {
            return (true, 0.0);
        }
        if let Some((oldest, _)) = self.history.front() {
            let wait = WINDOW
                .checked_sub(now.duration_since(*oldest))
                .unwrap_or_default()
                .as_secs_f64();
            return (false, wait);
        }
        (false, 1.0)
    }

    pub fn record_tx(&mut self, airtime_ms: f64) {
        self.history.push_back((Instant::now(), airtime_ms));
        self.total_airtime_ms += airtime_ms;
        log::debug!(
            "TX recorded: {airtime_ms:.1}ms (total: {:.0}ms)",
            self.total_airtime_ms
        );
    }

    pub fn stats(&mut self) -> AirtimeStats {
        self.evict_expired(Instant::now());
        let current = self.window_sum();
        AirtimeStats {
            current_airtime_ms: current,
            max_airtime_ms: self.max_airtime_per_minute,
            utilization_percent: (current / self.max_airtime_per_minute) * 100.0,
            total_airtime_ms: self.total_airtime_ms,
        }
    }

    #[cfg(test)]
    fn backdate_all(&mut self, by: Duration) {
        for entry in &mut self.history {
            entry.0 -= by;
        }
    }
}
