//! Scripted radio backend for engine and daemon tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::radio::{Radio, RadioError, RadioParams};

/// Records every transmitted frame; CAD outcome and send failures are
/// scriptable.
pub struct MockRadio {
    params: RadioParams,
    sent: Mutex<Vec<Vec<u8>>>,
    fail_sends: AtomicBool,
    cad_detects: AtomicBool,
    thresholds: Mutex<(u8, u8)>,
    noise_floor_dbm: f64,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self {
            params: RadioParams {
                frequency_hz: 869_525_000,
                bandwidth_hz: 125_000,
                spreading_factor: 7,
                coding_rate: 5,
                preamble_length: 17,
                tx_power_dbm: 14,
            },
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            cad_detects: AtomicBool::new(false),
            thresholds: Mutex::new((23, 11)),
            noise_floor_dbm: -118.0,
        }
    }
}

impl MockRadio {
    pub fn with_params(params: RadioParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().expect("sent frames").clone()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn set_cad_detects(&self, detects: bool) {
        self.cad_detects.store(detects, Ordering::Relaxed);
    }

    pub fn cad_thresholds(&self) -> (u8, u8) {
        *self.thresholds.lock().expect("thresholds")
    }
}

#[async_trait]
impl Radio for MockRadio {
    fn params(&self) -> RadioParams {
        self.params
    }

    async fn send(&self, frame: &[u8], _wait_for_ack: bool) -> Result<(), RadioError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(RadioError::Tx("scripted failure".to_string()));
        }
        self.sent.lock().expect("sent frames").push(frame.to_vec());
        Ok(())
    }

    async fn noise_floor(&self) -> Option<f64> {
        Some(self.noise_floor_dbm)
    }

    async fn perform_cad(
        &self,
        _det_peak: u8,
        _det_min: u8,
        _timeout: Duration,
    ) -> Result<bool, RadioError> {
        Ok(self.cad_detects.load(Ordering::Relaxed))
    }

    fn set_cad_thresholds(&self, peak: u8, min: u8) {
        *self.thresholds.lock().expect("thresholds") = (peak, min);
    }
}
