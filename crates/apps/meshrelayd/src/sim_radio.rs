//! Simulated radio backend.
//!
//! Lets the daemon run end-to-end on a desk: transmits are logged and
//! dropped, the noise floor is a jittered constant, and CAD probes detect
//! activity with a small fixed probability.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use meshrelay_engine::{Radio, RadioError, RadioParams};

use crate::config::RadioSection;

const SIM_NOISE_FLOOR_DBM: f64 = -120.0;
const SIM_CAD_DETECT_PROBABILITY: f64 = 0.1;

pub struct SimRadio {
    params: RadioParams,
    cad_thresholds: Mutex<(u8, u8)>,
}

impl SimRadio {
    pub fn new(section: &RadioSection) -> Self {
        Self {
            params: RadioParams {
                frequency_hz: section.frequency,
                bandwidth_hz: section.bandwidth,
                spreading_factor: section.spreading_factor,
                coding_rate: section.coding_rate,
                preamble_length: section.preamble_length,
                tx_power_dbm: section.tx_power,
            },
            cad_thresholds: Mutex::new((section.cad.peak_threshold, section.cad.min_threshold)),
        }
    }
}

#[async_trait]
impl Radio for SimRadio {
    fn params(&self) -> RadioParams {
        self.params
    }

    async fn send(&self, frame: &[u8], _wait_for_ack: bool) -> Result<(), RadioError> {
        log::debug!("sim radio tx: {} bytes", frame.len());
        Ok(())
    }

    async fn noise_floor(&self) -> Option<f64> {
        let jitter: f64 = rand::thread_rng().gen_range(-2.0..4.0);
        Some(SIM_NOISE_FLOOR_DBM + jitter)
    }

    async fn perform_cad(
        &self,
        _det_peak: u8,
        _det_min: u8,
        timeout: Duration,
    ) -> Result<bool, RadioError> {
        tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
        Ok(rand::thread_rng().gen_bool(SIM_CAD_DETECT_PROBABILITY))
    }

    fn set_cad_thresholds(&self, peak: u8, min: u8) {
        *self.cad_thresholds.lock().expect("cad thresholds") = (peak, min);
        log::info!("sim radio CAD thresholds set: peak={peak}, min={min}");
    }
}

/// Pick the radio backend named by the config. The hardware transceiver
/// driver lives out-of-tree; this build supports the simulator only.
pub fn build_radio(section: &RadioSection) -> anyhow::Result<std::sync::Arc<dyn Radio>> {
    match section.driver.as_str() {
        "sim" => Ok(std::sync::Arc::new(SimRadio::new(section))),
        other => anyhow::bail!("unsupported radio driver '{other}' (expected \"sim\")"),
    }
}
