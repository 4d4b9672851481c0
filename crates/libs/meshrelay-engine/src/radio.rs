//! Hardware abstraction for the single radio.
//!
//! The daemon picks a concrete backend at startup; everything else talks to
//! this trait. The dispatcher serialises access, so implementations only
//! need interior mutability for their own state.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy)]
pub struct RadioParams {
    pub frequency_hz: u64,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub preamble_length: u16,
    pub tx_power_dbm: i8,
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("transmit failed: {0}")]
    Tx(String),

    #[error("channel activity detection failed: {0}")]
    Cad(String),
}

#[async_trait]
pub trait Radio: Send + Sync {
    fn params(&self) -> RadioParams;

    /// Transmit a raw frame. `wait_for_ack` is always false for repeated
    /// traffic; it exists for reply frames that want link-level confirmation.
    async fn send(&self, frame: &[u8], wait_for_ack: bool) -> Result<(), RadioError>;

    /// Instantaneous noise floor in dBm, if the chip can report one.
    async fn noise_floor(&self) -> Option<f64>;

    /// Run one channel-activity-detection probe with explicit thresholds.
    async fn perform_cad(
        &self,
        det_peak: u8,
        det_min: u8,
        timeout: Duration,
    ) -> Result<bool, RadioError>;

    fn set_cad_thresholds(&self, peak: u8, min: u8);
}
