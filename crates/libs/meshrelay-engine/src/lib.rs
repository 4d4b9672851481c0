//! The packet-handling data plane.
//!
//! Pure decision logic (validate, dedupe, rewrite the path, compute the
//! transmit delay) plus the airtime gate and the scheduled retransmit task.
//! The radio sits behind the [`radio::Radio`] trait chosen at daemon start.

pub mod airtime;
pub mod dedupe;
pub mod keys;
pub mod radio;
pub mod repeater;
pub mod score;
pub mod testing;

pub use radio::{Radio, RadioError, RadioParams};
pub use repeater::{EngineSettings, EngineStats, RecentEntry, RepeaterEngine};

use std::sync::atomic::{AtomicBool, Ordering};

/// Hot config fields the HTTP handlers flip and the engine reads without a
/// lock. Each field is single-writer/single-reader with no compound
/// invariants across them.
#[derive(Debug)]
pub struct RuntimeFlags {
    monitor_mode: AtomicBool,
    duty_cycle_enforced: AtomicBool,
    global_flood_allow: AtomicBool,
}

impl RuntimeFlags {
    pub fn new(monitor_mode: bool, duty_cycle_enforced: bool, global_flood_allow: bool) -> Self {
        Self {
            monitor_mode: AtomicBool::new(monitor_mode),
            duty_cycle_enforced: AtomicBool::new(duty_cycle_enforced),
            global_flood_allow: AtomicBool::new(global_flood_allow),
        }
    }

    pub fn monitor_mode(&self) -> bool {
        self.monitor_mode.load(Ordering::Relaxed)
    }

    pub fn set_monitor_mode(&self, value: bool) {
        self.monitor_mode.store(value, Ordering::Relaxed);
    }

    pub fn duty_cycle_enforced(&self) -> bool {
        self.duty_cycle_enforced.load(Ordering::Relaxed)
    }

    pub fn set_duty_cycle_enforced(&self, value: bool) {
        self.duty_cycle_enforced.store(value, Ordering::Relaxed);
    }

    pub fn global_flood_allow(&self) -> bool {
        self.global_flood_allow.load(Ordering::Relaxed)
    }

    pub fn set_global_flood_allow(&self, value: bool) {
        self.global_flood_allow.store(value, Ordering::Relaxed);
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::new(false, true, true)
    }
}
