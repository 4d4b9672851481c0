//! Durable telemetry for the repeater.
//!
//! Three sinks behind one collector: the relational store (sqlite rows for
//! packets, adverts, noise and transport keys), the round-robin time-series
//! store feeding the dashboard graphs, and the MQTT publishers (local broker
//! plus the authenticated upstream broker).

pub mod collector;
pub mod mqtt;
pub mod records;
pub mod rrd;
pub mod sqlite;
pub mod upstream;

pub use collector::TelemetryCollector;
pub use records::{AdvertObservation, AdvertRow, FloodPolicy, PacketRecord, TransportKey};
pub use sqlite::Store;
