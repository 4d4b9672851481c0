//! Shared harness for the daemon integration tests: a full context wired
//! around a mock radio and in-memory storage, with the router running.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use meshrelay_daemon::cad::CadCalibration;
use meshrelay_daemon::config::Config;
use meshrelay_daemon::context::{DaemonContext, RouterHandle};
use meshrelay_daemon::router::spawn_router;
use meshrelay_engine::airtime::AirtimeAccountant;
use meshrelay_engine::testing::MockRadio;
use meshrelay_engine::{EngineSettings, RepeaterEngine, RuntimeFlags};
use meshrelay_proto::Identity;
use meshrelay_storage::rrd::TimeSeriesStore;
use meshrelay_storage::upstream::NodeCounters;
use meshrelay_storage::{Store, TelemetryCollector};

pub const TEST_SEED: [u8; 32] = [11u8; 32];

pub fn test_context() -> (Arc<DaemonContext>, Arc<MockRadio>) {
    let config = Config::default();
    let flags = Arc::new(RuntimeFlags::new(
        false,
        config.duty_cycle.enforcement_enabled,
        config.mesh.global_flood_allow,
    ));
    let identity = Identity::from_seed(&TEST_SEED).expect("identity");
    let local_hash = identity.local_hash();
    let radio = Arc::new(MockRadio::default());
    let store = Arc::new(Store::in_memory().expect("store"));
    let counters = Arc::new(NodeCounters::default());
    let cancel = CancellationToken::new();
    let collector = Arc::new(TelemetryCollector::new(
        store.clone(),
        TimeSeriesStore::new(),
        std::env::temp_dir().join("meshrelayd-test-metrics.rrd"),
        None,
        None,
    ));
    let airtime = Arc::new(Mutex::new(AirtimeAccountant::new(
        config.duty_cycle.max_airtime_per_minute,
        flags.clone(),
    )));
    let engine = RepeaterEngine::new(
        local_hash,
        EngineSettings::default(),
        flags.clone(),
        radio.clone(),
        airtime,
        store.clone(),
        collector.clone(),
        counters.clone(),
        cancel.clone(),
    );

    let (router_tx, router_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(DaemonContext {
        config: Mutex::new(config),
        config_path: std::env::temp_dir().join("meshrelayd-test-config.yaml"),
        flags,
        identity,
        local_hash,
        radio: radio.clone(),
        engine: Mutex::new(engine),
        store,
        collector,
        counters,
        router: RouterHandle::new(router_tx),
        log_buffer: Arc::new(Mutex::new(std::collections::VecDeque::new())),
        cad: CadCalibration::default(),
        started: Instant::now(),
        cancel,
    });
    spawn_router(ctx.clone(), router_rx);
    (ctx, radio)
}

/// Wait for the router worker and any scheduled retransmits to settle.
pub async fn wait_for_sends(radio: &MockRadio, expected: usize) -> Vec<Vec<u8>> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let sent = radio.sent();
        if sent.len() >= expected || Instant::now() > deadline {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
