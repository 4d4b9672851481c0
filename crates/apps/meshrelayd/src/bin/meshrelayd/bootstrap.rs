//! Daemon assembly: config → identity → storage → publishers → engine →
//! router → timers.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use meshrelay_daemon::cad::CadCalibration;
use meshrelay_daemon::config::{Config, DEFAULT_CONFIG_PATH};
use meshrelay_daemon::context::{DaemonContext, RouterHandle};
use meshrelay_daemon::sim_radio::build_radio;
use meshrelay_daemon::{logbuf, router, timers};
use meshrelay_engine::airtime::AirtimeAccountant;
use meshrelay_engine::{EngineSettings, RepeaterEngine, RuntimeFlags};
use meshrelay_proto::Identity;
use meshrelay_storage::mqtt::{MqttPublisher, MqttSettings};
use meshrelay_storage::rrd::TimeSeriesStore;
use meshrelay_storage::upstream::{
    spawn_upstream, NodeCounters, RadioDescriptor, UpstreamSettings,
};
use meshrelay_storage::{Store, TelemetryCollector};

use crate::Args;

pub async fn bootstrap(args: Args) -> anyhow::Result<Arc<DaemonContext>> {
    let config_path = args
        .config
        .or_else(|| std::env::var_os("MESHRELAY_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = Config::from_path(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    let log_buffer = logbuf::init(&config.logging.level);

    log::info!("Initializing repeater: {}", config.repeater.node_name);

    let seed = config.identity_seed().context("resolving identity key")?;
    let identity = Identity::from_seed(&seed).context("loading identity")?;
    let local_hash = identity.local_hash();
    let pubkey_hex = identity.public_key_hex();
    log::info!("Local identity set: {pubkey_hex}");
    log::info!("Local node hash (from identity): 0x{local_hash:02x}");

    let radio = build_radio(&config.radio).context("initializing radio")?;
    radio.set_cad_thresholds(
        config.radio.cad.peak_threshold,
        config.radio.cad.min_threshold,
    );
    let params = radio.params();
    log::info!(
        "radio settings: SF={}, BW={}Hz, CR={}",
        params.spreading_factor,
        params.bandwidth_hz,
        params.coding_rate
    );

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating storage dir {}", config.storage_dir.display()))?;
    let store = Arc::new(
        Store::open(&config.storage_dir.join("repeater.db")).context("opening repeater.db")?,
    );
    let series_path = config.storage_dir.join("metrics.rrd");
    let series = TimeSeriesStore::open(&series_path);

    let flags = Arc::new(RuntimeFlags::new(
        config.repeater.mode == "monitor",
        config.duty_cycle.enforcement_enabled,
        config.mesh.global_flood_allow,
    ));
    let counters = Arc::new(NodeCounters::default());
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let mqtt = config.mqtt.enabled.then(|| {
        MqttPublisher::start(
            &MqttSettings {
                broker: config.mqtt.broker.clone(),
                port: config.mqtt.port,
                username: config.mqtt.username.clone(),
                password: config.mqtt.password.clone(),
                base_topic: config.mqtt.base_topic.clone(),
            },
            &config.repeater.node_name,
            cancel.clone(),
        )
    });
    if mqtt.is_none() {
        log::info!("MQTT disabled");
    }

    let upstream = config.letsmesh.enabled.then(|| {
        spawn_upstream(
            UpstreamSettings {
                iata_code: config.letsmesh.iata_code.clone(),
                broker_index: config.letsmesh.broker_index,
                status_interval_secs: config.letsmesh.status_interval.max(1),
                owner: config.letsmesh.owner.clone(),
                email: config.letsmesh.email.clone(),
                disallowed_packet_types: config.letsmesh.disallowed_packet_types.clone(),
                node_name: config.repeater.node_name.clone(),
                model: config.letsmesh.model.clone(),
                firmware_version: env!("CARGO_PKG_VERSION").to_string(),
                seed,
                pubkey_hex: pubkey_hex.clone(),
            },
            counters.clone(),
            RadioDescriptor {
                frequency_hz: params.frequency_hz,
                bandwidth_hz: params.bandwidth_hz,
                spreading_factor: params.spreading_factor,
                coding_rate: params.coding_rate,
            },
            started,
            cancel.clone(),
        )
    });

    let collector = Arc::new(TelemetryCollector::new(
        store.clone(),
        series,
        series_path,
        mqtt,
        upstream,
    ));

    let airtime = Arc::new(Mutex::new(AirtimeAccountant::new(
        config.duty_cycle.max_airtime_per_minute,
        flags.clone(),
    )));
    let engine = RepeaterEngine::new(
        local_hash,
        EngineSettings {
            cache_ttl: Duration::from_secs(config.repeater.cache_ttl),
            tx_delay_factor: config.delays.tx_delay_factor,
            direct_tx_delay_factor: config.delays.direct_tx_delay_factor,
            use_score_for_tx: config.repeater.use_score_for_tx,
        },
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
        config_path,
        flags,
        identity,
        local_hash,
        radio,
        engine: Mutex::new(engine),
        store,
        collector,
        counters,
        router: RouterHandle::new(router_tx),
        log_buffer,
        cad: CadCalibration::default(),
        started,
        cancel,
    });

    router::spawn_router(ctx.clone(), router_rx);
    timers::spawn_timers(ctx.clone());
    Ok(ctx)
}
