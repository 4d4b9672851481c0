//! Background timers: one supervised 5-second tick driving the periodic
//! noise-floor sample, the periodic advert, cache hygiene, the time-series
//! snapshot and the daily retention sweep.

use std::sync::Arc;
use std::time::Duration;

use crate::context::DaemonContext;

const TICK: Duration = Duration::from_secs(5);
const NOISE_FLOOR_INTERVAL: Duration = Duration::from_secs(30);
const SERIES_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 3600);
const RETENTION_DAYS: u32 = 7;
const RESTART_BACKOFF: Duration = Duration::from_secs(30);

/// Supervisor: run the tick loop, restart it after a bounded backoff if it
/// ever faults.
pub fn spawn_timers(ctx: Arc<DaemonContext>) {
    tokio::spawn(async move {
        let cancel = ctx.cancel.clone();
        loop {
            let mut worker = tokio::spawn(run_timer_loop(ctx.clone()));
            tokio::select! {
                _ = cancel.cancelled() => {
                    worker.abort();
                    break;
                }
                result = &mut worker => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match result {
                        Err(err) if err.is_panic() => {
                            log::error!("background timer task panicked: {err}");
                        }
                        _ => log::error!("background timer task exited unexpectedly"),
                    }
                }
            }
            log::info!("restarting timer task in {}s", RESTART_BACKOFF.as_secs());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RESTART_BACKOFF) => {}
            }
        }
    });
}

async fn run_timer_loop(ctx: Arc<DaemonContext>) {
    let mut tick = tokio::time::interval(TICK);
    let mut last_noise = tokio::time::Instant::now() - NOISE_FLOOR_INTERVAL;
    let mut last_flush = tokio::time::Instant::now();
    let mut last_cache_cleanup = tokio::time::Instant::now();
    let mut last_retention = tokio::time::Instant::now();
    let mut last_advert = tokio::time::Instant::now();

    loop {
        tick.tick().await;
        let now = tokio::time::Instant::now();

        if now.duration_since(last_noise) >= NOISE_FLOOR_INTERVAL {
            if let Some(dbm) = ctx.radio.noise_floor().await {
                ctx.collector
                    .record_noise_floor(meshrelay_proto::now_epoch_secs(), dbm);
            }
            last_noise = now;
        }

        let advert_interval_hours = {
            let config = ctx.config.lock().expect("config lock");
            config.repeater.send_advert_interval_hours
        };
        if advert_interval_hours > 0.0 {
            let interval = Duration::from_secs_f64(advert_interval_hours * 3600.0);
            if now.duration_since(last_advert) >= interval {
                log::info!("Periodic advert interval elapsed, sending advert");
                if ctx.send_advert().await {
                    last_advert = now;
                } else {
                    log::warn!("Failed to send periodic advert");
                }
            }
        }

        if now.duration_since(last_cache_cleanup) >= CACHE_CLEANUP_INTERVAL {
            ctx.engine.lock().expect("engine lock").cleanup_cache();
            last_cache_cleanup = now;
        }

        if now.duration_since(last_flush) >= SERIES_FLUSH_INTERVAL {
            ctx.collector.flush_series();
            last_flush = now;
        }

        if now.duration_since(last_retention) >= RETENTION_INTERVAL {
            match ctx.store.cleanup_old_data(RETENTION_DAYS) {
                Ok((packets, adverts, noise)) => {
                    if packets > 0 || adverts > 0 || noise > 0 {
                        log::info!(
                            "Cleaned up {packets} old packets, {adverts} old adverts, {noise} old noise measurements"
                        );
                    }
                }
                Err(err) => log::error!("retention sweep failed: {err}"),
            }
            last_retention = now;
        }
    }
}
