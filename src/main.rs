// =============================================================================
// quotebridge — Main Entry Point
// =============================================================================
//
// Brings up the realtime bridge from a YAML config: quote source, engine,
// publisher, optional control plane and health reporter. Without --config it
// falls back to config/run_config.yml, then to a built-in demo configuration
// honoring the REDIS_URL env var.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use quotebridge::bus::{Bus, RedisBus};
use quotebridge::config::{load_config, AppConfig};
use quotebridge::control_plane::{ControlPlane, ControlPlaneConfig};
use quotebridge::engine::{EngineConfig, SubscriptionEngine};
use quotebridge::error::BridgeError;
use quotebridge::health::{HealthConfig, HealthReporter};
use quotebridge::logging::setup_logging;
use quotebridge::metrics::Metrics;
use quotebridge::publisher::{BarPublisher, PublisherConfig};
use quotebridge::quote::mock::MockFeeder;
use quotebridge::quote::QuoteSource;
use quotebridge::registry::Registry;
use quotebridge::types::Period;

/// Bounded wait for background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "quotebridge", about = "Realtime bar bridge (config driven)")]
struct Args {
    /// Path to the YAML config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Minimal runnable configuration for quick local trials: demo codes, mock
/// feed on, control plane enabled, Redis from REDIS_URL or localhost.
fn build_demo_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.redis.url = Some(
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string()),
    );
    cfg.subscription.codes = vec!["510050.SH".into(), "159915.SZ".into()];
    cfg.subscription.preload_days = 1;
    cfg.mock.enabled = true;
    cfg.control.enabled = true;
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    // ── 1. Configuration ─────────────────────────────────────────────────
    let cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let default_path = PathBuf::from("config/run_config.yml");
            if default_path.exists() {
                load_config(&default_path)?
            } else {
                eprintln!(
                    "[INFO] no --config given; using demo configuration (set REDIS_URL to override)"
                );
                build_demo_config()
            }
        }
    };

    // ── 2. Logging ───────────────────────────────────────────────────────
    let _log_guard = setup_logging(&cfg.logging);
    info!(
        codes = cfg.subscription.codes.len(),
        periods = ?cfg.subscription.periods,
        mode = %cfg.subscription.mode,
        topic = %cfg.redis.topic,
        mock = cfg.mock.enabled,
        "config loaded"
    );

    let mode = cfg.subscription.parsed_mode()?;
    let periods = cfg.subscription.parsed_periods()?;

    // ── 3. Bus clients ───────────────────────────────────────────────────
    // Publisher, control plane, and health reporter each get their own
    // connection so a slow consumer cannot stall the others.
    let redis_url = cfg.redis.connection_url()?;
    let pub_bus: Arc<dyn Bus> = Arc::new(
        RedisBus::connect(&redis_url)
            .await
            .context("failed to connect publisher bus")?,
    );

    // ── 4. Quote source ──────────────────────────────────────────────────
    let quote: Arc<dyn QuoteSource> = if cfg.mock.enabled {
        info!("mock feed active, vendor connector skipped");
        Arc::new(MockFeeder::new(cfg.mock.feeder_config()))
    } else {
        // Native vendor bindings are not linked into this build; without the
        // mock feed there is nothing to source bars from.
        return Err(BridgeError::VendorUnavailable(
            "native vendor bindings unavailable; enable the mock section or run on a vendor host"
                .into(),
        )
        .into());
    };

    // ── 5. Publisher + engine ────────────────────────────────────────────
    let metrics = Arc::new(Metrics::new());
    let publisher = Arc::new(BarPublisher::new(
        pub_bus,
        PublisherConfig::new(cfg.redis.topic.clone(), mode),
        metrics.clone(),
    ));
    let engine = SubscriptionEngine::new(
        quote.clone(),
        publisher,
        metrics.clone(),
        EngineConfig {
            mode,
            default_preload_days: cfg.subscription.preload_days,
            ..EngineConfig::default()
        },
    );
    engine.start();

    // Initial subscription set: preload then activate, synchronously.
    engine
        .add_subscription(&cfg.subscription.codes, &periods, cfg.subscription.preload_days)
        .await
        .context("initial subscription failed")?;
    info!(
        codes = cfg.subscription.codes.len(),
        periods = periods.len(),
        "initial subscriptions active"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut background: Vec<(&str, JoinHandle<()>)> = Vec::new();

    // ── 6. Control plane (optional) ──────────────────────────────────────
    if cfg.control.enabled {
        let ctrl_bus: Arc<dyn Bus> = Arc::new(
            RedisBus::connect(&redis_url)
                .await
                .context("failed to connect control bus")?,
        );
        let registry = Registry::new(ctrl_bus.clone(), cfg.control.registry_prefix.clone());

        // Restart recovery: replay persisted specs before accepting new ones.
        replay_registry(&registry, &engine).await;

        let plane = ControlPlane::new(
            ctrl_bus.clone(),
            registry,
            engine.clone(),
            ControlPlaneConfig {
                channel: cfg.control.channel.clone(),
                ack_prefix: cfg.control.ack_prefix.clone(),
                accept_strategies: cfg.control.accept_strategies.clone(),
            },
            cfg.redis.topic.clone(),
        );
        let rx = stop_rx.clone();
        background.push((
            "control-plane",
            tokio::spawn(async move { plane.run(rx).await }),
        ));
        info!(channel = %cfg.control.channel, ack = %cfg.control.ack_prefix, "control plane started");
    }

    // ── 7. Health reporter (optional) ────────────────────────────────────
    if cfg.health.enabled {
        let health_bus: Arc<dyn Bus> = Arc::new(
            RedisBus::connect(&redis_url)
                .await
                .context("failed to connect health bus")?,
        );
        let extra = json!({
            "codes": cfg.subscription.codes,
            "periods": cfg.subscription.periods,
            "mode": cfg.subscription.mode,
            "topic": cfg.redis.topic,
            "instance_tag": cfg.health.instance_tag,
        });
        let reporter = HealthReporter::new(
            health_bus,
            metrics.clone(),
            HealthConfig {
                key_prefix: cfg.health.key_prefix.clone(),
                interval_secs: cfg.health.interval_sec,
                ttl_secs: cfg.health.ttl_sec,
                instance_tag: cfg.health.instance_tag.clone(),
            },
            extra,
        );
        let rx = stop_rx.clone();
        background.push((
            "health-reporter",
            tokio::spawn(async move { reporter.run(rx).await }),
        ));
    }

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping");

    let _ = stop_tx.send(true);
    engine.stop().await;
    for (name, handle) in background {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = %e, "background task panicked"),
            Err(_) => warn!(task = name, "background task did not stop in time"),
        }
    }

    info!("quotebridge shut down complete");
    Ok(())
}

/// Best-effort replay of persisted subscription specs. A spec that fails to
/// activate is logged and skipped; it stays in the registry for inspection.
async fn replay_registry(registry: &Registry, engine: &Arc<SubscriptionEngine>) {
    let sub_ids = match registry.list_all().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "registry replay skipped");
            return;
        }
    };
    for sub_id in sub_ids {
        let spec = match registry.load(&sub_id).await {
            Ok(Some(spec)) => spec,
            Ok(None) => continue,
            Err(e) => {
                warn!(sub_id = %sub_id, error = %e, "registry replay load failed");
                continue;
            }
        };
        let periods: Result<Vec<Period>, _> =
            spec.periods.iter().map(|p| p.parse()).collect();
        let periods = match periods {
            Ok(p) => p,
            Err(e) => {
                warn!(sub_id = %sub_id, error = %e, "registry replay has bad periods");
                continue;
            }
        };
        match engine
            .add_subscription(&spec.codes, &periods, spec.preload_days)
            .await
        {
            Ok(()) => info!(sub_id = %sub_id, strategy = %spec.strategy_id, "replayed subscription"),
            Err(e) => warn!(sub_id = %sub_id, error = %e, "replay failed"),
        }
    }
}
