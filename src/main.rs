// =============================================================================
// Signal Council: Main Entry Point
// =============================================================================
//
// Wires the registry, learner, regime detector, crisis monitor and aggregator
// into one `AppState`, spawns the background loops and serves the REST API.
// Configuration is read once at startup; learned state lives in memory only.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod components;
mod crisis;
mod decision;
mod learning;
mod regime;
mod runtime_config;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::components::{default_catalog, register_catalog};
use crate::crisis::{EventDetector, HttpEventDetector, IdleDetector};
use crate::runtime_config::{MonitorParams, RuntimeConfig};

const DEFAULT_CONFIG_PATH: &str = "council_config.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Pick the event detector: the HTTP provider when an endpoint and
/// credentials are configured, otherwise the idle detector.
fn build_detector(params: &MonitorParams) -> anyhow::Result<Arc<dyn EventDetector>> {
    let Some(url) = params.detector_url.as_deref().filter(|u| !u.is_empty()) else {
        warn!("No detector endpoint configured; crisis monitor will idle");
        return Ok(Arc::new(IdleDetector));
    };

    let key = std::env::var("COUNCIL_DETECTOR_KEY").unwrap_or_default();
    let secret = std::env::var("COUNCIL_DETECTOR_SECRET").unwrap_or_default();
    if key.is_empty() || secret.is_empty() {
        warn!(
            url,
            "COUNCIL_DETECTOR_KEY / COUNCIL_DETECTOR_SECRET not set; crisis monitor will idle"
        );
        return Ok(Arc::new(IdleDetector));
    }

    let detector = HttpEventDetector::new(
        url,
        &key,
        secret,
        Duration::from_secs(params.detector_timeout_secs.max(1)),
    )
    .context("failed to build event detector client")?;
    info!(url, "HTTP event detector configured");
    Ok(Arc::new(detector))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              Signal Council: Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("COUNCIL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(path = %config_path, error = %e, "Failed to load config, using defaults");
        let defaults = RuntimeConfig::default();
        // Leave an editable template behind on first run; never clobber a
        // file that exists but failed to parse.
        if !Path::new(&config_path).exists() {
            match defaults.save(&config_path) {
                Ok(()) => info!(path = %config_path, "Default config template written"),
                Err(e) => warn!(path = %config_path, error = %e, "Failed to write config template"),
            }
        }
        defaults
    });

    info!(
        daily_budget = config.monitor.daily_budget,
        sectors = config.sectors.len(),
        "Configuration loaded"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let detector = build_detector(&config.monitor)?;
    let (state, feedback_rx) = AppState::new(config, detector);
    let registered = register_catalog(&state.registry, default_catalog())
        .context("failed to register component catalog")?;
    info!(components = registered, "Component catalog registered");
    let state = Arc::new(state);

    // ── 3. Feedback worker ───────────────────────────────────────────────
    tokio::spawn(learning::run_feedback_worker(
        feedback_rx,
        Arc::clone(&state.registry),
        Arc::clone(&state.learner),
    ));

    // ── 4. Crisis monitor scheduler ──────────────────────────────────────
    tokio::spawn(crisis::run_crisis_monitor(
        Arc::clone(&state.crisis_monitor),
        Arc::clone(&state.scheduler),
    ));

    // ── 5. Regime updater ────────────────────────────────────────────────
    tokio::spawn(regime::run_regime_updater(Arc::clone(&state.regime_detector)));

    // ── 6. Start the API server ──────────────────────────────────────────
    let bind_addr = std::env::var("COUNCIL_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(Arc::clone(&state));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!(
        decisions = state.recent_decisions.read().len(),
        "Shutdown signal received, stopping"
    );

    info!("Signal Council shut down complete.");
    Ok(())
}
