//! Geofusion engine binary.
//!
//! Wires the fusion core to its collaborators: HTTP feed collectors on the
//! input side, the observer API on the output side, the durable event log,
//! and the optional geocoding and duplicate-judging backends.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `geofusion-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Connect the durable event log (in-memory fallback)
//! 4. Build the geocoder chain and the duplicate judge
//! 5. Create the event store and ingestion pipeline
//! 6. Register one collector per configured source
//! 7. Start the observer API server
//! 8. Run collectors until `Ctrl-C`, then shut down cleanly

mod error;
mod feeds;
mod geocode;
mod judge;

use std::path::PathBuf;
use std::sync::Arc;

use geofusion_core::collector::CollectorRegistry;
use geofusion_core::config::{FusionConfig, LoggingConfig};
use geofusion_core::geocode::{CachedGeocoder, ChainGeocoder, GazetteerGeocoder, Geocoder};
use geofusion_core::normalizer::Normalizer;
use geofusion_core::pipeline::Pipeline;
use geofusion_core::store::EventStore;
use geofusion_core::verify::{GuardedVerifier, Verifier};
use geofusion_db::EventLog;
use geofusion_observer::{AppState, ServerConfig};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::feeds::HttpFeedCollector;
use crate::geocode::NominatimGeocoder;
use crate::judge::LlmJudge;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        port = config.server.port,
        sources = config.sources.len(),
        hotspot_threshold = config.fusion.hotspot_threshold,
        dedup_window_secs = config.fusion.dedup_window_secs,
        "geofusion-engine starting"
    );

    // 3. Durable event log.
    let infra = &config.infrastructure;
    let log = if infra.use_dragonfly {
        info!(url = infra.dragonfly_url, "Connecting to Dragonfly");
        EventLog::connect(&infra.dragonfly_url, &infra.stream_key_prefix, infra.stream_max_len).await
    } else {
        EventLog::in_memory(infra.stream_max_len)
    };
    log.log_mode();
    let log = Arc::new(log);

    // 4. Geocoding and verification backends.
    let geocoder = build_geocoder(&config)?;
    let verifier = build_verifier(&config)?;

    // 5. Store and pipeline.
    let store = Arc::new(EventStore::new(&config));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Normalizer::new(config.severity.clone(), geocoder),
        verifier,
        Arc::clone(&log),
    ));
    info!("Event store and pipeline ready");

    // 6. Collectors.
    let mut registry = CollectorRegistry::new();
    for source in &config.sources {
        registry.register(Arc::new(HttpFeedCollector::new(source.clone())?))?;
    }
    if registry.is_empty() {
        warn!("No sources configured, the engine will serve an empty picture");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 7. Observer API server.
    let app_state = AppState::new(Arc::clone(&store), Arc::clone(&log))
        .with_queue_capacity(config.server.observer_queue_capacity)
        .with_cors_origins(config.server.cors_origins.clone());
    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    let observer_handle =
        geofusion_observer::spawn_observer(server_config, Arc::new(app_state), shutdown_rx.clone())
            .map_err(EngineError::from)?;

    // 8. Run until Ctrl-C.
    let collector_handles = registry.spawn_all(&pipeline, &shutdown_rx);
    info!(collectors = registry.len(), names = ?registry.names(), "Collectors running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    for handle in collector_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Collector task ended abnormally");
        }
    }
    if let Err(e) = observer_handle.await {
        warn!(error = %e, "Observer task ended abnormally");
    }

    info!("geofusion-engine shutdown complete");
    Ok(())
}

/// Load configuration from `GEOFUSION_CONFIG` or `geofusion-config.yaml`.
///
/// A missing file is not an error: the documented defaults apply.
fn load_config() -> Result<FusionConfig, EngineError> {
    let path = std::env::var("GEOFUSION_CONFIG")
        .map_or_else(|_| PathBuf::from("geofusion-config.yaml"), PathBuf::from);
    if path.exists() {
        Ok(FusionConfig::from_file(&path)?)
    } else {
        Ok(FusionConfig::parse("")?)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Gazetteer first, then Nominatim when configured, behind one cache.
fn build_geocoder(config: &FusionConfig) -> Result<Arc<dyn Geocoder>, EngineError> {
    let geocoding = &config.geocoding;
    let mut backends: Vec<Arc<dyn Geocoder>> = Vec::new();

    let gazetteer = GazetteerGeocoder::new(&geocoding.gazetteer);
    info!(places = gazetteer.len(), "Gazetteer loaded");
    backends.push(Arc::new(gazetteer));

    if let Some(url) = &geocoding.nominatim_url {
        info!(url, "Nominatim geocoding enabled");
        backends.push(Arc::new(NominatimGeocoder::new(url)?));
    }

    let chain: Arc<dyn Geocoder> = Arc::new(ChainGeocoder::new(backends));
    Ok(Arc::new(CachedGeocoder::new(chain, geocoding.timeout())))
}

/// The LLM judge when enabled, otherwise a verifier that never decides.
fn build_verifier(config: &FusionConfig) -> Result<GuardedVerifier, EngineError> {
    let verification = &config.verification;
    if !verification.enabled {
        info!("Semantic verification disabled, fingerprint-only deduplication");
        return Ok(GuardedVerifier::disabled());
    }
    if verification.api_key.is_none() {
        warn!("Verification enabled without GEOFUSION_VERIFY_API_KEY, sending unauthenticated requests");
    }
    info!(
        endpoint = verification.endpoint,
        model = verification.model,
        timeout_ms = verification.timeout_ms,
        "Semantic verification enabled"
    );
    let judge: Arc<dyn Verifier> = Arc::new(LlmJudge::new(verification)?);
    Ok(GuardedVerifier::new(judge, verification.timeout()))
}
