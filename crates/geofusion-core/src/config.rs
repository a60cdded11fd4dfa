//! Configuration loading and typed config structures for the Geofusion engine.
//!
//! The canonical configuration lives in `geofusion-config.yaml` at the project
//! root. Every field carries a serde default, so an empty (or absent) file
//! yields a working engine. Secrets never live in YAML: the verification API
//! key is read from the environment only.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use geofusion_types::{EventType, SourcePriority};
use serde::Deserialize;

use crate::store::IngestMode;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but holds a nonsensical value.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `geofusion-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FusionConfig {
    /// HTTP/WebSocket server settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Durable log connection settings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dedup, hotspot and convergence policy.
    #[serde(default)]
    pub fusion: FusionPolicy,

    /// Risk weights and level breakpoints.
    #[serde(default)]
    pub risk: RiskConfig,

    /// Per-layer retention bounds.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Per-layer severity rules, keyed by layer.
    #[serde(default = "default_severity_rules")]
    pub severity: BTreeMap<EventType, SeverityRule>,

    /// Place-name resolution.
    #[serde(default)]
    pub geocoding: GeocodingConfig,

    /// Semantic duplicate verification.
    #[serde(default)]
    pub verification: VerificationConfig,

    /// HTTP feed collectors to register at startup.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            infrastructure: InfrastructureConfig::default(),
            logging: LoggingConfig::default(),
            fusion: FusionPolicy::default(),
            risk: RiskConfig::default(),
            retention: RetentionConfig::default(),
            severity: default_severity_rules(),
            geocoding: GeocodingConfig::default(),
            verification: VerificationConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl FusionConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `DRAGONFLY_URL` overrides `infrastructure.dragonfly_url`
    /// - `GEOFUSION_PORT` overrides `server.port`
    /// - `GEOFUSION_VERIFY_API_KEY` sets `verification.api_key`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment overrides
    /// and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value fails validation.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DRAGONFLY_URL") {
            self.infrastructure.dragonfly_url = val;
        }
        if let Ok(val) = std::env::var("GEOFUSION_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!(value = %val, error = %e, "Ignoring invalid GEOFUSION_PORT"),
            }
        }
        if let Ok(val) = std::env::var("GEOFUSION_VERIFY_API_KEY") {
            self.verification.api_key = Some(val);
        }
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.fusion;
        if f.dedup_window_secs == 0 {
            return Err(invalid("fusion.dedup_window_secs", "must be positive"));
        }
        if f.convergence_window_secs == Some(0) {
            return Err(invalid("fusion.convergence_window_secs", "must be positive"));
        }
        if !(f.coordinate_precision.is_finite() && f.coordinate_precision > 0.0) {
            return Err(invalid("fusion.coordinate_precision", "must be a positive number"));
        }
        if !(0.0..=1.0).contains(&f.similarity_threshold) {
            return Err(invalid("fusion.similarity_threshold", "must be within 0..=1"));
        }
        if f.hotspot_threshold == 0 {
            return Err(invalid("fusion.hotspot_threshold", "must be at least 1"));
        }
        if f.convergence_min_types < 2 {
            return Err(invalid("fusion.convergence_min_types", "must be at least 2"));
        }
        if self.risk.breakpoints.len() != 4 {
            return Err(invalid("risk.breakpoints", "exactly four breakpoints are required"));
        }
        if !self.risk.breakpoints.windows(2).all(|w| matches!(w, [a, b] if a < b)) {
            return Err(invalid("risk.breakpoints", "must be strictly ascending"));
        }
        if self.risk.weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid("risk.weights", "weights must be finite and non-negative"));
        }
        let default_weight = self.risk.default_weight;
        if !default_weight.is_finite() || default_weight < 0.0 {
            return Err(invalid("risk.default_weight", "must be finite and non-negative"));
        }
        if self.retention.max_events_per_layer == 0 {
            return Err(invalid("retention.max_events_per_layer", "must be at least 1"));
        }
        for rule in self.severity.values() {
            if rule.thresholds.len() > 4 {
                return Err(invalid("severity", "a rule has more than four thresholds"));
            }
            if !rule.thresholds.windows(2).all(|w| matches!(w, [a, b] if a <= b)) {
                return Err(invalid("severity", "thresholds must be ascending"));
            }
        }
        if self.server.observer_queue_capacity == 0 {
            return Err(invalid("server.observer_queue_capacity", "must be at least 1"));
        }
        for source in &self.sources {
            if source.layer.is_derived() {
                return Err(invalid("sources.layer", format!("{} is a derived layer", source.layer)));
            }
            if source.interval_secs == 0 {
                return Err(invalid("sources.interval_secs", "must be positive"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Outbound messages buffered per observer before it is dropped.
    #[serde(default = "default_observer_queue_capacity")]
    pub observer_queue_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            observer_queue_capacity: default_observer_queue_capacity(),
        }
    }
}

/// Durable log connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// `Dragonfly` (Redis protocol) connection URL.
    #[serde(default = "default_dragonfly_url")]
    pub dragonfly_url: String,

    /// Whether to try `Dragonfly` at all. When false the engine runs on the
    /// in-memory log from the start.
    #[serde(default = "default_true")]
    pub use_dragonfly: bool,

    /// Key prefix of the per-layer lists.
    #[serde(default = "default_stream_key_prefix")]
    pub stream_key_prefix: String,

    /// Events kept per layer in the durable log.
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            dragonfly_url: default_dragonfly_url(),
            use_dragonfly: true,
            stream_key_prefix: default_stream_key_prefix(),
            stream_max_len: default_stream_max_len(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Dedup, hotspot and convergence policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FusionPolicy {
    /// Events of one layer further apart in time than this are never
    /// duplicates.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Maximum latitude/longitude difference (degrees) between duplicates.
    #[serde(default = "default_coordinate_precision")]
    pub coordinate_precision: f64,

    /// Title/description token similarity below which a fingerprint match
    /// is considered ambiguous and sent to the verifier.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Time window of convergence detection. Defaults to the dedup window.
    #[serde(default)]
    pub convergence_window_secs: Option<u64>,

    /// Minimum events in a cell for it to be a hotspot.
    #[serde(default = "default_hotspot_threshold")]
    pub hotspot_threshold: u32,

    /// Minimum distinct layers in a cell for a convergence alert.
    #[serde(default = "default_convergence_min_types")]
    pub convergence_min_types: usize,

    /// Layers counted by the hotspot calculator. Empty means every
    /// collector-written layer.
    #[serde(default)]
    pub hotspot_types: Vec<EventType>,

    /// Layers considered by the convergence detector. Empty means every
    /// collector-written layer.
    #[serde(default)]
    pub convergence_types: Vec<EventType>,

    /// Trust tier per source name. Unlisted sources are OSINT.
    #[serde(default = "default_source_priorities")]
    pub source_priorities: BTreeMap<String, SourcePriority>,
}

impl FusionPolicy {
    /// The dedup window as a [`chrono::Duration`].
    pub fn dedup_window(&self) -> chrono::Duration {
        secs(self.dedup_window_secs)
    }

    /// The convergence window, falling back to the dedup window.
    pub fn convergence_window(&self) -> chrono::Duration {
        secs(self.convergence_window_secs.unwrap_or(self.dedup_window_secs))
    }

    /// Layers the hotspot calculator counts.
    pub fn hotspot_layers(&self) -> Vec<EventType> {
        layers_or_observed(&self.hotspot_types)
    }

    /// Layers the convergence detector considers.
    pub fn convergence_layers(&self) -> Vec<EventType> {
        layers_or_observed(&self.convergence_types)
    }

    /// Trust tier of a source name (case-insensitive).
    pub fn priority_of(&self, source: &str) -> SourcePriority {
        self.source_priorities
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(source))
            .map(|(_, p)| *p)
            .unwrap_or_default()
    }
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            coordinate_precision: default_coordinate_precision(),
            similarity_threshold: default_similarity_threshold(),
            convergence_window_secs: None,
            hotspot_threshold: default_hotspot_threshold(),
            convergence_min_types: default_convergence_min_types(),
            hotspot_types: Vec::new(),
            convergence_types: Vec::new(),
            source_priorities: default_source_priorities(),
        }
    }
}

fn layers_or_observed(configured: &[EventType]) -> Vec<EventType> {
    if configured.is_empty() {
        EventType::observed().collect()
    } else {
        configured.iter().copied().filter(|t| !t.is_derived()).collect()
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Risk weights and level breakpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RiskConfig {
    /// Weight per layer.
    #[serde(default = "default_risk_weights")]
    pub weights: BTreeMap<EventType, f64>,

    /// Weight of layers missing from `weights`.
    #[serde(default = "default_weight")]
    pub default_weight: f64,

    /// Ascending scores at which levels 2, 3, 4 and 5 begin.
    #[serde(default = "default_breakpoints")]
    pub breakpoints: Vec<f64>,
}

impl RiskConfig {
    /// Weight of one layer.
    pub fn weight(&self, layer: EventType) -> f64 {
        self.weights.get(&layer).copied().unwrap_or(self.default_weight)
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: default_risk_weights(),
            default_weight: default_weight(),
            breakpoints: default_breakpoints(),
        }
    }
}

/// Per-layer retention bounds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetentionConfig {
    /// Newest events kept per layer.
    #[serde(default = "default_max_events_per_layer")]
    pub max_events_per_layer: usize,

    /// Events older than this (by event time) are evicted on commit.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl RetentionConfig {
    /// The age bound as a [`chrono::Duration`], if any.
    pub fn max_age(&self) -> Option<chrono::Duration> {
        self.max_age_secs.map(secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_events_per_layer: default_max_events_per_layer(),
            max_age_secs: None,
        }
    }
}

/// How a layer's metric maps onto the 1-5 severity scale.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeverityRule {
    /// Raw record field holding the metric (top level or in `metadata`).
    pub field: String,

    /// Ascending thresholds; severity is one plus the number reached.
    pub thresholds: Vec<f64>,

    /// Compare the absolute value of the metric.
    #[serde(default)]
    pub absolute: bool,
}

impl SeverityRule {
    fn new(field: &str, thresholds: &[f64], absolute: bool) -> Self {
        Self {
            field: field.to_owned(),
            thresholds: thresholds.to_vec(),
            absolute,
        }
    }
}

/// Place-name resolution settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeocodingConfig {
    /// Static place name to `[lat, lon]` table, matched case-insensitively.
    #[serde(default = "default_gazetteer")]
    pub gazetteer: BTreeMap<String, [f64; 2]>,

    /// Optional Nominatim search endpoint consulted after the gazetteer.
    #[serde(default)]
    pub nominatim_url: Option<String>,

    /// Per-lookup timeout in milliseconds.
    #[serde(default = "default_geocode_timeout_ms")]
    pub timeout_ms: u64,
}

impl GeocodingConfig {
    /// The lookup timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            gazetteer: default_gazetteer(),
            nominatim_url: None,
            timeout_ms: default_geocode_timeout_ms(),
        }
    }
}

/// Semantic duplicate verification settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerificationConfig {
    /// Whether ambiguous pairs are sent to the LLM judge.
    #[serde(default)]
    pub enabled: bool,

    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_verify_endpoint")]
    pub endpoint: String,

    /// Model name sent with each request.
    #[serde(default = "default_verify_model")]
    pub model: String,

    /// Per-judgment timeout in milliseconds.
    #[serde(default = "default_verify_timeout_ms")]
    pub timeout_ms: u64,

    /// API key, populated from `GEOFUSION_VERIFY_API_KEY` only.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl VerificationConfig {
    /// The judgment timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_verify_endpoint(),
            model: default_verify_model(),
            timeout_ms: default_verify_timeout_ms(),
            api_key: None,
        }
    }
}

/// One HTTP feed collector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    /// Unique collector name, also the default event `source`.
    pub name: String,

    /// Layer the records belong to unless they carry their own `type`.
    pub layer: EventType,

    /// URL fetched on every cycle.
    pub url: String,

    /// JSON pointer to the record array inside the response (`/features`).
    /// The whole document is used when absent.
    #[serde(default)]
    pub records_pointer: Option<String>,

    /// Seconds between polls.
    #[serde(default = "default_source_interval_secs")]
    pub interval_secs: u64,

    /// Seconds before a poll is abandoned.
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,

    /// Merge into or replace the layer.
    #[serde(default)]
    pub mode: IngestMode,
}

impl SourceConfig {
    /// Poll interval.
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Poll timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Default value functions (required by serde)
// ---------------------------------------------------------------------------

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8000
}

const fn default_observer_queue_capacity() -> usize {
    256
}

fn default_dragonfly_url() -> String {
    String::from("redis://localhost:6379")
}

fn default_stream_key_prefix() -> String {
    String::from("geofusion:events")
}

const fn default_stream_max_len() -> usize {
    5000
}

fn default_log_level() -> String {
    String::from("info")
}

const fn default_dedup_window_secs() -> u64 {
    900
}

const fn default_coordinate_precision() -> f64 {
    0.1
}

const fn default_similarity_threshold() -> f64 {
    0.5
}

const fn default_hotspot_threshold() -> u32 {
    5
}

const fn default_convergence_min_types() -> usize {
    3
}

fn default_source_priorities() -> BTreeMap<String, SourcePriority> {
    [
        ("USGS", SourcePriority::Official),
        ("NASA FIRMS", SourcePriority::Official),
        ("UCDP", SourcePriority::Official),
        ("ACLED", SourcePriority::Curated),
        ("GDACS", SourcePriority::Official),
        ("IODA", SourcePriority::Curated),
        ("OTX", SourcePriority::Curated),
        ("GDELT", SourcePriority::Osint),
    ]
    .into_iter()
    .map(|(name, p)| (name.to_owned(), p))
    .collect()
}

fn default_risk_weights() -> BTreeMap<EventType, f64> {
    BTreeMap::from([
        (EventType::Earthquake, 1.5),
        (EventType::Fire, 1.0),
        (EventType::Conflict, 2.0),
        (EventType::Aircraft, 0.2),
        (EventType::MilitaryAircraft, 1.5),
        (EventType::Marine, 0.2),
        (EventType::MilitaryMarine, 1.5),
        (EventType::Naval, 1.5),
        (EventType::Cyber, 1.5),
        (EventType::Outage, 1.2),
        (EventType::Economic, 0.8),
        (EventType::Military, 2.5),
        (EventType::Satellite, 0.1),
        (EventType::Ucdp, 2.0),
        (EventType::Acled, 2.0),
        (EventType::Protest, 1.0),
        (EventType::GdeltConflict, 1.0),
    ])
}

const fn default_weight() -> f64 {
    1.0
}

fn default_breakpoints() -> Vec<f64> {
    vec![25.0, 75.0, 150.0, 300.0]
}

const fn default_max_events_per_layer() -> usize {
    5000
}

fn default_severity_rules() -> BTreeMap<EventType, SeverityRule> {
    let fatalities = [1.0, 5.0, 25.0, 100.0];
    BTreeMap::from([
        (EventType::Earthquake, SeverityRule::new("magnitude", &[2.5, 4.0, 5.0, 7.0], false)),
        (EventType::Fire, SeverityRule::new("brightness", &[340.0, 380.0, 420.0, 450.0], false)),
        (EventType::Outage, SeverityRule::new("impact", &[0.0, 0.4, 0.7, 0.9], false)),
        (EventType::Economic, SeverityRule::new("change_percent", &[0.5, 1.0, 2.0, 3.0], true)),
        (EventType::Ucdp, SeverityRule::new("fatalities", &fatalities, false)),
        (EventType::Acled, SeverityRule::new("fatalities", &fatalities, false)),
        (EventType::Conflict, SeverityRule::new("fatalities", &fatalities, false)),
    ])
}

fn default_gazetteer() -> BTreeMap<String, [f64; 2]> {
    BTreeMap::new()
}

const fn default_geocode_timeout_ms() -> u64 {
    3000
}

fn default_verify_endpoint() -> String {
    String::from("https://api.openai.com/v1/chat/completions")
}

fn default_verify_model() -> String {
    String::from("gpt-4o-mini")
}

const fn default_verify_timeout_ms() -> u64 {
    5000
}

const fn default_source_interval_secs() -> u64 {
    300
}

const fn default_source_timeout_secs() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}
