use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `BANDIT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub auto_fail: AutoFailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// ─── Engine Config ──────────────────────────────────────────────────────────

/// Knobs for arm selection and posterior refits.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Fixed seed for the sampling RNG. `None` seeds from OS entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    /// Adds a free intercept to the Bayesian A/B linear predictor.
    #[serde(default = "default_bayes_ab_intercept")]
    pub bayes_ab_intercept: bool,
    #[serde(default = "default_optimizer_max_iter")]
    pub optimizer_max_iter: usize,
    #[serde(default = "default_optimizer_tolerance")]
    pub optimizer_tolerance: f64,
}

// ─── Auto-fail Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AutoFailConfig {
    #[serde(default = "default_auto_fail_enabled")]
    pub enabled: bool,
    #[serde(default = "default_auto_fail_interval_secs")]
    pub interval_secs: u64,
    /// Draws closed per page before the page is committed.
    #[serde(default = "default_auto_fail_batch_size")]
    pub batch_size: usize,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_bayes_ab_intercept() -> bool {
    false
}
fn default_optimizer_max_iter() -> usize {
    200
}
fn default_optimizer_tolerance() -> f64 {
    1e-8
}
fn default_auto_fail_enabled() -> bool {
    true
}
fn default_auto_fail_interval_secs() -> u64 {
    3600
}
fn default_auto_fail_batch_size() -> usize {
    100
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            bayes_ab_intercept: default_bayes_ab_intercept(),
            optimizer_max_iter: default_optimizer_max_iter(),
            optimizer_tolerance: default_optimizer_tolerance(),
        }
    }
}

impl Default for AutoFailConfig {
    fn default() -> Self {
        Self {
            enabled: default_auto_fail_enabled(),
            interval_secs: default_auto_fail_interval_secs(),
            batch_size: default_auto_fail_batch_size(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            engine: EngineConfig::default(),
            auto_fail: AutoFailConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("BANDIT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
