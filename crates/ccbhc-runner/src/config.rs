//! Runner configuration

use serde::{Deserialize, Serialize};

/// Batch run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Warehouse connection URL; reads and report writes share the pool
    pub database_url: String,

    /// First measurement year covered by the run
    #[serde(default = "default_measurement_year")]
    pub measurement_year: i32,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection before failing the query
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_measurement_year() -> i32 {
    2024
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

impl RunnerConfig {
    /// Load configuration from `config/runner.*` and `CCBHC_*` environment
    /// variables, the environment taking precedence
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(config::File::with_name("config/runner").required(false))
            .add_source(config::Environment::with_prefix("CCBHC"))
            .build()?;
        cfg.try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize config: {}", e))
    }
}
