use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address the gRPC server (both service surfaces) listens on.
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,
    /// Address of the HTTP/JSON bridge. Empty disables it.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// Shared bearer password. Empty disables authentication entirely.
    #[serde(default)]
    pub password: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            http_addr: default_http_addr(),
            password: String::new(),
        }
    }
}

fn default_grpc_addr() -> String {
    "127.0.0.1:7111".to_string()
}

fn default_http_addr() -> String {
    "127.0.0.1:7180".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. "sqlite:///var/lib/flexhub/meta.db".
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://flexhub.db?mode=rwc".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Prefix URL of the artifact store; must end with a slash.
    /// Recognized schemes: http://, https://, mem://.
    #[serde(default = "default_storage_url")]
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
        }
    }
}

fn default_storage_url() -> String {
    "mem://flexhub/".to_string()
}

/// Liveness knobs. The defaults are contractual: flexlets heartbeat every
/// 10 s and the 1-minute staleness window tolerates six missed beats.
#[derive(Debug, Deserialize, Clone)]
pub struct MaintenanceConfig {
    /// Seconds between Maintainer sweeps.
    #[serde(default = "default_sweep_period_secs")]
    pub sweep_period_secs: u64,
    /// Seconds since the last heartbeat after which a flexlet is marked
    /// offline and a running task is reclaimed.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_period_secs: default_sweep_period_secs(),
            staleness_secs: default_staleness_secs(),
        }
    }
}

impl MaintenanceConfig {
    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

fn default_sweep_period_secs() -> u64 {
    10
}

fn default_staleness_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
