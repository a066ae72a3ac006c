use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Retention window for inactive users, days; 0 disables autodelete.
    #[serde(default)]
    pub autodelete_days: i64,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    db_max_connections: Option<u32>,
    sweep_interval_secs: Option<u64>,
    autodelete_days: Option<i64>,
    log_dir: Option<String>,
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialServerConfig::default()
            }
        } else {
            PartialServerConfig::default()
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        let final_config = ServerConfig {
            database_url: env_config
                .database_url
                .or(file_config.database_url)
                .ok_or("DATABASE_URL is required")?,
            db_max_connections: env_config
                .db_max_connections
                .or(file_config.db_max_connections)
                .unwrap_or_else(default_db_max_connections),
            sweep_interval_secs: env_config
                .sweep_interval_secs
                .or(file_config.sweep_interval_secs)
                .unwrap_or_else(default_sweep_interval_secs),
            autodelete_days: env_config
                .autodelete_days
                .or(file_config.autodelete_days)
                .unwrap_or(0),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
        };

        Ok(final_config)
    }
}
