use std::env;
use std::time::Duration;

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub db_max_connections: u32,
    pub listen_addr: String,
    /// Credentials used when a request does not carry its own
    pub device_username: String,
    pub device_password: String,
    pub ssh_timeout_secs: u64,
    pub cluster_poll_timeout_secs: u64,
    pub cluster_poll_interval_secs: u64,
    pub error_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "/data/fabric.db".to_string(),
            db_max_connections: 5,
            listen_addr: "0.0.0.0:8080".to_string(),
            device_username: "admin".to_string(),
            device_password: "password".to_string(),
            ssh_timeout_secs: 30,
            cluster_poll_timeout_secs: 90,
            cluster_poll_interval_secs: 15,
            error_channel_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            db_path: get_env("DB_PATH", "/data/fabric.db"),
            db_max_connections: get_env("DB_MAX_CONNECTIONS", "5")
                .parse()
                .unwrap_or(5),
            listen_addr: get_env("LISTEN_ADDR", "0.0.0.0:8080"),
            device_username: get_env("DEVICE_USERNAME", "admin"),
            device_password: get_env("DEVICE_PASSWORD", "password"),
            ssh_timeout_secs: get_env("SSH_TIMEOUT_SECS", "30")
                .parse()
                .unwrap_or(30),
            cluster_poll_timeout_secs: get_env("CLUSTER_POLL_TIMEOUT_SECS", "90")
                .parse()
                .unwrap_or(90),
            cluster_poll_interval_secs: get_env("CLUSTER_POLL_INTERVAL_SECS", "15")
                .parse()
                .unwrap_or(15),
            error_channel_capacity: get_env("ERROR_CHANNEL_CAPACITY", "64")
                .parse::<usize>()
                .ok()
                .filter(|c| *c > 0)
                .unwrap_or(64),
        }
    }

    pub fn engine_options(&self) -> crate::engine::EngineOptions {
        crate::engine::EngineOptions {
            poll_timeout: Duration::from_secs(self.cluster_poll_timeout_secs),
            poll_interval: Duration::from_secs(self.cluster_poll_interval_secs),
            error_channel_capacity: self.error_channel_capacity,
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
