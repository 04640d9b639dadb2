use serde::Deserialize;

/// Complete Mailbridge configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MailbridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub oauth: OauthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "mailbridge.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Event processor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Poll interval between processing cycles (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Maximum events claimed per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Failed attempts before an event is terminally failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
        }
    }
}

/// OAuth flow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OauthConfig {
    /// Lifetime of an in-flight authorization state token (seconds)
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
    /// How often expired state tokens are evicted (seconds)
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_state_ttl() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    300
}

impl Default for OauthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

/// Secrets are environment-only, never in the TOML file.
#[derive(Debug, Clone)]
pub struct Secrets {
    /// Master key for secret encryption at rest (base64 32-byte key or passphrase)
    pub master_key: String,
    /// Shared secret authenticating internal token-vending calls
    pub service_secret: Option<String>,
    /// Bearer token for admin API access
    pub admin_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Result<Self, String> {
        let master_key = std::env::var("MAILBRIDGE_MASTER_KEY")
            .map_err(|_| "MAILBRIDGE_MASTER_KEY must be set".to_string())?;
        Ok(Self {
            master_key,
            service_secret: std::env::var("MAILBRIDGE_SERVICE_SECRET").ok(),
            admin_token: std::env::var("MAILBRIDGE_ADMIN_TOKEN").ok(),
        })
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<MailbridgeConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: MailbridgeConfig = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MailbridgeConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "mailbridge.db");
        assert_eq!(config.worker.poll_interval_seconds, 10);
        assert_eq!(config.worker.batch_size, 10);
        assert_eq!(config.worker.max_retries, 3);
        assert_eq!(config.oauth.state_ttl_seconds, 600);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 9090

            [database]
            path = "/var/lib/mailbridge/mailbridge.db"

            [worker]
            poll_interval_seconds = 5
            batch_size = 25
            max_retries = 5

            [oauth]
            state_ttl_seconds = 300
        "#;

        let config: MailbridgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.path, "/var/lib/mailbridge/mailbridge.db");
        assert_eq!(config.worker.batch_size, 25);
        assert_eq!(config.worker.max_retries, 5);
        assert_eq!(config.oauth.state_ttl_seconds, 300);
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [worker]
            batch_size = 50
        "#;

        let config: MailbridgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.worker.batch_size, 50);
        assert_eq!(config.worker.max_retries, 3); // Default
        assert_eq!(config.server.port, 8080); // Default
    }
}
