use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::domain::Money;
use crate::error::{BazaarError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub admin: AdminSeedConfig,
    pub marketplace: MarketplaceConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub static_dir: PathBuf,
    /// Root for uploaded files; served under `/images`.
    pub upload_dir: PathBuf,
    pub session_ttl_hours: i64,
    pub secure_cookies: bool,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
            static_dir: PathBuf::from("static"),
            upload_dir: PathBuf::from("uploads"),
            session_ttl_hours: 24 * 7,
            secure_cookies: false,
            request_timeout_secs: 30,
            body_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "bazaar.db".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminSeedConfig {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

impl Default for AdminSeedConfig {
    fn default() -> Self {
        Self {
            email: "admin@admin.com".to_string(),
            password: "Admin123!".to_string(),
            full_name: "Super Admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Site commission in basis points (500 = 5%).
    pub commission_bp: i64,
    pub express_shipping_fee: Money,
    pub max_cart_quantity: i64,
    pub admin_page_size: i64,
    pub log_page_size: i64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            commission_bp: 500,
            express_shipping_fee: Money::from_cents(5_000),
            max_cart_quantity: 10,
            admin_page_size: 20,
            log_page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_prefix: String,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_prefix: "bazaar.log".to_string(),
            filter: "student_bazaar=info,tower_http=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, port: 9898 }
    }
}

impl Config {
    /// Reads `path` if it exists, then applies `BAZAAR_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                BazaarError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
            })?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(addr) = lookup("BAZAAR_ADDR") {
            self.server.addr = addr;
        }
        if let Some(path) = lookup("BAZAAR_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(dir) = lookup("BAZAAR_UPLOAD_DIR") {
            self.server.upload_dir = PathBuf::from(dir);
        }
        if let Some(email) = lookup("BAZAAR_ADMIN_EMAIL") {
            self.admin.email = email;
        }
        if let Some(password) = lookup("BAZAAR_ADMIN_PASSWORD") {
            self.admin.password = password;
        }
        if let Some(port) = lookup("BAZAAR_METRICS_PORT") {
            self.metrics.port = port
                .parse()
                .map_err(|_| BazaarError::Config(format!("BAZAAR_METRICS_PORT is not a port: {}", port)))?;
            self.metrics.enabled = true;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if !(0..=10_000).contains(&self.marketplace.commission_bp) {
            return Err(BazaarError::Config("marketplace.commission_bp must be within 0..=10000".into()));
        }
        if self.marketplace.max_cart_quantity < 1 {
            return Err(BazaarError::Config("marketplace.max_cart_quantity must be at least 1".into()));
        }
        if self.server.session_ttl_hours < 1 {
            return Err(BazaarError::Config("server.session_ttl_hours must be at least 1".into()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.server
            .addr
            .parse()
            .map_err(|_| BazaarError::Config(format!("server.addr is not a socket address: {}", self.server.addr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.marketplace.commission_bp, 500);
        assert_eq!(config.marketplace.express_shipping_fee, Money::from_cents(5_000));
        assert_eq!(config.admin.email, "admin@admin.com");
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            addr = "0.0.0.0:8080"

            [marketplace]
            express_shipping_fee = "75.00"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:8080");
        assert_eq!(config.marketplace.express_shipping_fee, Money::from_cents(7_500));
        assert_eq!(config.marketplace.max_cart_quantity, 10);
        assert_eq!(config.database.path, "bazaar.db");
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> =
            [("BAZAAR_DATABASE_PATH", ":memory:"), ("BAZAAR_METRICS_PORT", "9100")].into_iter().collect();
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.database.path, ":memory:");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn rejects_bad_metrics_port() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "BAZAAR_METRICS_PORT").then(|| "nope".to_string()))
            .unwrap_err();
        assert!(matches!(err, BazaarError::Config(_)));
    }

    #[test]
    fn rejects_bad_addr() {
        let mut config = Config::default();
        config.server.addr = "localhost".into();
        assert!(config.validate().is_err());
    }
}
