use pgbridge_bridge::{BridgeConfig, PoolConfig, RetryPolicy};
use pgbridge_sql::IdentifierCase;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

pub const LISTEN_ENV_VAR: &str = "PGBRIDGE_LISTEN_ADDR";
pub const LOG_ENV_VAR: &str = "PGBRIDGE_LOG";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub translation: TranslationConfig,
    pub security: SecurityConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_connections: usize,
    /// Reported as `server_version`; the major part also feeds
    /// `server_version_num`.
    pub server_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:5432".to_string(),
            max_connections: 100,
            server_version: "16.0".to_string(),
        }
    }
}

impl ServerConfig {
    /// `16.2` becomes `160002`, following PostgreSQL's numbering since 10.
    pub fn server_version_num(&self) -> String {
        let mut parts = self
            .server_version
            .split(|c: char| !c.is_ascii_digit())
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<u32>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        (major * 10_000 + minor).to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub pool_size: usize,
    pub pool_overflow: usize,
    pub acquire_timeout_ms: u64,
    pub max_lifetime_secs: u64,
    pub idle_timeout_secs: u64,
    /// 0 disables the statement timeout.
    pub statement_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub retry_attempts: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_overflow: 5,
            acquire_timeout_ms: 5_000,
            max_lifetime_secs: 3_600,
            idle_timeout_secs: 300,
            statement_timeout_ms: 0,
            health_timeout_ms: 2_000,
            retry_initial_ms: 100,
            retry_max_ms: 5_000,
            retry_attempts: 5,
        }
    }
}

impl BackendConfig {
    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            base_size: self.pool_size,
            overflow: self.pool_overflow,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            max_lifetime: Duration::from_secs(self.max_lifetime_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.retry_initial_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
            max_attempts: self.retry_attempts,
        }
    }

    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            statement_timeout: (self.statement_timeout_ms > 0)
                .then(|| Duration::from_millis(self.statement_timeout_ms)),
            health_timeout: Duration::from_millis(self.health_timeout_ms),
            ..BridgeConfig::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TranslationConfig {
    pub backend_schema: Option<String>,
    pub identifier_case: IdentifierCase,
    pub fold_result_names: bool,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            backend_schema: None,
            identifier_case: IdentifierCase::Upper,
            fold_result_names: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub tls: TlsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    #[default]
    #[serde(rename = "scram-sha-256")]
    ScramSha256,
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "trust")]
    Trust,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub method: AuthMethod,
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    /// Argon2 PHC string; cleartext authentication only.
    pub password_hash: Option<String>,
    pub password_plain: Option<String>,
    /// `SCRAM-SHA-256$<iterations>:<salt>$<StoredKey>:<ServerKey>`
    pub scram_verifier: Option<String>,
    #[serde(default)]
    pub superuser: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9898".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides. The backend schema override is resolved by
    /// the schema mapping itself.
    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var(LISTEN_ENV_VAR) {
            if !addr.trim().is_empty() {
                self.server.listen_addr = addr.trim().to_string();
            }
        }
        if let Ok(level) = std::env::var(LOG_ENV_VAR) {
            if !level.trim().is_empty() {
                self.logging.level = level.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.server
            .listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid listen_addr {}: {e}", self.server.listen_addr))?;
        if self.admin.enabled {
            self.admin.listen_addr.parse::<SocketAddr>().map_err(|e| {
                anyhow::anyhow!("invalid admin listen_addr {}: {e}", self.admin.listen_addr)
            })?;
        }
        if self.server.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be at least 1"));
        }
        if self.backend.pool_size + self.backend.pool_overflow == 0 {
            return Err(anyhow::anyhow!("backend pool must allow at least one connection"));
        }
        if self.security.tls.enabled
            && (self.security.tls.cert_path.is_none() || self.security.tls.key_path.is_none())
        {
            return Err(anyhow::anyhow!("tls enabled but cert_path or key_path missing"));
        }
        let auth = &self.security.auth;
        if auth.method != AuthMethod::Trust && auth.users.is_empty() {
            return Err(anyhow::anyhow!("auth method requires users but none are configured"));
        }
        for user in &auth.users {
            match auth.method {
                AuthMethod::Trust => {}
                AuthMethod::Password => {
                    if user.password_hash.is_none() && user.password_plain.is_none() {
                        return Err(anyhow::anyhow!(
                            "user {} has no password configured",
                            user.username
                        ));
                    }
                }
                AuthMethod::ScramSha256 => {
                    if user.scram_verifier.is_none() && user.password_plain.is_none() {
                        return Err(anyhow::anyhow!(
                            "user {} needs password_plain or scram_verifier for scram-sha-256",
                            user.username
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
