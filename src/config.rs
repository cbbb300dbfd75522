use std::{str::FromStr, time::Duration};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("unsupported database driver: {0}")]
    UnsupportedDriver(String),
}

/// Storage backend, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Memory,
    MySql,
    MongoDb,
}

impl Driver {
    pub fn default_port(self) -> u16 {
        match self {
            Driver::Memory => 0,
            Driver::MySql => 3306,
            Driver::MongoDb => 27017,
        }
    }
}

impl FromStr for Driver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "memory" | "in-memory" => Ok(Driver::Memory),
            "mysql" => Ok(Driver::MySql),
            "mongodb" | "mongo" => Ok(Driver::MongoDb),
            other => Err(ConfigError::UnsupportedDriver(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Debug,
    Release,
}

impl ServerMode {
    /// Filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(self) -> &'static str {
        match self {
            ServerMode::Debug => "userhub=debug,axum=info,tower_http=debug",
            ServerMode::Release => "userhub=info,axum=warn,tower_http=info",
        }
    }
}

impl FromStr for ServerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "test" => Ok(ServerMode::Debug),
            "release" => Ok(ServerMode::Release),
            other => Err(ConfigError::Invalid {
                key: "APP_MODE",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: ServerMode,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
    pub charset: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: Duration,
    /// Deadline applied to every single storage call.
    pub timeout: Duration,
}

impl DatabaseConfig {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            driver: Driver::Memory,
            host: "127.0.0.1".into(),
            port: 0,
            username: String::new(),
            password: String::new(),
            name: "userhub".into(),
            charset: "utf8mb4".into(),
            max_open_conns: 100,
            max_idle_conns: 10,
            conn_max_lifetime: Duration::from_secs(3600),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Upper bound for `JWT_EXPIRE_HOURS` (one year).
pub const MAX_JWT_EXPIRE_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub expire_hours: i64,
}

/// Argon2 work factor for newly created digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub hash: HashConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&var, "APP_PORT", 8080)?,
            mode: match var("APP_MODE") {
                Some(v) => v.parse()?,
                None => ServerMode::Debug,
            },
        };

        let driver: Driver = var("DB_DRIVER").unwrap_or_default().parse()?;
        let database = DatabaseConfig {
            driver,
            host: var("DB_HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: parse_or(&var, "DB_PORT", driver.default_port())?,
            username: var("DB_USERNAME").unwrap_or_else(|| "root".into()),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            name: var("DB_NAME").unwrap_or_else(|| "userhub".into()),
            charset: var("DB_CHARSET").unwrap_or_else(|| "utf8mb4".into()),
            max_open_conns: parse_or(&var, "DB_MAX_OPEN_CONNS", 100)?,
            max_idle_conns: parse_or(&var, "DB_MAX_IDLE_CONNS", 10)?,
            conn_max_lifetime: Duration::from_secs(parse_or(
                &var,
                "DB_CONN_MAX_LIFETIME_SECS",
                3600,
            )?),
            timeout: Duration::from_secs(parse_or(&var, "DB_TIMEOUT_SECS", 5)?),
        };

        let jwt = JwtConfig {
            secret: var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "userhub".into()),
            expire_hours: parse_or(&var, "JWT_EXPIRE_HOURS", 24)?,
        };
        if !(1..=MAX_JWT_EXPIRE_HOURS).contains(&jwt.expire_hours) {
            return Err(ConfigError::Invalid {
                key: "JWT_EXPIRE_HOURS",
                value: jwt.expire_hours.to_string(),
            });
        }

        let defaults = HashConfig::default();
        let hash = HashConfig {
            memory_kib: parse_or(&var, "HASH_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&var, "HASH_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&var, "HASH_PARALLELISM", defaults.parallelism)?,
        };

        Ok(Self {
            server,
            database,
            jwt,
            hash,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_to_in_memory_backend() {
        let cfg = load(&[("JWT_SECRET", "s3cret")]).expect("config");
        assert_eq!(cfg.database.driver, Driver::Memory);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.mode, ServerMode::Debug);
        assert_eq!(cfg.jwt.issuer, "userhub");
        assert_eq!(cfg.jwt.expire_hours, 24);
        assert_eq!(cfg.database.timeout, Duration::from_secs(5));
        assert_eq!(cfg.hash, HashConfig::default());
    }

    #[test]
    fn hash_cost_is_overridable() {
        let cfg = load(&[
            ("JWT_SECRET", "x"),
            ("HASH_MEMORY_KIB", "4096"),
            ("HASH_ITERATIONS", "3"),
        ])
        .expect("config");
        assert_eq!(cfg.hash.memory_kib, 4096);
        assert_eq!(cfg.hash.iterations, 3);
        assert_eq!(cfg.hash.parallelism, 1);
    }

    #[test]
    fn driver_picks_its_default_port() {
        let cfg = load(&[("JWT_SECRET", "x"), ("DB_DRIVER", "MySQL")]).expect("config");
        assert_eq!(cfg.database.driver, Driver::MySql);
        assert_eq!(cfg.database.port, 3306);

        let cfg = load(&[("JWT_SECRET", "x"), ("DB_DRIVER", "mongodb")]).expect("config");
        assert_eq!(cfg.database.driver, Driver::MongoDb);
        assert_eq!(cfg.database.port, 27017);

        let cfg = load(&[
            ("JWT_SECRET", "x"),
            ("DB_DRIVER", "mongodb"),
            ("DB_PORT", "28000"),
        ])
        .expect("config");
        assert_eq!(cfg.database.port, 28000);
    }

    #[test]
    fn missing_secret_is_fatal() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("JWT_SECRET"));
    }

    #[test]
    fn rejects_unknown_driver_and_bad_numbers() {
        let err = load(&[("JWT_SECRET", "x"), ("DB_DRIVER", "oracle")]).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedDriver("oracle".into()));

        let err = load(&[("JWT_SECRET", "x"), ("APP_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "APP_PORT", .. }));

        let err = load(&[("JWT_SECRET", "x"), ("JWT_EXPIRE_HOURS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JWT_EXPIRE_HOURS", .. }));
    }

    #[test]
    fn jwt_expiry_is_bounded() {
        let max = MAX_JWT_EXPIRE_HOURS.to_string();
        let cfg = load(&[("JWT_SECRET", "x"), ("JWT_EXPIRE_HOURS", &max)]).expect("config");
        assert_eq!(cfg.jwt.expire_hours, MAX_JWT_EXPIRE_HOURS);

        let over = (MAX_JWT_EXPIRE_HOURS + 1).to_string();
        let err = load(&[("JWT_SECRET", "x"), ("JWT_EXPIRE_HOURS", &over)]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JWT_EXPIRE_HOURS", .. }));

        let err = load(&[("JWT_SECRET", "x"), ("JWT_EXPIRE_HOURS", "10000000000000")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JWT_EXPIRE_HOURS", .. }));
    }

    #[test]
    fn release_mode_quiets_logging() {
        let cfg = load(&[("JWT_SECRET", "x"), ("APP_MODE", "release")]).expect("config");
        assert_eq!(cfg.server.mode, ServerMode::Release);
        assert!(cfg.server.mode.default_log_filter().contains("userhub=info"));
    }
}
