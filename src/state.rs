use std::sync::Arc;

use crate::{
    auth::{
        jwt::TokenIssuer,
        password::{Argon2Hasher, HashError, PasswordHasher},
    },
    config::AppConfig,
    db::Storage,
    users::services::UserService,
};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserService>,
    pub tokens: Arc<TokenIssuer>,
}

impl AppState {
    pub fn new(config: &AppConfig, storage: &Storage) -> Result<Self, HashError> {
        let cost = config.hash;
        let hasher = Argon2Hasher::with_cost(cost.memory_kib, cost.iterations, cost.parallelism)?;
        Ok(Self::from_parts(config, storage, Arc::new(hasher)))
    }

    pub fn from_parts(
        config: &AppConfig,
        storage: &Storage,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            users: Arc::new(UserService::new(storage.user_repository(), hasher)),
            tokens: Arc::new(TokenIssuer::new(&config.jwt)),
        }
    }

    /// In-memory state with a cheap hasher, for router tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{DatabaseConfig, HashConfig, JwtConfig, ServerConfig, ServerMode};

        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                mode: ServerMode::Debug,
            },
            database: DatabaseConfig::in_memory(),
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                expire_hours: 1,
            },
            hash: HashConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        };
        Self::new(&config, &Storage::in_memory()).expect("valid params")
    }
}
