use std::{sync::Arc, time::Duration};

use anyhow::Context;
use mongodb::{
    bson::doc,
    options::{ClientOptions, Credential},
    Client, Database,
};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tracing::info;

use crate::{
    config::{DatabaseConfig, Driver},
    users::{
        memory::InMemoryUserRepository, mongo::MongoUserRepository, mysql::MySqlUserRepository,
        repo::UserRepository,
    },
};

/// Connection handle for the configured backend, built once at startup.
#[derive(Clone)]
pub enum Storage {
    Memory(Arc<InMemoryUserRepository>),
    MySql {
        pool: MySqlPool,
        timeout: Duration,
    },
    MongoDb {
        client: Client,
        database: Database,
        timeout: Duration,
    },
}

impl Storage {
    pub fn in_memory() -> Self {
        Storage::Memory(Arc::new(InMemoryUserRepository::new()))
    }

    pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
        match cfg.driver {
            Driver::Memory => {
                info!("using in-memory storage");
                Ok(Self::in_memory())
            }
            Driver::MySql => connect_mysql(cfg).await,
            Driver::MongoDb => connect_mongo(cfg).await,
        }
    }

    pub fn driver(&self) -> Driver {
        match self {
            Storage::Memory(_) => Driver::Memory,
            Storage::MySql { .. } => Driver::MySql,
            Storage::MongoDb { .. } => Driver::MongoDb,
        }
    }

    pub fn user_repository(&self) -> Arc<dyn UserRepository> {
        match self {
            Storage::Memory(repo) => repo.clone(),
            Storage::MySql { pool, timeout } => {
                Arc::new(MySqlUserRepository::new(pool.clone(), *timeout))
            }
            Storage::MongoDb {
                database, timeout, ..
            } => Arc::new(MongoUserRepository::new(database, *timeout)),
        }
    }

    pub async fn close(self) {
        match self {
            Storage::Memory(_) => {}
            Storage::MySql { pool, .. } => pool.close().await,
            Storage::MongoDb { client, .. } => client.shutdown().await,
        }
        info!("storage connections closed");
    }
}

async fn connect_mysql(cfg: &DatabaseConfig) -> anyhow::Result<Storage> {
    let options = MySqlConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.username)
        .password(&cfg.password)
        .database(&cfg.name)
        .charset(&cfg.charset);

    let pool = MySqlPoolOptions::new()
        .max_connections(cfg.max_open_conns)
        .min_connections(cfg.max_idle_conns.min(cfg.max_open_conns))
        .max_lifetime(cfg.conn_max_lifetime)
        .acquire_timeout(cfg.timeout)
        .connect_with(options)
        .await
        .with_context(|| format!("connect to mysql at {}:{}", cfg.host, cfg.port))?;

    MySqlUserRepository::new(pool.clone(), cfg.timeout)
        .ensure_schema()
        .await
        .context("create users table")?;

    info!(host = %cfg.host, port = cfg.port, db = %cfg.name, "connected to mysql");
    Ok(Storage::MySql {
        pool,
        timeout: cfg.timeout,
    })
}

async fn connect_mongo(cfg: &DatabaseConfig) -> anyhow::Result<Storage> {
    let mut options = ClientOptions::parse(format!("mongodb://{}:{}", cfg.host, cfg.port))
        .await
        .context("parse mongodb address")?;
    options.app_name = Some("userhub".into());
    options.max_pool_size = Some(cfg.max_open_conns);
    options.min_pool_size = Some(cfg.max_idle_conns.min(cfg.max_open_conns));
    options.max_idle_time = Some(cfg.conn_max_lifetime);
    options.connect_timeout = Some(cfg.timeout);
    options.server_selection_timeout = Some(cfg.timeout);
    if !cfg.username.is_empty() {
        let mut credential = Credential::default();
        credential.username = Some(cfg.username.clone());
        credential.password = Some(cfg.password.clone());
        credential.source = Some(cfg.name.clone());
        options.credential = Some(credential);
    }

    let client = Client::with_options(options).context("build mongodb client")?;
    let database = client.database(&cfg.name);
    database
        .run_command(doc! { "ping": 1 })
        .await
        .with_context(|| format!("ping mongodb at {}:{}", cfg.host, cfg.port))?;

    MongoUserRepository::new(&database, cfg.timeout)
        .ensure_indexes()
        .await
        .context("create users indexes")?;

    info!(host = %cfg.host, port = cfg.port, db = %cfg.name, "connected to mongodb");
    Ok(Storage::MongoDb {
        client,
        database,
        timeout: cfg.timeout,
    })
}
