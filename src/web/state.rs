use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::{config::AppConfig, web::storage::PublicDisk};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    config: Arc<AppConfig>,
    disk: PublicDisk,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let state = Self::from_parts(pool, config);
        state
            .disk
            .ensure_root()
            .await
            .context("failed to prepare public storage")?;
        info!(root = %state.disk.root().display(), "public storage ready");

        Ok(state)
    }

    /// Assembles state around an existing pool without touching the database.
    pub fn from_parts(pool: PgPool, config: AppConfig) -> Self {
        let disk = PublicDisk::new(config.storage_root.clone(), config.app_url.clone());
        Self {
            pool,
            config: Arc::new(config),
            disk,
        }
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn disk(&self) -> &PublicDisk {
        &self.disk
    }
}
