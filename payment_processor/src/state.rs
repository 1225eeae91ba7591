use std::sync::Arc;

use anyhow::{Context, Result};
use common::{Database, DatabaseOptions, MpesaClient};

use crate::config::AppConfig;
use crate::intake::IntakePipeline;
use crate::retry::RetryScheduler;

/// Long-lived handles shared by the intake pipeline and the retry scheduler.
pub struct AppState {
    pub gateway: Arc<MpesaClient>,
    pub db: Arc<Database>,
}
impl AppState {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let gateway = MpesaClient::new(config.mpesa.clone())?;
        log::info!(
            "M-Pesa service initialized environment={:?} business_short_code={}",
            config.mpesa.environment,
            gateway.business_short_code()
        );

        let db = Database::with_options(
            &config.database_url,
            DatabaseOptions {
                max_connections: config.database_max_connections,
                max_attempts: config.max_attempts,
                ..DatabaseOptions::default()
            },
        )
        .await
        .context("Failed to set up outcome store")?;
        log::info!("Database initialized successfully!");

        Ok(AppState {
            gateway: Arc::new(gateway),
            db: Arc::new(db),
        })
    }

    pub fn pipeline(&self) -> IntakePipeline {
        IntakePipeline::new(self.gateway.clone(), self.db.clone())
    }

    pub fn scheduler(&self, config: &AppConfig) -> RetryScheduler {
        RetryScheduler::new(self.gateway.clone(), self.db.clone(), config.retry.clone())
    }
}
