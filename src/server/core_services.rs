//! Shared state wiring for the daemon: database pool, live node registry,
//! credential collaborator, and the sweep task.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::credentials::{CredentialService, UuidCredentialService};
use crate::db;
use crate::db::services::{usage_service, ReportOutcome, ServiceError, UsageReport};
use crate::server::config::ServerConfig;
use crate::server::node_state::NodeHealthRegistry;
use crate::sweep::{SweepConfig, SweepService};

#[derive(Clone)]
pub struct AppServices {
    pub db: sea_orm::DatabaseConnection,
    pub node_registry: Arc<NodeHealthRegistry>,
    pub credentials: Arc<dyn CredentialService>,
}

impl AppServices {
    /// Connects the database, brings the schema up, and seeds the sentinel
    /// Master admin and node.
    pub async fn initialize(config: &ServerConfig) -> Result<Self, ServiceError> {
        let db = db::connect(&config.database_url, config.db_max_connections).await?;
        db::ensure_ready_once(&db).await?;
        info!("core services initialized");
        Ok(Self {
            db,
            node_registry: NodeHealthRegistry::new(),
            credentials: Arc::new(UuidCredentialService),
        })
    }

    /// Ingestion entry point for the node transport: records the batch and
    /// keeps the live health registry in step with the outcome.
    pub async fn ingest_node_report(
        &self,
        node_id: i32,
        reports: &[UsageReport],
    ) -> Result<Vec<ReportOutcome>, ServiceError> {
        match usage_service::record_usage(&self.db, node_id, reports).await {
            Ok(outcomes) => {
                self.node_registry.mark_connected(node_id, Utc::now());
                Ok(outcomes)
            }
            Err(e) => {
                self.node_registry.mark_error(node_id, e.to_string());
                Err(e)
            }
        }
    }

    /// Spawns the periodic reset/autodelete sweep.
    pub fn spawn_sweep(&self, config: &ServerConfig) -> JoinHandle<()> {
        let sweep = SweepService::new(
            self.db.clone(),
            SweepConfig {
                interval_secs: config.sweep_interval_secs,
                autodelete_days: config.autodelete_days,
            },
        );
        tokio::spawn(sweep.run_periodic())
    }
}
