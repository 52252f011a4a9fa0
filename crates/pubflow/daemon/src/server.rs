//! Server setup and lifecycle management

use crate::config::{DaemonConfig, StorageConfig};
use crate::error::DaemonResult;
use pubflow_engine::{AuditLogger, FileAuditLog, PublishingService, TracingAuditLog};
use pubflow_reducer::TabularReducer;
use pubflow_store::{InMemoryTaskStore, PostgresTaskStore, TaskStore};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// pubflow daemon server
pub struct Server {
    config: DaemonConfig,
    service: PublishingService,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let store = build_store(&config.storage).await?;
        let audit = build_audit(&config).await?;

        let service = PublishingService::new(store, Arc::new(TabularReducer::new()), config.engine())
            .with_audit(audit);

        Ok(Self { config, service })
    }

    pub fn service(&self) -> &PublishingService {
        &self.service
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then stop every pipeline component
    pub async fn run_until<F>(self, shutdown: F) -> DaemonResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::fs::create_dir_all(&self.config.paths.content_item_root).await?;
        tokio::fs::create_dir_all(&self.config.paths.exchange_root).await?;

        let cancel = CancellationToken::new();
        let running = self.service.start(cancel.clone()).await?;

        let report = running.recovery();
        tracing::info!(
            requeued_tasks = report.requeued_tasks,
            watched_tasks = report.watched_tasks,
            requeued_requests = report.requeued_requests,
            post_processing_resumed = report.post_processing_resumed,
            go_live_resumed = report.go_live_resumed,
            backups_removed = report.backups_removed,
            backups_restored = report.backups_restored,
            "Startup recovery finished"
        );
        tracing::info!(
            content_root = %self.config.paths.content_item_root.display(),
            exchange_root = %self.config.paths.exchange_root.display(),
            max_reductions = self.config.monitor.max_concurrent_reductions,
            max_publications = self.config.monitor.max_concurrent_publications,
            "pubflow daemon running"
        );

        shutdown.await;

        tracing::info!("pubflow daemon shutting down");
        running.shutdown().await;

        Ok(())
    }
}

async fn build_store(config: &StorageConfig) -> DaemonResult<Arc<dyn TaskStore>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            tracing::info!(max_connections, "Connecting to PostgreSQL");
            let store = PostgresTaskStore::new(url, *max_connections, *connect_timeout_secs).await?;
            Ok(Arc::new(store))
        }
    }
}

async fn build_audit(config: &DaemonConfig) -> DaemonResult<Arc<dyn AuditLogger>> {
    match &config.audit.file {
        Some(path) => {
            tracing::info!(path = %path.display(), "Writing audit events to file");
            Ok(Arc::new(FileAuditLog::new(path.clone()).await?))
        }
        None => Ok(Arc::new(TracingAuditLog)),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;

    fn config(dir: &std::path::Path) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.paths.content_item_root = dir.join("content");
        config.paths.exchange_root = dir.join("exchange");
        config.monitor.poll_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_run_until_starts_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let server = Server::new(config.clone()).await.unwrap();

        server
            .run_until(tokio::time::sleep(std::time::Duration::from_millis(50)))
            .await
            .unwrap();

        assert!(config.paths.content_item_root.is_dir());
        assert!(config.paths.exchange_root.is_dir());
    }

    #[tokio::test]
    async fn test_file_audit_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        let audit_path = dir.path().join("logs").join("audit.jsonl");
        config.audit = AuditConfig {
            file: Some(audit_path.clone()),
        };

        let _server = Server::new(config).await.unwrap();
        assert!(audit_path.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_unreachable_postgres_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.storage = StorageConfig::Postgres {
            url: "postgres://pubflow@127.0.0.1:1/pubflow".to_string(),
            max_connections: 1,
            connect_timeout_secs: 1,
        };

        let result = Server::new(config).await;
        assert!(matches!(result, Err(crate::error::DaemonError::Storage(_))));
    }
}
