//! Audit trail for validation failures and promotions

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pubflow_types::{ContentItemId, PublicationRequestId, ReductionTaskId, SelectionGroupId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventKind {
    ReducedContentValidationFailed {
        selection_group_id: SelectionGroupId,
        reduction_task_id: ReductionTaskId,
        path: PathBuf,
        expected_checksum: String,
        actual_checksum: Option<String>,
    },
    LiveFileValidationFailed {
        purpose: String,
        path: PathBuf,
        expected_checksum: String,
        actual_checksum: Option<String>,
    },
    ContentPublished {
        files: Vec<PathBuf>,
    },
    SelectionGroupPublished {
        selection_group_id: SelectionGroupId,
        reduction_task_id: ReductionTaskId,
        path: PathBuf,
    },
}

impl AuditEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEventKind::ReducedContentValidationFailed { .. } => {
                "reduced_content_validation_failed"
            }
            AuditEventKind::LiveFileValidationFailed { .. } => "live_file_validation_failed",
            AuditEventKind::ContentPublished { .. } => "content_published",
            AuditEventKind::SelectionGroupPublished { .. } => "selection_group_published",
        }
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub content_item_id: ContentItemId,
    #[serde(default)]
    pub publication_request_id: Option<PublicationRequestId>,
    pub kind: AuditEventKind,
}

impl AuditEvent {
    pub fn new(content_item_id: ContentItemId, kind: AuditEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            content_item_id,
            publication_request_id: None,
            kind,
        }
    }

    pub fn for_request(mut self, request: PublicationRequestId) -> Self {
        self.publication_request_id = Some(request);
        self
    }
}

/// Destination for audit events
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, event: AuditEvent) -> EngineResult<()>;
}

/// Emits audit events as structured log lines
#[derive(Debug, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLogger for TracingAuditLog {
    async fn log(&self, event: AuditEvent) -> EngineResult<()> {
        tracing::info!(
            target: "pubflow::audit",
            event = event.kind.name(),
            content_item_id = %event.content_item_id,
            publication_request_id = ?event.publication_request_id,
            detail = ?event.kind,
            "Audit"
        );
        Ok(())
    }
}

/// In-memory audit log for testing
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all events
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.name() == name)
            .count()
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLog {
    async fn log(&self, event: AuditEvent) -> EngineResult<()> {
        self.events.write().push(event);
        Ok(())
    }
}

/// Append-only JSON-lines audit file
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    // Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl FileAuditLog {
    pub async fn new(path: PathBuf) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read all events from file
    pub async fn read_all(&self) -> EngineResult<Vec<AuditEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent =
                serde_json::from_str(&line).map_err(|e| EngineError::Audit(e.to_string()))?;
            events.push(event);
        }

        Ok(events)
    }
}

#[async_trait]
impl AuditLogger for FileAuditLog {
    async fn log(&self, event: AuditEvent) -> EngineResult<()> {
        let mut json = serde_json::to_string(&event).map_err(|e| EngineError::Audit(e.to_string()))?;
        json.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn published() -> AuditEvent {
        AuditEvent::new(
            ContentItemId::generate(),
            AuditEventKind::ContentPublished {
                files: vec![PathBuf::from("a.json")],
            },
        )
        .for_request(PublicationRequestId::generate())
    }

    #[tokio::test]
    async fn test_memory_log() {
        let log = MemoryAuditLog::new();
        log.log(published()).await.unwrap();
        assert_eq!(log.count("content_published"), 1);
        assert_eq!(log.count("live_file_validation_failed"), 0);
    }

    #[tokio::test]
    async fn test_file_log_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let log = FileAuditLog::new(dir.path().join("audit/events.jsonl"))
            .await
            .unwrap();

        let first = published();
        log.log(first.clone()).await.unwrap();
        log.log(published()).await.unwrap();

        let events = log.read_all().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], first);
    }
}
