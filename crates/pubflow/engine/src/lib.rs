//! pubflow engine
//!
//! Turns queued publication intents into promoted, consistent live content:
//!
//! - [`monitor`]: polling loops with a bounded runner pool per job category
//! - [`runner`]: reduction and publication jobs
//! - [`postprocess`]: confirms finished publications before go-live
//! - [`golive`]: validation, file promotion with rollback, hierarchy
//!   reconciliation and status fan-out
//! - [`recovery`]: re-adopts work stranded by a crash
//! - [`service`]: the composition root and client operations

pub mod audit;
pub mod config;
pub mod error;
pub mod golive;
pub mod monitor;
pub mod paths;
pub mod postprocess;
pub mod queue;
pub mod recovery;
pub mod runner;
pub mod service;

pub use audit::{AuditEvent, AuditEventKind, AuditLogger, FileAuditLog, MemoryAuditLog, TracingAuditLog};
pub use config::{EngineConfig, GoLiveConfig, MonitorConfig, PathsConfig, RecoveryConfig};
pub use error::{EngineError, EngineResult};
pub use golive::{
    diff_hierarchy, FileRollback, GoLiveOrchestrator, HierarchyDiff, NoopLicenseReclaimer,
    PreviewLicenseReclaimer, PromotionOutcome, LIVE_FILE_INTEGRITY_FAILED, REDUCED_INTEGRITY_FAILED,
};
pub use monitor::{JobCategory, JobMonitor, MonitorHandle, PublicationJobs, ReductionJobs};
pub use paths::ContentPaths;
pub use postprocess::PostProcessor;
pub use queue::{GoLiveQueue, GoLiveSignal, PipelineSignals, PostProcessQueue, SignalQueue};
pub use recovery::{OrphanRecovery, Recovery, RecoveryReport, WatchOutcome};
pub use runner::{JobDetail, JobResult, JobRunner, PublicationRunner, ReductionRunner};
pub use service::{PublishingService, RunningService};
