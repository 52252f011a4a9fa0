//! Status machines for reduction tasks and publication requests

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a reduction task asks of the reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionAction {
    /// Only extract the master content hierarchy
    HierarchyOnly,
    /// Extract the master hierarchy and produce a reduced artifact
    HierarchyAndReduction,
}

impl ReductionAction {
    pub fn includes_reduction(&self) -> bool {
        matches!(self, ReductionAction::HierarchyAndReduction)
    }
}

/// Lifecycle of a reduction task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionStatus {
    Unspecified,
    Queued,
    Reducing,
    Reduced,
    Error,
    Live,
    Replaced,
}

impl ReductionStatus {
    /// Terminal for the runner: nothing further happens until promotion
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReductionStatus::Reduced
                | ReductionStatus::Error
                | ReductionStatus::Live
                | ReductionStatus::Replaced
        )
    }

    /// Statuses a crashed process can leave behind
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ReductionStatus::Queued | ReductionStatus::Reducing | ReductionStatus::Reduced
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReductionStatus::Unspecified => "unspecified",
            ReductionStatus::Queued => "queued",
            ReductionStatus::Reducing => "reducing",
            ReductionStatus::Reduced => "reduced",
            ReductionStatus::Error => "error",
            ReductionStatus::Live => "live",
            ReductionStatus::Replaced => "replaced",
        }
    }
}

impl fmt::Display for ReductionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a publication request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    Unknown,
    Queued,
    Processing,
    PostProcessReady,
    PostProcessing,
    Confirming,
    Confirmed,
    Replaced,
    Error,
    Canceled,
}

impl PublicationStatus {
    /// A request in one of these states will never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublicationStatus::Confirmed
                | PublicationStatus::Replaced
                | PublicationStatus::Error
                | PublicationStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Unknown => "unknown",
            PublicationStatus::Queued => "queued",
            PublicationStatus::Processing => "processing",
            PublicationStatus::PostProcessReady => "post_process_ready",
            PublicationStatus::PostProcessing => "post_processing",
            PublicationStatus::Confirming => "confirming",
            PublicationStatus::Confirmed => "confirmed",
            PublicationStatus::Replaced => "replaced",
            PublicationStatus::Error => "error",
            PublicationStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_terminal_states() {
        assert!(ReductionStatus::Reduced.is_terminal());
        assert!(ReductionStatus::Error.is_terminal());
        assert!(!ReductionStatus::Reducing.is_terminal());
        assert!(!ReductionStatus::Queued.is_terminal());
    }

    #[test]
    fn test_publication_terminal_states() {
        assert!(PublicationStatus::Confirmed.is_terminal());
        assert!(PublicationStatus::Canceled.is_terminal());
        assert!(!PublicationStatus::Confirming.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&PublicationStatus::PostProcessReady).unwrap();
        assert_eq!(json, "\"post_process_ready\"");
        assert_eq!(PublicationStatus::PostProcessReady.as_str(), "post_process_ready");
    }
}
