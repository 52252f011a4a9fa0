//! Job runners
//!
//! A runner executes exactly one unit of work and is consumed by doing so.
//! It never writes its own outcome back to the store; the owning monitor
//! does that when it reaps the runner.

mod publication;
mod reduction;

pub use publication::{PublicationOutput, PublicationRunner};
pub use reduction::{ReductionOutput, ReductionRunner};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// How a job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult<O> {
    Success(O),
    /// Terminal failure with a user-visible message
    Error(String),
    /// Stopped by cancellation; the record keeps its current status
    Canceled,
}

impl<O> JobResult<O> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobResult::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// The record a runner worked on together with its result
#[derive(Debug, Clone)]
pub struct JobDetail<R, O> {
    pub request: R,
    pub result: JobResult<O>,
}

impl<R, O> JobDetail<R, O> {
    pub fn new(request: R, result: JobResult<O>) -> Self {
        Self { request, result }
    }
}

/// Executes one job end-to-end
#[async_trait]
pub trait JobRunner: Send + 'static {
    type Request: Clone + Send + 'static;
    type Output: Clone + Send + 'static;

    async fn execute(
        self,
        cancel: CancellationToken,
    ) -> JobDetail<Self::Request, Self::Output>;
}
