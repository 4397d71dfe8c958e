//! Progress events reported by the build tool.

use chrono::{DateTime, Utc};
use proxy_protocol::{OperationType, ProgressEventKind};
use std::sync::Arc;

/// A progress event as the build tool reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub operation_type: OperationType,
    pub kind: ProgressEventKind,
    /// Short name of the operation (e.g. a task path).
    pub display_name: String,
    /// Human-readable description. May be empty.
    pub description: String,
    pub event_time: DateTime<Utc>,
    /// Outcome, for finish events.
    pub outcome: Option<String>,
}

impl ProgressEvent {
    /// A start event with `description` derived from the display name.
    pub fn started(operation_type: OperationType, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            operation_type,
            kind: ProgressEventKind::Start,
            description: format!("{} started", display_name),
            display_name,
            event_time: Utc::now(),
            outcome: None,
        }
    }

    /// A finish event carrying `outcome`.
    pub fn finished(
        operation_type: OperationType,
        display_name: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        let display_name = display_name.into();
        let outcome = outcome.into();
        Self {
            operation_type,
            kind: ProgressEventKind::Finish,
            description: format!("{} {}", display_name, outcome),
            display_name,
            event_time: Utc::now(),
            outcome: Some(outcome),
        }
    }

    /// Replace the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Callback invoked for each progress event, possibly from a build-tool thread.
pub type ProgressListener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;
