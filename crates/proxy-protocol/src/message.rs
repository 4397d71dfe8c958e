//! Protocol messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::failure::FailureDescription;
use crate::params::{OperationType, TargetBuildParameters};

/// Messages sent from the proxy to the peer, in send order.
///
/// `Success` and `Failure` are terminal: exactly one of them ends a session
/// and nothing follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    /// A chunk of the build's standard output.
    StandardOutput {
        #[serde(with = "crate::bytes")]
        output: Vec<u8>,
    },
    /// A chunk of the build's standard error.
    StandardError {
        #[serde(with = "crate::bytes")]
        output: Vec<u8>,
    },
    /// A progress event or a plain description of one.
    BuildEvent { event: BuildEventPayload },
    /// A value surfaced before the build completed.
    IntermediateResult {
        kind: IntermediateResultType,
        #[serde(with = "crate::bytes")]
        payload: Vec<u8>,
    },
    /// The serialized operation result.
    Success {
        #[serde(with = "crate::bytes")]
        payload: Vec<u8>,
    },
    /// The operation failed.
    Failure { failure: FailureDescription },
}

impl ProtocolMessage {
    /// Returns true for `Success` and `Failure`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    /// Short name used in logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::StandardOutput { .. } => "standard_output",
            Self::StandardError { .. } => "standard_error",
            Self::BuildEvent { .. } => "build_event",
            Self::IntermediateResult { .. } => "intermediate_result",
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
        }
    }
}

/// Phase tag of an intermediate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntermediateResultType {
    StreamedValue,
    ProjectLoaded,
    BuildFinished,
}

/// Body of a `BuildEvent` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildEventPayload {
    /// Human-readable description from the catch-all listener.
    Description(String),
    /// Structured event from the typed listener.
    Progress(SerializedProgressEvent),
}

/// Wire form of a progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedProgressEvent {
    pub kind: ProgressEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<OperationType>,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub event_time: DateTime<Utc>,
    /// Outcome for finish events ("success", "failed", "skipped", "up-to-date").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// Phase of an operation a progress event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    Start,
    Status,
    Finish,
}

/// Messages sent from the peer to the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// The build request. Sent once, right after connecting.
    BuildParameters(TargetBuildParameters),
    /// Acknowledges receipt of the terminal message.
    ResultAck,
}
