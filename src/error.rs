//! Error taxonomy for the engine.
//!
//! Every variant carries the offending method path where one exists, per
//! the "every error carries the offending method path" requirement.

use serde_json::Value;

/// A structured error payload as carried on the wire in a Response's `e`
/// field or a StreamError's `e` field.
///
/// The shape is a convention, not a requirement: the core only requires
/// that whatever a sender produces is reproduced at the receiver (that is
/// a serialization concern, not a framing one). We use this shape for
/// errors raised locally so that remote peers (including non-Rust ones)
/// can render something useful.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
    pub path: Option<String>,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, path: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            path,
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Errors surfaced at the local call boundary.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The remote function threw while serving our request.
    #[error("{path}: remote function error: {payload:?}")]
    Remote { path: String, payload: Value },

    /// The method path did not resolve on the remote and the call was not optional.
    #[error("{path}: not found")]
    NotFound { path: String },

    /// serialize/deserialize or post failed, or a request hook threw.
    #[error("{path}: general error: {source}")]
    General {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The response timer fired before a Response/StreamEnd/StreamError arrived.
    #[error("{path}: timeout")]
    Timeout { path: String },

    /// The ack timer fired before an Ack was observed.
    #[error("{path}: ack timeout")]
    AckTimeout { path: String },

    /// The endpoint was closed, either before or during the call. `cause` is
    /// `Arc`-shared rather than boxed because `close()` stamps the same
    /// underlying cause onto every pending record it drains.
    #[error("{path}: closed")]
    Closed {
        path: String,
        #[source]
        cause: Option<std::sync::Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// `rejectPendingCalls` drained the call before it completed.
    #[error("{path}: rejected pending call")]
    Rejected { path: String },
}

impl RpcError {
    pub fn path(&self) -> &str {
        match self {
            RpcError::Remote { path, .. }
            | RpcError::NotFound { path }
            | RpcError::General { path, .. }
            | RpcError::Timeout { path }
            | RpcError::AckTimeout { path }
            | RpcError::Closed { path, .. }
            | RpcError::Rejected { path } => path,
        }
    }

    /// Render this error into the wire payload sent back in a Response's `e`
    /// field when a local function call failed before invocation (e.g. not
    /// found).
    pub fn to_wire_payload(&self) -> Value {
        let kind = match self {
            RpcError::Remote { .. } => "function-error",
            RpcError::NotFound { .. } => "not-found-error",
            RpcError::General { .. } => "general-error",
            RpcError::Timeout { .. } => "timeout-error",
            RpcError::AckTimeout { .. } => "ack-timeout-error",
            RpcError::Closed { .. } => "closed-error",
            RpcError::Rejected { .. } => "rejected-error",
        };
        ErrorPayload::new(kind, self.to_string(), Some(self.path().to_string())).into_value()
    }
}
