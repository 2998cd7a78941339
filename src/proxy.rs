//! Recursive callable proxy (spec §4.2, §9 "Recursive callable proxy").
//!
//! Dynamic languages can make every dotted prefix of the remote namespace a
//! callable object; Rust can't make a value both callable and indexable, so
//! this is the builder spec §9 prescribes: `remote.path("a").path("b").call(...)`
//! plus `.event(...)`/`.stream(...)` standing in for the `.asEvent`/`.asStream`
//! suffix operations. `$`-prefixed operations on [`EndpointHandle`] itself
//! always take precedence simply because they are inherent methods, not
//! entries reachable through `path()`, so the precedence rule falls out of
//! the type system rather than needing a runtime check.

use serde_json::Value;

use crate::endpoint::EndpointHandle;
use crate::error::RpcError;
use crate::stream::RpcStream;

/// A navigable handle onto one dotted path of the peer's function tree.
/// Building one does not touch the wire; only `call`/`call_optional`/
/// `event`/`stream` do.
#[derive(Clone)]
pub struct RemotePath {
    endpoint: EndpointHandle,
    path: String,
}

impl EndpointHandle {
    /// Start (or continue) building a dotted remote path.
    pub fn path(&self, segment: impl Into<String>) -> RemotePath {
        RemotePath {
            endpoint: self.clone(),
            path: segment.into(),
        }
    }
}

impl RemotePath {
    /// Append another segment, producing `"a.b"` from `remote.path("a").join("b")`.
    pub fn join(mut self, segment: impl Into<String>) -> Self {
        self.path.push('.');
        self.path.push_str(&segment.into());
        self
    }

    /// The fully-qualified dotted path this builder currently points at.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Response-expecting call (the proxy's default callable behavior).
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.endpoint.call(self.path.clone(), args).await
    }

    /// As `call`, but tolerates a missing remote function.
    pub async fn call_optional(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.endpoint.call_optional(self.path.clone(), args).await
    }

    /// `.asEvent`: rewrite this call into a fire-and-forget.
    pub async fn event(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.endpoint.call_event(self.path.clone(), args).await
    }

    /// `.asStream`: rewrite this call into a streamed call.
    pub fn stream(&self, args: Vec<Value>) -> RpcStream {
        self.endpoint.call_stream(self.path.clone(), args)
    }
}
