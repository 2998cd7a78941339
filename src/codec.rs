//! Pluggable serialization (spec §6, serialization contract).
//!
//! Two pure functions over the frame record. The default pass-through
//! serializes/deserializes via `serde_json::Value`, which is the identity
//! transform for any transport that already clones/moves values (e.g. an
//! in-process channel) and a JSON transform for anything that needs bytes.

use serde_json::Value;

use crate::error::RpcError;
use crate::frame::Frame;

pub trait Codec: Send + Sync + 'static {
    fn serialize(&self, frame: &Frame) -> Result<Value, RpcError>;
    fn deserialize(&self, payload: Value) -> Result<Frame, RpcError>;
}

/// The default codec: frames pass through `serde_json::Value` unchanged in
/// shape, preserving the tag discriminator and every field named in §4.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn serialize(&self, frame: &Frame) -> Result<Value, RpcError> {
        serde_json::to_value(frame).map_err(|e| RpcError::General {
            path: String::new(),
            source: Box::new(e),
        })
    }

    fn deserialize(&self, payload: Value) -> Result<Frame, RpcError> {
        serde_json::from_value(payload).map_err(|e| RpcError::General {
            path: String::new(),
            source: Box::new(e),
        })
    }
}
