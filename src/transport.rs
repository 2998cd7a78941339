//! The transport contract (spec §6).
//!
//! Transport is the one true external collaborator of the core: a function
//! that posts an opaque payload, and a registration hook that hands back a
//! receiver for inbound payloads. An optional unregister, symmetrical to the
//! registration, runs on close.
//!
//! `extra` models the "additional trailing arguments forwarded verbatim to
//! each post performed in response" clause, most transports (channels,
//! WebSocket, IPC) never need it; a transport like a worker `postMessage`
//! that carries transferables alongside the payload can stash whatever
//! side-channel context needs to ride along with a reply in this opaque
//! slot. Kept as `Option<Value>` rather than an associated type so `dyn
//! Transport` stays usable (the endpoint is generic over which transport
//! it's wired to only at construction time, not throughout its API).

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::RpcError;

pub type Payload = serde_json::Value;
pub type Extra = serde_json::Value;
pub type Unregister = Box<dyn FnOnce() + Send>;

pub trait Transport: Send + Sync + 'static {
    /// Post a single frame's serialized payload onto the wire.
    fn post(&self, payload: Payload, extra: Option<Extra>) -> BoxFuture<'static, Result<(), RpcError>>;

    /// Register the function invoked for each inbound payload. Called once
    /// at endpoint construction. The returned handle, if any, is invoked on
    /// close.
    fn register_receive(&self, on_message: Arc<dyn Fn(Payload, Option<Extra>) + Send + Sync>) -> Option<Unregister>;
}

/// An in-process, channel-backed transport, the Rust analogue of wiring two
/// endpoints together over `postMessage` in the same process, or a pair of
/// in-memory channels. Primarily used by tests, but just as suitable for
/// wiring two endpoints that live in the same binary.
pub struct ChannelTransport {
    tx: tokio::sync::mpsc::UnboundedSender<Payload>,
    rx: std::sync::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<Payload>>>,
}

impl ChannelTransport {
    /// Build a connected pair: frames posted on `a` are delivered to `b`'s
    /// receiver and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, rx_b) = tokio::sync::mpsc::unbounded_channel();
        (
            ChannelTransport {
                tx: tx_a,
                rx: std::sync::Mutex::new(Some(rx_b)),
            },
            ChannelTransport {
                tx: tx_b,
                rx: std::sync::Mutex::new(Some(rx_a)),
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn post(&self, payload: Payload, _extra: Option<Extra>) -> BoxFuture<'static, Result<(), RpcError>> {
        let res = self.tx.send(payload).map_err(|_| RpcError::Closed {
            path: String::new(),
            cause: None,
        });
        Box::pin(async move { res })
    }

    fn register_receive(&self, on_message: Arc<dyn Fn(Payload, Option<Extra>) + Send + Sync>) -> Option<Unregister> {
        let mut rx = self
            .rx
            .lock()
            .expect("channel transport receiver poisoned")
            .take()
            .expect("register_receive called more than once on the same ChannelTransport");
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                on_message(payload, None);
            }
        });
        None
    }
}
