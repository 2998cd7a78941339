//! The per-endpoint engine: message framing, correlation, timer discipline,
//! nested dispatch, the call surface, and close/reject semantics (spec §4).
//!
//! An [`EndpointHandle`] is the single public type for one side of the RPC.
//! It is cheap to clone (an `Arc` around shared state) and is itself the
//! `this` a local function sees when the endpoint's binding mode is
//! [`BindingMode::Rpc`][crate::config::BindingMode::Rpc].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;

use crate::codec::{Codec, JsonCodec};
use crate::config::{BindingMode, EndpointConfig};
use crate::error::RpcError;
use crate::frame::Frame;
use crate::functions::{Binding, FunctionOutcome, FunctionTree};
use crate::handlers::HandlerOutcome;
use crate::id::Id;
use crate::pending::{CorrelationTable, PendingCall};
use crate::stream::{RpcStream, StreamTable};
use crate::transport::{Extra, Payload, Transport, Unregister};

struct Inner {
    config: EndpointConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    correlation: CorrelationTable,
    streams: Arc<StreamTable>,
    closed: AtomicBool,
    unregister: Mutex<Option<Unregister>>,
}

/// One side of a duplex RPC. Cloning shares the same tables, timers, and
/// closed flag with every other clone (spec §3 "Lifecycle").
#[derive(Clone)]
pub struct EndpointHandle(Arc<Inner>);

/// The explicit form of an outbound call (spec §4.2 `callRaw`).
pub struct CallRaw {
    pub method: String,
    pub args: Vec<Value>,
    pub event: bool,
    pub optional: bool,
}

/// # Constructor Methods
impl EndpointHandle {
    /// Build an endpoint over `transport`, serializing frames with the
    /// default [`JsonCodec`].
    pub fn new(transport: impl Transport + 'static, config: EndpointConfig) -> Self {
        Self::with_codec(transport, JsonCodec, config)
    }

    /// Build an endpoint over `transport` with a custom [`Codec`].
    pub fn with_codec(
        transport: impl Transport + 'static,
        codec: impl Codec + 'static,
        config: EndpointConfig,
    ) -> Self {
        Self::new_dyn(Arc::new(transport), Arc::new(codec), config)
    }

    /// Build an endpoint from already type-erased transport and codec. Used
    /// directly by [`crate::broadcast::BroadcastGroup`], which holds a
    /// heterogeneous list of member transports.
    pub fn new_dyn(transport: Arc<dyn Transport>, codec: Arc<dyn Codec>, config: EndpointConfig) -> Self {
        let inner = Arc::new(Inner {
            config,
            transport,
            codec,
            correlation: CorrelationTable::default(),
            streams: Arc::new(StreamTable::default()),
            closed: AtomicBool::new(false),
            unregister: Mutex::new(None),
        });
        let handle = EndpointHandle(inner);

        // Inbound frames are queued onto one task and processed strictly in
        // arrival order, so StreamNext frames for the same id are always
        // pushed in receipt order (spec §5, §8) regardless of how many
        // worker threads the runtime has. Spawning a task per inbound
        // payload here would let two deliveries for the same id race each
        // other through `dispatch`. Only the local function invocation
        // inside `serve_request` is spawned off this task, since that is
        // the one step allowed to run concurrently with later frames.
        let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::unbounded_channel::<(Payload, Option<Extra>)>();
        let dispatch_handle = handle.clone();
        tokio::spawn(async move {
            while let Some((payload, extra)) = inbound_rx.recv().await {
                dispatch_handle.handle_inbound(payload, extra).await;
            }
        });

        let on_message: Arc<dyn Fn(Payload, Option<Extra>) + Send + Sync> =
            Arc::new(move |payload, extra| {
                let _ = inbound_tx.send((payload, extra));
            });
        let unregister = handle.0.transport.register_receive(on_message);
        *handle.0.unregister.lock().expect("unregister slot poisoned") = unregister;
        handle
    }
}

/// # Public Surface (spec §6 "Public API surface")
impl EndpointHandle {
    /// The local function tree (`$functions`): readable and mutable, with no
    /// caching of resolved handles (spec §3).
    pub fn functions(&self) -> &FunctionTree {
        &self.0.config.functions
    }

    /// Opaque configuration metadata (`$meta`).
    pub fn meta(&self) -> Option<&Value> {
        self.0.config.meta.as_ref()
    }

    /// `$closed`: whether [`close`][Self::close] has run.
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    /// `$close(cause?)`: terminate the endpoint (spec §4.9). Idempotent:
    /// second and subsequent calls are no-ops.
    pub fn close(&self, cause: Option<Arc<dyn std::error::Error + Send + Sync>>) {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(closed = true, "endpoint closing");
        self.0.correlation.drain(|path| RpcError::Closed {
            path: path.to_string(),
            cause: cause.clone(),
        });
        self.0.streams.fail_all(|path| RpcError::Closed {
            path: path.to_string(),
            cause: cause.clone(),
        });
        if let Some(unregister) = self.0.unregister.lock().expect("unregister slot poisoned").take() {
            unregister();
        }
    }

    /// `$rejectPendingCalls(handler?)`: drain every in-flight call without
    /// closing the endpoint. Streams are untouched (spec §4.2).
    pub fn reject_pending_calls(&self, handler: Option<Arc<dyn Fn(&str) -> RpcError + Send + Sync>>) {
        self.0.correlation.drain(move |path| match &handler {
            Some(h) => h(path),
            None => RpcError::Rejected { path: path.to_string() },
        });
    }

    /// `$call(path, ...args)`.
    pub async fn call(&self, path: impl Into<String>, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_with_hook(path.into(), args, false).await
    }

    /// `$callOptional(path, ...args)`.
    pub async fn call_optional(&self, path: impl Into<String>, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_with_hook(path.into(), args, true).await
    }

    /// `$callEvent(path, ...args)`: fire-and-forget, resolves once the frame
    /// is posted.
    pub async fn call_event(&self, path: impl Into<String>, args: Vec<Value>) -> Result<Value, RpcError> {
        let path = path.into();
        if self.is_closed() {
            return Err(RpcError::Closed { path, cause: None });
        }
        let frame = Frame::request(None, path, args, false);
        self.post_frame(frame).await?;
        Ok(Value::Null)
    }

    /// `$callStream(path, ...args)`: returns a lazy sequence; the Request is
    /// not sent until the first poll (spec §4.6).
    pub fn call_stream(&self, path: impl Into<String>, args: Vec<Value>) -> RpcStream {
        let path = path.into();
        let id = Id::generate();
        let table = self.0.streams.clone();
        let handle = self.clone();

        let start: Box<dyn FnOnce() + Send> = Box::new(move || {
            table.install(id, path.clone(), args.clone());
            if handle.is_closed() {
                table.with_mut(&id, |r| r.fail(RpcError::Closed { path: path.clone(), cause: None }));
                return;
            }
            match handle.0.config.ack_timeout {
                Some(d) => handle.arm_stream_ack_timer(id, d),
                None => {
                    if let Some(d) = handle.0.config.response_timeout {
                        handle.arm_stream_response_timer(id, d);
                    }
                }
            }
            let frame = Frame::request(Some(id), path.clone(), args.clone(), false);
            let handle2 = handle.clone();
            tokio::spawn(async move {
                if let Err(e) = handle2.post_frame(frame).await {
                    handle2.0.streams.with_mut(&id, |r| r.fail(e));
                }
            });
        });

        RpcStream {
            id,
            table: self.0.streams.clone(),
            started: false,
            start: Some(start),
        }
    }

    /// `$callRaw({method, args, event?, optional?})`.
    pub async fn call_raw(&self, raw: CallRaw) -> Result<Value, RpcError> {
        if raw.event {
            self.call_event(raw.method, raw.args).await
        } else if raw.optional {
            self.call_optional(raw.method, raw.args).await
        } else {
            self.call(raw.method, raw.args).await
        }
    }
}

/// Outbound path internals: the request hook pipeline (spec §4.7) and the
/// timer-governed send-and-await.
impl EndpointHandle {
    async fn call_with_hook(&self, path: String, args: Vec<Value>, optional: bool) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed { path, cause: None });
        }
        match self.0.config.hook.clone() {
            Some(hook) => {
                let handle = self.clone();
                let orig_path = path.clone();
                let orig_args = args.clone();
                let next: crate::handlers::NextFn = Arc::new(move |replacement| {
                    let handle = handle.clone();
                    let (p, a) = replacement.unwrap_or_else(|| (orig_path.clone(), orig_args.clone()));
                    Box::pin(async move { handle.perform_call(p, a, optional).await })
                });
                match hook(path, args, next).await {
                    Ok(v) => Ok(v),
                    Err(e) => {
                        self.handle_general_error(&e);
                        Err(e)
                    }
                }
            }
            None => self.perform_call(path, args, optional).await,
        }
    }

    /// The actual send: install a pending record, arm whichever timer is
    /// appropriate, post the Request, and await the terminal event.
    async fn perform_call(&self, path: String, args: Vec<Value>, optional: bool) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed { path, cause: None });
        }
        let id = Id::generate();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.0.correlation.insert(id, PendingCall::new(path.clone(), args.clone(), tx));

        match self.0.config.ack_timeout {
            Some(ack_dur) => self.arm_ack_timer(id, ack_dur),
            None => {
                if let Some(resp_dur) = self.0.config.response_timeout {
                    self.arm_response_timer(id, resp_dur);
                }
            }
        }

        let frame = Frame::request(Some(id), path.clone(), args, optional);
        if let Err(e) = self.post_frame(frame).await {
            if let Some(mut rec) = self.0.correlation.remove(&id) {
                rec.clear_timers();
            }
            return Err(e);
        }

        rx.await.unwrap_or(Err(RpcError::Closed { path, cause: None }))
    }
}

/// Timer discipline for response-expecting calls (spec §4.5).
impl EndpointHandle {
    fn arm_ack_timer(&self, id: Id, duration: Duration) {
        let gen = self.0.correlation.with_mut(&id, |r| r.ack_generation).unwrap_or(0);
        let handle = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            handle.on_call_ack_timeout(id, gen).await;
        });
        self.0.correlation.with_mut(&id, |r| r.ack_timer.set(task));
    }

    fn arm_response_timer(&self, id: Id, duration: Duration) {
        let gen = self.0.correlation.with_mut(&id, |r| r.response_generation).unwrap_or(0);
        let handle = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            handle.on_call_response_timeout(id, gen).await;
        });
        self.0.correlation.with_mut(&id, |r| r.response_timer.set(task));
    }

    async fn on_call_ack_timeout(&self, id: Id, gen: u64) {
        let snapshot = self
            .0
            .correlation
            .with_mut(&id, |rec| {
                if rec.ack_generation != gen || rec.ack_received {
                    None
                } else {
                    Some((rec.path.clone(), rec.args.clone()))
                }
            })
            .flatten();
        let Some((path, args)) = snapshot else { return };
        let outcome = match &self.0.config.ack_timeout_handler {
            Some(h) => h(&path, &args),
            None => HandlerOutcome::UseDefault,
        };
        self.resolve_call_timeout(id, path, outcome, true);
    }

    async fn on_call_response_timeout(&self, id: Id, gen: u64) {
        let snapshot = self
            .0
            .correlation
            .with_mut(&id, |rec| {
                if rec.response_generation != gen {
                    None
                } else {
                    Some((rec.path.clone(), rec.args.clone()))
                }
            })
            .flatten();
        let Some((path, args)) = snapshot else { return };
        let outcome = match &self.0.config.timeout_handler {
            Some(h) => h(&path, &args),
            None => HandlerOutcome::UseDefault,
        };
        self.resolve_call_timeout(id, path, outcome, false);
    }

    fn resolve_call_timeout(&self, id: Id, path: String, outcome: HandlerOutcome, is_ack: bool) {
        match outcome {
            HandlerOutcome::Suppress => {}
            HandlerOutcome::UseDefault => {
                if let Some(mut rec) = self.0.correlation.remove(&id) {
                    rec.clear_timers();
                    let err = if is_ack {
                        RpcError::AckTimeout { path }
                    } else {
                        RpcError::Timeout { path }
                    };
                    rec.settle(Err(err));
                }
            }
            HandlerOutcome::RejectWith(payload) => {
                if let Some(mut rec) = self.0.correlation.remove(&id) {
                    rec.clear_timers();
                    rec.settle(Err(RpcError::Remote { path, payload }));
                }
            }
        }
    }

    fn arm_stream_ack_timer(&self, id: Id, duration: Duration) {
        let gen = self.0.streams.with_mut(&id, |r| r.ack_generation).unwrap_or(0);
        let handle = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            handle.on_stream_ack_timeout(id, gen);
        });
        self.0.streams.with_mut(&id, |r| r.ack_timer.set(task));
    }

    fn arm_stream_response_timer(&self, id: Id, duration: Duration) {
        let gen = self.0.streams.with_mut(&id, |r| r.response_generation).unwrap_or(0);
        let handle = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            handle.on_stream_response_timeout(id, gen);
        });
        self.0.streams.with_mut(&id, |r| r.response_timer.set(task));
    }

    fn on_stream_ack_timeout(&self, id: Id, gen: u64) {
        let snapshot = self
            .0
            .streams
            .with_mut(&id, |r| {
                if r.ack_generation != gen || r.ack_received {
                    None
                } else {
                    Some((r.path.clone(), r.args.clone()))
                }
            })
            .flatten();
        let Some((path, args)) = snapshot else { return };
        let outcome = match &self.0.config.ack_timeout_handler {
            Some(h) => h(&path, &args),
            None => HandlerOutcome::UseDefault,
        };
        self.resolve_stream_timeout(id, path, outcome, true);
    }

    fn on_stream_response_timeout(&self, id: Id, gen: u64) {
        let snapshot = self
            .0
            .streams
            .with_mut(&id, |r| {
                if r.response_generation != gen {
                    None
                } else {
                    Some((r.path.clone(), r.args.clone()))
                }
            })
            .flatten();
        let Some((path, args)) = snapshot else { return };
        let outcome = match &self.0.config.timeout_handler {
            Some(h) => h(&path, &args),
            None => HandlerOutcome::UseDefault,
        };
        self.resolve_stream_timeout(id, path, outcome, false);
    }

    fn resolve_stream_timeout(&self, id: Id, path: String, outcome: HandlerOutcome, is_ack: bool) {
        match outcome {
            HandlerOutcome::Suppress => {}
            HandlerOutcome::UseDefault => {
                self.0.streams.with_mut(&id, |r| {
                    r.clear_timers();
                    let err = if is_ack {
                        RpcError::AckTimeout { path: path.clone() }
                    } else {
                        RpcError::Timeout { path: path.clone() }
                    };
                    r.fail(err);
                });
            }
            HandlerOutcome::RejectWith(payload) => {
                self.0.streams.with_mut(&id, |r| {
                    r.clear_timers();
                    r.fail(RpcError::Remote { path: path.clone(), payload });
                });
            }
        }
    }
}

/// Inbound dispatch (spec §4.3, §4.4).
impl EndpointHandle {
    async fn handle_inbound(&self, payload: Payload, _extra: Option<Extra>) {
        if self.is_closed() {
            return;
        }
        let frame = match self.0.codec.deserialize(payload) {
            Ok(f) => f,
            Err(e) => {
                self.handle_general_error(&e);
                return;
            }
        };
        self.dispatch(frame).await;
    }

    async fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Request { i, m, a, o } => {
                tracing::trace!(method = %m, has_id = i.is_some(), "inbound request");
                if let Some(id) = i {
                    let _ = self.post_frame(Frame::Ack { i: id }).await;
                }
                let handle = self.clone();
                let optional = o.unwrap_or(false);
                tokio::spawn(async move { handle.serve_request(i, m, a, optional).await });
            }
            Frame::Response { i, r, e } => {
                if let Some(mut rec) = self.0.correlation.remove(&i) {
                    rec.clear_timers();
                    let path = rec.path.clone();
                    let result = match e {
                        Some(err) => Err(error_from_wire(path, err)),
                        None => Ok(r.unwrap_or(Value::Null)),
                    };
                    rec.settle(result);
                }
            }
            Frame::Ack { i } => self.handle_ack(i),
            Frame::StreamNext { i, v } => {
                self.0.streams.with_mut(&i, |r| r.push(v));
            }
            Frame::StreamEnd { i } => {
                self.0.streams.with_mut(&i, |r| {
                    r.clear_timers();
                    r.end();
                });
            }
            Frame::StreamError { i, e } => {
                self.0.streams.with_mut(&i, |r| {
                    r.clear_timers();
                    let path = r.path.clone();
                    r.fail(error_from_wire(path, e));
                });
            }
        }
    }

    fn handle_ack(&self, id: Id) {
        let marked_call = self.0.correlation.with_mut(&id, |rec| {
            if rec.ack_received {
                return false;
            }
            rec.ack_received = true;
            rec.ack_timer.clear();
            rec.ack_generation += 1;
            true
        });
        match marked_call {
            Some(true) => {
                if let Some(d) = self.0.config.response_timeout {
                    self.arm_response_timer(id, d);
                }
            }
            Some(false) => {}
            None => {
                let marked_stream = self.0.streams.with_mut(&id, |rec| {
                    if rec.ack_received {
                        return false;
                    }
                    rec.ack_received = true;
                    rec.ack_timer.clear();
                    rec.ack_generation += 1;
                    true
                });
                if marked_stream == Some(true) {
                    if let Some(d) = self.0.config.response_timeout {
                        self.arm_stream_response_timer(id, d);
                    }
                }
            }
        }
    }

    /// Resolve, invoke, and answer one inbound Request (spec §4.3, §4.4).
    async fn serve_request(&self, id: Option<Id>, method: String, args: Vec<Value>, optional: bool) {
        let binding = self.make_binding();
        let default = self.0.config.functions.resolve(&method);
        let handler = match &self.0.config.resolver {
            Some(resolver) => resolver(&method, default.clone(), &binding).or(default),
            None => default,
        };

        let handler = match handler {
            Some(h) => h,
            None if optional => {
                if let Some(rid) = id {
                    self.post_response(rid, Ok(Value::Null)).await;
                }
                return;
            }
            None => {
                if let Some(rid) = id {
                    let err = RpcError::NotFound { path: method.clone() };
                    self.post_response(rid, Err(err.to_wire_payload())).await;
                }
                return;
            }
        };

        match handler(binding, args.clone()).await {
            FunctionOutcome::Value(Ok(v)) => {
                if let Some(rid) = id {
                    self.post_response(rid, Ok(v)).await;
                }
            }
            FunctionOutcome::Value(Err(e)) => {
                let suppress = self
                    .0
                    .config
                    .function_error_handler
                    .as_ref()
                    .map(|h| h(&method, &args, &e))
                    .unwrap_or(false);
                if !suppress {
                    if let Some(rid) = id {
                        self.post_response(rid, Err(e)).await;
                    }
                }
            }
            FunctionOutcome::Stream(mut s) => {
                let Some(rid) = id else { return };
                loop {
                    match s.next().await {
                        Some(Ok(v)) => {
                            let _ = self.post_frame(Frame::StreamNext { i: rid, v }).await;
                        }
                        Some(Err(e)) => {
                            let _ = self.post_frame(Frame::StreamError { i: rid, e }).await;
                            return;
                        }
                        None => {
                            let _ = self.post_frame(Frame::StreamEnd { i: rid }).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn make_binding(&self) -> Binding {
        match self.0.config.mode {
            BindingMode::Rpc => Binding::Endpoint(self.clone()),
            BindingMode::Functions => Binding::Functions(self.0.config.functions.clone()),
        }
    }

    /// Post a Response, retrying once with the failure itself as the
    /// payload if the first serialize/post attempt fails (spec §7).
    async fn post_response(&self, id: Id, result: Result<Value, Value>) {
        let frame = match result {
            Ok(v) => Frame::Response { i: id, r: Some(v), e: None },
            Err(e) => Frame::Response { i: id, r: None, e: Some(e) },
        };
        if let Err(err) = self.post_frame(frame).await {
            let fallback = Frame::Response {
                i: id,
                r: None,
                e: Some(err.to_wire_payload()),
            };
            let _ = self.post_frame(fallback).await;
        }
    }

    async fn post_frame(&self, frame: Frame) -> Result<(), RpcError> {
        let payload = match self.0.codec.serialize(&frame) {
            Ok(p) => p,
            Err(e) => {
                self.handle_general_error(&e);
                return Err(e);
            }
        };
        match self.0.transport.post(payload, None).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.handle_general_error(&e);
                Err(e)
            }
        }
    }

    fn handle_general_error(&self, err: &RpcError) {
        let handled = self.0.config.general_error_handler.as_ref().map(|h| h(err)).unwrap_or(false);
        if !handled {
            tracing::warn!(error = %err, "unhandled general error");
        }
    }
}

/// Reconstruct a typed [`RpcError`] from a wire error payload produced by
/// [`RpcError::to_wire_payload`], falling back to an opaque remote error for
/// payloads from non-Rust peers that don't follow that convention.
fn error_from_wire(path: String, payload: Value) -> RpcError {
    if let Some(kind) = payload.get("kind").and_then(Value::as_str) {
        match kind {
            "not-found-error" => return RpcError::NotFound { path },
            "closed-error" => return RpcError::Closed { path, cause: None },
            "ack-timeout-error" => return RpcError::AckTimeout { path },
            "timeout-error" => return RpcError::Timeout { path },
            _ => {}
        }
    }
    RpcError::Remote { path, payload }
}
