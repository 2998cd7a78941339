//! Pluggable decision points: general-error, function-error, and timeout
//! handlers (spec §7), and the request hook (spec §4.7).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RpcError;

/// What a timeout/ack-timeout handler decided to do instead of the default
/// rejection.
pub enum HandlerOutcome {
    /// No opinion, reject with the default timeout/ack-timeout error.
    UseDefault,
    /// Suppress the default error. The handler is responsible for resolving
    /// the call some other way; if it does not, the call stays pending.
    Suppress,
    /// Reject with a custom error payload instead of the default one.
    RejectWith(Value),
}

/// `Fn(path, args) -> HandlerOutcome`, consulted on ack-timeout or
/// response-timeout expiry. Ack-timeout handlers receive the arguments
/// captured at call time, not anything observed on the wire (spec §9, open
/// question).
pub type TimeoutHandler = Arc<dyn Fn(&str, &[Value]) -> HandlerOutcome + Send + Sync>;

/// `Fn(path, args, error) -> bool`. `true` suppresses the Response that
/// would otherwise carry the error back to the caller.
pub type FunctionErrorHandler = Arc<dyn Fn(&str, &[Value], &Value) -> bool + Send + Sync>;

/// `Fn(&RpcError) -> bool`. `true` means the handler considers the error
/// handled; otherwise it is raised at the operation boundary.
pub type GeneralErrorHandler = Arc<dyn Fn(&RpcError) -> bool + Send + Sync>;

/// The continuation an `onRequest` hook invokes to perform (or replace) the
/// real send. Passing `None` sends the original Request unmodified; `Some`
/// replaces the method path and arguments before sending.
pub type NextFn =
    Arc<dyn Fn(Option<(String, Vec<Value>)>) -> Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>> + Send + Sync>;

/// `Fn(path, args, next) -> Future<Result<Value, RpcError>>`.
///
/// The hook must do exactly one of: call `next` (propagating its result),
/// return a synthetic `Ok` without calling `next` (short-circuit: no frame
/// is ever sent, so no pending record or timers are created), or return
/// `Err` (routed through the general-error handler by the caller).
pub type HookFn = Arc<
    dyn Fn(String, Vec<Value>, NextFn) -> Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>
        + Send
        + Sync,
>;
