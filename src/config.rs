//! Endpoint configuration (spec §3 "Endpoint configuration").
//!
//! Immutable for the life of an endpoint. Built with a small builder in the
//! teacher's constructor-argument style rather than a config file. No
//! environment variables or filesystem layout are part of the core.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;

use crate::functions::{FunctionTree, Resolver};
use crate::handlers::{FunctionErrorHandler, GeneralErrorHandler, HookFn, TimeoutHandler};

/// The receiver-side invocation context a local function sees as `this`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    /// The default: functions are invoked with the owning endpoint handle,
    /// so they can reach back via `ctx.endpoint().$call(...)`.
    Rpc,
    /// Functions are invoked with just the raw function tree.
    Functions,
}

impl Default for BindingMode {
    fn default() -> Self {
        BindingMode::Rpc
    }
}

#[derive(Clone)]
pub struct EndpointConfig {
    pub(crate) functions: FunctionTree,
    pub(crate) mode: BindingMode,
    pub(crate) meta: Option<Value>,
    pub(crate) events: HashSet<String>,
    pub(crate) response_timeout: Option<Duration>,
    pub(crate) ack_timeout: Option<Duration>,
    pub(crate) proxy_enabled: bool,
    pub(crate) resolver: Option<Resolver>,
    pub(crate) hook: Option<HookFn>,
    pub(crate) general_error_handler: Option<GeneralErrorHandler>,
    pub(crate) function_error_handler: Option<FunctionErrorHandler>,
    pub(crate) ack_timeout_handler: Option<TimeoutHandler>,
    pub(crate) timeout_handler: Option<TimeoutHandler>,
}

/// Default response timeout, per spec §3.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct EndpointConfigBuilder {
    cfg: EndpointConfig,
}

/// # Constructor Methods
impl EndpointConfigBuilder {
    pub fn new() -> Self {
        EndpointConfigBuilder {
            cfg: EndpointConfig {
                functions: FunctionTree::new(),
                mode: BindingMode::Rpc,
                meta: None,
                events: HashSet::new(),
                response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
                ack_timeout: None,
                proxy_enabled: false,
                resolver: None,
                hook: None,
                general_error_handler: None,
                function_error_handler: None,
                ack_timeout_handler: None,
                timeout_handler: None,
            },
        }
    }

    pub fn functions(mut self, functions: FunctionTree) -> Self {
        self.cfg.functions = functions;
        self
    }

    pub fn binding_mode(mut self, mode: BindingMode) -> Self {
        self.cfg.mode = mode;
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.cfg.meta = Some(meta);
        self
    }

    pub fn events(mut self, events: impl IntoIterator<Item = String>) -> Self {
        self.cfg.events = events.into_iter().collect();
        self
    }

    /// `None` disables the response timer entirely (the spec's "negative
    /// timeout" case; Rust has no negative `Duration`, so `None` is the
    /// disabling sentinel).
    pub fn response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cfg.response_timeout = timeout;
        self
    }

    /// `None` (the default) disables the ack timer. `Some(Duration::ZERO)`
    /// means "must already be acknowledged by the time the timer fires".
    pub fn ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cfg.ack_timeout = timeout;
        self
    }

    pub fn proxy_enabled(mut self, enabled: bool) -> Self {
        self.cfg.proxy_enabled = enabled;
        self
    }

    pub fn resolver(mut self, resolver: Resolver) -> Self {
        self.cfg.resolver = Some(resolver);
        self
    }

    pub fn on_request_hook(mut self, hook: HookFn) -> Self {
        self.cfg.hook = Some(hook);
        self
    }

    pub fn general_error_handler(mut self, handler: GeneralErrorHandler) -> Self {
        self.cfg.general_error_handler = Some(handler);
        self
    }

    pub fn function_error_handler(mut self, handler: FunctionErrorHandler) -> Self {
        self.cfg.function_error_handler = Some(handler);
        self
    }

    pub fn ack_timeout_handler(mut self, handler: TimeoutHandler) -> Self {
        self.cfg.ack_timeout_handler = Some(handler);
        self
    }

    pub fn timeout_handler(mut self, handler: TimeoutHandler) -> Self {
        self.cfg.timeout_handler = Some(handler);
        self
    }

    pub fn build(self) -> EndpointConfig {
        self.cfg
    }
}

impl Default for EndpointConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
