//! A transport-agnostic, symmetric, bidirectional RPC engine.
//!
//! Each side registers a local function namespace (an [`EndpointHandle`]'s
//! [`functions()`][EndpointHandle::functions] tree) and calls the peer's
//! namespace through the same handle. The engine sits atop any
//! message-passing substrate (a [`Transport`] is just a post function plus a
//! receiver registration) and adds correlation of requests with responses,
//! fire-and-forget events, optional ack/response timeouts, streaming via
//! asynchronous sequences, pluggable serialization, request interception,
//! and one-to-many broadcast.
//!
//! ```no_run
//! use duplex_rpc::{value_fn, ChannelTransport, EndpointConfigBuilder, EndpointHandle, FunctionTree};
//!
//! # async fn run() {
//! let functions = FunctionTree::new();
//! functions.insert(
//!     "hi",
//!     value_fn(|args| {
//!         let name = args[0].as_str().unwrap_or_default();
//!         Ok(format!("Hi {name}, I am Bob").into())
//!     }),
//! );
//!
//! let (transport_a, transport_b) = ChannelTransport::pair();
//! let a = EndpointHandle::new(transport_a, EndpointConfigBuilder::new().build());
//! let _b = EndpointHandle::new(transport_b, EndpointConfigBuilder::new().functions(functions).build());
//!
//! let greeting = a.call("hi", vec!["Alice".into()]).await.unwrap();
//! assert_eq!(greeting, "Hi Alice, I am Bob");
//! # }
//! ```

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod functions;
pub mod handlers;
pub mod id;
pub mod pending;
pub mod proxy;
pub mod stream;
pub mod timer;
pub mod transport;

pub use broadcast::{BroadcastGroup, ChannelSpec};
pub use codec::{Codec, JsonCodec};
pub use config::{BindingMode, EndpointConfig, EndpointConfigBuilder};
pub use endpoint::{CallRaw, EndpointHandle};
pub use error::{ErrorPayload, RpcError};
pub use frame::Frame;
pub use functions::{func, stream_fn, value_fn, Binding, FunctionOutcome, FunctionTree, Handler};
pub use handlers::HandlerOutcome;
pub use id::Id;
pub use proxy::RemotePath;
pub use stream::RpcStream;
pub use transport::{ChannelTransport, Transport};

/// An [`EndpointHandle`] alone, exposed under the name spec.md uses for one
/// side of the RPC.
pub type Endpoint = EndpointHandle;
