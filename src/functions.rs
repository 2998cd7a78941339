//! The local function tree and nested path resolution (spec §3, §4.4).
//!
//! Lookup walks the tree fresh on every call, nothing is cached, so
//! mutating the tree at runtime is observed on the next invocation.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use serde_json::Value;

use crate::endpoint::EndpointHandle;

/// The result of invoking a local function.
pub enum FunctionOutcome {
    /// A finite, immediately-available result (or error) for a unary call.
    Value(Result<Value, Value>),
    /// An asynchronous sequence: every yielded `Ok` is posted as StreamNext,
    /// normal completion posts StreamEnd, and a yielded `Err` posts
    /// StreamError and ends the sequence.
    Stream(BoxStream<'static, Result<Value, Value>>),
}

/// What a local function sees as `this`: either the owning endpoint handle
/// (binding mode `rpc`, the default, enables `ctx.endpoint().$call(...)`)
/// or just the raw function tree (binding mode `functions`).
#[derive(Clone)]
pub enum Binding {
    Endpoint(EndpointHandle),
    Functions(FunctionTree),
}

impl Binding {
    pub fn endpoint(&self) -> Option<&EndpointHandle> {
        match self {
            Binding::Endpoint(e) => Some(e),
            Binding::Functions(_) => None,
        }
    }

    pub fn functions(&self) -> &FunctionTree {
        match self {
            Binding::Endpoint(e) => e.functions(),
            Binding::Functions(f) => f,
        }
    }
}

pub type Handler = Arc<
    dyn Fn(Binding, Vec<Value>) -> Pin<Box<dyn std::future::Future<Output = FunctionOutcome> + Send>>
        + Send
        + Sync,
>;

enum Node {
    Leaf(Handler),
    Branch(HashMap<String, Node>),
}

/// An arbitrarily deep mapping of dotted method names to callables, shared
/// (cheaply cloned) by every holder: an endpoint, or every member of a
/// broadcast group.
#[derive(Clone)]
pub struct FunctionTree {
    root: Arc<Mutex<HashMap<String, Node>>>,
}

impl Default for FunctionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionTree {
    pub fn new() -> Self {
        FunctionTree {
            root: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a function at a dotted path, creating intermediate branches
    /// as needed. Overwrites whatever was previously at that path.
    pub fn insert(&self, path: &str, handler: Handler) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let leaf = segments.pop().expect("path must not be empty");
        let mut root = self.root.lock().expect("function tree poisoned");
        let mut node = &mut *root;
        for seg in segments {
            let entry = node
                .entry(seg.to_string())
                .or_insert_with(|| Node::Branch(HashMap::new()));
            match entry {
                Node::Branch(map) => node = map,
                Node::Leaf(_) => {
                    *entry = Node::Branch(HashMap::new());
                    match entry {
                        Node::Branch(map) => node = map,
                        Node::Leaf(_) => unreachable!(),
                    }
                }
            }
        }
        node.insert(leaf.to_string(), Node::Leaf(handler));
    }

    /// Remove whatever is registered at a dotted path, if anything.
    pub fn remove(&self, path: &str) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let leaf = segments.pop().expect("path must not be empty");
        let mut root = self.root.lock().expect("function tree poisoned");
        let mut node = Some(&mut *root);
        for seg in segments {
            node = match node.and_then(|n| n.get_mut(seg)) {
                Some(Node::Branch(map)) => Some(map),
                _ => None,
            };
            if node.is_none() {
                return;
            }
        }
        if let Some(n) = node {
            n.remove(leaf);
        }
    }

    /// Resolve a dotted path against the tree. `None` means "not found":
    /// traversal through a missing intermediate node, or a terminal node
    /// that is itself a branch rather than a callable.
    pub fn resolve(&self, path: &str) -> Option<Handler> {
        let root = self.root.lock().expect("function tree poisoned");
        let mut node = &*root;
        let mut segments = path.split('.').peekable();
        while let Some(seg) = segments.next() {
            match node.get(seg) {
                Some(Node::Branch(map)) if segments.peek().is_some() => node = map,
                Some(Node::Leaf(handler)) if segments.peek().is_none() => {
                    return Some(handler.clone())
                }
                _ => return None,
            }
        }
        None
    }
}

/// Substitute resolver consulted after the default lookup. May return a
/// replacement handler, the default (possibly `None`), or `None` to signal
/// "still not found".
pub type Resolver = Arc<dyn Fn(&str, Option<Handler>, &Binding) -> Option<Handler> + Send + Sync>;

/// Wrap a plain async closure into a [`Handler`], the way `tower::service_fn`
/// wraps a closure into a `Service`. Most local functions don't need the full
/// `Fn(Binding, Vec<Value>) -> Pin<Box<dyn Future<...>>>` shape spelled out by
/// hand.
pub fn func<F, Fut>(f: F) -> Handler
where
    F: Fn(Binding, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = FunctionOutcome> + Send + 'static,
{
    Arc::new(move |binding, args| Box::pin(f(binding, args)))
}

/// Wrap a synchronous, binding-agnostic closure into a unary [`Handler`].
pub fn value_fn<F>(f: F) -> Handler
where
    F: Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync + 'static,
{
    Arc::new(move |_binding, args| {
        let result = f(args);
        Box::pin(async move { FunctionOutcome::Value(result) })
    })
}

/// Wrap a closure producing a boxed stream into a streaming [`Handler`].
pub fn stream_fn<F>(f: F) -> Handler
where
    F: Fn(Vec<Value>) -> BoxStream<'static, Result<Value, Value>> + Send + Sync + 'static,
{
    Arc::new(move |_binding, args| {
        let stream = f(args);
        Box::pin(async move { FunctionOutcome::Stream(stream) })
    })
}
