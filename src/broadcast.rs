//! Broadcast group: a thin multiplexer over a dynamic list of endpoints
//! sharing one local function tree (spec §4.10).

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::codec::{Codec, JsonCodec};
use crate::config::EndpointConfig;
use crate::endpoint::EndpointHandle;
use crate::error::RpcError;
use crate::functions::FunctionTree;
use crate::transport::Transport;

/// One member of a broadcast group before it is instantiated into a live
/// [`EndpointHandle`]. `id` is a stable key used by [`BroadcastGroup::update_channels`]
/// to diff the old member list against a mutated one.
pub struct ChannelSpec {
    pub id: String,
    pub transport: Arc<dyn Transport>,
    pub codec: Arc<dyn Codec>,
    pub config: EndpointConfig,
}

impl ChannelSpec {
    pub fn new(id: impl Into<String>, transport: impl Transport + 'static, config: EndpointConfig) -> Self {
        ChannelSpec {
            id: id.into(),
            transport: Arc::new(transport),
            codec: Arc::new(JsonCodec),
            config,
        }
    }
}

struct Member {
    id: String,
    endpoint: EndpointHandle,
}

/// Fans operations out over every member endpoint concurrently and collects
/// results in the list's current order (spec §4.10, §5 "aggregated results
/// are returned in list-position order irrespective of individual completion
/// order").
pub struct BroadcastGroup {
    functions: FunctionTree,
    members: Mutex<Vec<Member>>,
}

impl BroadcastGroup {
    /// Instantiate one endpoint per spec, all sharing `functions`.
    pub fn new(functions: FunctionTree, specs: Vec<ChannelSpec>) -> Self {
        let members = specs
            .into_iter()
            .map(|spec| Member {
                id: spec.id,
                endpoint: EndpointHandle::new_dyn(
                    spec.transport,
                    spec.codec,
                    EndpointConfig {
                        functions: functions.clone(),
                        ..spec.config
                    },
                ),
            })
            .collect();
        BroadcastGroup {
            functions,
            members: Mutex::new(members),
        }
    }

    /// The shared function tree every member endpoint was built with.
    pub fn functions(&self) -> &FunctionTree {
        &self.functions
    }

    /// `clients`: the current list of live member endpoints, in order.
    pub fn clients(&self) -> Vec<EndpointHandle> {
        self.members
            .lock()
            .expect("broadcast member list poisoned")
            .iter()
            .map(|m| m.endpoint.clone())
            .collect()
    }

    /// `broadcast.$call` / `broadcast.<path>(...)`: any member failing
    /// (including not-found) fails the whole call.
    pub async fn call(&self, path: &str, args: Vec<Value>) -> Result<Vec<Value>, RpcError> {
        let members = self.clients();
        let futures = members.iter().map(|m| m.call(path, args.clone()));
        let results = futures::future::join_all(futures).await;
        results.into_iter().collect()
    }

    /// `broadcast.$callOptional`: a member's not-found result is reported,
    /// not tolerated into `null`, by the member endpoint's own `callOptional`
    /// no-op substitution, so this just forwards the `o` flag per member and
    /// keeps genuine remote errors visible.
    pub async fn call_optional(&self, path: &str, args: Vec<Value>) -> Result<Vec<Value>, RpcError> {
        let members = self.clients();
        let futures = members.iter().map(|m| m.call_optional(path, args.clone()));
        let results = futures::future::join_all(futures).await;
        results.into_iter().collect()
    }

    /// `broadcast.$callEvent`: fans out events, resolving to one `null` per
    /// member once every post has gone out.
    pub async fn call_event(&self, path: &str, args: Vec<Value>) -> Result<Vec<Value>, RpcError> {
        let members = self.clients();
        let futures = members.iter().map(|m| m.call_event(path, args.clone()));
        let results = futures::future::join_all(futures).await;
        results.into_iter().collect()
    }

    /// Apply `mutator` to a fresh copy of the current channel spec list and
    /// reconcile: members whose id disappeared are closed, members whose id
    /// is unchanged are left running, new ids are instantiated (spec §4.10).
    pub fn update_channels(&self, new_specs: Vec<ChannelSpec>) {
        let mut members = self.members.lock().expect("broadcast member list poisoned");
        let new_ids: Vec<&str> = new_specs.iter().map(|s| s.id.as_str()).collect();

        members.retain(|m| {
            if new_ids.contains(&m.id.as_str()) {
                true
            } else {
                m.endpoint.close(None);
                false
            }
        });

        let existing_ids: std::collections::HashSet<String> = members.iter().map(|m| m.id.clone()).collect();
        for spec in new_specs {
            if existing_ids.contains(&spec.id) {
                continue;
            }
            let functions = self.functions.clone();
            members.push(Member {
                id: spec.id,
                endpoint: EndpointHandle::new_dyn(
                    spec.transport,
                    spec.codec,
                    EndpointConfig {
                        functions,
                        ..spec.config
                    },
                ),
            });
        }
    }
}
