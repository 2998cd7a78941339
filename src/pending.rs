//! The correlation table (spec §3 "Pending-call record", §4.5 timers).

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::RpcError;
use crate::id::Id;
use crate::timer::TimerSlot;

/// Bookkeeping for one in-flight response-expecting call.
///
/// Invariant: at most one timer of each kind is live at any moment; both
/// are cleared before the record is removed from the table.
pub(crate) struct PendingCall {
    pub(crate) path: String,
    pub(crate) args: Vec<Value>,
    resolver: Option<oneshot::Sender<Result<Value, RpcError>>>,
    pub(crate) ack_received: bool,
    pub(crate) ack_timer: TimerSlot,
    pub(crate) response_timer: TimerSlot,
    /// Bumped every time a timer of either kind is armed or cleared; a
    /// timer's fire callback captures its generation and is a no-op if the
    /// table's current generation no longer matches (guards the race where
    /// `abort()` loses to an already-resumed sleep).
    pub(crate) ack_generation: u64,
    pub(crate) response_generation: u64,
}

impl PendingCall {
    pub(crate) fn new(
        path: String,
        args: Vec<Value>,
        resolver: oneshot::Sender<Result<Value, RpcError>>,
    ) -> Self {
        PendingCall {
            path,
            args,
            resolver: Some(resolver),
            ack_received: false,
            ack_timer: TimerSlot::empty(),
            response_timer: TimerSlot::empty(),
            ack_generation: 0,
            response_generation: 0,
        }
    }

    /// Clear both timers. Called on every terminal transition.
    pub(crate) fn clear_timers(&mut self) {
        self.ack_timer.clear();
        self.response_timer.clear();
        self.ack_generation += 1;
        self.response_generation += 1;
    }

    /// Settle the call. A no-op if already settled (the resolver is
    /// consumed on first use).
    pub(crate) fn settle(&mut self, result: Result<Value, RpcError>) {
        if let Some(tx) = self.resolver.take() {
            let _ = tx.send(result);
        }
    }
}

/// Map from request id to pending-call record, owned exclusively by one
/// endpoint.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    inner: Mutex<HashMap<Id, PendingCall>>,
}

impl CorrelationTable {
    pub(crate) fn insert(&self, id: Id, call: PendingCall) {
        self.inner.lock().expect("correlation table poisoned").insert(id, call);
    }

    pub(crate) fn with_mut<R>(&self, id: &Id, f: impl FnOnce(&mut PendingCall) -> R) -> Option<R> {
        let mut guard = self.inner.lock().expect("correlation table poisoned");
        guard.get_mut(id).map(f)
    }

    pub(crate) fn remove(&self, id: &Id) -> Option<PendingCall> {
        self.inner.lock().expect("correlation table poisoned").remove(id)
    }

    /// Drain every record, settling each with `result_for(path)`. Used by
    /// both `close` and `rejectPendingCalls`.
    pub(crate) fn drain(&self, mut result_for: impl FnMut(&str) -> RpcError) {
        let mut records: Vec<PendingCall> = {
            let mut guard = self.inner.lock().expect("correlation table poisoned");
            guard.drain().map(|(_, v)| v).collect()
        };
        for record in &mut records {
            record.clear_timers();
            let err = result_for(&record.path);
            record.settle(Err(err));
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().expect("correlation table poisoned").is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("correlation table poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;

    #[tokio::test]
    async fn drain_settles_every_record_and_empties_the_table() {
        let table = CorrelationTable::default();
        let (tx_a, rx_a) = tokio::sync::oneshot::channel();
        let (tx_b, rx_b) = tokio::sync::oneshot::channel();
        table.insert(Id::generate(), PendingCall::new("a.one".into(), vec![], tx_a));
        table.insert(Id::generate(), PendingCall::new("b.two".into(), vec![], tx_b));
        assert_eq!(table.len(), 2);

        table.drain(|path| RpcError::Rejected { path: path.to_string() });

        assert!(table.is_empty());
        assert!(matches!(rx_a.await.unwrap(), Err(RpcError::Rejected { .. })));
        assert!(matches!(rx_b.await.unwrap(), Err(RpcError::Rejected { .. })));
    }

    #[tokio::test]
    async fn settle_is_a_no_op_once_already_settled() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut call = PendingCall::new("p".into(), vec![], tx);
        call.settle(Ok(Value::Bool(true)));
        // A second settle must not panic and must not clobber the first value.
        call.settle(Err(RpcError::Timeout { path: "p".into() }));
        assert_eq!(rx.await.unwrap().unwrap(), Value::Bool(true));
    }

    #[test]
    fn clear_timers_bumps_both_generations_so_stale_timers_no_op() {
        let (tx, _rx) = tokio::sync::oneshot::channel();
        let mut call = PendingCall::new("p".into(), vec![], tx);
        let (ack_gen, resp_gen) = (call.ack_generation, call.response_generation);
        call.clear_timers();
        assert_eq!(call.ack_generation, ack_gen + 1);
        assert_eq!(call.response_generation, resp_gen + 1);
    }
}
