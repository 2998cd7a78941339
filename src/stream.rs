//! Streaming lifecycle (spec §3 "Stream record", §4.6).
//!
//! A stream record is a bounded mailbox plus a single waker, matching the
//! tagged {Value, End, Error} sequence design note in spec §9. The consumer
//! drains buffered values before observing a terminal state; abandoning the
//! consumer (dropping the `RpcStream`) unregisters the record so no further
//! StreamNext frames are delivered to it.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::stream::Stream;
use serde_json::Value;

use crate::error::RpcError;
use crate::id::Id;
use crate::timer::TimerSlot;

pub(crate) enum StreamState {
    Open,
    Done,
    Error(RpcError),
}

pub(crate) struct StreamRecord {
    pub(crate) path: String,
    pub(crate) args: Vec<Value>,
    queue: VecDeque<Value>,
    state: StreamState,
    waker: Option<Waker>,
    pub(crate) ack_received: bool,
    pub(crate) ack_timer: TimerSlot,
    pub(crate) response_timer: TimerSlot,
    pub(crate) ack_generation: u64,
    pub(crate) response_generation: u64,
}

impl StreamRecord {
    fn new(path: String, args: Vec<Value>) -> Self {
        StreamRecord {
            path,
            args,
            queue: VecDeque::new(),
            state: StreamState::Open,
            waker: None,
            ack_received: false,
            ack_timer: TimerSlot::empty(),
            response_timer: TimerSlot::empty(),
            ack_generation: 0,
            response_generation: 0,
        }
    }

    pub(crate) fn clear_timers(&mut self) {
        self.ack_timer.clear();
        self.response_timer.clear();
        self.ack_generation += 1;
        self.response_generation += 1;
    }

    pub(crate) fn push(&mut self, value: Value) {
        if matches!(self.state, StreamState::Open) {
            self.queue.push_back(value);
            self.wake();
        }
    }

    /// Mark terminal-done. Idempotent: once terminal, state is never unset.
    pub(crate) fn end(&mut self) {
        if matches!(self.state, StreamState::Open) {
            self.state = StreamState::Done;
            self.wake();
        }
    }

    pub(crate) fn fail(&mut self, err: RpcError) {
        if matches!(self.state, StreamState::Open) {
            self.state = StreamState::Error(err);
            self.wake();
        }
    }

    fn wake(&mut self) {
        if let Some(w) = self.waker.take() {
            w.wake();
        }
    }

    fn poll_next_value(&mut self, waker: &Waker) -> Poll<Option<Result<Value, RpcError>>> {
        if let Some(v) = self.queue.pop_front() {
            return Poll::Ready(Some(Ok(v)));
        }
        match &self.state {
            StreamState::Open => {
                self.waker = Some(waker.clone());
                Poll::Pending
            }
            StreamState::Done => Poll::Ready(None),
            StreamState::Error(_) => {
                let StreamState::Error(e) = std::mem::replace(&mut self.state, StreamState::Done) else {
                    unreachable!()
                };
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct StreamTable {
    inner: Mutex<HashMap<Id, StreamRecord>>,
}

impl StreamTable {
    pub(crate) fn install(&self, id: Id, path: String, args: Vec<Value>) {
        self.inner
            .lock()
            .expect("stream table poisoned")
            .insert(id, StreamRecord::new(path, args));
    }

    pub(crate) fn with_mut<R>(&self, id: &Id, f: impl FnOnce(&mut StreamRecord) -> R) -> Option<R> {
        let mut guard = self.inner.lock().expect("stream table poisoned");
        guard.get_mut(id).map(f)
    }

    pub(crate) fn remove(&self, id: &Id) -> Option<StreamRecord> {
        self.inner.lock().expect("stream table poisoned").remove(id)
    }

    /// Fail every live record in place, without removing it from the table.
    /// The record has to stay put: a consumer still polling its `RpcStream`
    /// reaches it through `with_mut`, and only sees the terminal error if
    /// the record is still there to find. The record is released later, by
    /// `RpcStream::drop` once the consumer has observed the error (or
    /// abandons the stream outright).
    pub(crate) fn fail_all(&self, mut err_for: impl FnMut(&str) -> RpcError) {
        let mut guard = self.inner.lock().expect("stream table poisoned");
        for record in guard.values_mut() {
            record.clear_timers();
            let err = err_for(&record.path);
            record.fail(err);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().expect("stream table poisoned").is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("stream table poisoned").len()
    }
}

/// The lazy, single-pass sequence returned by `callStream`. Iteration does
/// not send the underlying Request until the first `poll_next`/`next` call.
pub struct RpcStream {
    pub(crate) id: Id,
    pub(crate) table: Arc<StreamTable>,
    pub(crate) started: bool,
    /// Invoked exactly once, on first poll, to install the record and post
    /// the Request.
    pub(crate) start: Option<Box<dyn FnOnce() + Send>>,
}

impl Stream for RpcStream {
    type Item = Result<Value, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.started {
            self.started = true;
            if let Some(start) = self.start.take() {
                start();
            }
        }
        let table = self.table.clone();
        let id = self.id;
        match table.with_mut(&id, |rec| rec.poll_next_value(cx.waker())) {
            Some(poll) => poll,
            // The record was removed (e.g. by close()) between polls.
            None => Poll::Ready(None),
        }
    }
}

impl Drop for RpcStream {
    fn drop(&mut self) {
        // Abandonment releases the record; any further StreamNext frames for
        // this id that arrive after this point find no record and are
        // silently dropped by the dispatcher.
        if let Some(mut rec) = self.table.remove(&self.id) {
            rec.clear_timers();
        }
    }
}
