//! Tagged-union wire frames (spec §4.1).
//!
//! Six frame kinds share a single-letter tag `t`. A Request without `i` is
//! fire-and-forget: the receiver must not emit Ack, Response, or stream
//! frames for it.

use serde_json::Value;

use crate::id::Id;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "t")]
pub enum Frame {
    #[serde(rename = "q")]
    Request {
        #[serde(skip_serializing_if = "Option::is_none")]
        i: Option<Id>,
        m: String,
        a: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        o: Option<bool>,
    },
    #[serde(rename = "s")]
    Response {
        i: Id,
        #[serde(skip_serializing_if = "Option::is_none")]
        r: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        e: Option<Value>,
    },
    #[serde(rename = "a")]
    Ack { i: Id },
    #[serde(rename = "n")]
    StreamNext { i: Id, v: Value },
    #[serde(rename = "d")]
    StreamEnd { i: Id },
    #[serde(rename = "x")]
    StreamError { i: Id, e: Value },
}

impl Frame {
    pub fn request(id: Option<Id>, method: impl Into<String>, args: Vec<Value>, optional: bool) -> Self {
        Frame::Request {
            i: id,
            m: method.into(),
            a: args,
            o: if optional { Some(true) } else { None },
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Frame::Request { i: None, .. })
    }

    /// The correlation id carried by this frame, if any.
    pub fn id(&self) -> Option<Id> {
        match self {
            Frame::Request { i, .. } => *i,
            Frame::Response { i, .. }
            | Frame::Ack { i, .. }
            | Frame::StreamNext { i, .. }
            | Frame::StreamEnd { i, .. }
            | Frame::StreamError { i, .. } => Some(*i),
        }
    }
}
