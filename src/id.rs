//! Short correlation identifiers.
//!
//! Ids only need to be collision-free against the records currently live on
//! *this* endpoint (a response is only ever routed back to the endpoint that
//! issued the matching request), but we generate them with a real source of
//! entropy rather than a counter so they remain safe to log and compare
//! across endpoints in a broadcast group.

use std::fmt;

/// An opaque correlation id, unique among in-flight calls/streams on one
/// endpoint for as long as their record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Id(u128);

impl Id {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().as_u128())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
