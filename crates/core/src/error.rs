//! Error type shared by every set operation.
//!
//! `NotFound` is the only error correct callers are expected to see; the
//! rest report misuse (cycles, re-parenting, ids that cannot be resolved) or
//! problems moving a snapshot in and out of a host store.

use thiserror::Error;

use crate::forest::SetRef;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// `remove`/`get` on an id that is not currently live.
    #[error("member {id} is not in the set")]
    NotFound { id: String },

    /// The operation would break a structural invariant, or an id could not
    /// be resolved for a member. Nothing was modified.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Handle does not belong to this forest.
    #[error("unknown set handle {0:?}")]
    UnknownSet(SetRef),

    #[error("snapshot codec: {0}")]
    Codec(#[from] serde_cbor::Error),
}

impl Error {
    pub(crate) fn not_found<K: std::fmt::Debug>(id: &K) -> Self {
        Error::NotFound { id: format!("{id:?}") }
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }
}
