//! Catch-up deltas: the wire shape handed to consumers.
//!
//! Exactly one of two shapes carries data:
//!   - snapshot:    `contents` lists every live member (removals implied)
//!   - incremental: `adds` and/or `removals` since the requested generation
//! A delta with neither means the consumer is already current.
//!
//! Root deltas carry `generation`; nested (subset) deltas carry `id` instead.
//! Absent fields are omitted when serialized, e.g.
//! `{"generation":2,"adds":["test"]}`.
//!
//! Deltas are one-way: the producer serializes them and a consumer applies
//! them, usually in memory through `Replica`. Decoding is best effort. Entries
//! are untagged, so a member value that looks like a delta (an object made
//! only of `id`, `generation`, `contents`, `adds`, `removals`) reads back as a
//! nested delta. Hosts that ship deltas between processes with such members
//! must wrap them in a shape of their own.

use serde::{Deserialize, Serialize};

use crate::set::Generation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    deny_unknown_fields,
    bound(
        serialize = "V: Serialize, K: Serialize",
        deserialize = "V: Deserialize<'de>, K: Deserialize<'de>"
    )
)]
pub struct Delta<V, K> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<K>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<DeltaEntry<V, K>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adds: Option<Vec<DeltaEntry<V, K>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removals: Option<Vec<K>>,
}

/// A member as it appears in a delta: a plain value, or the nested delta of
/// a subset.
///
/// Untagged on the wire. Decoding tries `Nested` first, so a plain value that
/// is itself an object made only of delta field names reads back as a nested
/// delta; members that need to round-trip should carry another field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    untagged,
    bound(
        serialize = "V: Serialize, K: Serialize",
        deserialize = "V: Deserialize<'de>, K: Deserialize<'de>"
    )
)]
pub enum DeltaEntry<V, K> {
    Nested(Delta<V, K>),
    Value(V),
}

impl<V, K> Default for Delta<V, K> {
    fn default() -> Self {
        Self {
            id: None,
            generation: None,
            contents: None,
            adds: None,
            removals: None,
        }
    }
}

impl<V, K> Delta<V, K> {
    pub(crate) fn for_root(generation: Generation) -> Self {
        Self {
            generation: Some(generation),
            ..Self::default()
        }
    }

    pub(crate) fn for_subset(id: Option<K>) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// No changes to report.
    pub fn is_current(&self) -> bool {
        self.contents.is_none() && self.adds.is_none() && self.removals.is_none()
    }

    pub fn is_snapshot(&self) -> bool {
        self.contents.is_some()
    }

    /// Entries carried by this delta, nested deltas included.
    pub fn entry_count(&self) -> usize {
        let entries = self
            .contents
            .iter()
            .chain(self.adds.iter())
            .flatten()
            .map(|e| match e {
                DeltaEntry::Value(_) => 1,
                DeltaEntry::Nested(d) => 1 + d.entry_count(),
            })
            .sum::<usize>();
        entries + self.removals.as_ref().map_or(0, Vec::len)
    }
}
