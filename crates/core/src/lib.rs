//! Generational sets.
//!
//! A `GenerationalSet` tags every membership change with a generation number
//! taken from a single counter per tree of sets. Consumers remember the last
//! generation they saw and ask for `delta_since` it: they get the adds and
//! removals after that point, or a full snapshot once the bounded removal log
//! can no longer vouch for the window.
//!
//! ```
//! use gset_core::{Forest, GenerationalSet, SelfId};
//!
//! let mut forest = Forest::new();
//! let set = forest.insert(GenerationalSet::new(SelfId));
//! forest.add(set, "test".to_string()).unwrap();
//!
//! let delta = forest.delta_since(set, 0).unwrap();
//! assert_eq!(
//!     serde_json::to_string(&delta).unwrap(),
//!     r#"{"generation":2,"adds":["test"]}"#
//! );
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod delta;
pub mod error;
pub mod forest;
pub mod hook;
pub mod id;
pub mod metrics;
pub mod replica;
pub mod set;

pub use config::{SetOptions, DEFAULT_MAX_REMOVALS};
pub use delta::{Delta, DeltaEntry};
pub use error::{Error, Result};
pub use forest::{Forest, SetRef};
pub use hook::{ChangeHook, NoopHook};
pub use id::{ById, IdStrategy, Identified, JsonField, JsonKey, SelfId, Stringified};
pub use metrics::Metrics;
pub use replica::{Mirrored, Replica};
pub use set::{Generation, GenerationalSet, Member, INITIAL_GENERATION};
