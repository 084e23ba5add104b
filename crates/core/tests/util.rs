#![allow(dead_code)]

use std::collections::BTreeSet;

use gset_core::{Forest, IdStrategy, Member, SetRef};

/// Ids live in `set`: values resolved with its strategy, subsets by their own id.
pub fn live_ids<V, S: IdStrategy<V>>(forest: &Forest<V, S>, set: SetRef) -> BTreeSet<S::Id> {
    let s = forest.get(set).unwrap();
    s.iter()
        .map(|m| match m {
            Member::Value(v) => s.resolve(v).unwrap(),
            Member::Nested(r) => forest.get(*r).unwrap().id().cloned().unwrap(),
        })
        .collect()
}

pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("gset_core=trace"))
        .is_test(true)
        .try_init();
}
