// crates/core/src/hook.rs
use crate::forest::SetRef;
use crate::id::IdStrategy;
use crate::set::GenerationalSet;

/// Called whenever a root set's generation advances.
///
/// Hosts plug replication or broadcast in here. The hook only gets a shared
/// reference, so it cannot mutate the set that fired it.
pub trait ChangeHook<V, S: IdStrategy<V>> {
    fn generation_advanced(&mut self, root: SetRef, set: &GenerationalSet<V, S>);
}

/// Default hook: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl<V, S: IdStrategy<V>> ChangeHook<V, S> for NoopHook {
    fn generation_advanced(&mut self, _root: SetRef, _set: &GenerationalSet<V, S>) {}
}

impl<V, S, F> ChangeHook<V, S> for F
where
    S: IdStrategy<V>,
    F: FnMut(SetRef, &GenerationalSet<V, S>),
{
    fn generation_advanced(&mut self, root: SetRef, set: &GenerationalSet<V, S>) {
        self(root, set)
    }
}
