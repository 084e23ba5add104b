//! A forest of generational sets and the operations that mutate them.
//!
//! Sets are addressed by `SetRef` handles into the forest. A set's `parent`
//! is a handle too, so links never own anything and the whole family can be
//! serialized as one flat list.
//!
//! Propagation: every mutation "touches" the set it changed. A root bumps
//! its own generation and fires the change hook; a child re-adds itself to
//! its parent (which touches the parent, and so on up) and then mirrors the
//! parent's new generation. One counter per tree, owned by its root.
//!
//! All preconditions of an operation are checked before the first write, so
//! a failed call leaves every set in the forest as it was.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::delta::{Delta, DeltaEntry};
use crate::error::{Error, Result};
use crate::hook::{ChangeHook, NoopHook};
use crate::id::IdStrategy;
use crate::metrics::{
    Metrics, ADDS_TOTAL, DELTAS_CURRENT, DELTAS_INCREMENTAL, DELTAS_SNAPSHOT, DELTA_ENTRIES,
    GENERATIONS_ADVANCED, REMOVALS_EVICTED, REMOVES_TOTAL,
};
use crate::set::{Generation, GenerationalSet, Member};

/// Handle to a set inside a `Forest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SetRef(usize);

impl SetRef {
    pub fn index(self) -> usize {
        self.0
    }
}

pub struct Forest<V, S: IdStrategy<V>> {
    sets: Vec<GenerationalSet<V, S>>,
    hook: Box<dyn ChangeHook<V, S>>,
    metrics: Metrics,
}

impl<V, S: IdStrategy<V>> std::fmt::Debug for Forest<V, S>
where
    V: std::fmt::Debug,
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forest").field("sets", &self.sets).finish_non_exhaustive()
    }
}

impl<V, S: IdStrategy<V>> Default for Forest<V, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, S: IdStrategy<V>> Forest<V, S> {
    pub fn new() -> Self {
        Self {
            sets: Vec::new(),
            hook: Box::new(NoopHook),
            metrics: Metrics::new(),
        }
    }

    pub fn with_hook<H: ChangeHook<V, S> + 'static>(mut self, hook: H) -> Self {
        self.hook = Box::new(hook);
        self
    }

    /// Closure form of [`Forest::with_hook`].
    pub fn on_advance<F>(self, f: F) -> Self
    where
        F: FnMut(SetRef, &GenerationalSet<V, S>) + 'static,
    {
        self.with_hook(f)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = SetRef> {
        (0..self.sets.len()).map(SetRef)
    }

    /// Register a new root set.
    pub fn insert(&mut self, mut set: GenerationalSet<V, S>) -> SetRef {
        set.set_parent(None);
        self.sets.push(set);
        SetRef(self.sets.len() - 1)
    }

    /// Register a set attached to `parent` from the start. It starts at the
    /// parent's current generation and becomes a member of the parent on its
    /// first mutation.
    pub fn insert_child(&mut self, parent: SetRef, mut set: GenerationalSet<V, S>) -> Result<SetRef> {
        let generation = self.get(parent)?.generation();
        if set.id().is_none() {
            return Err(Error::invariant("a child set needs an id to join its parent"));
        }
        set.set_parent(Some(parent));
        set.generation = generation;
        self.sets.push(set);
        Ok(SetRef(self.sets.len() - 1))
    }

    pub fn get(&self, set: SetRef) -> Result<&GenerationalSet<V, S>> {
        self.sets.get(set.0).ok_or(Error::UnknownSet(set))
    }

    pub fn lookup(&self, set: SetRef, id: &S::Id) -> Result<&Member<V>> {
        self.get(set)?.get(id)
    }

    /// Walk from `set` up to its root, inclusive.
    pub fn ancestry(&self, set: SetRef) -> Result<Vec<SetRef>> {
        let mut chain = vec![set];
        let mut cur = self.get(set)?;
        while let Some(parent) = cur.parent() {
            if chain.contains(&parent) {
                return Err(Error::invariant(format!("parent cycle through {parent:?}")));
            }
            chain.push(parent);
            cur = self.get(parent)?;
        }
        Ok(chain)
    }

    pub fn root_of(&self, set: SetRef) -> Result<SetRef> {
        let chain = self.ancestry(set)?;
        Ok(chain[chain.len() - 1])
    }

    // ---------------------------
    // Mutation

    /// Add (or re-add) a value, resolving its id with the set's strategy.
    pub fn add(&mut self, set: SetRef, value: V) -> Result<Generation> {
        let id = self.get(set)?.resolve(&value)?;
        self.add_member(set, Member::Value(value), id)
    }

    pub fn add_with_id(&mut self, set: SetRef, value: V, id: S::Id) -> Result<Generation> {
        self.add_member(set, Member::Value(value), id)
    }

    /// Add `child` as a nested member of `set`, keyed by the child's id.
    ///
    /// A parentless child is adopted: it and its live subsets move onto the
    /// tree's counter, which first jumps past any generation the child already
    /// used. Consumers behind the adoption get the child as a snapshot. A
    /// child that already belongs to another set must be detached first.
    pub fn add_subset(&mut self, set: SetRef, child: SetRef) -> Result<Generation> {
        let id = self
            .get(child)?
            .id()
            .cloned()
            .ok_or_else(|| Error::invariant("a subset needs an id"))?;
        self.add_member(set, Member::Nested(child), id)
    }

    pub fn remove(&mut self, set: SetRef, value: &V) -> Result<Generation> {
        let id = self.get(set)?.resolve(value)?;
        self.remove_id(set, &id)
    }

    pub fn remove_id(&mut self, set: SetRef, id: &S::Id) -> Result<Generation> {
        let target = self.get(set)?;
        let Some(slot) = target.live_generation(id) else {
            return Err(Error::not_found(id));
        };
        self.check_propagation(set)?;

        self.sets[set.0].unstore(slot);
        let generation = self.touch(set)?;
        let evicted = self.sets[set.0].record_removal(generation, id.clone());

        self.metrics.inc(REMOVES_TOTAL, 1);
        if evicted > 0 {
            self.metrics.inc(REMOVALS_EVICTED, evicted as u64);
        }
        Ok(generation)
    }

    /// Remove a nested member. The child keeps its parent link, so a later
    /// mutation of the child brings it back; use `detach` to cut it loose.
    pub fn remove_subset(&mut self, set: SetRef, child: SetRef) -> Result<Generation> {
        let id = self
            .get(child)?
            .id()
            .cloned()
            .ok_or_else(|| Error::invariant("a subset needs an id"))?;
        let is_member = matches!(
            self.get(set)?.get(&id),
            Ok(Member::Nested(r)) if *r == child
        );
        if !is_member {
            return Err(Error::not_found(&id));
        }
        self.remove_id(set, &id)
    }

    /// Make `child` a root again, removing it from its parent if it is a live
    /// member there.
    pub fn detach(&mut self, child: SetRef) -> Result<()> {
        let Some(parent) = self.get(child)?.parent() else {
            return Ok(());
        };
        if let Some(id) = self.sets[child.0].id().cloned() {
            let is_member = matches!(
                self.get(parent)?.get(&id),
                Ok(Member::Nested(r)) if *r == child
            );
            if is_member {
                self.remove_id(parent, &id)?;
            }
        }
        self.sets[child.0].set_parent(None);
        log::debug!("detached {child:?} from {parent:?}");
        Ok(())
    }

    fn add_member(&mut self, set: SetRef, member: Member<V>, id: S::Id) -> Result<Generation> {
        self.get(set)?;
        if let Member::Nested(child) = &member {
            self.check_link(set, *child)?;
        }
        self.check_propagation(set)?;

        let generation = self.store_member(set, member, id)?;
        self.metrics.inc(ADDS_TOTAL, 1);
        Ok(generation)
    }

    fn store_member(&mut self, set: SetRef, member: Member<V>, id: S::Id) -> Result<Generation> {
        let adopted = match &member {
            Member::Nested(child) if self.sets[child.0].parent().is_none() => Some(*child),
            _ => None,
        };
        if let Some(child) = adopted {
            // The tree's counter must pass every slot the child already used.
            let floor = self.sets[child.0].generation();
            let root = self.root_of(set)?;
            let counter = &mut self.sets[root.0].generation;
            *counter = (*counter).max(floor);
            self.sets[child.0].set_parent(Some(set));
        }

        self.sets[set.0].clear_slot(&id);
        let generation = self.touch(set)?;
        if let Some(child) = adopted {
            self.rebase_subtree(child, generation);
            log::debug!("{set:?} adopted {child:?} at generation {generation}");
        }
        self.sets[set.0].store(generation, id, member);
        Ok(generation)
    }

    /// Put `set` and its live subsets on the tree counter at `generation`.
    fn rebase_subtree(&mut self, set: SetRef, generation: Generation) {
        let target = &mut self.sets[set.0];
        target.rebase(generation);
        let children: Vec<SetRef> = target.iter().filter_map(Member::as_nested).collect();
        for child in children {
            self.rebase_subtree(child, generation);
        }
    }

    fn touch(&mut self, set: SetRef) -> Result<Generation> {
        let target = &self.sets[set.0];
        match target.parent() {
            Some(parent) => {
                let id = target
                    .id()
                    .cloned()
                    .ok_or_else(|| Error::invariant(format!("{set:?} has a parent but no id")))?;
                let generation = self.store_member(parent, Member::Nested(set), id)?;
                self.sets[set.0].generation = generation;
                Ok(generation)
            }
            None => {
                let root = &mut self.sets[set.0];
                root.generation += 1;
                let generation = root.generation;
                log::trace!("{set:?} advanced to generation {generation}");
                self.metrics.inc(GENERATIONS_ADVANCED, 1);
                self.hook.generation_advanced(set, &self.sets[set.0]);
                Ok(generation)
            }
        }
    }

    /// Linking `child` under `set` must keep the tree a tree.
    fn check_link(&self, set: SetRef, child: SetRef) -> Result<()> {
        let owner = self.get(child)?.parent();
        if let Some(owner) = owner {
            if owner != set {
                return Err(Error::invariant(format!(
                    "{child:?} already belongs to {owner:?}; detach it first"
                )));
            }
        }
        if self.ancestry(set)?.contains(&child) {
            return Err(Error::invariant(format!(
                "adding {child:?} under {set:?} would create a cycle"
            )));
        }
        Ok(())
    }

    /// Every non-root on the way up needs an id to re-add itself.
    fn check_propagation(&self, set: SetRef) -> Result<()> {
        for r in self.ancestry(set)? {
            let s = &self.sets[r.0];
            if s.parent().is_some() && s.id().is_none() {
                return Err(Error::invariant(format!("{r:?} has a parent but no id")));
            }
        }
        Ok(())
    }

    // ---------------------------
    // Deltas

    /// Everything a consumer last synced at `since` needs to catch up with
    /// `set`.
    pub fn delta_since(&self, set: SetRef, since: Generation) -> Result<Delta<V, S::Id>>
    where
        V: Clone,
    {
        let delta = self.delta(set, since, false, 0)?;
        self.record_delta(&delta);
        Ok(delta)
    }

    /// Same as `delta_since`, shaped for embedding in a superset's delta:
    /// tagged with the set's id instead of its generation.
    pub fn subset_delta_since(&self, set: SetRef, since: Generation) -> Result<Delta<V, S::Id>>
    where
        V: Clone,
    {
        let delta = self.delta(set, since, true, 0)?;
        self.record_delta(&delta);
        Ok(delta)
    }

    fn delta(&self, set: SetRef, since: Generation, subset: bool, depth: usize) -> Result<Delta<V, S::Id>>
    where
        V: Clone,
    {
        if depth > self.sets.len() {
            return Err(Error::invariant(format!("nesting cycle through {set:?}")));
        }
        let source = self.get(set)?;
        let mut out = if subset {
            Delta::for_subset(source.id().cloned())
        } else {
            Delta::for_root(source.generation())
        };
        if since >= source.generation() {
            return Ok(out);
        }

        if source.needs_snapshot(since) {
            log::debug!(
                "{set:?}: generation {since} predates removal log (oldest {:?}), sending snapshot",
                source.oldest_removal()
            );
            let contents = source
                .iter()
                .map(|m| self.expand(m, since, depth))
                .collect::<Result<Vec<_>>>()?;
            out.contents = Some(contents);
            return Ok(out);
        }

        let adds = source
            .added_since(since)
            .map(|m| self.expand(m, since, depth))
            .collect::<Result<Vec<_>>>()?;
        if !adds.is_empty() {
            out.adds = Some(adds);
        }
        let removals: Vec<S::Id> = source.removed_since(since).cloned().collect();
        if !removals.is_empty() {
            out.removals = Some(removals);
        }
        Ok(out)
    }

    fn expand(&self, member: &Member<V>, since: Generation, depth: usize) -> Result<DeltaEntry<V, S::Id>>
    where
        V: Clone,
    {
        match member {
            Member::Value(v) => Ok(DeltaEntry::Value(v.clone())),
            Member::Nested(r) => self.delta(*r, since, true, depth + 1).map(DeltaEntry::Nested),
        }
    }

    fn record_delta(&self, delta: &Delta<V, S::Id>) {
        let key = if delta.is_snapshot() {
            DELTAS_SNAPSHOT
        } else if delta.is_current() {
            DELTAS_CURRENT
        } else {
            DELTAS_INCREMENTAL
        };
        self.metrics.inc(key, 1);
        self.metrics.observe(DELTA_ENTRIES, delta.entry_count() as u64);
    }

    // ---------------------------
    // Checks

    /// Per-set invariants plus the tree shape: parents exist, no cycles,
    /// nested members are owned by the set holding them, and no child is
    /// ahead of its parent.
    pub fn check_invariants(&self) -> Result<()> {
        for r in self.handles() {
            let set = &self.sets[r.0];
            set.check_invariants()?;
            self.ancestry(r)?;
            if let Some(parent) = set.parent() {
                let p = self.get(parent)?;
                if set.generation() > p.generation() {
                    return Err(Error::invariant(format!(
                        "{r:?} at generation {} is ahead of its parent at {}",
                        set.generation(),
                        p.generation()
                    )));
                }
            }
            for child in set.iter().filter_map(Member::as_nested) {
                if self.get(child)?.parent() != Some(r) {
                    return Err(Error::invariant(format!("{r:?} holds {child:?} without owning it")));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------
// Snapshots (CBOR)

impl<V, S> Forest<V, S>
where
    V: Serialize + DeserializeOwned,
    S: IdStrategy<V> + Serialize + DeserializeOwned,
    S::Id: Serialize + DeserializeOwned,
{
    /// Serialize every set, strategies included, for a host store. The hook
    /// and metrics are not part of the snapshot.
    pub fn snapshot_to_cbor(&self) -> Result<Vec<u8>> {
        Ok(serde_cbor::to_vec(&self.sets)?)
    }

    /// Rebuild a forest from `snapshot_to_cbor` bytes. The result has the
    /// no-op hook and fresh metrics, and is checked before it is returned.
    pub fn restore_from_cbor(bytes: &[u8]) -> Result<Self> {
        let sets: Vec<GenerationalSet<V, S>> = serde_cbor::from_slice(bytes)?;
        let forest = Self {
            sets,
            ..Self::new()
        };
        forest.check_invariants()?;
        Ok(forest)
    }
}
