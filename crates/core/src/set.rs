//! The generational set itself: storage, invariants and read-side queries.
//!
//! State model:
//!   contents:    BTreeMap<generation, Member>   live members, by last (re-)add
//!   generations: BTreeMap<id, generation>       live slot, or removal generation
//!   removals:    BTreeMap<generation, id>       bounded removal log
//!
//! Mutation goes through `Forest` because a change to a child has to reach
//! its root; this module only offers the per-set building blocks.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::config::SetOptions;
use crate::error::{Error, Result};
use crate::forest::SetRef;
use crate::id::IdStrategy;

pub type Generation = u64;

/// Generation of a freshly created root.
pub const INITIAL_GENERATION: Generation = 1;

/// What a set holds at a generation slot. The kind is fixed when the member
/// is inserted; nested sets are never detected by inspecting values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Member<V> {
    Value(V),
    Nested(SetRef),
}

impl<V> Member<V> {
    pub fn as_value(&self) -> Option<&V> {
        match self {
            Member::Value(v) => Some(v),
            Member::Nested(_) => None,
        }
    }

    pub fn as_nested(&self) -> Option<SetRef> {
        match self {
            Member::Nested(r) => Some(*r),
            Member::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "V: Serialize, S: Serialize, S::Id: Serialize",
    deserialize = "V: Deserialize<'de>, S: Deserialize<'de>, S::Id: Deserialize<'de>"
))]
pub struct GenerationalSet<V, S: IdStrategy<V>> {
    id: Option<S::Id>,
    pub(crate) parent: Option<SetRef>,
    pub(crate) generation: Generation,
    max_removals: usize,
    contents: BTreeMap<Generation, Member<V>>,
    generations: BTreeMap<S::Id, Generation>,
    removals: BTreeMap<Generation, S::Id>,
    /// Consumers behind this generation get a snapshot: the newest evicted
    /// removal, or the generation a populated set was adopted into its tree.
    #[serde(default)]
    horizon: Generation,
    strategy: S,
}

impl<V, S: IdStrategy<V>> GenerationalSet<V, S> {
    pub fn new(strategy: S) -> Self {
        Self {
            id: None,
            parent: None,
            generation: INITIAL_GENERATION,
            max_removals: SetOptions::default().max_removals,
            contents: BTreeMap::new(),
            generations: BTreeMap::new(),
            removals: BTreeMap::new(),
            horizon: 0,
            strategy,
        }
    }

    /// Id this set is known by when it is a member of a superset.
    pub fn with_id(mut self, id: S::Id) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_options(mut self, options: SetOptions) -> Self {
        self.max_removals = options.max_removals;
        self
    }

    pub fn with_max_removals(mut self, n: usize) -> Self {
        self.max_removals = n;
        self
    }

    pub fn id(&self) -> Option<&S::Id> {
        self.id.as_ref()
    }

    pub fn parent(&self) -> Option<SetRef> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn max_removals(&self) -> usize {
        self.max_removals
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn resolve(&self, member: &V) -> Result<S::Id> {
        self.strategy.resolve(member)
    }

    // ---------------------------
    // Queries

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Live members, oldest surviving first.
    pub fn iter(&self) -> impl Iterator<Item = &Member<V>> {
        self.contents.values()
    }

    /// Live members with their current generation, ascending.
    pub fn entries(&self) -> impl Iterator<Item = (Generation, &Member<V>)> {
        self.contents.iter().map(|(g, m)| (*g, m))
    }

    /// Live members whose generation is at least `minimum`.
    pub fn values_since(&self, minimum: Generation) -> impl Iterator<Item = &Member<V>> {
        self.contents.range(minimum..).map(|(_, m)| m)
    }

    pub fn contains_id(&self, id: &S::Id) -> bool {
        self.live_generation(id).is_some()
    }

    /// A value whose id cannot be resolved is not a member.
    pub fn contains(&self, member: &V) -> bool {
        match self.strategy.resolve(member) {
            Ok(id) => self.contains_id(&id),
            Err(_) => false,
        }
    }

    pub fn get(&self, id: &S::Id) -> Result<&Member<V>> {
        self.live_generation(id)
            .and_then(|g| self.contents.get(&g))
            .ok_or_else(|| Error::not_found(id))
    }

    /// Generation slot of `id`: where it lives, or when it was removed if the
    /// removal is still retained.
    pub fn member_generation(&self, id: &S::Id) -> Option<Generation> {
        self.generations.get(id).copied()
    }

    pub fn removal_count(&self) -> usize {
        self.removals.len()
    }

    /// Oldest generation the removal log still covers.
    pub fn oldest_removal(&self) -> Option<Generation> {
        self.removals.first_key_value().map(|(g, _)| *g)
    }

    /// Ids removed strictly after `since`, in removal order.
    pub fn removed_since(&self, since: Generation) -> impl Iterator<Item = &S::Id> {
        self.removals
            .range((Bound::Excluded(since), Bound::Unbounded))
            .map(|(_, id)| id)
    }

    /// Live members added strictly after `since`, ascending.
    pub(crate) fn added_since(&self, since: Generation) -> impl Iterator<Item = &Member<V>> {
        self.contents
            .range((Bound::Excluded(since), Bound::Unbounded))
            .map(|(_, m)| m)
    }

    /// True when the removal log no longer covers everything after `since`.
    ///
    /// A full log whose oldest entry is newer than `since` may have evicted
    /// removals the consumer never saw; a removal at exactly the oldest
    /// retained generation is still covered. Independently of how full the
    /// log is now, `since` below the horizon is never covered: re-adds shrink
    /// the log without restoring what was evicted, and members a set brought
    /// along when it was adopted were never sent to the tree's consumers.
    pub fn needs_snapshot(&self, since: Generation) -> bool {
        if since < self.horizon {
            return true;
        }
        self.removals.len() >= self.max_removals
            && self.oldest_removal().is_some_and(|oldest| since < oldest)
    }

    // ---------------------------
    // Building blocks for Forest

    pub(crate) fn live_generation(&self, id: &S::Id) -> Option<Generation> {
        self.generations
            .get(id)
            .copied()
            .filter(|g| self.contents.contains_key(g))
    }

    /// Drop whatever slot `id` occupies, live or removed.
    pub(crate) fn clear_slot(&mut self, id: &S::Id) {
        if let Some(g) = self.generations.get(id).copied() {
            self.contents.remove(&g);
            self.removals.remove(&g);
        }
    }

    pub(crate) fn store(&mut self, generation: Generation, id: S::Id, member: Member<V>) {
        self.contents.insert(generation, member);
        self.generations.insert(id, generation);
    }

    pub(crate) fn unstore(&mut self, generation: Generation) -> Option<Member<V>> {
        self.contents.remove(&generation)
    }

    /// Log a removal and enforce the bound. Returns how many entries were
    /// evicted.
    pub(crate) fn record_removal(&mut self, generation: Generation, id: S::Id) -> usize {
        self.removals.insert(generation, id.clone());
        self.generations.insert(id, generation);

        let mut evicted = 0;
        while self.removals.len() > self.max_removals {
            let Some((g, old)) = self.removals.pop_first() else { break };
            if self.generations.get(&old) == Some(&g) {
                self.generations.remove(&old);
            }
            self.horizon = self.horizon.max(g);
            log::trace!("evicted removal of {old:?} at generation {g}");
            evicted += 1;
        }
        evicted
    }

    /// Move onto a tree's counter at `generation`, which must be newer than
    /// every slot this set holds. A set with any history (members, retained
    /// or evicted removals) pushes its horizon up to the join point; its old
    /// generations mean nothing to the tree's consumers.
    pub(crate) fn rebase(&mut self, generation: Generation) {
        if !self.generations.is_empty() || self.horizon > 0 {
            self.horizon = self.horizon.max(generation);
        }
        self.generation = generation;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<SetRef>) {
        self.parent = parent;
    }

    /// Verify the structural invariants of this set.
    ///
    /// Ids supplied explicitly to `add_with_id` need not match what the
    /// strategy would resolve, so member/id agreement is not checked.
    pub fn check_invariants(&self) -> Result<()> {
        if self.removals.len() > self.max_removals {
            return Err(Error::invariant(format!(
                "{} removals retained, bound is {}",
                self.removals.len(),
                self.max_removals
            )));
        }

        let mut live = BTreeSet::new();
        for (id, g) in &self.generations {
            let in_contents = self.contents.contains_key(g);
            let in_removals = self.removals.get(g) == Some(id);
            match (in_contents, in_removals) {
                (true, false) => {
                    if !live.insert(*g) {
                        return Err(Error::invariant(format!("generation {g} shared by two ids")));
                    }
                }
                (false, true) => {}
                (true, true) => {
                    return Err(Error::invariant(format!("{id:?} is both live and removed")));
                }
                (false, false) => {
                    return Err(Error::invariant(format!("{id:?} points at empty generation {g}")));
                }
            }
        }
        if live.len() != self.contents.len() {
            return Err(Error::invariant(format!(
                "{} members stored, {} indexed",
                self.contents.len(),
                live.len()
            )));
        }
        for (g, id) in &self.removals {
            if self.generations.get(id) != Some(g) {
                return Err(Error::invariant(format!("stale removal of {id:?} at {g}")));
            }
        }

        let newest = self.contents.keys().next_back().max(self.removals.keys().next_back());
        if let Some(&newest) = newest {
            if newest > self.generation {
                return Err(Error::invariant(format!(
                    "slot {newest} is ahead of generation {}",
                    self.generation
                )));
            }
        }
        Ok(())
    }
}
