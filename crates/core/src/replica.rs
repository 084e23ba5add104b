// crates/core/src/replica.rs
//! Consumer-side mirror of a generational set.
//!
//! A replica remembers the generation it last synced at and applies the
//! deltas produced for it: snapshots replace the membership, incremental
//! deltas apply `adds` then `removals`. Nested deltas are applied to nested
//! replicas, which survive a parent snapshot that reports them unchanged.
//!
//! Members are keyed by what the replica's strategy resolves for them, so the
//! replica and the source should use the same strategy.

use std::collections::BTreeMap;

use crate::delta::{Delta, DeltaEntry};
use crate::error::{Error, Result};
use crate::id::IdStrategy;
use crate::set::Generation;

#[derive(Debug, Clone)]
pub struct Replica<V, S: IdStrategy<V>> {
    strategy: S,
    generation: Generation,
    members: BTreeMap<S::Id, Mirrored<V, S>>,
}

#[derive(Debug, Clone)]
pub enum Mirrored<V, S: IdStrategy<V>> {
    Value(V),
    Nested(Replica<V, S>),
}

impl<V, S> Replica<V, S>
where
    V: Clone,
    S: IdStrategy<V> + Clone,
{
    /// Empty replica that has seen nothing (generation 0).
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            generation: 0,
            members: BTreeMap::new(),
        }
    }

    /// Generation to ask the source for next.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &S::Id> {
        self.members.keys()
    }

    pub fn get(&self, id: &S::Id) -> Option<&Mirrored<V, S>> {
        self.members.get(id)
    }

    pub fn value(&self, id: &S::Id) -> Option<&V> {
        match self.members.get(id) {
            Some(Mirrored::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn nested(&self, id: &S::Id) -> Option<&Replica<V, S>> {
        match self.members.get(id) {
            Some(Mirrored::Nested(r)) => Some(r),
            _ => None,
        }
    }

    /// Plain values held directly by this replica, in id order.
    pub fn values(&self) -> impl Iterator<Item = (&S::Id, &V)> {
        self.members.iter().filter_map(|(id, m)| match m {
            Mirrored::Value(v) => Some((id, v)),
            Mirrored::Nested(_) => None,
        })
    }

    /// Apply a delta. On error the replica is left as it was.
    pub fn apply(&mut self, delta: &Delta<V, S::Id>) -> Result<()> {
        let mut staged = self.clone();
        staged.apply_at(delta, delta.generation)?;
        *self = staged;
        Ok(())
    }

    fn apply_at(&mut self, delta: &Delta<V, S::Id>, generation: Option<Generation>) -> Result<()> {
        if let Some(contents) = &delta.contents {
            let mut previous = std::mem::take(&mut self.members);
            for entry in contents {
                let (id, member) = Self::mirror(&self.strategy, entry, &mut previous, generation)?;
                self.members.insert(id, member);
            }
        } else {
            for entry in delta.adds.iter().flatten() {
                let (id, member) = Self::mirror(&self.strategy, entry, &mut self.members, generation)?;
                self.members.insert(id, member);
            }
            for id in delta.removals.iter().flatten() {
                self.members.remove(id);
            }
        }
        if let Some(g) = generation {
            self.generation = g;
        }
        Ok(())
    }

    /// Turn a delta entry into a keyed member, reusing the nested replica
    /// found in `existing` for subset deltas.
    fn mirror(
        strategy: &S,
        entry: &DeltaEntry<V, S::Id>,
        existing: &mut BTreeMap<S::Id, Mirrored<V, S>>,
        generation: Option<Generation>,
    ) -> Result<(S::Id, Mirrored<V, S>)> {
        match entry {
            DeltaEntry::Value(v) => Ok((strategy.resolve(v)?, Mirrored::Value(v.clone()))),
            DeltaEntry::Nested(sub) => {
                let id = sub
                    .id
                    .clone()
                    .ok_or_else(|| Error::invariant("nested delta without an id"))?;
                let mut child = match existing.remove(&id) {
                    Some(Mirrored::Nested(r)) => r,
                    _ => Replica::new(strategy.clone()),
                };
                child.apply_at(sub, generation)?;
                Ok((id, Mirrored::Nested(child)))
            }
        }
    }
}
