// crates/core/tests/nested_tests.rs
mod util;

use std::cell::RefCell;
use std::rc::Rc;

use gset_core::metrics::REMOVES_TOTAL;
use gset_core::{Error, Forest, Generation, GenerationalSet, Member, Replica, SelfId, SetRef};
use pretty_assertions::assert_eq;

type Tree = Forest<u32, SelfId>;

fn subset(id: u32) -> GenerationalSet<u32, SelfId> {
    GenerationalSet::new(SelfId).with_id(id)
}

/// root <- mid(1000) <- leaf(2000), linked through add_subset.
fn three_levels() -> (Tree, SetRef, SetRef, SetRef) {
    let mut f = Forest::new();
    let root = f.insert(GenerationalSet::new(SelfId));
    let mid = f.insert(subset(1000));
    let leaf = f.insert(subset(2000));
    f.add_subset(root, mid).unwrap();
    f.add_subset(mid, leaf).unwrap();
    (f, root, mid, leaf)
}

fn generations(f: &Tree, sets: &[SetRef]) -> Vec<Generation> {
    sets.iter().map(|s| f.get(*s).unwrap().generation()).collect()
}

#[test]
fn leaf_mutation_advances_the_whole_chain() {
    util::init_logging();
    let (mut f, root, mid, leaf) = three_levels();
    assert_eq!(generations(&f, &[root, mid]), vec![3, 3]);

    let g = f.add(leaf, 7).unwrap();
    assert_eq!(g, 4);
    assert_eq!(generations(&f, &[root, mid, leaf]), vec![4, 4, 4]);

    // Each level re-added its child at the new generation.
    assert_eq!(f.get(root).unwrap().member_generation(&1000), Some(4));
    assert_eq!(f.get(mid).unwrap().member_generation(&2000), Some(4));
    assert_eq!(f.get(leaf).unwrap().member_generation(&7), Some(4));
    f.check_invariants().unwrap();
}

#[test]
fn hook_fires_once_per_change_and_only_for_the_root() {
    let seen: Rc<RefCell<Vec<(SetRef, Generation)>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let mut f = Tree::new().on_advance(move |r, s| sink.borrow_mut().push((r, s.generation())));

    let root = f.insert(GenerationalSet::new(SelfId));
    let child = f.insert(subset(50));
    f.add_subset(root, child).unwrap();
    f.add(child, 1).unwrap();
    f.remove_id(child, &1).unwrap();

    assert_eq!(*seen.borrow(), vec![(root, 2), (root, 3), (root, 4)]);
}

#[test]
fn subset_changes_surface_as_nested_deltas() {
    let (mut f, root, mid, leaf) = three_levels();
    f.add(leaf, 1).unwrap(); // 4
    f.add(mid, 2).unwrap(); // 5
    f.remove_id(leaf, &1).unwrap(); // 6

    let delta = f.delta_since(root, 5).unwrap();
    assert_eq!(
        serde_json::to_value(&delta).unwrap(),
        serde_json::json!({
            "generation": 6,
            "adds": [{"id": 1000, "adds": [{"id": 2000, "removals": [1]}]}]
        })
    );
}

#[test]
fn adopting_a_set_owned_elsewhere_fails_cleanly() {
    let mut f: Tree = Forest::new();
    let a = f.insert(GenerationalSet::new(SelfId));
    let b = f.insert(GenerationalSet::new(SelfId));
    let c = f.insert(subset(9));
    f.add_subset(a, c).unwrap();

    let err = f.add_subset(b, c).unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)), "{err}");
    assert_eq!(generations(&f, &[a, b, c]), vec![2, 1, 2]);
    assert!(f.get(b).unwrap().is_empty());
    assert_eq!(f.get(c).unwrap().parent(), Some(a));

    // Re-adding under the current owner is fine.
    assert_eq!(f.add_subset(a, c).unwrap(), 3);
}

#[test]
fn adopting_a_set_that_counted_further_keeps_its_members() {
    util::init_logging();
    let mut f: Tree = Forest::new();
    let root = f.insert(GenerationalSet::new(SelfId));
    let child = f.insert(subset(1000));
    for v in 1..=5 {
        f.add(child, v).unwrap();
    }
    assert_eq!(generations(&f, &[root, child]), vec![1, 6]);

    // The tree's counter jumps past the child's before taking the next slot.
    assert_eq!(f.add_subset(root, child).unwrap(), 7);
    assert_eq!(generations(&f, &[root, child]), vec![7, 7]);
    f.check_invariants().unwrap();

    assert_eq!(f.add(child, 100).unwrap(), 8);
    let c = f.get(child).unwrap();
    assert_eq!(c.len(), 6);
    assert_eq!(c.get(&2).unwrap(), &Member::Value(2));
    assert_eq!(c.get(&100).unwrap(), &Member::Value(100));
    f.check_invariants().unwrap();
}

#[test]
fn adopting_a_set_behind_a_synced_consumer_sends_it_whole() {
    let mut f: Tree = Forest::new();
    let root = f.insert(GenerationalSet::new(SelfId));
    for v in 0..10 {
        f.add(root, v).unwrap();
    }
    let mut replica = Replica::new(SelfId);
    replica.apply(&f.delta_since(root, 0).unwrap()).unwrap();
    assert_eq!(replica.generation(), 11);

    let child = f.insert(subset(1000));
    for v in 100..105 {
        f.add(child, v).unwrap();
    }
    assert_eq!(f.get(child).unwrap().generation(), 6);
    assert_eq!(f.add_subset(root, child).unwrap(), 12);

    let delta = f.delta_since(root, 11).unwrap();
    assert_eq!(
        serde_json::to_value(&delta).unwrap(),
        serde_json::json!({
            "generation": 12,
            "adds": [{"id": 1000, "contents": [100, 101, 102, 103, 104]}]
        })
    );
    replica.apply(&delta).unwrap();
    assert_eq!(replica.nested(&1000).unwrap().len(), 5);

    f.add(child, 105).unwrap();
    let delta = f.delta_since(root, 12).unwrap();
    assert_eq!(
        serde_json::to_value(&delta).unwrap(),
        serde_json::json!({"generation": 13, "adds": [{"id": 1000, "adds": [105]}]})
    );
}

#[test]
fn detached_set_rejoins_under_another_parent() {
    let (mut f, root, mid, leaf) = three_levels();
    f.add(leaf, 1).unwrap(); // 4
    f.add(leaf, 2).unwrap(); // 5
    let mut replica = Replica::new(SelfId);
    replica.apply(&f.delta_since(root, 0).unwrap()).unwrap();

    f.detach(leaf).unwrap(); // removal from mid at 6
    f.add(leaf, 3).unwrap();
    f.add(leaf, 4).unwrap();
    f.remove_id(leaf, &1).unwrap();
    assert_eq!(f.get(leaf).unwrap().generation(), 8);

    assert_eq!(f.add_subset(root, leaf).unwrap(), 9);
    assert_eq!(f.get(leaf).unwrap().parent(), Some(root));
    f.check_invariants().unwrap();

    let delta = f.delta_since(root, 5).unwrap();
    assert_eq!(
        serde_json::to_value(&delta).unwrap(),
        serde_json::json!({
            "generation": 9,
            "adds": [
                {"id": 1000, "removals": [2000]},
                {"id": 2000, "contents": [2, 3, 4]}
            ]
        })
    );
    replica.apply(&delta).unwrap();
    assert!(replica.nested(&1000).unwrap().is_empty());
    let leaf_copy = replica.nested(&2000).unwrap();
    assert_eq!(leaf_copy.ids().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    assert_eq!(generations(&f, &[root, mid, leaf]), vec![9, 6, 9]);
}

#[test]
fn cycles_are_rejected() {
    let mut f: Tree = Forest::new();
    let a = f.insert(subset(1));
    let b = f.insert(subset(2));
    f.add_subset(a, b).unwrap();

    assert!(matches!(f.add_subset(b, a), Err(Error::InvariantViolation(_))));
    assert!(matches!(f.add_subset(a, a), Err(Error::InvariantViolation(_))));
    assert!(f.get(a).unwrap().is_root());
    assert!(f.get(b).unwrap().is_empty());
    f.check_invariants().unwrap();
}

#[test]
fn subset_without_id_cannot_be_added() {
    let mut f: Tree = Forest::new();
    let a = f.insert(GenerationalSet::new(SelfId));
    let anon = f.insert(GenerationalSet::new(SelfId));
    assert!(matches!(f.add_subset(a, anon), Err(Error::InvariantViolation(_))));
    assert!(f.get(anon).unwrap().is_root());
    assert_eq!(f.get(a).unwrap().generation(), 1);
}

#[test]
fn detach_turns_a_child_back_into_a_root() {
    let (mut f, root, mid, leaf) = three_levels();
    f.add(leaf, 5).unwrap(); // 4

    f.detach(leaf).unwrap(); // removal from mid at 5
    assert!(f.get(leaf).unwrap().is_root());
    assert!(!f.get(mid).unwrap().contains_id(&2000));
    assert_eq!(generations(&f, &[root, mid]), vec![5, 5]);

    // The detached set now counts on its own.
    f.add(leaf, 6).unwrap();
    assert_eq!(generations(&f, &[root, leaf]), vec![5, 5]);
    f.add(leaf, 7).unwrap();
    assert_eq!(generations(&f, &[root, leaf]), vec![5, 6]);

    // Detaching a root is a no-op.
    f.detach(root).unwrap();
    assert_eq!(f.get(root).unwrap().generation(), 5);
    f.check_invariants().unwrap();
}

#[test]
fn insert_child_joins_on_first_mutation() {
    let mut f: Tree = Forest::new();
    let root = f.insert(GenerationalSet::new(SelfId));
    f.add(root, 1).unwrap();
    f.add(root, 2).unwrap();

    let child = f.insert_child(root, subset(77)).unwrap();
    assert_eq!(f.get(child).unwrap().generation(), 3);
    assert!(!f.get(root).unwrap().contains_id(&77));

    f.add(child, 10).unwrap();
    assert_eq!(f.get(root).unwrap().get(&77).unwrap(), &Member::Nested(child));
    assert_eq!(generations(&f, &[root, child]), vec![4, 4]);

    assert!(matches!(
        f.insert_child(root, GenerationalSet::new(SelfId)),
        Err(Error::InvariantViolation(_))
    ));

    let grandchild = f.insert_child(child, subset(78)).unwrap();
    assert_eq!(f.root_of(grandchild).unwrap(), root);
    assert_eq!(f.ancestry(grandchild).unwrap(), vec![grandchild, child, root]);
}

#[test]
fn removed_subset_returns_when_it_changes() {
    let (mut f, root, mid, _) = three_levels();
    f.remove_subset(root, mid).unwrap(); // 4
    assert!(!f.get(root).unwrap().contains_id(&1000));
    assert_eq!(f.get(mid).unwrap().parent(), Some(root));
    assert!(matches!(f.remove_subset(root, mid), Err(Error::NotFound { .. })));

    f.add(mid, 3).unwrap(); // 5
    assert!(f.get(root).unwrap().contains_id(&1000));
    let delta = f.delta_since(root, 4).unwrap();
    assert_eq!(
        serde_json::to_value(&delta).unwrap(),
        serde_json::json!({"generation": 5, "adds": [{"id": 1000, "adds": [3]}]})
    );
}

#[test]
fn remove_subset_checks_the_member_is_that_set() {
    let mut f: Tree = Forest::new();
    let root = f.insert(GenerationalSet::new(SelfId));
    let stray = f.insert(subset(4));
    f.add(root, 4).unwrap();
    // Id 4 is live in root, but as a plain value.
    assert!(matches!(f.remove_subset(root, stray), Err(Error::NotFound { .. })));
    assert!(f.get(root).unwrap().contains_id(&4));
}

#[test]
fn failed_leaf_update_leaves_ancestors_alone() {
    let (mut f, root, mid, leaf) = three_levels();
    f.add(leaf, 1).unwrap();
    let before = generations(&f, &[root, mid, leaf]);

    assert!(matches!(f.remove_id(leaf, &99), Err(Error::NotFound { .. })));
    assert!(matches!(f.remove_id(mid, &12345), Err(Error::NotFound { .. })));
    assert!(matches!(f.add(leaf, 1), Ok(5)));
    assert_eq!(generations(&f, &[root, mid, leaf]), vec![before[0] + 1; 3]);
    assert_eq!(f.metrics().counter(REMOVES_TOTAL), 0);
}

#[test]
fn replica_follows_a_nested_tree() {
    let (mut f, root, mid, leaf) = three_levels();
    let mut replica = Replica::new(SelfId);

    let sync = |f: &Tree, replica: &mut Replica<u32, SelfId>| {
        let delta = f.delta_since(root, replica.generation()).unwrap();
        replica.apply(&delta).unwrap();
    };

    f.add(leaf, 1).unwrap();
    f.add(mid, 2).unwrap();
    sync(&f, &mut replica);
    f.remove_id(leaf, &1).unwrap();
    f.add(leaf, 3).unwrap();
    f.add(root, 4).unwrap();
    sync(&f, &mut replica);

    assert_eq!(replica.generation(), f.get(root).unwrap().generation());
    assert_eq!(replica.ids().copied().collect::<Vec<_>>(), vec![4, 1000]);
    let mid_copy = replica.nested(&1000).unwrap();
    assert_eq!(mid_copy.values().map(|(id, _)| *id).collect::<Vec<_>>(), vec![2]);
    let leaf_copy = mid_copy.nested(&2000).unwrap();
    assert_eq!(leaf_copy.ids().copied().collect::<Vec<_>>(), vec![3]);
}
