// Path: crates/state/src/tree/tests.rs

//! Structural unit tests with access to the node internals: rotation cases,
//! split-key maintenance and lazy materialization.

use canopy_storage::Store;
use canopy_types::codec;

use super::node::Node;
use super::ops;

fn open_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    (dir, store)
}

fn build(store: &mut Store, keys: &[&str]) -> Box<Node> {
    store.begin_transaction().unwrap();
    let mut root = Box::new(Node::new_leaf(
        keys[0].as_bytes().to_vec(),
        codec::pack(keys[0].as_bytes()),
    ));
    for key in &keys[1..] {
        root = ops::insert(root, store, key.as_bytes(), codec::pack(key.as_bytes())).unwrap();
    }
    root
}

/// Recursively checks the recorded heights, the AVL bound, key ordering and
/// the split-key invariant; returns (height, in-order leaf keys).
fn check_subtree(node: &mut Node, store: &Store) -> (u32, Vec<Vec<u8>>) {
    match node {
        Node::Leaf(leaf) => (0, vec![leaf.key.clone()]),
        Node::Branch(branch) => {
            let split = branch.key.clone();
            let recorded_left = branch.left.height;
            let recorded_right = branch.right.height;
            let (left_height, left_keys) =
                check_subtree(branch.left.materialize(store).unwrap(), store);
            let (right_height, right_keys) =
                check_subtree(branch.right.materialize(store).unwrap(), store);

            assert_eq!(recorded_left, left_height, "stale left height");
            assert_eq!(recorded_right, right_height, "stale right height");
            assert!(
                (i64::from(left_height) - i64::from(right_height)).abs() < 2,
                "AVL bound violated at split {:?}",
                String::from_utf8_lossy(&split)
            );
            // The split key is the smallest key of the right subtree, and
            // strictly above everything on the left.
            assert_eq!(Some(&split), right_keys.first());
            assert!(left_keys.iter().all(|k| k < &split));

            let mut keys = left_keys;
            keys.extend(right_keys);
            (left_height.max(right_height) + 1, keys)
        }
    }
}

fn assert_sorted(keys: &[Vec<u8>]) {
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn single_rotations_rebalance_monotone_inserts() {
    // Ascending inserts exercise left rotations, descending right ones.
    for keys in [
        &["a", "b", "c", "d", "e", "f", "g"][..],
        &["g", "f", "e", "d", "c", "b", "a"][..],
    ] {
        let (_dir, mut store) = open_store();
        let mut root = build(&mut store, keys);
        let (height, collected) = check_subtree(&mut root, &store);
        assert_eq!(collected.len(), 7);
        assert_sorted(&collected);
        // Seven leaves pack into height 3.
        assert_eq!(height, 3);
    }
}

#[test]
fn double_rotations_rebalance_zigzag_inserts() {
    // k50/k30/k70 then zig-zag insertions force LR and RL cases.
    let (_dir, mut store) = open_store();
    let mut root = build(
        &mut store,
        &["k50", "k30", "k70", "k20", "k40", "k35", "k75", "k80", "k78"],
    );
    let (_, collected) = check_subtree(&mut root, &store);
    assert_eq!(collected.len(), 9);
    assert_sorted(&collected);
}

#[test]
fn duplicate_insert_updates_in_place() {
    let (_dir, mut store) = open_store();
    let mut root = build(&mut store, &["b", "a", "c"]);
    root = ops::insert(root, &mut store, b"b", codec::pack(b"fresh")).unwrap();
    let found = ops::find(&mut root, &store, b"b").unwrap().unwrap();
    assert_eq!(found.value, codec::pack(b"fresh"));
    let (_, collected) = check_subtree(&mut root, &store);
    assert_eq!(collected.len(), 3);
}

#[test]
fn remove_maintains_split_keys_and_balance() {
    let (_dir, mut store) = open_store();
    let keys = ["d", "b", "f", "a", "c", "e", "g"];
    let mut root = build(&mut store, &keys);

    // Removing a split key forces the re-derivation from the new minimum
    // of the right subtree.
    for gone in ["d", "f", "a"] {
        root = ops::remove(root, &mut store, gone.as_bytes())
            .unwrap()
            .expect("tree still has leaves");
        let (_, collected) = check_subtree(&mut root, &store);
        assert!(!collected.iter().any(|k| k == gone.as_bytes()));
        assert_sorted(&collected);
    }
    assert_eq!(check_subtree(&mut root, &store).1.len(), 4);
}

#[test]
fn remove_collapses_to_the_sibling() {
    let (_dir, mut store) = open_store();
    let mut root = build(&mut store, &["a", "b"]);
    let remaining = ops::remove(root, &mut store, b"a").unwrap().unwrap();
    match *remaining {
        Node::Leaf(ref leaf) => assert_eq!(leaf.key, b"b"),
        ref other => panic!("expected the sibling leaf, got {other:?}"),
    }

    root = Box::new(Node::new_leaf(b"only".to_vec(), codec::pack(b"1")));
    assert!(ops::remove(root, &mut store, b"only").unwrap().is_none());
}

#[test]
fn remove_of_absent_key_returns_a_clean_tree() {
    let (_dir, mut store) = open_store();
    let mut root = build(&mut store, &["b", "a", "c"]);
    let hash = ops::persist(&mut root, &mut store, 1).unwrap();
    let root = ops::remove(root, &mut store, b"zz").unwrap().unwrap();
    assert!(!root.is_dirty());
    assert_eq!(root.hash(), Some(hash));
}

#[test]
fn persist_stamps_only_the_dirty_spine() {
    let (_dir, mut store) = open_store();
    let mut root = build(&mut store, &["m", "f", "t", "a", "z"]);
    ops::persist(&mut root, &mut store, 1).unwrap();
    store.put_version(1, None).unwrap();
    store.commit_transaction().unwrap();

    // A second version touching only "z" must keep version-1 identities
    // for the untouched subtree.
    store.begin_transaction().unwrap();
    root = ops::insert(root, &mut store, b"z", codec::pack(b"new")).unwrap();
    ops::persist(&mut root, &mut store, 2).unwrap();
    store.put_version(2, None).unwrap();
    store.commit_transaction().unwrap();

    let mut versions = Vec::new();
    let mut summaries = Vec::new();
    ops::traverse(&mut root, &store, &mut summaries).unwrap();
    for summary in summaries {
        versions.push((summary.key, summary.version));
    }
    // The untouched left subtree still carries version 1.
    assert!(versions.contains(&(b"a".to_vec(), 1)));
    assert!(versions.contains(&(b"f".to_vec(), 1)));
    // The rewritten leaf and its spine carry version 2.
    assert!(versions.contains(&(b"z".to_vec(), 2)));
}

#[test]
fn lazy_children_materialize_from_the_store() {
    let (_dir, mut store) = open_store();
    let mut root = build(&mut store, &["m", "f", "t", "a", "z"]);
    let hash = ops::persist(&mut root, &mut store, 1).unwrap();
    store.put_version(1, Some(&hash)).unwrap();
    store.commit_transaction().unwrap();

    // Reload from the hash alone; children start as hash references and
    // load on demand.
    let mut reloaded = Node::load(&store, hash).unwrap();
    let found = ops::find(&mut reloaded, &store, b"a").unwrap().unwrap();
    assert_eq!(found.value, codec::pack(b"a"));
    assert_eq!(ops::recompute_hash(&mut reloaded, &store).unwrap(), hash);
}

#[test]
fn leftmost_key_descends_the_left_spine() {
    let (_dir, mut store) = open_store();
    let mut root = build(&mut store, &["m", "f", "t", "a", "z"]);
    assert_eq!(ops::leftmost_key(&mut root, &store).unwrap(), b"a");
}
