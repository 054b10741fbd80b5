mod shape;

use std::collections::BTreeMap;

use store::{KeyValueStore, MemoryStore};

use crate::keccak::digest_keccak;
use crate::node::Node;
use crate::trie::Trie;

fn new_trie() -> Trie<MemoryStore> {
    Trie::new(MemoryStore::new())
}

/// Opt-in log output for debugging a failing run.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

/// Deterministic workload generator: a keccak-derived key of varying length
/// and a value derived from the same coordinates.
fn workload_key(case: u8, step: u8) -> Vec<u8> {
    let digest = digest_keccak(&[case, step, 0xa5]);
    let len = 1 + (digest[0] as usize % 20);
    digest[..len].to_vec()
}

fn workload_value(case: u8, step: u8) -> Vec<u8> {
    let digest = digest_keccak(&[0x5a, case, step]);
    let len = 1 + (digest[1] as usize % 40);
    digest.iter().cycle().take(len).copied().collect()
}

/// Checks every reachable node against the structural invariants: branches
/// keep at least two live slots, extension children are always branches,
/// and every digest reference resolves through the store to bytes that hash
/// back to the digest.
fn assert_canonical(trie: &Trie<MemoryStore>) {
    fn walk(trie: &Trie<MemoryStore>, node: &Node) {
        match node {
            Node::Empty | Node::Leaf(_) => {}
            Node::Extension(extension) => {
                assert!(
                    !extension.path.is_empty(),
                    "extension with an empty path: {extension:?}"
                );
                check_reference(trie, &extension.child);
                let child = trie.decode_ref(&extension.child).unwrap();
                assert!(
                    matches!(child, Node::Branch(_)),
                    "extension child is not a branch: {child:?}"
                );
                walk(trie, &child);
            }
            Node::Branch(branch) => {
                assert!(
                    branch.live_slots() >= 2,
                    "branch below the two-slot minimum: {branch:?}"
                );
                if let Some(value) = &branch.value {
                    assert!(!value.is_empty(), "empty value stored in a branch");
                }
                for reference in &branch.children {
                    check_reference(trie, reference);
                    let child = trie.decode_ref(reference).unwrap();
                    walk(trie, &child);
                }
            }
        }
    }

    fn check_reference(trie: &Trie<MemoryStore>, reference: &crate::node::NodeRef) {
        if let Some(digest) = reference.as_digest() {
            let raw = trie
                .store()
                .get(&digest)
                .expect("digest reference with no stored node");
            assert_eq!(digest_keccak(&raw), digest, "stored bytes do not match digest");
        }
    }

    walk(trie, &trie.root);
}

/// Builds a fresh trie holding exactly `entries`.
fn trie_of(entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> Trie<MemoryStore> {
    let mut trie = new_trie();
    for (key, value) in entries {
        trie.update(key, value).unwrap();
    }
    trie
}
