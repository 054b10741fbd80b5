use crate::node::Node;

use super::{assert_canonical, new_trie};

#[test]
fn a_single_entry_is_one_leaf() {
    let mut trie = new_trie();
    trie.update(b"do", b"verb").unwrap();

    let Node::Leaf(leaf) = &trie.root else {
        panic!("expected a leaf root, got {:?}", trie.root);
    };
    // 'd' = 0x64, 'o' = 0x6f.
    assert_eq!(&leaf.path[..], [6, 4, 6, 15]);
    assert_eq!(leaf.value, b"verb");
}

#[test]
fn a_shared_prefix_splits_into_an_extension_over_a_branch() {
    let mut trie = new_trie();
    trie.update(b"do", b"verb").unwrap();
    trie.update(b"dog", b"puppy").unwrap();

    let Node::Extension(extension) = &trie.root else {
        panic!("expected an extension root, got {:?}", trie.root);
    };
    // The whole of "do" is the shared prefix.
    assert_eq!(&extension.path[..], [6, 4, 6, 15]);

    let Node::Branch(branch) = trie.decode_ref(&extension.child).unwrap() else {
        panic!("extension child must be a branch");
    };
    assert_eq!(branch.value.as_deref(), Some(&b"verb"[..]));
    // 'g' = 0x67: first nibble indexes the branch, the rest stays in the
    // leaf.
    let Node::Leaf(leaf) = trie.decode_ref(&branch.children[6]).unwrap() else {
        panic!("expected a leaf under slot 6");
    };
    assert_eq!(&leaf.path[..], [7]);
    assert_eq!(leaf.value, b"puppy");
    assert_canonical(&trie);
}

#[test]
fn deletion_collapses_back_to_the_single_leaf_form() {
    let mut trie = new_trie();
    trie.update(b"do", b"verb").unwrap();
    trie.update(b"dog", b"puppy").unwrap();
    trie.delete(b"dog").unwrap();

    let Node::Leaf(leaf) = &trie.root else {
        panic!("expected a leaf root after collapse, got {:?}", trie.root);
    };
    assert_eq!(&leaf.path[..], [6, 4, 6, 15]);
    assert_eq!(leaf.value, b"verb");

    let mut single = new_trie();
    single.update(b"do", b"verb").unwrap();
    assert_eq!(trie.root_hash().unwrap(), single.root_hash().unwrap());
}

#[test]
fn deleting_a_fork_merges_extensions_back_together() {
    let mut trie = new_trie();
    trie.update(b"dog", b"puppy").unwrap();
    trie.update(b"doge", b"coin").unwrap();
    trie.update(b"dot", b"punct").unwrap();
    assert_canonical(&trie);

    // Removing the diverging key must merge the split extension back into
    // the two-entry shape.
    trie.delete(b"dot").unwrap();
    assert_canonical(&trie);

    let mut expected = new_trie();
    expected.update(b"dog", b"puppy").unwrap();
    expected.update(b"doge", b"coin").unwrap();
    assert_eq!(trie.root_hash().unwrap(), expected.root_hash().unwrap());
}

#[test]
fn a_surviving_branch_child_gains_a_one_nibble_extension() {
    // Keys 0x10 and 0x11 share the nibble 1 and then branch; 0x21 forces
    // the top-level fan-out.
    let mut trie = new_trie();
    trie.update(&[0x10], b"ten").unwrap();
    trie.update(&[0x11], b"eleven").unwrap();
    trie.update(&[0x21], b"twenty-one").unwrap();
    assert!(matches!(trie.root, Node::Branch(_)));

    // Deleting 0x21 leaves one child of the top branch alive, and that
    // child is itself a branch: it must reappear under an extension.
    trie.delete(&[0x21]).unwrap();
    let Node::Extension(extension) = &trie.root else {
        panic!("expected an extension root, got {:?}", trie.root);
    };
    assert_eq!(&extension.path[..], [1]);
    assert_canonical(&trie);

    let mut expected = new_trie();
    expected.update(&[0x10], b"ten").unwrap();
    expected.update(&[0x11], b"eleven").unwrap();
    assert_eq!(trie.root_hash().unwrap(), expected.root_hash().unwrap());
}

#[test]
fn a_branch_value_slot_collapses_to_an_empty_path_leaf() {
    // "do" ends exactly at the branch created by "dog", so deleting "dog"
    // leaves only the branch's value slot, which collapses upward.
    let mut trie = new_trie();
    trie.update(b"do", b"verb").unwrap();
    trie.update(b"dog", b"puppy").unwrap();
    trie.delete(b"dog").unwrap();
    assert!(matches!(trie.root, Node::Leaf(_)));
    assert_canonical(&trie);

    // The mirror case: delete the value slot, keeping the longer key.
    let mut trie = new_trie();
    trie.update(b"do", b"verb").unwrap();
    trie.update(b"dog", b"puppy").unwrap();
    trie.delete(b"do").unwrap();
    let Node::Leaf(leaf) = &trie.root else {
        panic!("expected a leaf root, got {:?}", trie.root);
    };
    // The merged path spells the whole of "dog".
    assert_eq!(&leaf.path[..], [6, 4, 6, 15, 6, 7]);
    assert_eq!(leaf.value, b"puppy");
}
