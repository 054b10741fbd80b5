//! The trie engine and its map-like facade.
//!
//! [`Trie`] binds a root node to a backing store. Mutations rebuild the
//! affected path by returning transformed nodes up the recursion: children
//! are encoded (and, when large enough, stored) before their parents, and
//! every level unlinks the storage of the node it replaced. A mutation ends
//! by refreshing the stored root encoding and committing the store, so the
//! trie a digest describes is always recoverable from that digest alone.

use std::collections::BTreeMap;

use nybbles::Nibbles;
use store::{KeyValueStore, StoreError};
use tracing::{debug, trace};

use crate::error::TrieError;
use crate::keccak::digest_keccak;
use crate::nibbles::{common_prefix_len, concat, nibbles_to_bytes};
use crate::node::{BranchNode, ExtensionNode, LeafNode, Node, NodeRef};

#[cfg(test)]
mod tests;

/// Longest accepted key, in bytes.
pub const MAX_KEY_BYTES: usize = 32;

/// What a leaf or extension node carries besides its path.
enum KvPayload {
    Value(Vec<u8>),
    Child(NodeRef),
}

/// A persistent, hash-addressed Merkle Patricia Trie.
///
/// Keys are byte strings of at most 32 bytes; values are non-empty byte
/// strings (updating a key to the empty value deletes it). Equal contents
/// produce an equal [`root_hash`](Self::root_hash) regardless of insertion
/// order.
pub struct Trie<S> {
    store: S,
    root: Node,
}

impl<S: KeyValueStore> Trie<S> {
    /// Creates an empty trie over `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            root: Node::Empty,
        }
    }

    /// Binds to an existing root: `None` opens the empty trie, a digest is
    /// resolved through the store.
    ///
    /// Fails with [`TrieError::CorruptStore`] when the digest has no stored
    /// node or the stored bytes do not decode.
    pub fn open(store: S, root_hash: Option<[u8; 32]>) -> Result<Self, TrieError> {
        let root = match root_hash {
            None => Node::Empty,
            Some(digest) => {
                let raw = store.get(&digest).map_err(|err| match err {
                    StoreError::NotFound => {
                        TrieError::CorruptStore("root digest has no stored node")
                    }
                    other => TrieError::Store(other),
                })?;
                alloy_rlp::decode_exact::<Node>(&raw)?
            }
        };
        Ok(Self { store, root })
    }

    /// Shared access to the backing store handle.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The root digest, or `None` for the empty trie.
    ///
    /// Reading the root hash also (re)writes the root node's encoding into
    /// the store, so a freshly built trie becomes recoverable from the
    /// returned digest without any further mutation.
    pub fn root_hash(&self) -> Result<Option<[u8; 32]>, TrieError> {
        if self.root.is_empty() {
            return Ok(None);
        }
        let encoded = self.root.rlp_encode();
        let digest = digest_keccak(&encoded);
        self.store.put(digest, encoded)?;
        Ok(Some(digest))
    }

    /// Whether the current root is recoverable: the trie is empty, or the
    /// store holds the root node under its digest.
    pub fn root_hash_valid(&self) -> Result<bool, TrieError> {
        if self.root.is_empty() {
            return Ok(true);
        }
        let digest = digest_keccak(&self.root.rlp_encode());
        Ok(self.store.contains(&digest)?)
    }

    /// Fetches the value stored under `key`, or `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        check_key(key)?;
        let path = Nibbles::unpack(key);
        self.lookup(&self.root, &path)
    }

    /// Whether `key` has a value.
    pub fn contains(&self, key: &[u8]) -> Result<bool, TrieError> {
        Ok(self.get(key)?.is_some())
    }

    /// Stores `value` under `key`, replacing any previous value. An empty
    /// `value` behaves as [`delete`](Self::delete).
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        check_key(key)?;
        if value.is_empty() {
            return self.delete(key);
        }
        debug!(key = %hex::encode_prefixed(key), value_len = value.len(), "update");
        let path = Nibbles::unpack(key);
        let new_root = self.update_and_unlink(self.root.clone(), &path, value.to_vec())?;
        self.root = new_root;
        self.root_hash()?;
        self.store.commit()?;
        Ok(())
    }

    /// Removes `key`. Deleting an absent key leaves the trie unchanged.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), TrieError> {
        check_key(key)?;
        debug!(key = %hex::encode_prefixed(key), "delete");
        let path = Nibbles::unpack(key);
        let new_root = self.delete_and_unlink(self.root.clone(), &path)?;
        self.root = new_root;
        self.root_hash()?;
        self.store.commit()?;
        Ok(())
    }

    /// Number of key-value pairs.
    pub fn len(&self) -> Result<usize, TrieError> {
        self.count(&self.root)
    }

    /// Whether the trie holds no entries. In the canonical shape the root
    /// is blank exactly when the trie is empty.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// All key-value pairs, each exactly once.
    pub fn to_map(&self) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, TrieError> {
        let mut entries = BTreeMap::new();
        let mut prefix = Vec::new();
        self.collect_entries(&self.root, &mut prefix, &mut entries)?;
        Ok(entries)
    }

    /// Removes every entry and every reachable node's storage, then
    /// commits.
    pub fn clear(&mut self) -> Result<(), TrieError> {
        debug!("clear");
        self.release_subtree(&self.root)?;
        self.forget_node(&self.root)?;
        self.store.commit()?;
        self.root = Node::Empty;
        Ok(())
    }

    // --- store mediation -------------------------------------------------

    /// Encodes `node` into its reference form, writing the encoding into
    /// the store when it is digest-addressed.
    fn encode_node(&self, node: &Node) -> Result<NodeRef, TrieError> {
        if node.is_empty() {
            return Ok(NodeRef::Empty);
        }
        let encoded = node.rlp_encode();
        let reference = NodeRef::from_rlp(&encoded);
        if let Some(digest) = reference.as_digest() {
            self.store.put(digest, encoded)?;
        }
        Ok(reference)
    }

    /// Resolves a reference back into a node.
    fn decode_ref(&self, reference: &NodeRef) -> Result<Node, TrieError> {
        match reference {
            NodeRef::Empty => Ok(Node::Empty),
            NodeRef::Inline(raw) => Ok(alloy_rlp::decode_exact::<Node>(raw)?),
            NodeRef::Digest(digest) => {
                let raw = self.store.get(digest).map_err(|err| match err {
                    StoreError::NotFound => {
                        TrieError::CorruptStore("referenced node missing from store")
                    }
                    other => TrieError::Store(other),
                })?;
                Ok(alloy_rlp::decode_exact::<Node>(&raw)?)
            }
        }
    }

    /// Drops the storage entry backing `node`, if it has one. Inline-sized
    /// nodes were never stored.
    fn forget_node(&self, node: &Node) -> Result<(), TrieError> {
        if node.is_empty() {
            return Ok(());
        }
        if let Some(digest) = NodeRef::from_rlp(&node.rlp_encode()).as_digest() {
            self.store.delete(&digest)?;
        }
        Ok(())
    }

    // --- lookup ----------------------------------------------------------

    fn lookup(&self, node: &Node, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        match node {
            Node::Empty => Ok(None),
            Node::Branch(branch) => {
                let Some((&index, rest)) = key.split_first() else {
                    return Ok(branch.value.clone());
                };
                let child = self.decode_ref(&branch.children[index as usize])?;
                self.lookup(&child, rest)
            }
            Node::Leaf(leaf) => Ok((key == &leaf.path[..]).then(|| leaf.value.clone())),
            Node::Extension(extension) => {
                if key.starts_with(&extension.path[..]) {
                    let child = self.decode_ref(&extension.child)?;
                    self.lookup(&child, &key[extension.path.len()..])
                } else {
                    Ok(None)
                }
            }
        }
    }

    // --- insert ----------------------------------------------------------

    /// Applies the transformation and, when it produced a structurally
    /// different node, unlinks the storage of the node it replaced.
    fn update_and_unlink(&self, node: Node, key: &[u8], value: Vec<u8>) -> Result<Node, TrieError> {
        let old = node.clone();
        let new = self.update_node(node, key, value)?;
        if new != old {
            self.forget_node(&old)?;
        }
        Ok(new)
    }

    /// Core insert. Never called with an empty value; the caller is
    /// responsible for re-storing the returned node.
    fn update_node(&self, node: Node, key: &[u8], value: Vec<u8>) -> Result<Node, TrieError> {
        match node {
            Node::Empty => {
                trace!(key_len = key.len(), "insert into blank");
                Ok(Node::Leaf(LeafNode::new(Nibbles::from_nibbles(key), value)))
            }
            Node::Branch(mut branch) => {
                let Some((&index, rest)) = key.split_first() else {
                    branch.value = Some(value);
                    return Ok(Node::Branch(branch));
                };
                let slot = index as usize;
                let child = self.decode_ref(&branch.children[slot])?;
                let new_child = self.update_and_unlink(child, rest, value)?;
                branch.children[slot] = self.encode_node(&new_child)?;
                Ok(Node::Branch(branch))
            }
            node @ (Node::Leaf(_) | Node::Extension(_)) => self.update_kv_node(node, key, value),
        }
    }

    /// Insert into a leaf or extension node: split on the longest common
    /// prefix of the node's path and the remaining key, fan out into a
    /// branch where they diverge, and re-wrap any shared prefix in an
    /// extension. A kv node never ends up pointing at another kv node.
    fn update_kv_node(&self, node: Node, key: &[u8], value: Vec<u8>) -> Result<Node, TrieError> {
        let (current, payload) = match node {
            Node::Leaf(LeafNode { path, value }) => (path, KvPayload::Value(value)),
            Node::Extension(ExtensionNode { path, child }) => (path, KvPayload::Child(child)),
            _ => return Err(TrieError::Invariant("kv update on a non-kv node")),
        };
        let prefix_len = common_prefix_len(&current, key);
        let key_rest = &key[prefix_len..];
        let current_rest = &current[prefix_len..];
        trace!(
            prefix_len,
            key_rest = key_rest.len(),
            current_rest = current_rest.len(),
            "split kv node"
        );

        let new_node = if current_rest.is_empty() {
            match payload {
                KvPayload::Value(_) if key_rest.is_empty() => {
                    // Same key: overwrite in place.
                    return Ok(Node::Leaf(LeafNode::new(Nibbles::from_nibbles(key), value)));
                }
                KvPayload::Child(child) => {
                    // The key continues (or ends) inside the extension's
                    // child.
                    let sub = self.decode_ref(&child)?;
                    self.update_and_unlink(sub, key_rest, value)?
                }
                KvPayload::Value(current_value) => {
                    // The old key ends where the new one keeps going.
                    let mut branch = BranchNode::empty();
                    branch.value = Some(current_value);
                    let tail =
                        Node::Leaf(LeafNode::new(Nibbles::from_nibbles(&key_rest[1..]), value));
                    branch.children[key_rest[0] as usize] = self.encode_node(&tail)?;
                    Node::Branch(branch)
                }
            }
        } else {
            // The paths diverge, or the new key ends first: fan out into a
            // branch, each side keeping its role.
            let mut branch = BranchNode::empty();
            match payload {
                KvPayload::Child(child) if current_rest.len() == 1 => {
                    // The extension's one remaining nibble is absorbed as
                    // the branch index, so its child slots in directly.
                    branch.children[current_rest[0] as usize] = child;
                }
                payload => {
                    let survivor_path = Nibbles::from_nibbles(&current_rest[1..]);
                    let survivor = match payload {
                        KvPayload::Value(current_value) => {
                            Node::Leaf(LeafNode::new(survivor_path, current_value))
                        }
                        KvPayload::Child(child) => {
                            Node::Extension(ExtensionNode::new(survivor_path, child))
                        }
                    };
                    branch.children[current_rest[0] as usize] = self.encode_node(&survivor)?;
                }
            }
            if let Some((&index, rest)) = key_rest.split_first() {
                let tail = Node::Leaf(LeafNode::new(Nibbles::from_nibbles(rest), value));
                branch.children[index as usize] = self.encode_node(&tail)?;
            } else {
                branch.value = Some(value);
            }
            Node::Branch(branch)
        };

        if prefix_len > 0 {
            // Split the shared prefix off into a single extension above the
            // fan-out.
            let prefix = Nibbles::from_nibbles(&key[..prefix_len]);
            Ok(Node::Extension(ExtensionNode::new(
                prefix,
                self.encode_node(&new_node)?,
            )))
        } else {
            Ok(new_node)
        }
    }

    // --- delete ----------------------------------------------------------

    /// Delete counterpart of [`update_and_unlink`](Self::update_and_unlink).
    fn delete_and_unlink(&self, node: Node, key: &[u8]) -> Result<Node, TrieError> {
        let old = node.clone();
        let new = self.delete_node(node, key)?;
        if new != old {
            self.forget_node(&old)?;
        }
        Ok(new)
    }

    /// Core delete. Returns the (possibly blank) replacement node.
    fn delete_node(&self, node: Node, key: &[u8]) -> Result<Node, TrieError> {
        match node {
            Node::Empty => Ok(Node::Empty),
            Node::Branch(branch) => self.delete_branch_node(branch, key),
            Node::Leaf(leaf) => {
                if key == &leaf.path[..] {
                    trace!("drop leaf");
                    Ok(Node::Empty)
                } else {
                    // Key absent; nothing to do.
                    Ok(Node::Leaf(leaf))
                }
            }
            Node::Extension(extension) => self.delete_extension_node(extension, key),
        }
    }

    fn delete_branch_node(&self, mut branch: BranchNode, key: &[u8]) -> Result<Node, TrieError> {
        let Some((&index, rest)) = key.split_first() else {
            // The key ends here: blank the value slot and re-establish the
            // two-live-slots minimum.
            branch.value = None;
            return self.normalize_branch(branch);
        };
        let slot = index as usize;
        let child = self.decode_ref(&branch.children[slot])?;
        let new_child = self.delete_and_unlink(child, rest)?;
        let reference = self.encode_node(&new_child)?;
        if reference == branch.children[slot] {
            return Ok(Node::Branch(branch));
        }
        branch.children[slot] = reference;
        if branch.children[slot].is_empty() {
            return self.normalize_branch(branch);
        }
        Ok(Node::Branch(branch))
    }

    fn delete_extension_node(
        &self,
        extension: ExtensionNode,
        key: &[u8],
    ) -> Result<Node, TrieError> {
        if !key.starts_with(&extension.path[..]) {
            // Key absent; nothing to do.
            return Ok(Node::Extension(extension));
        }
        let child = self.decode_ref(&extension.child)?;
        let new_child = self.delete_and_unlink(child, &key[extension.path.len()..])?;
        let reference = self.encode_node(&new_child)?;
        if reference == extension.child {
            return Ok(Node::Extension(extension));
        }
        trace!("restitch extension after delete");
        match new_child {
            Node::Empty => Ok(Node::Empty),
            // The child shrank to another kv node: merge the paths so kv
            // nodes never chain.
            Node::Leaf(leaf) => Ok(Node::Leaf(LeafNode::new(
                concat(&extension.path, &leaf.path),
                leaf.value,
            ))),
            Node::Extension(sub) => Ok(Node::Extension(ExtensionNode::new(
                concat(&extension.path, &sub.path),
                sub.child,
            ))),
            Node::Branch(_) => Ok(Node::Extension(ExtensionNode::new(
                extension.path,
                reference,
            ))),
        }
    }

    /// Collapses a branch left with a single live slot back into the
    /// canonical minimal shape; branches with two or more live slots pass
    /// through unchanged.
    fn normalize_branch(&self, mut branch: BranchNode) -> Result<Node, TrieError> {
        match branch.live_slots() {
            0 => return Err(TrieError::Invariant("branch has no live slots")),
            1 => {}
            _ => return Ok(Node::Branch(branch)),
        }
        if let Some(value) = branch.value.take() {
            // Only the value slot survives: the key ends exactly here.
            return Ok(Node::Leaf(LeafNode::new(Nibbles::default(), value)));
        }
        let index = branch
            .first_live_child()
            .ok_or(TrieError::Invariant("branch has no live slots"))?;
        let survivor = self.decode_ref(&branch.children[index])?;
        let index_nibble = [index as u8];
        match survivor {
            // A kv survivor absorbs the branch position as one more leading
            // nibble.
            Node::Leaf(leaf) => Ok(Node::Leaf(LeafNode::new(
                concat(&index_nibble, &leaf.path),
                leaf.value,
            ))),
            Node::Extension(extension) => Ok(Node::Extension(ExtensionNode::new(
                concat(&index_nibble, &extension.path),
                extension.child,
            ))),
            // A branch survivor gets a one-nibble extension above it; the
            // deletion descended a different slot, so its reference still
            // stands.
            Node::Branch(_) => Ok(Node::Extension(ExtensionNode::new(
                Nibbles::from_nibbles(index_nibble),
                branch.children[index].clone(),
            ))),
            Node::Empty => Err(TrieError::Invariant("live branch slot decoded to blank")),
        }
    }

    // --- enumeration -----------------------------------------------------

    fn count(&self, node: &Node) -> Result<usize, TrieError> {
        match node {
            Node::Empty => Ok(0),
            Node::Leaf(_) => Ok(1),
            Node::Extension(extension) => {
                let child = self.decode_ref(&extension.child)?;
                self.count(&child)
            }
            Node::Branch(branch) => {
                let mut total = usize::from(branch.value.is_some());
                for reference in &branch.children {
                    let child = self.decode_ref(reference)?;
                    total += self.count(&child)?;
                }
                Ok(total)
            }
        }
    }

    fn collect_entries(
        &self,
        node: &Node,
        prefix: &mut Vec<u8>,
        entries: &mut BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> Result<(), TrieError> {
        match node {
            Node::Empty => {}
            Node::Leaf(leaf) => {
                let full = concat(prefix, &leaf.path);
                entries.insert(nibbles_to_bytes(&full)?, leaf.value.clone());
            }
            Node::Extension(extension) => {
                let depth = prefix.len();
                prefix.extend_from_slice(&extension.path[..]);
                let child = self.decode_ref(&extension.child)?;
                self.collect_entries(&child, prefix, entries)?;
                prefix.truncate(depth);
            }
            Node::Branch(branch) => {
                if let Some(value) = &branch.value {
                    entries.insert(nibbles_to_bytes(prefix)?, value.clone());
                }
                for (index, reference) in branch.children.iter().enumerate() {
                    if reference.is_empty() {
                        continue;
                    }
                    let child = self.decode_ref(reference)?;
                    prefix.push(index as u8);
                    self.collect_entries(&child, prefix, entries)?;
                    prefix.pop();
                }
            }
        }
        Ok(())
    }

    /// Post-order walk dropping the storage entries of everything below
    /// `node`. Leaf values need no walk of their own.
    fn release_subtree(&self, node: &Node) -> Result<(), TrieError> {
        match node {
            Node::Branch(branch) => {
                for reference in &branch.children {
                    let child = self.decode_ref(reference)?;
                    self.release_subtree(&child)?;
                    self.forget_node(&child)?;
                }
            }
            Node::Extension(extension) => {
                let child = self.decode_ref(&extension.child)?;
                self.release_subtree(&child)?;
                self.forget_node(&child)?;
            }
            Node::Empty | Node::Leaf(_) => {}
        }
        Ok(())
    }
}

fn check_key(key: &[u8]) -> Result<(), TrieError> {
    if key.len() > MAX_KEY_BYTES {
        return Err(TrieError::InvalidKey(key.len()));
    }
    Ok(())
}
