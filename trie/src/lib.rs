//! Persistent, hash-addressed Merkle Patricia Trie over a pluggable
//! byte-oriented key-value store.
//!
//! Every node is content-addressed by the Keccak-256 digest of its canonical
//! RLP encoding (encodings under 32 bytes ride inline in their parent), so
//! equal contents always produce an equal root digest, and a trie can be
//! reopened from its root digest against the same store.

pub mod error;
pub mod keccak;
pub mod nibbles;
pub mod node;
pub mod trie;

pub use error::TrieError;
pub use node::{BranchNode, ExtensionNode, LeafNode, Node, NodeRef};
pub use trie::{Trie, MAX_KEY_BYTES};
