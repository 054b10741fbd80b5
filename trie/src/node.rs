//! Typed trie nodes and their canonical RLP form.
//!
//! Nodes serialize to the classic heterogeneous list shapes (a 2-list for
//! leaf/extension nodes, a 17-list for branch nodes), so the shape of the
//! encoding, not an explicit tag, classifies a stored node. In memory the
//! shapes are a proper sum type, and child references are [`NodeRef`]s:
//! blank, inlined raw RLP (encodings under 32 bytes), or the Keccak-256
//! digest the encoding is stored under.

use core::fmt;

use alloy_rlp::{Decodable, Encodable, Header, PayloadView, EMPTY_STRING_CODE};
use arrayvec::ArrayVec;

use crate::keccak::digest_keccak;
use crate::nibbles::{self, pack_path};
use nybbles::Nibbles;

/// Maximum byte length of an encoding referenced in place: anything at
/// 32 bytes or more is stored externally under its digest.
pub const INLINE_NODE_MAX: usize = 31;

/// A reference to a node, as it appears inside its parent.
#[derive(Clone, PartialEq, Eq)]
pub enum NodeRef {
    /// No node (the blank reference).
    Empty,
    /// The node's raw RLP encoding, embedded directly in the parent.
    Inline(ArrayVec<u8, INLINE_NODE_MAX>),
    /// Content address of an encoding held by the backing store.
    Digest([u8; 32]),
}

impl NodeRef {
    /// Builds the reference form of an encoded node: inline below the
    /// 32-byte threshold, a digest otherwise.
    pub fn from_rlp(rlp: &[u8]) -> Self {
        if rlp.len() < 32 {
            let mut raw = ArrayVec::new();
            raw.try_extend_from_slice(rlp)
                .expect("encoding under 32 bytes fits inline");
            Self::Inline(raw)
        } else {
            Self::Digest(digest_keccak(rlp))
        }
    }

    /// Parses one raw item of an enclosing list as a child reference.
    pub(crate) fn from_rlp_item(item: &[u8]) -> alloy_rlp::Result<Self> {
        if item == [EMPTY_STRING_CODE] {
            return Ok(Self::Empty);
        }
        if item.len() == 33 && item[0] == EMPTY_STRING_CODE + 32 {
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&item[1..]);
            return Ok(Self::Digest(digest));
        }
        if item.len() < 32 {
            let mut raw = ArrayVec::new();
            raw.try_extend_from_slice(item)
                .expect("encoding under 32 bytes fits inline");
            return Ok(Self::Inline(raw));
        }
        Err(alloy_rlp::Error::Custom("malformed node reference"))
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the digest if this reference is content-addressed.
    pub const fn as_digest(&self) -> Option<[u8; 32]> {
        match self {
            Self::Digest(digest) => Some(*digest),
            _ => None,
        }
    }

    /// Length of this reference inside its parent's RLP payload.
    fn rlp_length(&self) -> usize {
        match self {
            Self::Empty => 1,
            Self::Inline(raw) => raw.len(),
            Self::Digest(_) => 33,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Empty => out.push(EMPTY_STRING_CODE),
            Self::Inline(raw) => out.extend_from_slice(raw),
            Self::Digest(digest) => digest.encode(out),
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "NodeRef(empty)"),
            Self::Inline(raw) => write!(f, "NodeRef(inline {})", hex::encode_prefixed(&raw[..])),
            Self::Digest(digest) => write!(f, "NodeRef({})", hex::encode_prefixed(digest)),
        }
    }
}

/// A leaf holding the value for the key whose path ends here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Residual nibble path below the leaf's position.
    pub path: Nibbles,
    /// The stored user value.
    pub value: Vec<u8>,
}

impl LeafNode {
    pub fn new(path: Nibbles, value: Vec<u8>) -> Self {
        Self { path, value }
    }
}

/// An extension compressing a run of nibbles shared by every key below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionNode {
    /// The shared nibble run. Never empty in a canonical trie.
    pub path: Nibbles,
    /// The single child, which is always a branch once decoded.
    pub child: NodeRef,
}

impl ExtensionNode {
    pub fn new(path: Nibbles, child: NodeRef) -> Self {
        Self { path, child }
    }
}

/// A 16-way fan-out plus the value for the key ending at this position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    /// Children indexed by the next nibble of the key.
    pub children: [NodeRef; 16],
    /// Value for the key that ends exactly here, if any.
    pub value: Option<Vec<u8>>,
}

impl BranchNode {
    pub fn empty() -> Self {
        Self {
            children: std::array::from_fn(|_| NodeRef::Empty),
            value: None,
        }
    }

    /// Number of occupied slots among the 16 children and the value.
    pub fn live_slots(&self) -> usize {
        self.children.iter().filter(|child| !child.is_empty()).count()
            + usize::from(self.value.is_some())
    }

    /// Index of the first occupied child slot.
    pub fn first_live_child(&self) -> Option<usize> {
        self.children.iter().position(|child| !child.is_empty())
    }
}

impl Default for BranchNode {
    fn default() -> Self {
        Self::empty()
    }
}

/// A node of the trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// The empty node. A sentinel; never stored.
    Empty,
    Leaf(LeafNode),
    Extension(ExtensionNode),
    Branch(BranchNode),
}

impl Node {
    /// Serializes the node into its canonical RLP list form.
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Empty => out.push(EMPTY_STRING_CODE),
            Self::Leaf(leaf) => {
                let compact = pack_path(&leaf.path, true);
                Header {
                    list: true,
                    payload_length: compact.as_slice().length() + leaf.value.as_slice().length(),
                }
                .encode(&mut out);
                compact.as_slice().encode(&mut out);
                leaf.value.as_slice().encode(&mut out);
            }
            Self::Extension(extension) => {
                let compact = pack_path(&extension.path, false);
                Header {
                    list: true,
                    payload_length: compact.as_slice().length() + extension.child.rlp_length(),
                }
                .encode(&mut out);
                compact.as_slice().encode(&mut out);
                extension.child.encode_into(&mut out);
            }
            Self::Branch(branch) => {
                let value_length = branch.value.as_deref().map_or(1, |value| value.length());
                let payload_length =
                    branch.children.iter().map(NodeRef::rlp_length).sum::<usize>() + value_length;
                Header {
                    list: true,
                    payload_length,
                }
                .encode(&mut out);
                for child in &branch.children {
                    child.encode_into(&mut out);
                }
                match branch.value.as_deref() {
                    Some(value) => value.encode(&mut out),
                    None => out.push(EMPTY_STRING_CODE),
                }
            }
        }
        out
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl Decodable for Node {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let items = match Header::decode_raw(buf)? {
            PayloadView::List(items) => items,
            PayloadView::String(val) => {
                return if val.is_empty() {
                    Ok(Self::Empty)
                } else {
                    Err(alloy_rlp::Error::UnexpectedString)
                }
            }
        };

        // A valid node is either 17 items (branch) or 2 (leaf/extension,
        // told apart by the compact path's flag nibble).
        match items.len() {
            17 => {
                let mut branch = BranchNode::empty();
                for (idx, item) in items.into_iter().enumerate() {
                    if idx == 16 {
                        let mut value_item = item;
                        let value = Header::decode_bytes(&mut value_item, false)?;
                        if !value.is_empty() {
                            branch.value = Some(value.to_vec());
                        }
                    } else {
                        branch.children[idx] = NodeRef::from_rlp_item(item)?;
                    }
                }
                Ok(Self::Branch(branch))
            }
            2 => {
                let mut path_item = items[0];
                let compact = Header::decode_bytes(&mut path_item, false)?;
                if compact.is_empty() {
                    return Err(alloy_rlp::Error::Custom("node path is empty"));
                }
                let (path, is_leaf) = nibbles::unpack_path(compact)
                    .map_err(|_| alloy_rlp::Error::Custom("invalid compact path in node"))?;

                if is_leaf {
                    let mut value_item = items[1];
                    let value = Header::decode_bytes(&mut value_item, false)?.to_vec();
                    Ok(Self::Leaf(LeafNode::new(path, value)))
                } else {
                    let child = NodeRef::from_rlp_item(items[1])?;
                    if child.is_empty() {
                        return Err(alloy_rlp::Error::Custom("extension node with blank child"));
                    }
                    Ok(Self::Extension(ExtensionNode::new(path, child)))
                }
            }
            _ => Err(alloy_rlp::Error::Custom("invalid number of items in node list")),
        }
    }
}
