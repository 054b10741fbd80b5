use store::StoreError;
use thiserror::Error;

/// Errors surfaced by trie operations.
///
/// Mutations apply their changes only on the way back up the recursion, so
/// any `Err` leaves the trie in its pre-call state and nothing has been
/// committed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    /// A key longer than 32 bytes was passed to the public surface.
    #[error("key length {0} exceeds the 32-byte limit")]
    InvalidKey(usize),
    /// An odd-length or out-of-range nibble sequence was converted back to
    /// bytes. Reaching this from the public surface indicates a bug or a
    /// corrupt node path.
    #[error("invalid nibble sequence: {0}")]
    InvalidNibbles(&'static str),
    /// The backing store is missing a referenced node, or a stored node has
    /// an unclassifiable shape.
    #[error("corrupt store: {0}")]
    CorruptStore(&'static str),
    /// A stored node failed to decode as RLP.
    #[error("corrupt store: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// The backing store itself failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An internal structural invariant was violated. Not recoverable; the
    /// current operation is aborted.
    #[error("trie invariant violated: {0}")]
    Invariant(&'static str),
}
