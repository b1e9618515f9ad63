//! Block-number derivation from block headers.
//!
//! Steem headers do not carry their own number. The first four bytes of a
//! block id are its number, big-endian, so a header's number is the number
//! encoded at the start of its `previous` id, plus one.

use serde_json::Value;

/// Number of the block described by `header`.
pub fn block_num_from_header(header: &Value) -> Option<u64> {
    block_num_from_previous(header.get("previous")?.as_str()?)
}

/// Number of the block whose parent id is `previous` (hex).
pub fn block_num_from_previous(previous: &str) -> Option<u64> {
    let prefix = previous.get(..8)?;
    let parent = u32::from_str_radix(prefix, 16).ok()?;
    Some(u64::from(parent) + 1)
}
