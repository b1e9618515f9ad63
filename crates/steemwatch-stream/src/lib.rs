//! steemwatch-stream — ordered, gap-free block and account-history streams.
//!
//! # Architecture
//!
//! ```text
//! BlockIterator ──┬── BlockInfoApi.get_blocks_with_info   (chunked fast path)
//!                 └── BlockWaiter                          (head following)
//!                        ├── set_block_applied_callback   (push subscription)
//!                        └── database_api.get_block       (poll after each wake-up)
//!
//! HistoryIterator ── database_api.get_account_history     (reverse-indexed pages)
//! ```
//!
//! Iterators hold an exclusive cursor and take `&mut self`; they are not
//! meant to be driven from more than one task.

pub mod blocks;
pub mod error;
pub mod header;
pub mod history;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use blocks::{BlockEntry, BlockIterator, BlockRange, BlockStreamConfig, FIRST_BLOCK};
pub use error::StreamError;
pub use header::{block_num_from_header, block_num_from_previous};
pub use history::{HistoryEntry, HistoryIterator, HistoryStreamConfig};
pub use waiter::{BlockWaiter, WaiterConfig};
