//! Block iterator: chunked historical fetches that turn into live following.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;

use steemwatch_core::api::BlockInfoApi;
use steemwatch_core::transport::RpcClient;

use crate::error::StreamError;
use crate::header::block_num_from_header;
use crate::waiter::{BlockWaiter, WaiterConfig};

/// Number of the first block of the chain; there is no block 0.
pub const FIRST_BLOCK: u64 = 1;

/// Half-open block range `[start, end)`; `end == None` follows the chain forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl BlockRange {
    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn unbounded(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Exactly one block.
    pub fn single(block_num: u64) -> Self {
        Self::bounded(block_num, block_num + 1)
    }

    /// Returns `true` once `cursor` has passed the end of a bounded range.
    pub fn is_exhausted(&self, cursor: u64) -> bool {
        self.end.is_some_and(|end| cursor >= end)
    }
}

/// Configuration for [`BlockIterator`].
#[derive(Debug, Clone)]
pub struct BlockStreamConfig {
    /// Blocks fetched per `get_blocks_with_info` round trip.
    pub chunk_size: u64,
    pub waiter: WaiterConfig,
}

impl Default for BlockStreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            waiter: WaiterConfig::default(),
        }
    }
}

/// A block yielded by [`BlockIterator`], as returned by `get_blocks_with_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockEntry {
    pub num: u64,
    pub block: Value,
}

/// Ordered, gap-free iterator over the blocks of a [`BlockRange`].
///
/// Not restartable, and not safe to drive from several tasks at once:
/// [`next`](Self::next) takes `&mut self` for that reason.
pub struct BlockIterator {
    block_info: BlockInfoApi,
    waiter: BlockWaiter,
    waiter_started: bool,
    range: BlockRange,
    chunk_size: u64,
    current: u64,
    /// Blocks `current..current + chunk.len()`.
    chunk: VecDeque<Value>,
}

impl BlockIterator {
    pub fn new(client: Arc<dyn RpcClient>, range: BlockRange, config: BlockStreamConfig) -> Self {
        Self {
            block_info: BlockInfoApi::new(client.clone()),
            waiter: BlockWaiter::new(client, config.waiter),
            waiter_started: false,
            range,
            chunk_size: config.chunk_size.max(1),
            current: range.start.max(FIRST_BLOCK),
            chunk: VecDeque::new(),
        }
    }

    /// Number of the next block to be yielded. Ranges starting at 0 begin
    /// at [`FIRST_BLOCK`].
    pub fn position(&self) -> u64 {
        self.current
    }

    pub fn range(&self) -> BlockRange {
        self.range
    }

    /// Yield the next block, suspending at the chain head until it exists.
    /// `Ok(None)` once a bounded range is exhausted.
    pub async fn next(&mut self) -> Result<Option<BlockEntry>, StreamError> {
        loop {
            if self.range.is_exhausted(self.current) {
                return Ok(None);
            }
            if let Some(block) = self.chunk.pop_front() {
                let num = self.current;
                let header = block.get("block").filter(|b| b.is_object()).unwrap_or(&block);
                match block_num_from_header(header) {
                    Some(actual) if actual != num => {
                        self.chunk.clear();
                        return Err(StreamError::Protocol(format!(
                            "expected block {num} in chunk, got block {actual}"
                        )));
                    }
                    _ => {}
                }
                self.current += 1;
                return Ok(Some(BlockEntry { num, block }));
            }

            let count = match self.range.end {
                Some(end) => self.chunk_size.min(end - self.current),
                None => self.chunk_size,
            };
            let chunk = self
                .block_info
                .get_blocks_with_info(self.current, count)
                .await?;
            tracing::debug!(start = self.current, count, fetched = chunk.len(), "fetched block chunk");
            self.chunk = chunk.into();

            if !self.waiter_started {
                self.waiter.start().await?;
                self.waiter_started = true;
            }
            // Blocks at the head until the cursor's block exists, so an
            // empty chunk is not refetched in a tight loop.
            self.waiter.get_block(self.current, true).await?;
        }
    }

    /// Adapt into a `Stream` of blocks.
    pub fn into_stream(self) -> impl Stream<Item = Result<BlockEntry, StreamError>> {
        stream::try_unfold(self, |mut blocks| async move {
            let entry = blocks.next().await?;
            Ok::<_, StreamError>(entry.map(|entry| (entry, blocks)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::block_num_from_header;
    use crate::testing::MockNode;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time;

    const LIMIT: Duration = Duration::from_secs(5);

    fn config(chunk_size: u64) -> BlockStreamConfig {
        BlockStreamConfig {
            chunk_size,
            ..BlockStreamConfig::default()
        }
    }

    /// Yield until the node has answered `n` calls to `method`.
    async fn until_calls(node: &MockNode, method: &str, n: usize) {
        time::timeout(LIMIT, async {
            while node.count(method) < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    fn header_num(entry: &BlockEntry) -> Option<u64> {
        block_num_from_header(&entry.block["block"])
    }

    #[tokio::test]
    async fn bounded_range_spans_chunks_without_gaps() {
        let node = MockNode::with_head(100);
        let mut blocks = BlockIterator::new(node.clone(), BlockRange::bounded(5, 11), config(3));

        let mut seen = Vec::new();
        while let Some(entry) = blocks.next().await.unwrap() {
            assert_eq!(header_num(&entry), Some(entry.num));
            seen.push(entry.num);
        }
        assert_eq!(seen, (5..11).collect::<Vec<_>>());
        assert_eq!(node.count("get_blocks_with_info"), 2);
        assert_eq!(node.count("set_block_applied_callback"), 1);

        // exhausted stays exhausted
        assert_eq!(blocks.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_chunk_is_clamped_to_range_end() {
        let node = MockNode::with_head(100);
        let blocks = BlockIterator::new(node.clone(), BlockRange::bounded(5, 11), config(4));
        let all: Vec<_> = blocks.into_stream().try_collect().await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(
            node.args_of("get_blocks_with_info"),
            vec![
                json!([{"start_block_num": 5, "count": 4}]),
                json!([{"start_block_num": 9, "count": 2}]),
            ]
        );
    }

    #[tokio::test]
    async fn single_block_range() {
        let node = MockNode::with_head(100);
        let mut blocks = BlockIterator::new(node, BlockRange::single(42), BlockStreamConfig::default());
        let entry = blocks.next().await.unwrap().unwrap();
        assert_eq!(entry.num, 42);
        assert_eq!(blocks.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unbounded_range_follows_the_head() {
        let node = MockNode::with_head(10);
        let mut blocks = BlockIterator::new(node.clone(), BlockRange::unbounded(9), config(5));
        assert_eq!(blocks.next().await.unwrap().unwrap().num, 9);
        assert_eq!(blocks.next().await.unwrap().unwrap().num, 10);

        let handle = tokio::spawn(async move {
            let entry = blocks.next().await;
            (blocks, entry)
        });
        // one poll after each chunk: 9 found, 11 missing
        until_calls(&node, "get_block", 2).await;
        assert!(!handle.is_finished());

        node.produce_block();
        let (mut blocks, entry) = time::timeout(LIMIT, handle).await.unwrap().unwrap();
        let entry = entry.unwrap().unwrap();
        assert_eq!(entry.num, 11);
        assert_eq!(header_num(&entry), Some(11));
        assert_eq!(blocks.position(), 12);

        node.produce_block();
        assert_eq!(blocks.next().await.unwrap().unwrap().num, 12);
        assert_eq!(node.count("set_block_applied_callback"), 1);
    }

    #[tokio::test]
    async fn start_beyond_head_waits_for_that_block() {
        let node = MockNode::with_head(10);
        let mut blocks = BlockIterator::new(node.clone(), BlockRange::single(12), config(5));

        let handle = tokio::spawn(async move { blocks.next().await });
        until_calls(&node, "get_block", 1).await;
        node.produce_block(); // 11
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        assert_eq!(node.count("get_block"), 1);

        node.produce_block(); // 12
        let entry = time::timeout(LIMIT, handle).await.unwrap().unwrap().unwrap();
        assert_eq!(entry.map(|e| e.num), Some(12));
    }

    #[tokio::test]
    async fn range_from_zero_starts_at_the_first_block() {
        let node = MockNode::with_head(100);
        let blocks = BlockIterator::new(node.clone(), BlockRange::bounded(0, 3), config(10));
        assert_eq!(blocks.position(), FIRST_BLOCK);

        let all: Vec<_> = time::timeout(LIMIT, blocks.into_stream().try_collect::<Vec<_>>())
            .await
            .unwrap()
            .unwrap();
        let nums: Vec<u64> = all.iter().map(|e| e.num).collect();
        assert_eq!(nums, vec![1, 2]);

        let mut genesis = BlockIterator::new(node, BlockRange::single(0), config(10));
        assert_eq!(genesis.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn chunk_not_starting_at_cursor_is_a_protocol_error() {
        let node = MockNode::with_head(100);
        node.reply(
            "get_blocks_with_info",
            json!([{"block": MockNode::header(2)}, {"block": MockNode::header(3)}]),
        );
        let mut blocks = BlockIterator::new(node, BlockRange::bounded(1, 5), config(10));
        assert!(matches!(blocks.next().await, Err(StreamError::Protocol(_))));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_the_position() {
        let node = MockNode::with_head(100);
        let mut blocks = BlockIterator::new(node.clone(), BlockRange::bounded(1, 5), config(2));
        assert_eq!(blocks.next().await.unwrap().unwrap().num, 1);
        assert_eq!(blocks.next().await.unwrap().unwrap().num, 2);

        node.fail("get_blocks_with_info");
        assert!(blocks.next().await.is_err());
        assert_eq!(blocks.position(), 3);

        node.recover();
        assert_eq!(blocks.next().await.unwrap().unwrap().num, 3);
    }

    #[tokio::test]
    async fn rpc_errors_reach_the_consumer() {
        let node = MockNode::with_head(10);
        node.fail("get_blocks_with_info");
        let mut blocks = BlockIterator::new(node, BlockRange::bounded(1, 5), config(2));
        let err = blocks.next().await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Transport(steemwatch_core::TransportError::Rpc(_))
        ));
    }
}
