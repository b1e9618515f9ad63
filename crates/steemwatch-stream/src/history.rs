//! Account history iterator over the reverse-indexed `get_account_history` API.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;

use steemwatch_core::api::DatabaseApi;
use steemwatch_core::transport::RpcClient;

use crate::error::StreamError;

/// Configuration for [`HistoryIterator`].
#[derive(Debug, Clone)]
pub struct HistoryStreamConfig {
    /// Entries requested per page.
    pub chunk_size: u64,
}

impl Default for HistoryStreamConfig {
    fn default() -> Self {
        Self { chunk_size: 2000 }
    }
}

/// One operation from an account's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub index: u64,
    pub op: Value,
}

/// Ascending iterator over one account's history, starting at index 0.
///
/// The node pages history backwards from a given index; each page is
/// reindexed by absolute operation index before use. Not restartable.
pub struct HistoryIterator {
    db: DatabaseApi,
    account: String,
    chunk_size: u64,
    current: u64,
    chunk: BTreeMap<u64, Value>,
    exhausted: bool,
}

impl HistoryIterator {
    pub fn new(client: Arc<dyn RpcClient>, account: impl Into<String>, config: HistoryStreamConfig) -> Self {
        Self {
            db: DatabaseApi::new(client),
            account: account.into(),
            chunk_size: config.chunk_size.max(1),
            current: 0,
            chunk: BTreeMap::new(),
            exhausted: false,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Index of the next operation to be yielded.
    pub fn position(&self) -> u64 {
        self.current
    }

    /// Yield the next operation; `Ok(None)` once the history is exhausted.
    pub async fn next(&mut self) -> Result<Option<HistoryEntry>, StreamError> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            if let Some(op) = self.chunk.remove(&self.current) {
                let index = self.current;
                self.current += 1;
                return Ok(Some(HistoryEntry { index, op }));
            }

            // `limit` counts entries after the first, so a page is
            // `chunk_size` entries ending at `from`.
            let from = self.current + self.chunk_size - 1;
            let page = self
                .db
                .get_account_history(&self.account, from, self.chunk_size - 1)
                .await?;
            self.chunk = page.into_iter().collect();
            tracing::debug!(account = %self.account, from, fetched = self.chunk.len(), "fetched history page");

            match self.chunk.keys().next_back() {
                Some(&max) if max >= self.current => {
                    if !self.chunk.contains_key(&self.current) {
                        return Err(StreamError::Protocol(format!(
                            "history of {} has no entry {} below its max index {max}",
                            self.account, self.current
                        )));
                    }
                }
                _ => {
                    self.exhausted = true;
                    self.chunk.clear();
                }
            }
        }
    }

    /// Adapt into a `Stream` of history entries.
    pub fn into_stream(self) -> impl Stream<Item = Result<HistoryEntry, StreamError>> {
        stream::try_unfold(self, |mut history| async move {
            let entry = history.next().await?;
            Ok::<_, StreamError>(entry.map(|entry| (entry, history)))
        })
    }
}
