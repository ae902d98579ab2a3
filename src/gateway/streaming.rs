//! Streaming query variant: one logical call, many chunks.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{Stream, TryStreamExt};
use tracing::debug;

use super::{QueryGateway, Row};
use crate::error::Result;

/// Chunks of rows in delivery order.
pub type RowChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<Row>>> + Send>>;

/// A backend that answers a query with a stream of row chunks.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Open a streaming search for `query`
    async fn search_stream(&self, account_id: &str, query: &str) -> Result<RowChunkStream>;
}

/// Query gateway that drains a [`ChunkSource`] into one ordered row list.
pub struct StreamingQueryGateway<S> {
    source: S,
}

impl<S: ChunkSource> StreamingQueryGateway<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: ChunkSource> QueryGateway for StreamingQueryGateway<S> {
    async fn run(&self, account_id: &str, query: &str) -> Result<Vec<Row>> {
        let mut stream = self.source.search_stream(account_id, query).await?;

        let mut rows = Vec::new();
        let mut chunks = 0usize;
        while let Some(chunk) = stream.try_next().await? {
            chunks += 1;
            rows.extend(chunk);
        }

        debug!(account_id = %account_id, chunks, rows = rows.len(), "Drained search stream");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdsError;
    use futures::stream;
    use serde_json::json;

    struct FixedChunks(Vec<Vec<u32>>);

    #[async_trait]
    impl ChunkSource for FixedChunks {
        async fn search_stream(&self, _account_id: &str, _query: &str) -> Result<RowChunkStream> {
            let chunks: Vec<Result<Vec<Row>>> = self
                .0
                .iter()
                .map(|chunk| Ok(chunk.iter().map(|n| Row::new(json!({ "n": n }))).collect()))
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    struct FailingMidStream;

    #[async_trait]
    impl ChunkSource for FailingMidStream {
        async fn search_stream(&self, _account_id: &str, _query: &str) -> Result<RowChunkStream> {
            let chunks: Vec<Result<Vec<Row>>> = vec![
                Ok(vec![Row::new(json!({ "n": 1 }))]),
                Err(AdsError::Transport("connection reset".to_string())),
            ];
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    #[tokio::test]
    async fn test_concatenates_chunks_in_order() {
        let gateway = StreamingQueryGateway::new(FixedChunks(vec![vec![1, 2], vec![], vec![3]]));

        let rows = gateway.run("123", "SELECT x FROM y").await.unwrap();
        let values: Vec<_> = rows.iter().map(|r| r.get("n").cloned().unwrap()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_empty_stream_is_not_an_error() {
        let gateway = StreamingQueryGateway::new(FixedChunks(Vec::new()));
        let rows = gateway.run("123", "SELECT x FROM y").await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_run() {
        let gateway = StreamingQueryGateway::new(FailingMidStream);
        let err = gateway.run("123", "SELECT x FROM y").await.unwrap_err();
        assert!(matches!(err, AdsError::Transport(_)));
    }
}
