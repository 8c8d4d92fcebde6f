//! Metric sink interface and the chunking writer in front of it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::core::EntityMetricEvent;
use crate::error::Result;
use crate::retry::{retryable, RetryPolicy};

/// Default number of events per insert request.
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

/// Destination store for metric events.
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Bulk insert one chunk of events.
    async fn insert(&self, events: &[EntityMetricEvent]) -> Result<()>;

    /// Short name for logging.
    fn name(&self) -> &str;
}

/// Splits a batch's events into insert-sized chunks and sends them.
///
/// All chunks of one flush are in flight at once; admission control is left
/// to the sink. Each chunk is retried on its own.
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn MetricSink>,
    insert_batch_size: usize,
    retry: RetryPolicy,
    dry_run: bool,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn MetricSink>, insert_batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            sink,
            insert_batch_size: insert_batch_size.max(1),
            retry,
            dry_run: false,
        }
    }

    /// Replace inserts with a log line.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Write `events` to the sink. Returns the number of events accepted.
    pub async fn flush(&self, events: &[EntityMetricEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        if self.dry_run {
            info!("[DRY RUN] Would insert {} metrics", events.len());
            return Ok(events.len());
        }

        let chunks = events.chunks(self.insert_batch_size);
        debug!(
            "flushing {} metrics to {} in {} chunks",
            events.len(),
            self.sink.name(),
            chunks.len()
        );

        try_join_all(chunks.map(|chunk| {
            let sink = self.sink.clone();
            retryable(self.retry, "sink insert", move || {
                let sink = sink.clone();
                async move { sink.insert(chunk).await }
            })
        }))
        .await?;

        Ok(events.len())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemorySink;
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::Ordering;
    use tracing_test::traced_test;

    fn events(n: usize) -> Vec<EntityMetricEvent> {
        let now = Utc::now();
        (0..n)
            .map(|i| EntityMetricEvent::count("post", i as i64, 1, "views", now))
            .collect()
    }

    #[tokio::test]
    async fn test_flush_chunks_by_insert_batch_size() {
        let sink = Arc::new(MemorySink::default());
        let writer = SinkWriter::new(sink.clone(), 500, RetryPolicy::immediate(3));

        let written = writer.flush(&events(1200)).await.unwrap();

        assert_eq!(written, 1200);
        assert_eq!(sink.chunk_sizes(), vec![200, 500, 500]);
        assert_eq!(sink.events().len(), 1200);
    }

    #[tokio::test]
    async fn test_flush_empty_buffer_is_noop() {
        let sink = Arc::new(MemorySink::default());
        let writer = SinkWriter::new(sink.clone(), 500, RetryPolicy::immediate(3));

        assert_eq!(writer.flush(&[]).await.unwrap(), 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_never_calls_sink() {
        let sink = Arc::new(MemorySink::default());
        let writer = SinkWriter::new(sink.clone(), 500, RetryPolicy::immediate(3)).with_dry_run(true);

        let written = writer.flush(&events(5000)).await.unwrap();

        assert_eq!(written, 5000);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_dry_run_logs_one_line_per_flush() {
        let sink = Arc::new(MemorySink::default());
        let writer = SinkWriter::new(sink, 500, RetryPolicy::immediate(3)).with_dry_run(true);

        writer.flush(&events(5000)).await.unwrap();

        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("[DRY RUN] Would insert 5000 metrics"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one dry run line, found {}", n)),
            }
        });
        assert!(!logs_contain("Would insert 500 metrics"));
    }

    #[tokio::test]
    async fn test_chunk_insert_is_retried() {
        let sink = Arc::new(MemorySink::failing(2));
        let writer = SinkWriter::new(sink.clone(), 10, RetryPolicy::immediate(3));

        writer.flush(&events(10)).await.unwrap();

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.events().len(), 10);
    }

    #[tokio::test]
    async fn test_insert_failure_surfaces_after_retries() {
        let sink = Arc::new(MemorySink::failing(10));
        let writer = SinkWriter::new(sink.clone(), 10, RetryPolicy::immediate(3));

        assert!(writer.flush(&events(5)).await.is_err());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }
}
