//! Batcher: the single consumer of the token stream.
//!
//! Tokens are appended to one in-progress batch. A full batch is committed at
//! once; whatever is left when the stream closes is committed last. An empty
//! trailing batch is skipped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::contract::{BatchCommitter, UploadToken};
use crate::error::PipelineError;
use crate::pipeline::send_or_cancel;
use crate::progress::ProgressMessage;
use crate::retry::{retry, RetryError, RetryPolicy};

/// Totals of a batcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: usize,
    pub tokens: usize,
}

pub(crate) struct Batcher<C> {
    committer: Arc<C>,
    max_batch_size: usize,
    retry: RetryPolicy,
    tokens: mpsc::Receiver<UploadToken>,
    messages: mpsc::Sender<ProgressMessage>,
    cancel: CancellationToken,
}

impl<C: BatchCommitter + 'static> Batcher<C> {
    pub(crate) fn new(
        committer: Arc<C>,
        max_batch_size: usize,
        retry: RetryPolicy,
        tokens: mpsc::Receiver<UploadToken>,
        messages: mpsc::Sender<ProgressMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            committer,
            max_batch_size,
            retry,
            tokens,
            messages,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) -> Result<BatchStats, PipelineError> {
        let mut batch = Vec::with_capacity(self.max_batch_size);
        let mut stats = BatchStats::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                next = self.tokens.recv() => next,
            };
            let Some(token) = next else { break };

            batch.push(token);
            if batch.len() >= self.max_batch_size {
                self.flush(&mut batch, &mut stats).await?;
            }
        }

        self.flush(&mut batch, &mut stats).await?;
        info!(
            batches = stats.batches,
            tokens = stats.tokens,
            "[batcher] Token stream exhausted"
        );
        Ok(stats)
    }

    /// Commit `batch` with retries and clear it. No-op for an empty batch.
    async fn flush(
        &self,
        batch: &mut Vec<UploadToken>,
        stats: &mut BatchStats,
    ) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let size = batch.len();
        let tokens: &[UploadToken] = batch;
        let committer = &*self.committer;

        retry(&self.retry, &self.cancel, "commit", move || {
            committer.commit(tokens)
        })
        .await
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, source } => PipelineError::Commit {
                size,
                attempts,
                source,
            },
            RetryError::Cancelled => PipelineError::Cancelled,
        })?;

        batch.clear();
        stats.batches += 1;
        stats.tokens += size;
        debug!(size, batches = stats.batches, "[batcher] Committed batch");

        // Losing the progress stream ends the batcher, even after a successful commit.
        send_or_cancel(
            &self.messages,
            ProgressMessage::BatchCommitted { count: size },
            &self.cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockBatchCommitter;
    use std::sync::Mutex;

    struct Harness {
        token_tx: mpsc::Sender<UploadToken>,
        message_rx: mpsc::Receiver<ProgressMessage>,
        batcher: Batcher<MockBatchCommitter>,
    }

    fn harness(committer: MockBatchCommitter, max_batch_size: usize) -> Harness {
        let (token_tx, token_rx) = mpsc::channel(16);
        let (message_tx, message_rx) = mpsc::channel(16);
        let batcher = Batcher::new(
            Arc::new(committer),
            max_batch_size,
            RetryPolicy::no_retry(),
            token_rx,
            message_tx,
            CancellationToken::new(),
        );
        Harness {
            token_tx,
            message_rx,
            batcher,
        }
    }

    #[tokio::test]
    async fn five_tokens_in_batches_of_two() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let mut committer = MockBatchCommitter::new();
        let recorded = sizes.clone();
        committer.expect_commit().times(3).returning(move |tokens| {
            recorded.lock().unwrap().push(tokens.len());
            Ok(())
        });

        let Harness {
            token_tx,
            mut message_rx,
            batcher,
        } = harness(committer, 2);
        for i in 0..5 {
            token_tx.send(UploadToken::new(format!("t{i}"))).await.unwrap();
        }
        drop(token_tx);

        let stats = batcher.run().await.unwrap();
        assert_eq!(stats, BatchStats { batches: 3, tokens: 5 });
        assert_eq!(*sizes.lock().unwrap(), vec![2, 2, 1]);

        let mut counts = Vec::new();
        while let Ok(message) = message_rx.try_recv() {
            counts.push(message);
        }
        assert_eq!(
            counts,
            vec![
                ProgressMessage::BatchCommitted { count: 2 },
                ProgressMessage::BatchCommitted { count: 2 },
                ProgressMessage::BatchCommitted { count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn empty_stream_commits_nothing() {
        let mut committer = MockBatchCommitter::new();
        committer.expect_commit().never();

        let Harness {
            token_tx,
            message_rx: _message_rx,
            batcher,
        } = harness(committer, 50);
        drop(token_tx);

        assert_eq!(batcher.run().await.unwrap(), BatchStats::default());
    }

    #[tokio::test]
    async fn exact_multiple_has_no_trailing_commit() {
        let mut committer = MockBatchCommitter::new();
        committer
            .expect_commit()
            .times(2)
            .returning(|tokens| {
                assert_eq!(tokens.len(), 3);
                Ok(())
            });

        let Harness {
            token_tx,
            message_rx: _message_rx,
            batcher,
        } = harness(committer, 3);
        for i in 0..6 {
            token_tx.send(UploadToken::new(format!("t{i}"))).await.unwrap();
        }
        drop(token_tx);

        assert_eq!(batcher.run().await.unwrap().batches, 2);
    }

    #[tokio::test]
    async fn failed_commit_reports_batch_size() {
        let mut committer = MockBatchCommitter::new();
        committer
            .expect_commit()
            .times(1)
            .returning(|_| Err("quota exceeded".into()));

        let Harness {
            token_tx,
            message_rx: _message_rx,
            batcher,
        } = harness(committer, 10);
        token_tx.send(UploadToken::new("a")).await.unwrap();
        token_tx.send(UploadToken::new("b")).await.unwrap();
        drop(token_tx);

        match batcher.run().await {
            Err(PipelineError::Commit { size, attempts, .. }) => {
                assert_eq!(size, 2);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected commit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_progress_stream_ends_the_batcher_after_commit() {
        let mut committer = MockBatchCommitter::new();
        committer.expect_commit().times(1).returning(|_| Ok(()));

        let Harness {
            token_tx,
            message_rx,
            batcher,
        } = harness(committer, 1);
        drop(message_rx);
        token_tx.send(UploadToken::new("a")).await.unwrap();
        token_tx.send(UploadToken::new("b")).await.unwrap();
        drop(token_tx);

        assert!(matches!(batcher.run().await, Err(PipelineError::Cancelled)));
    }
}
