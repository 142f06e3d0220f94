//! Run coordinator: wires source -> worker pool -> batcher under one cancellation token.
//!
//! ```text
//!   feed_paths ──paths──▶ worker × N ──tokens──▶ Batcher ──▶ BatchCommitter
//!                              │                    │
//!                              └──── progress ──────┴──▶ reporter
//! ```
//!
//! Every stage runs as its own task inside a [`TaskGroup`]. The first task that
//! fails with a genuine error cancels the shared token; every other task then
//! unwinds with [`PipelineError::Cancelled`], which is never reported on its own.
//! The progress stream is closed only after the whole group has finished.
//!
//! Batch membership depends on which worker finishes first, so it differs
//! between runs. Only counts and token sets are stable.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::batcher::{BatchStats, Batcher};
use crate::config::PipelineConfig;
use crate::contract::{BatchCommitter, Uploader};
use crate::error::PipelineError;
use crate::progress::{run_reporter, ProgressReporter};
use crate::source::feed_paths;
use crate::worker::WorkerPool;

/// What a finished run accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files_uploaded: usize,
    pub batches_committed: usize,
    pub tokens_committed: usize,
    pub messages_reported: usize,
}

/// Result of one task of the group.
#[derive(Debug)]
pub(crate) enum StageReport {
    Source { queued: usize },
    Worker { uploaded: usize },
    PoolDrained,
    Batcher(BatchStats),
}

/// Send `value`, giving up as soon as `cancel` fires.
pub(crate) async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    value: T,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        sent = tx.send(value) => sent.map_err(|_| PipelineError::Cancelled),
    }
}

type FirstError = Arc<Mutex<Option<PipelineError>>>;

/// A set of tasks sharing one cancellation token, failing as a unit.
pub(crate) struct TaskGroup<T> {
    tasks: JoinSet<Option<T>>,
    first_error: FirstError,
    cancel: CancellationToken,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            first_error: Arc::new(Mutex::new(None)),
            cancel,
        }
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawn `fut`; an error cancels the whole group before the task counts as finished.
    pub(crate) fn spawn<F>(&mut self, stage: &'static str, fut: F)
    where
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let guarded = self.guard(stage, fut);
        self.tasks.spawn(guarded.in_current_span());
    }

    /// Like [`TaskGroup::spawn`], but also tracked by `tracker` so a barrier can wait on it.
    pub(crate) fn spawn_tracked<F>(&mut self, tracker: &TaskTracker, stage: &'static str, fut: F)
    where
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let guarded = self.guard(stage, fut);
        self.tasks
            .spawn(tracker.track_future(guarded).in_current_span());
    }

    fn guard<F>(&self, stage: &'static str, fut: F) -> impl Future<Output = Option<T>> + Send + 'static
    where
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let first_error = self.first_error.clone();
        let cancel = self.cancel.clone();
        async move {
            match fut.await {
                Ok(report) => Some(report),
                Err(err) => {
                    record_failure(&first_error, &cancel, stage, err);
                    None
                }
            }
        }
    }

    /// Wait for every task, then return their reports or the first genuine error.
    pub(crate) async fn wait(mut self) -> Result<Vec<T>, PipelineError> {
        let mut reports = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(join_err) => record_failure(
                    &self.first_error,
                    &self.cancel,
                    "task",
                    PipelineError::TaskFailed(join_err),
                ),
            }
        }

        let first = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match first {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }
}

fn record_failure(
    first_error: &FirstError,
    cancel: &CancellationToken,
    stage: &'static str,
    err: PipelineError,
) {
    let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
    let replace = match slot.as_ref() {
        None => true,
        Some(previous) => previous.is_cancelled() && !err.is_cancelled(),
    };
    if err.is_cancelled() {
        debug!(stage, "Stage stopped by cancellation");
    } else if replace {
        error!(stage, error = %err, "Stage failed, cancelling pipeline");
    } else {
        debug!(stage, error = %err, "Stage failed after pipeline was already failing");
    }
    if replace {
        *slot = Some(err);
    }
    drop(slot);
    cancel.cancel();
}

/// Uploads files through an [`Uploader`] and commits their tokens through a [`BatchCommitter`].
pub struct UploadPipeline<U, C> {
    uploader: Arc<U>,
    committer: Arc<C>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl<U, C> UploadPipeline<U, C>
where
    U: Uploader + 'static,
    C: BatchCommitter + 'static,
{
    pub fn new(uploader: Arc<U>, committer: Arc<C>, config: PipelineConfig) -> Self {
        Self {
            uploader,
            committer,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie runs to an outer token, e.g. one cancelled on Ctrl-C or after a deadline.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels every run of this pipeline.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Upload `paths`, commit their tokens in batches, and report progress to `reporter`.
    ///
    /// Returns the first genuine error of any stage. Batches committed before a
    /// failure stay committed.
    pub async fn run<R: ProgressReporter>(
        &self,
        paths: Vec<PathBuf>,
        reporter: R,
    ) -> Result<RunSummary, PipelineError> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id);
        self.run_inner(paths, reporter).instrument(span).await
    }

    async fn run_inner<R: ProgressReporter>(
        &self,
        paths: Vec<PathBuf>,
        reporter: R,
    ) -> Result<RunSummary, PipelineError> {
        info!(
            files = paths.len(),
            concurrency = self.config.concurrency,
            max_batch_size = self.config.max_batch_size,
            "Pipeline starting"
        );

        // A failing run must not cancel the caller's token.
        let cancel = self.cancel.child_token();
        let (path_tx, path_rx) = async_channel::bounded(1);
        let (token_tx, token_rx) = mpsc::channel(self.config.token_buffer());
        let (message_tx, message_rx) = mpsc::channel(1);

        let reporter_task = tokio::spawn(run_reporter(message_rx, reporter).in_current_span());

        let mut group = TaskGroup::new(cancel.clone());

        let batcher = Batcher::new(
            self.committer.clone(),
            self.config.max_batch_size,
            self.config.retry.clone(),
            token_rx,
            message_tx.clone(),
            cancel.clone(),
        );
        group.spawn("batcher", async move { batcher.run().await.map(StageReport::Batcher) });

        WorkerPool::new(
            self.uploader.clone(),
            self.config.concurrency,
            self.config.retry.clone(),
        )
        .spawn(&mut group, path_rx, token_tx, message_tx.clone());

        group.spawn("source", {
            let cancel = cancel.clone();
            async move {
                feed_paths(paths, path_tx, cancel)
                    .await
                    .map(|queued| StageReport::Source { queued })
            }
        });

        let outcome = group.wait().await;

        // Every producer is gone now; closing the stream lets the reporter finish.
        drop(message_tx);
        let messages_reported = match reporter_task.await {
            Ok(reported) => reported,
            Err(join_err) => {
                error!(error = %join_err, "Progress reporter task failed");
                0
            }
        };

        let reports = match outcome {
            Ok(reports) => reports,
            Err(err) => {
                info!(error = %err, "Pipeline finished with error");
                return Err(err);
            }
        };

        let mut summary = RunSummary {
            messages_reported,
            ..RunSummary::default()
        };
        for report in reports {
            match report {
                StageReport::Worker { uploaded } => summary.files_uploaded += uploaded,
                StageReport::Batcher(stats) => {
                    summary.batches_committed = stats.batches;
                    summary.tokens_committed = stats.tokens;
                }
                StageReport::Source { queued } => debug!(queued, "Source finished"),
                StageReport::PoolDrained => {}
            }
        }

        info!(
            files_uploaded = summary.files_uploaded,
            batches_committed = summary.batches_committed,
            tokens_committed = summary.tokens_committed,
            "Pipeline finished"
        );
        Ok(summary)
    }
}
