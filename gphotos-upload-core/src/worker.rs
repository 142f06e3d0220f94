//! Worker pool: N tasks draining the shared path stream and uploading each file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_channel::Receiver;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::contract::{CallError, UploadToken, Uploader};
use crate::error::PipelineError;
use crate::pipeline::{send_or_cancel, StageReport, TaskGroup};
use crate::progress::ProgressMessage;
use crate::retry::{retry, RetryError, RetryPolicy};

/// Fixed-size set of upload workers.
pub(crate) struct WorkerPool<U> {
    uploader: Arc<U>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl<U: Uploader + 'static> WorkerPool<U> {
    pub(crate) fn new(uploader: Arc<U>, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            uploader,
            concurrency,
            retry,
        }
    }

    /// Spawn the workers into `group`, plus one task that closes the token
    /// stream once every worker has been joined.
    pub(crate) fn spawn(
        self,
        group: &mut TaskGroup<StageReport>,
        paths: Receiver<PathBuf>,
        tokens: mpsc::Sender<UploadToken>,
        messages: mpsc::Sender<ProgressMessage>,
    ) {
        let cancel = group.cancellation_token().clone();
        let tracker = TaskTracker::new();

        for id in 0..self.concurrency {
            let worker = Worker {
                id,
                uploader: self.uploader.clone(),
                retry: self.retry.clone(),
                paths: paths.clone(),
                tokens: tokens.clone(),
                messages: messages.clone(),
                cancel: cancel.clone(),
            };
            group.spawn_tracked(&tracker, "worker", worker.run());
        }
        tracker.close();
        drop(paths);

        let concurrency = self.concurrency;
        group.spawn("pool", async move {
            tracker.wait().await;
            drop(tokens);
            debug!(concurrency, "[pool] All workers joined, token stream closed");
            Ok(StageReport::PoolDrained)
        });
    }
}

pub(crate) struct Worker<U> {
    id: usize,
    uploader: Arc<U>,
    retry: RetryPolicy,
    paths: Receiver<PathBuf>,
    tokens: mpsc::Sender<UploadToken>,
    messages: mpsc::Sender<ProgressMessage>,
    cancel: CancellationToken,
}

impl<U: Uploader + 'static> Worker<U> {
    async fn run(self) -> Result<StageReport, PipelineError> {
        let mut uploaded = 0;

        loop {
            let path = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                next = self.paths.recv() => match next {
                    Ok(path) => path,
                    Err(_) => break,
                },
            };

            let token = self.upload(&path).await?;
            debug!(worker = self.id, path = %path.display(), "[worker] Uploaded file");

            send_or_cancel(&self.tokens, token, &self.cancel).await?;
            send_or_cancel(
                &self.messages,
                ProgressMessage::Uploaded { path },
                &self.cancel,
            )
            .await?;
            uploaded += 1;
        }

        info!(worker = self.id, uploaded, "[worker] Path stream exhausted");
        Ok(StageReport::Worker { uploaded })
    }

    /// Open `path` once (not retried), then upload it under its base name with retries.
    async fn upload(&self, path: &Path) -> Result<UploadToken, PipelineError> {
        let file = File::open(path).await.map_err(|source| PipelineError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = upload_name(path);

        let mut first_handle = Some(file);
        let result = retry(&self.retry, &self.cancel, "upload", || {
            let handle = first_handle.take();
            let uploader = self.uploader.clone();
            let file_name = file_name.clone();
            let path = path.to_path_buf();
            async move {
                let file = match handle {
                    Some(file) => file,
                    None => match File::open(&path).await {
                        Ok(file) => file,
                        Err(err) => return Err(CallError::from(err)),
                    },
                };
                uploader.upload(&file_name, Box::new(file)).await
            }
        })
        .await;

        result.map_err(|err| match err {
            RetryError::Exhausted { attempts, source } => PipelineError::Upload {
                path: path.to_path_buf(),
                attempts,
                source,
            },
            RetryError::Cancelled => PipelineError::Cancelled,
        })
    }
}

/// Name a file is uploaded under: its base name, or the whole path if it has none.
pub(crate) fn upload_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
