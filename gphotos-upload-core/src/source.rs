//! Path source: feeds the static input list into the worker pool's shared stream.

use std::path::PathBuf;

use async_channel::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Send every path in input order, then close the stream.
///
/// Returns the number of paths emitted. Stops with [`PipelineError::Cancelled`]
/// as soon as `cancel` fires or no worker is left to receive.
pub async fn feed_paths(
    paths: Vec<PathBuf>,
    tx: Sender<PathBuf>,
    cancel: CancellationToken,
) -> Result<usize, PipelineError> {
    let total = paths.len();
    let mut emitted = 0;

    for path in paths {
        debug!(path = %path.display(), "[source] Queueing path");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(emitted, total, "[source] Cancelled before all paths were queued");
                return Err(PipelineError::Cancelled);
            }
            sent = tx.send(path) => {
                if sent.is_err() {
                    debug!(emitted, total, "[source] No workers left, stopping");
                    return Err(PipelineError::Cancelled);
                }
            }
        }
        emitted += 1;
    }

    tx.close();
    info!(emitted, "[source] All paths queued");
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_in_order_then_closes() {
        let (tx, rx) = async_channel::bounded(1);
        let cancel = CancellationToken::new();
        let paths: Vec<PathBuf> = ["a.jpg", "b.jpg", "c.jpg"].iter().map(PathBuf::from).collect();

        let feeder = tokio::spawn(feed_paths(paths.clone(), tx, cancel));

        let mut received = Vec::new();
        while let Ok(path) = rx.recv().await {
            received.push(path);
        }

        assert_eq!(received, paths);
        assert_eq!(feeder.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_input_closes_immediately() {
        let (tx, rx) = async_channel::bounded::<PathBuf>(1);
        let emitted = feed_paths(Vec::new(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(emitted, 0);
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn stops_when_cancelled_while_blocked() {
        let (tx, rx) = async_channel::bounded(1);
        let cancel = CancellationToken::new();
        let paths = vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")];

        let feeder = tokio::spawn(feed_paths(paths, tx, cancel.clone()));
        // The first path fills the buffer; the second send blocks until cancellation.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let result = feeder.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(rx.recv().await.ok(), Some(PathBuf::from("a")));
    }
}
