//! Human-readable progress side channel.
//!
//! Workers and the batcher push [`ProgressMessage`]s into one stream; a single
//! reporter task drains it until the coordinator closes it. Messages from
//! different producers may interleave arbitrarily.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info};

/// A completed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressMessage {
    /// One file was uploaded and its token handed to the batcher.
    Uploaded { path: PathBuf },
    /// One batch was committed.
    BatchCommitted { count: usize },
}

impl fmt::Display for ProgressMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressMessage::Uploaded { path } => write!(f, "uploaded \"{}\"", path.display()),
            ProgressMessage::BatchCommitted { count } => {
                write!(f, "uploaded batch of {count} photos")
            }
        }
    }
}

/// Renders progress messages somewhere.
pub trait ProgressReporter: Send + 'static {
    fn report(&mut self, message: ProgressMessage);
}

/// Prints every message on its own line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

impl ProgressReporter for StdoutReporter {
    fn report(&mut self, message: ProgressMessage) {
        println!("{message}");
    }
}

/// Emits every message as an `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&mut self, message: ProgressMessage) {
        info!(progress = %message, "Progress");
    }
}

/// Forwards messages to a caller-owned stream. A dropped receiver is ignored.
impl ProgressReporter for mpsc::UnboundedSender<ProgressMessage> {
    fn report(&mut self, message: ProgressMessage) {
        let _ = self.send(message);
    }
}

/// Drain `messages` into `reporter` until every sender is gone.
pub(crate) async fn run_reporter<R: ProgressReporter>(
    mut messages: mpsc::Receiver<ProgressMessage>,
    mut reporter: R,
) -> usize {
    let mut reported = 0;
    while let Some(message) = messages.recv().await {
        reporter.report(message);
        reported += 1;
    }
    debug!(reported, "Progress stream closed");
    reported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_render_like_the_cli_output() {
        let uploaded = ProgressMessage::Uploaded {
            path: PathBuf::from("photos/a.jpg"),
        };
        assert_eq!(uploaded.to_string(), "uploaded \"photos/a.jpg\"");
        assert_eq!(
            ProgressMessage::BatchCommitted { count: 50 }.to_string(),
            "uploaded batch of 50 photos"
        );
    }

    #[tokio::test]
    async fn reporter_drains_until_closed() {
        let (tx, rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let reporter = tokio::spawn(run_reporter(rx, out_tx));

        tx.send(ProgressMessage::BatchCommitted { count: 1 })
            .await
            .unwrap();
        tx.send(ProgressMessage::BatchCommitted { count: 2 })
            .await
            .unwrap();
        drop(tx);

        assert_eq!(reporter.await.unwrap(), 2);
        assert_eq!(
            out_rx.recv().await,
            Some(ProgressMessage::BatchCommitted { count: 1 })
        );
        assert_eq!(
            out_rx.recv().await,
            Some(ProgressMessage::BatchCommitted { count: 2 })
        );
    }
}
