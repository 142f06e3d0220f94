#![doc = "gphotos-upload-core: the concurrent upload-and-commit pipeline behind gphotos-upload."]

//! This crate holds the pipeline and nothing that talks to the network:
//! the two remote calls are injected through the [`contract`] traits.
//!
//! # Usage
//! Build an [`UploadPipeline`] from an [`Uploader`] and a [`BatchCommitter`],
//! then call [`UploadPipeline::run`] with the files to upload and a
//! [`ProgressReporter`].

pub mod batcher;
pub mod config;
pub mod contract;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod source;
mod worker;

pub use batcher::BatchStats;
pub use config::PipelineConfig;
pub use contract::{
    BatchCommitter, ByteStream, CallError, UploadToken, Uploader, MAX_TOKENS_PER_COMMIT,
};
pub use error::PipelineError;
pub use pipeline::{RunSummary, UploadPipeline};
pub use progress::{ProgressMessage, ProgressReporter, StdoutReporter, TracingReporter};
pub use retry::{retry, RetryError, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
