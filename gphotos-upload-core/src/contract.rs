//! # contract: calling contracts for the two remote operations
//!
//! The pipeline never talks to the network itself. It drives two collaborators:
//!
//! - an [`Uploader`] that turns a file's bytes into an opaque [`UploadToken`], and
//! - a [`BatchCommitter`] that exchanges up to [`MAX_TOKENS_PER_COMMIT`] tokens for
//!   persistent records in a single call.
//!
//! Each call is a single attempt. Retrying, cancellation and batching are the
//! pipeline's job, so implementations stay small: do one request, map the
//! response, return a boxed error on anything unexpected.
//!
//! ## Mocking & Testing
//! Both traits are annotated for `mockall`; with the `test-export-mocks` feature
//! (on by default) downstream crates get `MockUploader` and `MockBatchCommitter`.

use std::fmt;

use async_trait::async_trait;
use mockall::automock;
use tokio::io::AsyncRead;

/// Hard upper bound on the number of tokens accepted by one commit call.
pub const MAX_TOKENS_PER_COMMIT: usize = 50;

/// Error returned by a single collaborator call.
pub type CallError = Box<dyn std::error::Error + Send + Sync>;

/// Byte content handed to [`Uploader::upload`].
pub type ByteStream = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Opaque handle returned by a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UploadToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Uploads the raw bytes of one file and returns the token the remote side assigned.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Perform one upload attempt of `content` under `file_name`.
    async fn upload(&self, file_name: &str, content: ByteStream) -> Result<UploadToken, CallError>;
}

/// Finalizes a batch of upload tokens into persistent records.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BatchCommitter: Send + Sync {
    /// Perform one commit attempt.
    ///
    /// Callers guarantee `tokens.len() <= MAX_TOKENS_PER_COMMIT`.
    async fn commit(&self, tokens: &[UploadToken]) -> Result<(), CallError>;
}
