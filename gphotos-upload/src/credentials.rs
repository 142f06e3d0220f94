//! Credential provider: where the bearer token for API calls comes from.
//!
//! Obtaining or refreshing an OAuth token is not this tool's job. It accepts an
//! access token either from the environment or from a JSON token file in the
//! shape the OAuth client libraries persist (`access_token`, `token_type`,
//! `refresh_token`, `expiry`).

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info};

/// Environment variable holding a ready-to-use access token.
pub const ACCESS_TOKEN_ENV: &str = "GPHOTOS_ACCESS_TOKEN";

#[derive(Debug, Deserialize)]
struct StoredToken {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
}

#[derive(Clone)]
pub struct Credentials {
    access_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn from_env() -> Result<Self> {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => {
                info!("{ACCESS_TOKEN_ENV} found in env");
                Ok(Self::new(token.trim()))
            }
            Ok(_) => anyhow::bail!("{ACCESS_TOKEN_ENV} is set but empty"),
            Err(e) => {
                error!(error = ?e, "{ACCESS_TOKEN_ENV} environment variable not set");
                Err(anyhow::anyhow!(
                    "no credentials: pass --token-file or set {ACCESS_TOKEN_ENV}"
                ))
            }
        }
    }

    pub fn from_token_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to load token from file {path:?}"))?;
        let stored: StoredToken = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse token file {path:?}"))?;
        if stored.access_token.is_empty() {
            anyhow::bail!("token file {path:?} has an empty access_token");
        }
        if let Some(token_type) = stored.token_type.as_deref() {
            if !token_type.eq_ignore_ascii_case("bearer") {
                anyhow::bail!("token file {path:?} holds an unsupported token type {token_type:?}");
            }
        }
        info!(token_file = ?path, expiry = ?stored.expiry, "Loaded access token from file");
        Ok(Self::new(stored.access_token))
    }

    /// A token file, when given, wins over the environment.
    pub fn resolve(token_file: Option<&Path>) -> Result<Self> {
        match token_file {
            Some(path) => Self::from_token_file(path),
            None => Self::from_env(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn token_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_oauth_token_file() {
        let file = token_file(
            r#"{"access_token":"ya29.abc","token_type":"Bearer","refresh_token":"1//r","expiry":"2020-01-01T00:00:00Z"}"#,
        );
        let creds = Credentials::from_token_file(file.path()).unwrap();
        assert_eq!(creds.access_token(), "ya29.abc");
    }

    #[test]
    fn rejects_non_bearer_tokens() {
        let file = token_file(r#"{"access_token":"abc","token_type":"MAC"}"#);
        assert!(Credentials::from_token_file(file.path()).is_err());
    }

    #[test]
    fn malformed_token_file_is_an_error() {
        let file = token_file("not json");
        let err = Credentials::from_token_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse token file"));
    }

    #[test]
    fn debug_output_hides_the_token() {
        let creds = Credentials::new("secret-value");
        assert!(!format!("{creds:?}").contains("secret-value"));
    }
}
