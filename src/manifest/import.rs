//! Import source classification and fetching
//!
//! Imports are local paths, `http(s)://` URLs, or `<repo-url>.git//<path>`
//! references into a git repository.

use crate::error::ImportError;
use reqwest::blocking::Client;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Separator between a repository URL and the file inside it
const GIT_SEPARATOR: &str = ".git//";

/// Where an import entry points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// A file on disk, already resolved against the importing manifest
    Local(PathBuf),
    /// A document served over HTTP(S)
    Http(String),
    /// A file inside a git repository
    Git { repo: String, path: String },
}

impl ImportSource {
    /// Classify a raw import entry.
    ///
    /// Relative local paths are joined onto `base_dir`.
    pub fn classify(raw: &str, base_dir: &Path) -> Self {
        if let Some((repo, path)) = raw.split_once(GIT_SEPARATOR) {
            return ImportSource::Git {
                repo: format!("{}.git", repo),
                path: path.to_string(),
            };
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return ImportSource::Http(raw.to_string());
        }

        let path = Path::new(raw);
        if path.is_absolute() {
            ImportSource::Local(path.to_path_buf())
        } else {
            ImportSource::Local(base_dir.join(path))
        }
    }

    /// Identity used for import cycle detection
    pub fn key(&self) -> String {
        match self {
            ImportSource::Local(path) => path
                .canonicalize()
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
            ImportSource::Http(url) => url.clone(),
            ImportSource::Git { repo, path } => format!("{}//{}", repo, path),
        }
    }
}

/// Fetches remote import sources
pub trait ImportFetcher {
    /// Download a manifest document
    fn fetch_http(&self, url: &str) -> Result<String, ImportError>;

    /// Shallow-clone a repository into `dest`
    fn clone_repo(&self, repo: &str, dest: &Path) -> Result<(), ImportError>;
}

/// Fetcher backed by a blocking HTTP client and the `git` binary
pub struct DefaultFetcher {
    client: Client,
}

impl DefaultFetcher {
    /// Build the HTTP client once, with a per-request `timeout`
    pub fn new(timeout: Duration) -> Result<Self, ImportError> {
        let client = Client::builder()
            .user_agent("runbook")
            .timeout(timeout)
            .build()
            .map_err(|e| ImportError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ImportFetcher for DefaultFetcher {
    fn fetch_http(&self, url: &str) -> Result<String, ImportError> {
        let fetch_error = |reason: String| ImportError::Fetch {
            source_ref: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }

        response.text().map_err(|e| fetch_error(e.to_string()))
    }

    fn clone_repo(&self, repo: &str, dest: &Path) -> Result<(), ImportError> {
        tracing::debug!(repo, dest = %dest.display(), "cloning import repository");

        let output = Command::new("git")
            .args(["clone", "--depth=1", "--quiet", repo])
            .arg(dest)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ImportError::Fetch {
                source_ref: repo.to_string(),
                reason: format!("failed to run git: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImportError::Fetch {
                source_ref: repo.to_string(),
                reason: format!("git clone failed: {}", stderr.trim()),
            });
        }

        Ok(())
    }
}
