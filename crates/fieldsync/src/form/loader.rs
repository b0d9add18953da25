//! Form definition loading.
//!
//! Catalog entries point either at a file (resolved against the forms
//! directory) or at an `http(s)` URL. The [`FormSource`] trait performs the
//! actual fetch so tests can substitute canned documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::FormDefinition;
use crate::config::{is_http_url, Config, FormEntry};
use crate::error::{Error, Result};

/// Where a form definition document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormLocation {
    /// Fetched over HTTP.
    Url(String),
    /// Read from the local file system.
    File(PathBuf),
}

impl FormLocation {
    /// Resolve a catalog `file` value against the forms directory.
    #[must_use]
    pub fn resolve(file: &str, base_dir: &Path) -> Self {
        if is_http_url(file) {
            Self::Url(file.to_string())
        } else {
            Self::File(base_dir.join(file))
        }
    }
}

impl std::fmt::Display for FormLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Fetches the raw text of a form definition.
#[async_trait]
pub trait FormSource: Send + Sync + std::fmt::Debug {
    /// Fetch the document at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormFetch`] if the document cannot be retrieved or
    /// the server answers with a non-success status.
    async fn fetch(&self, location: &FormLocation) -> Result<String>;
}

/// Reads files from disk and fetches URLs with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct DefaultFormSource {
    client: reqwest::Client,
}

impl DefaultFormSource {
    /// Create a source with a fresh HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FormSource for DefaultFormSource {
    async fn fetch(&self, location: &FormLocation) -> Result<String> {
        match location {
            FormLocation::Url(url) => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| Error::form_fetch(url.as_str(), e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::form_fetch(url.as_str(), format!("HTTP {status}")));
                }
                response
                    .text()
                    .await
                    .map_err(|e| Error::form_fetch(url.as_str(), e.to_string()))
            }
            FormLocation::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::form_fetch(path.display().to_string(), e.to_string())),
        }
    }
}

/// Loads form definitions named in the catalog.
#[derive(Debug)]
pub struct FormLoader {
    catalog: Vec<FormEntry>,
    base_dir: PathBuf,
    source: Box<dyn FormSource>,
}

impl FormLoader {
    /// Create a loader over `catalog`, resolving relative files against `base_dir`.
    #[must_use]
    pub fn new(
        catalog: Vec<FormEntry>,
        base_dir: impl Into<PathBuf>,
        source: impl FormSource + 'static,
    ) -> Self {
        Self {
            catalog,
            base_dir: base_dir.into(),
            source: Box::new(source),
        }
    }

    /// Create a loader from configuration using [`DefaultFormSource`].
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.forms.catalog.clone(),
            config.forms_dir(),
            DefaultFormSource::new(),
        )
    }

    /// Catalog entries in navigation order.
    #[must_use]
    pub fn catalog(&self) -> &[FormEntry] {
        &self.catalog
    }

    /// Look up a catalog entry by key.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&FormEntry> {
        self.catalog.iter().find(|entry| entry.key == key)
    }

    /// Find the catalog entry a queued submission belongs to.
    ///
    /// Matches on title first, then on key, in catalog order.
    #[must_use]
    pub fn entry_for_submission(&self, form_id: &str, form_title: &str) -> Option<&FormEntry> {
        self.catalog
            .iter()
            .find(|entry| entry.title == form_title || entry.key == form_id)
    }

    /// Resolve where the definition for `key` lives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormNotFound`] if `key` is not in the catalog.
    pub fn location(&self, key: &str) -> Result<FormLocation> {
        let entry = self.entry(key).ok_or_else(|| Error::FormNotFound {
            key: key.to_string(),
        })?;
        Ok(FormLocation::resolve(&entry.file, &self.base_dir))
    }

    /// Fetch, parse and validate the definition for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FormNotFound`] for an unknown key,
    /// [`Error::FormFetch`] if retrieval fails, and [`Error::FormParse`] if
    /// the document is not a valid definition.
    pub async fn load(&self, key: &str) -> Result<FormDefinition> {
        let location = self.location(key)?;
        debug!("Loading form '{}' from {}", key, location);

        let text = self.source.fetch(&location).await.map_err(|e| {
            warn!("Could not fetch form '{}': {}", key, e);
            e
        })?;
        FormDefinition::from_json(&location.to_string(), &text)
    }
}
