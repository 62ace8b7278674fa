//! Resource sources
//!
//! A source produces a lazy, sequential, restartable-from-scratch enumeration
//! of resources. Every process incarnation re-scans from the beginning; the
//! crawler consults the result sink to skip what earlier incarnations finished.
//!
//! Sources are a closed set selected by [`SourceConfig`] and built by
//! [`build_source`].

mod filesystem;
mod list;

pub use filesystem::FilesystemSource;
pub use list::ListSource;

use crate::config::SourceConfig;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    /// Stable identifier, unique within a source and across incarnations
    pub id: String,

    /// Where the extraction capability finds the content
    pub locator: PathBuf,

    /// Size in bytes, when cheaply known
    pub size_hint: Option<u64>,
}

impl Resource {
    pub fn new(id: impl Into<String>, locator: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }
}

/// Errors raised while enumerating resources
#[derive(Debug, Error)]
pub enum SourceError {
    /// The enumeration could not start at all
    #[error("Cannot open source {location}: {reason}")]
    Unavailable { location: String, reason: String },

    /// A single entry could not be read; enumeration continues
    #[error("Failed to read entry {location}: {reason}")]
    Entry { location: String, reason: String },
}

/// Iterator over resources, with per-item errors
pub type ResourceIter<'a> = Box<dyn Iterator<Item = Result<Resource, SourceError>> + Send + 'a>;

/// Enumerates resources for the crawler
pub trait ResourceSource: Send {
    /// Starts a fresh enumeration from the beginning
    fn scan(&self) -> Result<ResourceIter<'_>, SourceError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Vec-backed source, mostly useful for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    resources: Vec<Resource>,
}

impl StaticSource {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }
}

impl ResourceSource for StaticSource {
    fn scan(&self) -> Result<ResourceIter<'_>, SourceError> {
        Ok(Box::new(self.resources.iter().cloned().map(Ok::<Resource, SourceError>)))
    }

    fn describe(&self) -> String {
        format!("static list of {} resources", self.resources.len())
    }
}

/// Builds the configured resource source
pub fn build_source(config: &SourceConfig) -> Box<dyn ResourceSource> {
    match config {
        SourceConfig::Filesystem {
            root,
            follow_links,
            extensions,
        } => Box::new(FilesystemSource::new(root.clone(), *follow_links, extensions)),
        SourceConfig::List { path, dedupe } => {
            Box::new(ListSource::new(path.clone()).with_dedupe(*dedupe))
        }
    }
}
