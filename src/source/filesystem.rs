//! Recursive directory walk over a corpus root

use crate::source::{Resource, ResourceIter, ResourceSource, SourceError};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Enumerates regular files below a root directory
///
/// Resource ids are paths relative to the root with `/` separators, so they
/// stay stable when the corpus is mounted somewhere else between runs.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    root: PathBuf,
    follow_links: bool,
    /// Lower-cased, without leading dots
    extensions: Vec<String>,
}

impl FilesystemSource {
    pub fn new(root: PathBuf, follow_links: bool, extensions: &[String]) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Self {
            root,
            follow_links,
            extensions,
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|wanted| *wanted == ext)
            })
            .unwrap_or(false)
    }

    fn to_resource(&self, entry: &DirEntry) -> Resource {
        let relative = entry
            .path()
            .strip_prefix(&self.root)
            .unwrap_or_else(|_| entry.path());
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let resource = Resource::new(id, entry.path());
        match entry.metadata() {
            Ok(metadata) => resource.with_size_hint(metadata.len()),
            Err(_) => resource,
        }
    }
}

impl ResourceSource for FilesystemSource {
    fn scan(&self) -> Result<ResourceIter<'_>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::Unavailable {
                location: self.root.display().to_string(),
                reason: "not a readable directory".to_string(),
            });
        }

        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter();

        let iter = walker.filter_map(move |entry| match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && self.accepts(entry.path()) {
                    Some(Ok(self.to_resource(&entry)))
                } else {
                    None
                }
            }
            Err(err) => {
                let location = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| self.root.display().to_string());
                Some(Err(SourceError::Entry {
                    location,
                    reason: err.to_string(),
                }))
            }
        });

        Ok(Box::new(iter))
    }

    fn describe(&self) -> String {
        format!("filesystem walk of {}", self.root.display())
    }
}
