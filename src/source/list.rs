//! Resources listed one per line in a text file

use crate::source::{Resource, ResourceIter, ResourceSource, SourceError};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Reads resource paths from a list file
///
/// Blank lines and lines starting with `#` are ignored. Relative paths are
/// resolved against the directory containing the list.
///
/// With de-duplication on (the default) a path listed twice is enumerated
/// once, at the cost of holding every distinct entry in memory until the scan
/// ends. Very large lists that are known to be unique can turn it off.
#[derive(Debug, Clone)]
pub struct ListSource {
    path: PathBuf,
    dedupe: bool,
}

impl ListSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path, dedupe: true }
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
    }
}

impl ResourceSource for ListSource {
    fn scan(&self) -> Result<ResourceIter<'_>, SourceError> {
        let file = File::open(&self.path).map_err(|e| SourceError::Unavailable {
            location: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let base = self.base_dir();
        let list_name = self.path.display().to_string();
        let mut seen: Option<HashSet<String>> = self.dedupe.then(HashSet::new);

        let iter = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(index, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        return Some(Err(SourceError::Entry {
                            location: format!("{}:{}", list_name, index + 1),
                            reason: e.to_string(),
                        }))
                    }
                };

                let entry = line.trim();
                if entry.is_empty() || entry.starts_with('#') {
                    return None;
                }
                if let Some(seen) = seen.as_mut() {
                    if !seen.insert(entry.to_string()) {
                        return None;
                    }
                }

                let locator = {
                    let candidate = PathBuf::from(entry);
                    if candidate.is_absolute() {
                        candidate
                    } else {
                        base.join(candidate)
                    }
                };

                let resource = Resource::new(entry, locator.clone());
                Some(Ok(match std::fs::metadata(&locator) {
                    Ok(metadata) => resource.with_size_hint(metadata.len()),
                    Err(_) => resource,
                }))
            });

        Ok(Box::new(iter))
    }

    fn describe(&self) -> String {
        format!("list file {}", self.path.display())
    }
}
