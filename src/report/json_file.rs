use crate::report::{ReportError, StatusReporter, StatusSnapshot};
use std::fs;
use std::path::PathBuf;

/// Writes the latest snapshot as JSON to a fixed path
///
/// The snapshot is written to a sibling temp file and renamed into place so a
/// reader never sees a partially written document.
#[derive(Debug)]
pub struct JsonFileReporter {
    path: PathBuf,
    temp_path: PathBuf,
}

impl JsonFileReporter {
    pub fn new(path: PathBuf) -> Self {
        let mut temp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "status.json".into());
        temp_name.push(".tmp");
        let temp_path = path.with_file_name(temp_name);

        Self { path, temp_path }
    }
}

impl StatusReporter for JsonFileReporter {
    fn report(&mut self, snapshot: &StatusSnapshot) -> Result<(), ReportError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&self.temp_path, body)?;
        fs::rename(&self.temp_path, &self.path)?;
        Ok(())
    }
}
