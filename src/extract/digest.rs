//! SHA-256 content digest

use crate::extract::{CancelSignal, ExtractError, Extracted, Extractor};
use crate::source::Resource;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};

const CHUNK_SIZE: usize = 64 * 1024;

/// Reads every byte of the resource and records its SHA-256
///
/// Checks the cancellation signal between chunks.
#[derive(Debug, Clone, Default)]
pub struct DigestExtractor;

impl DigestExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for DigestExtractor {
    fn extract(&self, resource: &Resource, cancel: &CancelSignal) -> Result<Extracted, ExtractError> {
        let mut file = File::open(&resource.locator)
            .map_err(|e| ExtractError::recoverable(resource, format!("open failed: {}", e)))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;

        loop {
            if cancel.is_raised() {
                return Err(ExtractError::Cancelled {
                    resource: resource.id.clone(),
                });
            }

            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ExtractError::recoverable(
                        resource,
                        format!("read failed after {} bytes: {}", total, e),
                    ))
                }
            };

            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        Ok(Extracted::with_detail(format!(
            "sha256={} bytes={}",
            hex::encode(hasher.finalize()),
            total
        )))
    }

    fn name(&self) -> &'static str {
        "digest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_digest_of_known_content() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        let resource = Resource::new("abc", file.path());
        let extracted = DigestExtractor::new()
            .extract(&resource, &CancelSignal::new())
            .unwrap();

        assert_eq!(
            extracted.detail.as_deref(),
            Some("sha256=ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad bytes=3")
        );
    }

    #[test]
    fn test_missing_file_is_recoverable() {
        let resource = Resource::new("missing", "/nonexistent/file.bin");
        let err = DigestExtractor::new()
            .extract(&resource, &CancelSignal::new())
            .unwrap_err();

        assert!(matches!(err, ExtractError::Recoverable { .. }));
    }

    #[test]
    fn test_raised_signal_cancels() {
        let file = NamedTempFile::new().unwrap();
        let resource = Resource::new("empty", file.path());
        let cancel = CancelSignal::new();
        cancel.raise();

        let err = DigestExtractor::new().extract(&resource, &cancel).unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled { .. }));
    }
}
