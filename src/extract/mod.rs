//! Content extraction capabilities
//!
//! The supervisor treats the extractor as an untrusted black box: it may
//! return, fail, block forever, or take the whole process down. The only
//! contract is the tagged result: a recoverable failure costs one resource, a
//! [`ExtractError::NoRestart`] failure stops the batch and tells the relaunch
//! loop not to try again.

mod command;
mod digest;

pub use command::CommandExtractor;
pub use digest::DigestExtractor;

use crate::config::ExtractorConfig;
use crate::source::Resource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Best-effort cancellation request for one in-flight extraction
///
/// Raised by the timeout monitor when it abandons a worker. Extractors that
/// can stop early should poll it; ones that cannot are left running and the
/// process-level watchdog is the backstop.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Successful extraction result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Short summary recorded in the result sink
    pub detail: Option<String>,
}

impl Extracted {
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
        }
    }
}

/// Failure classes the extraction capability can report
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Domain-level failure for this resource only
    #[error("extraction failed for {resource}: {detail}")]
    Recoverable { resource: String, detail: String },

    /// The run environment is compromised; neither continuing nor relaunching is safe
    #[error("environment unusable while processing {resource}: {detail}")]
    NoRestart { resource: String, detail: String },

    /// Stopped early because the worker was abandoned
    #[error("extraction of {resource} cancelled")]
    Cancelled { resource: String },
}

impl ExtractError {
    pub fn recoverable(resource: &Resource, detail: impl Into<String>) -> Self {
        Self::Recoverable {
            resource: resource.id.clone(),
            detail: detail.into(),
        }
    }

    pub fn no_restart(resource: &Resource, detail: impl Into<String>) -> Self {
        Self::NoRestart {
            resource: resource.id.clone(),
            detail: detail.into(),
        }
    }

    pub fn is_no_restart(&self) -> bool {
        matches!(self, Self::NoRestart { .. })
    }
}

/// The content-extraction capability invoked once per resource
pub trait Extractor: Send + Sync {
    /// Processes one resource; may block for as long as it likes
    fn extract(&self, resource: &Resource, cancel: &CancelSignal) -> Result<Extracted, ExtractError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Builds the configured extractor
pub fn build_extractor(config: &ExtractorConfig) -> Arc<dyn Extractor> {
    match config {
        ExtractorConfig::Digest => Arc::new(DigestExtractor::new()),
        ExtractorConfig::Command {
            program,
            args,
            no_restart_exit_codes,
        } => Arc::new(CommandExtractor::new(
            program.clone(),
            args.clone(),
            no_restart_exit_codes.clone(),
        )),
    }
}
