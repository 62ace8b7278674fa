//! Cooperative operator-initiated shutdown
//!
//! The monitor polls [`Interrupter::stop_requested`] once per pulse. Every
//! implementation latches: once it has answered `true` it keeps answering
//! `true` for the rest of the run.

use crate::config::InterrupterConfig;
use crate::BatchError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stop-request predicate polled by the timeout monitor
pub trait Interrupter: Send {
    fn stop_requested(&self) -> bool;
}

/// Never requests a stop
#[derive(Debug, Clone, Default)]
pub struct NeverInterrupt;

impl Interrupter for NeverInterrupt {
    fn stop_requested(&self) -> bool {
        false
    }
}

/// Requests a stop once a flag is raised; the handle can be cloned freely
#[derive(Debug, Clone, Default)]
pub struct FlagInterrupter {
    flag: Arc<AtomicBool>,
}

impl FlagInterrupter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl Interrupter for FlagInterrupter {
    fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Requests a stop when a file appears at a given path
#[derive(Debug)]
pub struct StopFileInterrupter {
    path: PathBuf,
    latched: AtomicBool,
}

impl StopFileInterrupter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            latched: AtomicBool::new(false),
        }
    }
}

impl Interrupter for StopFileInterrupter {
    fn stop_requested(&self) -> bool {
        if self.latched.load(Ordering::SeqCst) {
            return true;
        }
        if self.path.exists() {
            tracing::info!("Stop file {} found", self.path.display());
            self.latched.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }
}

/// Installs a SIGINT/SIGTERM handler that raises a stop flag
///
/// The handler is process-wide and can only be installed once.
pub fn signal_interrupter() -> Result<FlagInterrupter, BatchError> {
    let interrupter = FlagInterrupter::new();
    let handle = interrupter.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, draining in-flight work...");
        handle.request_stop();
    })
    .map_err(|e| BatchError::Signal(e.to_string()))?;
    Ok(interrupter)
}

/// Builds the configured interrupter
pub fn build_interrupter(config: &InterrupterConfig) -> Result<Box<dyn Interrupter>, BatchError> {
    Ok(match config {
        InterrupterConfig::None => Box::new(NeverInterrupt),
        InterrupterConfig::StopFile { path } => Box::new(StopFileInterrupter::new(path.clone())),
        InterrupterConfig::Signal => Box::new(signal_interrupter()?),
    })
}
