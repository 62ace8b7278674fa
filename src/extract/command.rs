//! External program invoked once per resource

use crate::extract::{CancelSignal, ExtractError, Extracted, Extractor};
use crate::source::Resource;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

/// How often the child is polled for exit and the cancel signal re-checked
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Bytes of stderr kept for the failure detail
const STDERR_TAIL: usize = 2048;

/// Runs `program args...` with `{}` replaced by the resource path
///
/// Exit code 0 is success; codes listed in `no_restart_exit_codes` mean the
/// environment is broken; any other exit is a recoverable failure. A raised
/// cancel signal kills the child, which makes this extractor the one variant
/// whose hangs can be ended in-process.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    no_restart_exit_codes: Vec<i32>,
}

impl CommandExtractor {
    pub fn new(program: String, args: Vec<String>, no_restart_exit_codes: Vec<i32>) -> Self {
        Self {
            program,
            args,
            no_restart_exit_codes,
        }
    }

    fn build_command(&self, resource: &Resource) -> Command {
        let path = resource.locator.to_string_lossy();
        let mut command = Command::new(&self.program);
        let mut substituted = false;
        for arg in &self.args {
            if arg.contains("{}") {
                substituted = true;
            }
            command.arg(arg.replace("{}", &path));
        }
        if !substituted {
            command.arg(resource.locator.as_os_str());
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }

    fn classify(
        &self,
        resource: &Resource,
        status: ExitStatus,
        stderr: String,
    ) -> Result<Extracted, ExtractError> {
        if status.success() {
            return Ok(Extracted::default());
        }

        let detail = if stderr.trim().is_empty() {
            format!("{} exited with {}", self.program, status)
        } else {
            format!("{} exited with {}: {}", self.program, status, stderr.trim())
        };

        match status.code() {
            Some(code) if self.no_restart_exit_codes.contains(&code) => {
                Err(ExtractError::no_restart(resource, detail))
            }
            _ => Err(ExtractError::recoverable(resource, detail)),
        }
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, resource: &Resource, cancel: &CancelSignal) -> Result<Extracted, ExtractError> {
        let mut child = match self.build_command(resource).spawn() {
            Ok(child) => child,
            // Every resource would fail the same way
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                return Err(ExtractError::no_restart(
                    resource,
                    format!("cannot start {}: {}", self.program, e),
                ))
            }
            Err(e) => {
                return Err(ExtractError::recoverable(
                    resource,
                    format!("cannot start {}: {}", self.program, e),
                ))
            }
        };

        let stderr_reader = spawn_stderr_reader(&mut child);

        let status = loop {
            if cancel.is_raised() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExtractError::Cancelled {
                    resource: resource.id.clone(),
                });
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(ExtractError::recoverable(
                        resource,
                        format!("waiting on {} failed: {}", self.program, e),
                    ));
                }
            }
        };

        // A grandchild may still hold stderr open after the child exited
        let stderr = match stderr_reader {
            Some(tail) => match wait_for_stderr(&tail, cancel) {
                Some(stderr) => stderr,
                None => {
                    return Err(ExtractError::Cancelled {
                        resource: resource.id.clone(),
                    })
                }
            },
            None => String::new(),
        };

        self.classify(resource, status, stderr)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Drains the child's stderr so it can never block on a full pipe
///
/// The tail arrives on the returned channel once the pipe closes.
fn spawn_stderr_reader(child: &mut Child) -> Option<Receiver<String>> {
    let mut stderr = child.stderr.take()?;
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("extract-stderr".to_string())
        .spawn(move || {
            let mut buffer = Vec::new();
            let _ = stderr.read_to_end(&mut buffer);
            let start = buffer.len().saturating_sub(STDERR_TAIL);
            let _ = tx.send(String::from_utf8_lossy(&buffer[start..]).into_owned());
        })
        .ok()?;
    Some(rx)
}

/// Waits for the stderr tail; returns `None` if cancelled first
fn wait_for_stderr(tail: &Receiver<String>, cancel: &CancelSignal) -> Option<String> {
    loop {
        if cancel.is_raised() {
            return None;
        }
        match tail.recv_timeout(POLL_INTERVAL) {
            Ok(stderr) => return Some(stderr),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Some(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str, no_restart: Vec<i32>) -> CommandExtractor {
        CommandExtractor::new(
            "sh".to_string(),
            vec!["-c".to_string(), script.to_string(), "extract".to_string(), "{}".to_string()],
            no_restart,
        )
    }

    #[test]
    fn test_success() {
        let extractor = sh("test -n \"$1\"", vec![]);
        let resource = Resource::new("a", "/tmp/a.pdf");
        assert!(extractor.extract(&resource, &CancelSignal::new()).is_ok());
    }

    #[test]
    fn test_nonzero_exit_is_recoverable_with_stderr() {
        let extractor = sh("echo broken pdf >&2; exit 3", vec![]);
        let resource = Resource::new("a", "/tmp/a.pdf");

        match extractor.extract(&resource, &CancelSignal::new()) {
            Err(ExtractError::Recoverable { detail, .. }) => assert!(detail.contains("broken pdf")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_listed_exit_code_is_no_restart() {
        let extractor = sh("exit 42", vec![42]);
        let resource = Resource::new("a", "/tmp/a.pdf");

        let err = extractor
            .extract(&resource, &CancelSignal::new())
            .unwrap_err();
        assert!(err.is_no_restart());
    }

    #[test]
    fn test_missing_program_is_no_restart() {
        let extractor = CommandExtractor::new(
            "/nonexistent/extractor-binary".to_string(),
            vec![],
            vec![],
        );
        let resource = Resource::new("a", "/tmp/a.pdf");

        let err = extractor
            .extract(&resource, &CancelSignal::new())
            .unwrap_err();
        assert!(err.is_no_restart());
    }

    #[test]
    fn test_cancel_kills_hung_child() {
        let extractor = sh("sleep 30", vec![]);
        let resource = Resource::new("a", "/tmp/a.pdf");
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.raise();
        });

        let started = Instant::now();
        let err = extractor.extract(&resource, &cancel).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, ExtractError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancel_reaches_wait_on_inherited_stderr() {
        // The background sleep keeps stderr open after sh exits
        let extractor = sh("sleep 5 & exit 0", vec![]);
        let resource = Resource::new("a", "/tmp/a.pdf");
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            trigger.raise();
        });

        let started = Instant::now();
        let err = extractor.extract(&resource, &cancel).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, ExtractError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
