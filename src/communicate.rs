/*!
 * Communicate Orchestration
 * Deadlock-free stdin/stdout/stderr exchange with timeout escalation
 */

use crate::core::errors::{Error, Result};
use crate::core::types::ExitCode;
use crate::io::SharedHandle;
use crate::process::Process;
use log::{debug, warn};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Result tuple of [`Process::communicate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicateResult {
    /// Process exit code. 0 if the process terminated normally.
    pub exit_code: ExitCode,
    /// Captured stdout, or empty if stdout wasn't a pipe.
    pub output: String,
    /// Captured stderr, or empty if stderr wasn't a pipe.
    pub errors: String,
}

impl CommunicateResult {
    /// Check that the process exited normally (code 0); otherwise raise
    /// [`Error::AbnormalExit`] carrying the full result.
    pub fn check(self) -> Result<Self> {
        if self.exit_code != 0 {
            return Err(Error::AbnormalExit(self));
        }
        Ok(self)
    }
}

/// Drain one piped output stream to end-of-stream on the blocking pool.
/// Running drains keep the kernel pipe buffer emptying while the parent
/// does other work, which is what breaks the classic full-pipe deadlock.
fn start_drain(handle: &Arc<SharedHandle>) -> io::Result<JoinHandle<io::Result<String>>> {
    let mut reader = handle.reader()?;
    Ok(tokio::task::spawn_blocking(move || {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }))
}

async fn join_drain(task: Option<JoinHandle<io::Result<String>>>) -> Result<String> {
    match task {
        None => Ok(String::new()),
        Some(task) => match task.await {
            Ok(text) => Ok(text?),
            Err(e) => Err(Error::runtime(
                "output drain task failed",
                io::Error::new(io::ErrorKind::Other, e),
            )),
        },
    }
}

impl Process {
    /// Communicate with the process and wait for its termination.
    ///
    /// If stdin is a pipe, `input` is written to it and stdin is closed to
    /// signal end-of-input. Piped stdout/stderr are drained concurrently,
    /// and the drains always start before any wait, so parent and child
    /// can never both block on a full pipe buffer.
    ///
    /// With a `timeout`, a child that does not finish in time is
    /// terminated; after `kill_timeout` more it is killed. A zero
    /// `kill_timeout` skips the graceful attempt and kills directly.
    ///
    /// Dropping the returned future cancels the drains but never signals
    /// the child; call [`terminate`](Process::terminate) or
    /// [`kill`](Process::kill) explicitly for that.
    pub async fn communicate(
        &self,
        input: &str,
        timeout: Option<Duration>,
        kill_timeout: Option<Duration>,
    ) -> Result<CommunicateResult> {
        // start output collectors before anything can block
        let stdout_task = match self.stdout_handle() {
            Some(handle) if self.stdout_piped() => Some(start_drain(handle)?),
            _ => None,
        };
        let stderr_task = match self.stderr_handle() {
            Some(handle) if self.stderr_piped() => Some(start_drain(handle)?),
            _ => None,
        };

        // push out the input and close stdin to notify the child
        if let Some(handle) = self.stdin_handle() {
            let mut writer = handle.writer()?;
            let payload = input.as_bytes().to_vec();
            tokio::task::spawn_blocking(move || -> io::Result<()> {
                writer.write_all(&payload)?;
                Ok(())
            })
            .await
            .map_err(|e| {
                Error::runtime(
                    "stdin writer task failed",
                    io::Error::new(io::ErrorKind::Other, e),
                )
            })??;
            self.close_stdin();
        }

        // wait with timeout if requested, escalating terminate -> kill
        if let Some(timeout) = timeout {
            if self.wait_timeout(timeout).await?.is_none() {
                match kill_timeout {
                    Some(kill_timeout) if kill_timeout.is_zero() => {
                        warn!("child {} outlived its timeout, killing", self.id());
                        self.kill()?;
                    }
                    Some(kill_timeout) => {
                        warn!("child {} outlived its timeout, terminating", self.id());
                        self.terminate()?;
                        if self.wait_timeout(kill_timeout).await?.is_none() {
                            warn!("child {} ignored terminate, killing", self.id());
                            self.kill()?;
                        }
                    }
                    None => {
                        warn!("child {} outlived its timeout, terminating", self.id());
                        self.terminate()?;
                    }
                }
            }
        }

        // wait for the process to actually die
        let exit_code = self.wait().await?;
        debug!("child {} exited with code {}", self.id(), exit_code);

        // the child closed its pipe ends at or before exit, so the drains
        // finish on their own
        let output = join_drain(stdout_task).await?;
        let errors = join_drain(stderr_task).await?;

        Ok(CommunicateResult {
            exit_code,
            output,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_zero_exit() {
        let result = CommunicateResult {
            exit_code: 0,
            output: "out".into(),
            errors: String::new(),
        };
        assert_eq!(result.clone().check().unwrap(), result);
    }

    #[test]
    fn check_raises_on_nonzero_exit() {
        let result = CommunicateResult {
            exit_code: 3,
            output: String::new(),
            errors: "boom".into(),
        };
        match result.check() {
            Err(Error::AbnormalExit(r)) => assert_eq!(r.exit_code, 3),
            other => panic!("expected AbnormalExit, got {other:?}"),
        }
    }
}
