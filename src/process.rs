/*!
 * Process Facade
 * Lifecycle state machine, waits, signaling and stream access
 */

use crate::config::{LaunchConfig, Redirect};
use crate::core::errors::{Error, Result};
use crate::core::types::{ExitCode, POLL_INTERVAL};
use crate::io::{lines, HandleReader, HandleWriter, SharedHandle};
use crate::spawn::{self, ChildHandle};
use futures::Stream;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
enum Lifecycle {
    Running,
    Terminated(ExitCode),
}

/// A spawned child process.
///
/// Exclusively owns the native process reference and the parent-side
/// stream handles. The lifecycle transitions exactly once from running to
/// terminated; the transition is observed through non-blocking status
/// queries and cached from then on.
#[derive(Debug)]
pub struct Process {
    config: LaunchConfig,
    child: ChildHandle,
    state: Mutex<Lifecycle>,
    stdin: Option<Arc<SharedHandle>>,
    stdout: Option<Arc<SharedHandle>>,
    stderr: Option<Arc<SharedHandle>>,
}

impl Process {
    /// Launch a child process from the given configuration.
    pub fn spawn(config: LaunchConfig) -> Result<Self> {
        let spawned = spawn::spawn(&config)?;
        Ok(Self {
            config,
            child: spawned.child,
            state: Mutex::new(Lifecycle::Running),
            stdin: spawned.stdin,
            stdout: spawned.stdout,
            stderr: spawned.stderr,
        })
    }

    /// Launch arguments used to start this process.
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// OS-level process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Check if the process is still running.
    pub fn is_alive(&self) -> Result<bool> {
        Ok(self.check_state()?.is_none())
    }

    /// Exit code of the terminated process, or `None` while it runs.
    pub fn exit_code(&self) -> Result<Option<ExitCode>> {
        self.check_state()
    }

    /// Query the lifecycle without blocking, caching the one-way
    /// transition. Reaping the native reference happens exactly once, on
    /// the transition; the stream handles are left alone since their
    /// lifetime is managed independently.
    fn check_state(&self) -> Result<Option<ExitCode>> {
        let mut state = self.state.lock();
        if let Lifecycle::Terminated(code) = *state {
            return Ok(Some(code));
        }
        match self.child.try_status()? {
            Some(code) => {
                debug!("child {} terminated with code {}", self.child.id(), code);
                *state = Lifecycle::Terminated(code);
                self.child.close();
                Ok(Some(code))
            }
            None => Ok(None),
        }
    }

    /// Wait for the process to terminate and return its exit code.
    pub async fn wait(&self) -> Result<ExitCode> {
        loop {
            if let Some(code) = self.check_state()? {
                return Ok(code);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait for the process to terminate, up to `timeout`.
    ///
    /// Deadline loop against the monotonic clock: non-blocking status
    /// check, bounded sleep, recheck. Returns `None` once the deadline
    /// passes with the child still alive.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<Option<ExitCode>> {
        if timeout.is_zero() {
            return Err(Error::config("timeout must be positive"));
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.check_state()? {
                return Ok(Some(code));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Best-effort graceful stop (SIGTERM where the platform can tell
    /// graceful from forceful). A no-op once the process terminated.
    pub fn terminate(&self) -> Result<()> {
        if self.already_terminated() {
            return Ok(());
        }
        self.child.terminate()
    }

    /// Forceful stop (SIGKILL where distinguishable). A no-op once the
    /// process terminated.
    pub fn kill(&self) -> Result<()> {
        if self.already_terminated() {
            return Ok(());
        }
        self.child.kill()
    }

    /// Send an arbitrary signal to the child.
    #[cfg(unix)]
    pub fn send_signal(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        if self.already_terminated() {
            return Ok(());
        }
        self.child.send_signal(signal)
    }

    fn already_terminated(&self) -> bool {
        matches!(*self.state.lock(), Lifecycle::Terminated(_))
    }

    /// Derive a writer for the child's stdin. `None` unless stdin was
    /// piped. Each call derives a fresh stream that counts toward the
    /// handle's release bookkeeping.
    pub fn stdin(&self) -> Result<Option<HandleWriter>> {
        match &self.stdin {
            Some(handle) => Ok(Some(handle.writer()?)),
            None => Ok(None),
        }
    }

    /// Derive a reader for the child's stdout. `None` unless stdout was
    /// piped.
    pub fn stdout(&self) -> Result<Option<HandleReader>> {
        match &self.stdout {
            Some(handle) => Ok(Some(handle.reader()?)),
            None => Ok(None),
        }
    }

    /// Derive a reader for the child's stderr. `None` unless stderr was
    /// piped.
    pub fn stderr(&self) -> Result<Option<HandleReader>> {
        match &self.stderr {
            Some(handle) => Ok(Some(handle.reader()?)),
            None => Ok(None),
        }
    }

    /// Shared stdin handle, for callers that manage streams themselves.
    pub fn stdin_handle(&self) -> Option<&Arc<SharedHandle>> {
        self.stdin.as_ref()
    }

    pub fn stdout_handle(&self) -> Option<&Arc<SharedHandle>> {
        self.stdout.as_ref()
    }

    pub fn stderr_handle(&self) -> Option<&Arc<SharedHandle>> {
        self.stderr.as_ref()
    }

    /// Close the parent side of the stdin pipe to signal end-of-input.
    /// The descriptor is released once any outstanding derived writers
    /// are dropped as well.
    pub fn close_stdin(&self) {
        if let Some(handle) = &self.stdin {
            handle.close();
        }
    }

    /// Lazy, finite stream of stdout lines. Empty if stdout wasn't piped.
    pub fn stdout_lines(&self) -> impl Stream<Item = Result<String>> + Send {
        lines(self.stdout.as_ref().and_then(|h| h.reader().ok()))
    }

    /// Lazy, finite stream of stderr lines. Empty if stderr wasn't piped.
    pub fn stderr_lines(&self) -> impl Stream<Item = Result<String>> + Send {
        lines(self.stderr.as_ref().and_then(|h| h.reader().ok()))
    }

    pub(crate) fn stdout_piped(&self) -> bool {
        self.config.stdout() == &Redirect::Pipe
    }

    pub(crate) fn stderr_piped(&self) -> bool {
        self.config.stderr() == &Redirect::Pipe
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // Owner-side close; live derived streams keep their descriptors
        // until dropped. Dropping never signals a running child.
        if let Some(handle) = &self.stdin {
            handle.close();
        }
        if let Some(handle) = &self.stdout {
            handle.close();
        }
        if let Some(handle) = &self.stderr {
            handle.close();
        }
        self.child.close();
    }
}
