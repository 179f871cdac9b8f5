/*!
 * One-Shot Execution
 * Chainable builder that spawns, communicates and optionally checks
 */

use crate::communicate::CommunicateResult;
use crate::config::{LaunchConfigBuilder, Redirect};
use crate::core::errors::{Error, Result};
use crate::process::Process;
use std::path::PathBuf;
use std::time::Duration;

/// Run a command to completion in one expression.
///
/// ```no_run
/// # use subspawn::Exec;
/// # async fn demo() -> subspawn::Result<()> {
/// let result = Exec::cmd("sort")
///     .arg("-r")
///     .input("b\na\nc\n")
///     .check(true)
///     .run()
///     .await?;
/// assert_eq!(result.output, "c\nb\na\n");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Exec {
    config: LaunchConfigBuilder,
    input: String,
    timeout: Option<Duration>,
    kill_timeout: Option<Duration>,
    check: bool,
}

impl Exec {
    /// Start building a command invocation for `program`.
    pub fn cmd(program: impl Into<String>) -> Self {
        let mut exec = Self::default();
        exec.config.arg(program);
        exec
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.arg(arg);
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args(args);
        self
    }

    /// Set the child's working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.current_dir(dir);
        self
    }

    /// Set one environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env(key, value);
        self
    }

    /// Set several environment variables for the child.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.config.envs(vars);
        self
    }

    /// Remove one variable from the child's environment.
    pub fn env_remove(mut self, key: &str) -> Self {
        self.config.env_remove(key);
        self
    }

    /// Start the child from an empty environment.
    pub fn env_clear(mut self) -> Self {
        self.config.env_clear();
        self
    }

    /// Redirect stdin. Defaults to a pipe fed from [`input`](Self::input).
    pub fn stdin(mut self, redirect: Redirect) -> Self {
        self.config.stdin(redirect);
        self
    }

    /// Redirect stdout. Defaults to a captured pipe.
    pub fn stdout(mut self, redirect: Redirect) -> Self {
        self.config.stdout(redirect);
        self
    }

    /// Redirect stderr. Defaults to a captured pipe.
    pub fn stderr(mut self, redirect: Redirect) -> Self {
        self.config.stderr(redirect);
        self
    }

    /// Route the child's stderr into its stdout.
    pub fn merge_stderr(mut self) -> Self {
        self.config.merge_stderr();
        self
    }

    /// Text to feed the child's stdin before closing it.
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    /// Give up on the child after this long, terminating it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Grace period between terminate and kill when the timeout fires.
    /// Zero kills immediately.
    pub fn kill_timeout(mut self, kill_timeout: Duration) -> Self {
        self.kill_timeout = Some(kill_timeout);
        self
    }

    /// Turn a non-zero exit code into [`Error::AbnormalExit`].
    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    /// Spawn the process, exchange streams and wait for termination.
    pub async fn run(self) -> Result<CommunicateResult> {
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(Error::config("timeout must be positive"));
            }
        }
        let config = self.config.build()?;
        let process = Process::spawn(config)?;
        let result = process
            .communicate(&self.input, self.timeout, self.kill_timeout)
            .await?;
        if self.check {
            return result.check();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let err = Exec::cmd("true")
            .timeout(Duration::ZERO)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = Exec::default().run().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
