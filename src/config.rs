/*!
 * Launch Configuration
 * Redirect model and immutable process launch settings
 */

use crate::core::errors::{Error, Result};
use crate::env::Environment;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Declared intent for how a child's standard stream connects to the world.
///
/// Variant legality is stream-specific and checked when a [`LaunchConfig`]
/// is built: stdin cannot write to a file or merge, stdout/stderr cannot
/// read from a file, and only stderr may merge into stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Discard output / supply no input (null device).
    Discard,
    /// Create a pipe between parent and child.
    Pipe,
    /// Share the parent's corresponding standard stream.
    Inherit,
    /// Route stderr into the same destination as stdout (stderr only).
    MergeWithStdout,
    /// Read stdin from an existing file.
    ReadFile(PathBuf),
    /// Write stdout or stderr to a file, truncating or appending.
    WriteFile { path: PathBuf, append: bool },
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Redirect::Discard => write!(f, "discard"),
            Redirect::Pipe => write!(f, "pipe"),
            Redirect::Inherit => write!(f, "inherit"),
            Redirect::MergeWithStdout => write!(f, "merge into stdout"),
            Redirect::ReadFile(path) => write!(f, "read from {}", path.display()),
            Redirect::WriteFile { path, append } => {
                if *append {
                    write!(f, "append to {}", path.display())
                } else {
                    write!(f, "write to {}", path.display())
                }
            }
        }
    }
}

impl Redirect {
    fn check_stdin(&self) -> Result<()> {
        match self {
            Redirect::WriteFile { .. } | Redirect::MergeWithStdout => Err(Error::config(format!(
                "unsupported redirect for stdin: {self}"
            ))),
            _ => Ok(()),
        }
    }

    fn check_stdout(&self) -> Result<()> {
        match self {
            Redirect::ReadFile(_) | Redirect::MergeWithStdout => Err(Error::config(format!(
                "unsupported redirect for stdout: {self}"
            ))),
            _ => Ok(()),
        }
    }

    fn check_stderr(&self) -> Result<()> {
        match self {
            Redirect::ReadFile(_) => Err(Error::config(format!(
                "unsupported redirect for stderr: {self}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Immutable process launch arguments.
///
/// Build with [`LaunchConfig::builder`] or directly via [`LaunchConfig::new`]
/// for the all-defaults case (every stream piped, inherited environment).
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
    stdin: Redirect,
    stdout: Redirect,
    stderr: Redirect,
}

impl LaunchConfig {
    /// Create a configuration with default redirects (all pipes).
    pub fn new<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = LaunchConfigBuilder::new();
        builder.args(argv);
        builder.build()
    }

    pub fn builder() -> LaunchConfigBuilder {
        LaunchConfigBuilder::new()
    }

    /// Command line, including the executable as first element.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Child working directory, or `None` to inherit the parent's.
    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Full environment override. `None` inherits the parent environment
    /// unmodified; `Some` replaces it entirely, never merges.
    pub fn env(&self) -> Option<&HashMap<String, String>> {
        self.env.as_ref()
    }

    pub fn stdin(&self) -> &Redirect {
        &self.stdin
    }

    pub fn stdout(&self) -> &Redirect {
        &self.stdout
    }

    pub fn stderr(&self) -> &Redirect {
        &self.stderr
    }
}

/// Mutable builder for [`LaunchConfig`].
///
/// Stream legality and the non-empty argv invariant are enforced by
/// [`build`](Self::build), so an illegal combination never reaches the
/// spawn engine.
#[derive(Debug, Clone, Default)]
pub struct LaunchConfigBuilder {
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
    stdin: Option<Redirect>,
    stdout: Option<Redirect>,
    stderr: Option<Redirect>,
}

impl LaunchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one argument to the command line.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.argv.push(arg.into());
        self
    }

    /// Append multiple arguments to the command line.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the child working directory.
    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set one environment variable for the child.
    ///
    /// The first call snapshots the parent environment as the starting
    /// point, since inheriting is more common than overriding completely.
    /// Use [`env_clear`](Self::env_clear) first for a fully explicit
    /// environment.
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.touched_env().insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables for the child.
    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = self.touched_env();
        for (k, v) in vars {
            env.insert(k.into(), v.into());
        }
        self
    }

    /// Remove one variable from the child environment.
    pub fn env_remove(&mut self, key: &str) -> &mut Self {
        self.touched_env().remove(key);
        self
    }

    /// Start from an empty child environment instead of the parent's.
    pub fn env_clear(&mut self) -> &mut Self {
        self.env = Some(HashMap::new());
        self
    }

    fn touched_env(&mut self) -> &mut HashMap<String, String> {
        self.env
            .get_or_insert_with(|| Environment::current().into_vars())
    }

    /// stdin redirection, defaults to [`Redirect::Pipe`].
    pub fn stdin(&mut self, redirect: Redirect) -> &mut Self {
        self.stdin = Some(redirect);
        self
    }

    /// stdout redirection, defaults to [`Redirect::Pipe`].
    pub fn stdout(&mut self, redirect: Redirect) -> &mut Self {
        self.stdout = Some(redirect);
        self
    }

    /// stderr redirection, defaults to [`Redirect::Pipe`].
    pub fn stderr(&mut self, redirect: Redirect) -> &mut Self {
        self.stderr = Some(redirect);
        self
    }

    /// Read stdin from a file.
    pub fn stdin_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.stdin(Redirect::ReadFile(path.into()))
    }

    /// Write stdout to a file.
    pub fn stdout_file(&mut self, path: impl Into<PathBuf>, append: bool) -> &mut Self {
        self.stdout(Redirect::WriteFile {
            path: path.into(),
            append,
        })
    }

    /// Write stderr to a file.
    pub fn stderr_file(&mut self, path: impl Into<PathBuf>, append: bool) -> &mut Self {
        self.stderr(Redirect::WriteFile {
            path: path.into(),
            append,
        })
    }

    /// Route stderr into stdout's destination.
    pub fn merge_stderr(&mut self) -> &mut Self {
        self.stderr(Redirect::MergeWithStdout)
    }

    /// Validate and freeze into a [`LaunchConfig`].
    pub fn build(&self) -> Result<LaunchConfig> {
        if self.argv.is_empty() {
            return Err(Error::config("argv must have at least one element"));
        }

        let stdin = self.stdin.clone().unwrap_or(Redirect::Pipe);
        let stdout = self.stdout.clone().unwrap_or(Redirect::Pipe);
        let stderr = self.stderr.clone().unwrap_or(Redirect::Pipe);

        stdin.check_stdin()?;
        stdout.check_stdout()?;
        stderr.check_stderr()?;

        Ok(LaunchConfig {
            argv: self.argv.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            stdin,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_pipes() {
        let config = LaunchConfig::new(["cat"]).unwrap();
        assert_eq!(config.stdin(), &Redirect::Pipe);
        assert_eq!(config.stdout(), &Redirect::Pipe);
        assert_eq!(config.stderr(), &Redirect::Pipe);
        assert!(config.env().is_none());
    }

    #[test]
    fn rejects_empty_argv() {
        let err = LaunchConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn rejects_stdin_write_redirect() {
        let err = LaunchConfig::builder()
            .arg("cat")
            .stdin(Redirect::WriteFile {
                path: "out.txt".into(),
                append: false,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn rejects_stdout_merge_and_read() {
        let mut builder = LaunchConfig::builder();
        builder.arg("cat").stdout(Redirect::MergeWithStdout);
        assert!(builder.build().is_err());

        let mut builder = LaunchConfig::builder();
        builder.arg("cat").stdout(Redirect::ReadFile("in.txt".into()));
        assert!(builder.build().is_err());
    }

    #[test]
    fn stderr_may_merge_into_stdout() {
        let config = LaunchConfig::builder()
            .arg("cat")
            .merge_stderr()
            .build()
            .unwrap();
        assert_eq!(config.stderr(), &Redirect::MergeWithStdout);
    }

    #[test]
    fn env_touch_snapshots_parent() {
        std::env::set_var("SUBSPAWN_CONFIG_TEST_VAR", "present");
        let config = LaunchConfig::builder()
            .arg("env")
            .env("EXTRA", "1")
            .build()
            .unwrap();
        let env = config.env().unwrap();
        assert_eq!(env.get("EXTRA").map(String::as_str), Some("1"));
        assert_eq!(
            env.get("SUBSPAWN_CONFIG_TEST_VAR").map(String::as_str),
            Some("present")
        );
    }

    #[test]
    fn env_clear_replaces_entirely() {
        let config = LaunchConfig::builder()
            .arg("env")
            .env_clear()
            .env("ONLY", "this")
            .build()
            .unwrap();
        let env = config.env().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("ONLY").map(String::as_str), Some("this"));
    }
}
