/*!
 * Unix Spawn Engine
 * Descriptor wiring and fork/exec process creation
 */

use super::SpawnedChild;
use crate::config::{LaunchConfig, Redirect};
use crate::core::errors::{Error, Result};
use crate::core::types::ExitCode;
use crate::io::SharedHandle;
use log::info;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// Native reference to a spawned child: its PID. Reaping happens through
/// `waitpid`, so there is no separate resource to release.
#[derive(Debug)]
pub(crate) struct ChildHandle {
    pid: Pid,
}

impl ChildHandle {
    pub(crate) fn id(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Non-blocking status query. Reaps the child on the transition.
    pub(crate) fn try_status(&self) -> Result<Option<ExitCode>> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(WaitStatus::Exited(_, code)) => Ok(Some(code)),
            // fold signal deaths into the exit-code domain
            Ok(WaitStatus::Signaled(_, sig, _)) => Ok(Some(sig as ExitCode)),
            Ok(_) => Ok(None),
            Err(errno) => Err(Error::runtime(
                "error querying process state",
                errno_io(errno),
            )),
        }
    }

    pub(crate) fn terminate(&self) -> Result<()> {
        self.send_signal(Signal::SIGTERM)
    }

    pub(crate) fn kill(&self) -> Result<()> {
        self.send_signal(Signal::SIGKILL)
    }

    pub(crate) fn send_signal(&self, sig: Signal) -> Result<()> {
        match signal::kill(self.pid, sig) {
            Ok(()) => Ok(()),
            // the process is already gone, not an error
            Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(Error::runtime("error signaling process", errno_io(errno))),
        }
    }

    /// The PID is not a closable resource on Unix.
    pub(crate) fn close(&self) {}
}

fn errno_io(errno: Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

enum StreamRole {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamRole {
    fn name(&self) -> &'static str {
        match self {
            StreamRole::Stdin => "stdin",
            StreamRole::Stdout => "stdout",
            StreamRole::Stderr => "stderr",
        }
    }

    fn is_input(&self) -> bool {
        matches!(self, StreamRole::Stdin)
    }
}

/// Read/write ends opened for one stream. Ownership keeps the failure path
/// honest: dropping these closes every descriptor opened so far.
#[derive(Default)]
struct StreamFds {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

fn open_stream_fds(redirect: &Redirect, role: StreamRole) -> Result<StreamFds> {
    match redirect {
        Redirect::Inherit => Ok(StreamFds::default()),
        Redirect::MergeWithStdout => Ok(StreamFds::default()),
        Redirect::Discard => {
            let mut options = OpenOptions::new();
            if role.is_input() {
                options.read(true);
            } else {
                options.write(true);
            }
            let file = options
                .custom_flags(libc::O_CLOEXEC)
                .open("/dev/null")
                .map_err(|e| {
                    Error::config_io(format!("error opening null device for {}", role.name()), e)
                })?;
            let fd = OwnedFd::from(file);
            Ok(if role.is_input() {
                StreamFds {
                    read: Some(fd),
                    write: None,
                }
            } else {
                StreamFds {
                    read: None,
                    write: Some(fd),
                }
            })
        }
        Redirect::Pipe => {
            let (read, write) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
                .map_err(|errno| {
                    Error::config_io(
                        format!("error opening {} pipe", role.name()),
                        errno_io(errno),
                    )
                })?;
            Ok(StreamFds {
                read: Some(read),
                write: Some(write),
            })
        }
        Redirect::ReadFile(path) => {
            let file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_CLOEXEC)
                .open(path)
                .map_err(|e| {
                    Error::config_io(
                        format!(
                            "error opening input file {} for {}",
                            path.display(),
                            role.name()
                        ),
                        e,
                    )
                })?;
            Ok(StreamFds {
                read: Some(OwnedFd::from(file)),
                write: None,
            })
        }
        Redirect::WriteFile { path, append } => {
            let mut options = OpenOptions::new();
            options.write(true).create(true);
            if *append {
                options.append(true);
            } else {
                options.truncate(true);
            }
            let file = options
                .custom_flags(libc::O_CLOEXEC)
                .open(path)
                .map_err(|e| {
                    Error::config_io(
                        format!(
                            "error opening output file {} for {}",
                            path.display(),
                            role.name()
                        ),
                        e,
                    )
                })?;
            Ok(StreamFds {
                read: None,
                write: Some(OwnedFd::from(file)),
            })
        }
    }
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        Error::config(format!(
            "argument contains NUL byte: {:?}",
            String::from_utf8_lossy(bytes)
        ))
    })
}

fn nul_terminated(items: &[CString]) -> Vec<*const libc::c_char> {
    items
        .iter()
        .map(|c| c.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn raw_or_invalid(fd: Option<&OwnedFd>) -> RawFd {
    fd.map(|fd| fd.as_raw_fd()).unwrap_or(-1)
}

/// Install a child-side descriptor as one of the standard streams.
/// dup2 clears CLOEXEC on the target; the rare fd == target case clears
/// it by hand so exec does not close the stream out from under the child.
unsafe fn install_fd(fd: RawFd, target: RawFd) {
    if fd < 0 || fd == target {
        if fd == target {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
        }
        return;
    }
    libc::dup2(fd, target);
}

/// Runs in the forked child. Only async-signal-safe calls are allowed
/// here; every buffer was allocated before the fork.
unsafe fn exec_child(
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    cwd: Option<&CString>,
    program: &CString,
    argv: &[*const libc::c_char],
    envp: Option<&[*const libc::c_char]>,
) -> ! {
    install_fd(stdin_fd, 0);
    install_fd(stdout_fd, 1);
    install_fd(stderr_fd, 2);

    if let Some(cwd) = cwd {
        if libc::chdir(cwd.as_ptr()) != 0 {
            libc::_exit(127);
        }
    }

    match envp {
        Some(envp) => {
            libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
        }
        None => {
            libc::execv(program.as_ptr(), argv.as_ptr());
        }
    }
    // exec only returns on failure
    libc::_exit(127)
}

/// Resolve the executable, wire the redirects and fork/exec the child.
///
/// Resolution order is stdout, then stderr (so a merge request can reuse
/// stdout's child-side descriptor), then stdin. All descriptors are opened
/// CLOEXEC; the child installs its three ends via dup2 and exec drops the
/// rest, so no parent descriptor leaks into the child.
pub(crate) fn spawn(config: &LaunchConfig) -> Result<SpawnedChild> {
    // locate the executable before touching any descriptor
    let program = &config.argv()[0];
    let executable = if program.contains('/') {
        PathBuf::from(program)
    } else {
        find_executable(program).ok_or_else(|| {
            Error::config(format!("unable to find executable {program:?} on PATH"))
        })?
    };

    if let Some(dir) = config.working_dir() {
        std::fs::read_dir(dir).map_err(|e| {
            Error::config_io(
                format!("working directory {} cannot be used", dir.display()),
                e,
            )
        })?;
    }

    let mut stdout_fds = open_stream_fds(config.stdout(), StreamRole::Stdout)?;
    let merge_stderr = config.stderr() == &Redirect::MergeWithStdout;
    let mut stderr_fds = open_stream_fds(config.stderr(), StreamRole::Stderr)?;
    let mut stdin_fds = open_stream_fds(config.stdin(), StreamRole::Stdin)?;

    let program_c = cstring(executable.as_os_str().as_bytes())?;
    let argv_c = config
        .argv()
        .iter()
        .map(|arg| cstring(arg.as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    let env_c = config
        .env()
        .map(|env| {
            env.iter()
                .map(|(k, v)| cstring(format!("{k}={v}").as_bytes()))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;
    let cwd_c = config
        .working_dir()
        .map(|dir| cstring(dir.as_os_str().as_bytes()))
        .transpose()?;

    let argv_ptrs = nul_terminated(&argv_c);
    let env_ptrs = env_c.as_ref().map(|env| nul_terminated(env));

    let child_stdin = raw_or_invalid(stdin_fds.read.as_ref());
    let child_stdout = raw_or_invalid(stdout_fds.write.as_ref());
    let child_stderr = if merge_stderr {
        child_stdout
    } else {
        raw_or_invalid(stderr_fds.write.as_ref())
    };

    let pid = match unsafe { libc::fork() } {
        -1 => {
            // stream fds drop here, closing everything opened so far
            return Err(Error::spawn(
                "fork failed",
                io::Error::last_os_error(),
            ));
        }
        0 => unsafe {
            exec_child(
                child_stdin,
                child_stdout,
                child_stderr,
                cwd_c.as_ref(),
                &program_c,
                &argv_ptrs,
                env_ptrs.as_deref(),
            )
        },
        pid => pid,
    };

    let child = ChildHandle {
        pid: Pid::from_raw(pid),
    };
    info!("spawned child {} ({program:?})", child.id());

    // retain only the parent-side ends; the child-side fds drop (close)
    // when the StreamFds go out of scope below
    let stdin = stdin_fds
        .write
        .take()
        .map(|fd| SharedHandle::new(fd.into_raw_fd(), true));
    let stdout = stdout_fds
        .read
        .take()
        .map(|fd| SharedHandle::new(fd.into_raw_fd(), false));
    let stderr = stderr_fds
        .read
        .take()
        .map(|fd| SharedHandle::new(fd.into_raw_fd(), false));

    Ok(SpawnedChild {
        child,
        stdin,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_sh_on_path() {
        let path = find_executable("sh").expect("sh should exist on PATH");
        assert!(is_executable(&path));
    }

    #[test]
    fn missing_executable_is_config_error() {
        let config = LaunchConfig::new(["definitely-not-a-real-binary-xyz"]).unwrap();
        let err = spawn(&config).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn bad_working_directory_is_config_error() {
        let config = {
            let mut builder = LaunchConfig::builder();
            builder.arg("sh").current_dir("/definitely/not/a/dir");
            builder.build().unwrap()
        };
        let err = spawn(&config).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
