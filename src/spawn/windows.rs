/*!
 * Windows Spawn Engine
 * Handle wiring and CreateProcessW process creation
 */

use super::SpawnedChild;
use crate::config::{LaunchConfig, Redirect};
use crate::core::errors::{Error, Result};
use crate::core::types::ExitCode;
use crate::io::SharedHandle;
use log::info;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use windows_sys::Win32::Foundation::{
    CloseHandle, SetHandleInformation, GENERIC_READ, GENERIC_WRITE, HANDLE, HANDLE_FLAG_INHERIT,
    INVALID_HANDLE_VALUE, STILL_ACTIVE, TRUE,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, CREATE_ALWAYS, FILE_APPEND_DATA, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_ALWAYS, OPEN_EXISTING,
};
use windows_sys::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::Pipes::CreatePipe;
use windows_sys::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, TerminateProcess, CREATE_UNICODE_ENVIRONMENT,
    PROCESS_INFORMATION, STARTF_USESTDHANDLES, STARTUPINFOW,
};

/// Native reference to a spawned child: its process handle, closed exactly
/// once when the facade observes termination (or on drop).
#[derive(Debug)]
pub(crate) struct ChildHandle {
    handle: HANDLE,
    id: u32,
    closed: AtomicBool,
}

// HANDLE is a kernel object identifier, safe to move across threads.
unsafe impl Send for ChildHandle {}
unsafe impl Sync for ChildHandle {}

impl ChildHandle {
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Non-blocking status query via the exit-code slot. `STILL_ACTIVE`
    /// means running; anything else is the folded exit code.
    pub(crate) fn try_status(&self) -> Result<Option<ExitCode>> {
        let mut code: u32 = 0;
        if unsafe { GetExitCodeProcess(self.handle, &mut code) } == 0 {
            return Err(Error::runtime(
                "error querying process state",
                io::Error::last_os_error(),
            ));
        }
        if code == STILL_ACTIVE as u32 {
            Ok(None)
        } else {
            Ok(Some(code as ExitCode))
        }
    }

    /// Windows has a single stop primitive; terminate and kill coincide.
    pub(crate) fn terminate(&self) -> Result<()> {
        if unsafe { TerminateProcess(self.handle, 1) } == 0 {
            let last = io::Error::last_os_error();
            // not an error if the process is already gone
            if self.try_status()?.is_some() {
                return Ok(());
            }
            return Err(Error::runtime("error terminating process", last));
        }
        Ok(())
    }

    pub(crate) fn kill(&self) -> Result<()> {
        self.terminate()
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owned HANDLE that closes on drop, keeping the failure path leak-free.
struct Handle(HANDLE);

impl Handle {
    fn into_raw(self) -> HANDLE {
        let raw = self.0;
        std::mem::forget(self);
        raw
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.0 != 0 && self.0 != INVALID_HANDLE_VALUE {
            unsafe { CloseHandle(self.0) };
        }
    }
}

#[derive(Default)]
struct StreamHandles {
    read: Option<Handle>,
    write: Option<Handle>,
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

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn wide_path(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn inheritable() -> SECURITY_ATTRIBUTES {
    SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: TRUE,
    }
}

fn open_stream_handles(redirect: &Redirect, role: StreamRole) -> Result<StreamHandles> {
    match redirect {
        Redirect::Inherit => Ok(StreamHandles::default()),
        Redirect::MergeWithStdout => Ok(StreamHandles::default()),
        Redirect::Discard => {
            let mut attrs = inheritable();
            let handle = unsafe {
                CreateFileW(
                    wide("NUL").as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    &mut attrs,
                    OPEN_EXISTING,
                    FILE_ATTRIBUTE_NORMAL,
                    0,
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                return Err(Error::config_io(
                    format!("error opening null device for {}", role.name()),
                    io::Error::last_os_error(),
                ));
            }
            let handle = Handle(handle);
            Ok(if role.is_input() {
                StreamHandles {
                    read: Some(handle),
                    write: None,
                }
            } else {
                StreamHandles {
                    read: None,
                    write: Some(handle),
                }
            })
        }
        Redirect::Pipe => {
            let mut read: HANDLE = 0;
            let mut write: HANDLE = 0;
            let mut attrs = inheritable();
            if unsafe { CreatePipe(&mut read, &mut write, &mut attrs, 0) } == 0 {
                return Err(Error::config_io(
                    format!("error creating {} pipe", role.name()),
                    io::Error::last_os_error(),
                ));
            }
            let read = Handle(read);
            let write = Handle(write);
            // only the child-side end may be inherited
            let parent_side = if role.is_input() { write.0 } else { read.0 };
            if unsafe { SetHandleInformation(parent_side, HANDLE_FLAG_INHERIT, 0) } == 0 {
                return Err(Error::config_io(
                    format!("error disinheriting {} pipe parent side", role.name()),
                    io::Error::last_os_error(),
                ));
            }
            Ok(StreamHandles {
                read: Some(read),
                write: Some(write),
            })
        }
        Redirect::ReadFile(path) => {
            let mut attrs = inheritable();
            let handle = unsafe {
                CreateFileW(
                    wide_path(path).as_ptr(),
                    GENERIC_READ,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    &mut attrs,
                    OPEN_EXISTING,
                    FILE_ATTRIBUTE_NORMAL,
                    0,
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                return Err(Error::config_io(
                    format!(
                        "error opening input file {} for {}",
                        path.display(),
                        role.name()
                    ),
                    io::Error::last_os_error(),
                ));
            }
            Ok(StreamHandles {
                read: Some(Handle(handle)),
                write: None,
            })
        }
        Redirect::WriteFile { path, append } => {
            let mut attrs = inheritable();
            let (access, disposition) = if *append {
                (FILE_APPEND_DATA, OPEN_ALWAYS)
            } else {
                (GENERIC_WRITE, CREATE_ALWAYS)
            };
            let handle = unsafe {
                CreateFileW(
                    wide_path(path).as_ptr(),
                    access,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    &mut attrs,
                    disposition,
                    FILE_ATTRIBUTE_NORMAL,
                    0,
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                return Err(Error::config_io(
                    format!(
                        "error opening output file {} for {}",
                        path.display(),
                        role.name()
                    ),
                    io::Error::last_os_error(),
                ));
            }
            Ok(StreamHandles {
                read: None,
                write: Some(Handle(handle)),
            })
        }
    }
}

const DEFAULT_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD";

/// Names to probe in each PATH directory: the bare name, plus one entry
/// per PATHEXT extension when the name carries none of its own.
fn candidate_names(name: &str, pathext: &str) -> Vec<String> {
    let mut names = vec![name.to_string()];
    if Path::new(name).extension().is_none() {
        for ext in pathext.split(';') {
            let ext = ext.trim();
            if ext.starts_with('.') {
                names.push(format!("{name}{ext}"));
            }
        }
    }
    names
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let pathext = std::env::var("PATHEXT")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_PATHEXT.to_string());
    let names = candidate_names(name, &pathext);
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        for candidate_name in &names {
            let candidate = dir.join(candidate_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Quote one argument per the MSVCRT command-line parsing rules.
fn quote_arg(arg: &str, out: &mut String) {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        out.push_str(arg);
        return;
    }
    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // backslashes before a quote must be doubled, plus one to
                // escape the quote itself
                out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes * 2));
    out.push('"');
}

fn build_command_line(argv: &[String]) -> String {
    let mut out = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        quote_arg(arg, &mut out);
    }
    out
}

/// Build the UTF-16 environment block: `K=V\0` entries with a final `\0`.
fn build_env_block(env: &std::collections::HashMap<String, String>) -> Vec<u16> {
    let mut block = Vec::new();
    for (key, value) in env {
        block.extend(format!("{key}={value}").encode_utf16());
        block.push(0);
    }
    block.push(0);
    block
}

fn std_handle_or(child: Option<&Handle>, fallback: u32) -> HANDLE {
    match child {
        Some(handle) => handle.0,
        None => unsafe { GetStdHandle(fallback) },
    }
}

/// Resolve the executable, wire the redirects and CreateProcessW the child.
///
/// Resolution order is stdout, then stderr (so a merge request can reuse
/// stdout's child-side handle), then stdin. Parent-side pipe ends are made
/// non-inheritable, so only the three standard handles reach the child.
pub(crate) fn spawn(config: &LaunchConfig) -> Result<SpawnedChild> {
    let program = &config.argv()[0];
    let executable = if program.contains(['\\', '/']) {
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

    let mut stdout_handles = open_stream_handles(config.stdout(), StreamRole::Stdout)?;
    let merge_stderr = config.stderr() == &Redirect::MergeWithStdout;
    let mut stderr_handles = open_stream_handles(config.stderr(), StreamRole::Stderr)?;
    let mut stdin_handles = open_stream_handles(config.stdin(), StreamRole::Stdin)?;

    let mut argv = config.argv().to_vec();
    argv[0] = executable.to_string_lossy().into_owned();
    let mut command_line = wide(&build_command_line(&argv));
    let mut env_block = config.env().map(build_env_block);
    let cwd = config.working_dir().map(|dir| wide_path(dir));

    let child_stderr = if merge_stderr {
        std_handle_or(stdout_handles.write.as_ref(), STD_ERROR_HANDLE)
    } else {
        std_handle_or(stderr_handles.write.as_ref(), STD_ERROR_HANDLE)
    };

    let mut startup: STARTUPINFOW = unsafe { std::mem::zeroed() };
    startup.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
    startup.dwFlags = STARTF_USESTDHANDLES;
    startup.hStdInput = std_handle_or(stdin_handles.read.as_ref(), STD_INPUT_HANDLE);
    startup.hStdOutput = std_handle_or(stdout_handles.write.as_ref(), STD_OUTPUT_HANDLE);
    startup.hStdError = child_stderr;

    let mut info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };
    let created = unsafe {
        CreateProcessW(
            std::ptr::null(),
            command_line.as_mut_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            TRUE,
            CREATE_UNICODE_ENVIRONMENT,
            env_block
                .as_mut()
                .map(|b| b.as_mut_ptr().cast())
                .unwrap_or(std::ptr::null_mut()),
            cwd.as_ref().map(|c| c.as_ptr()).unwrap_or(std::ptr::null()),
            &startup,
            &mut info,
        )
    };
    if created == 0 {
        // stream handles drop here, closing everything opened so far
        return Err(Error::spawn(
            "CreateProcessW failed",
            io::Error::last_os_error(),
        ));
    }
    unsafe { CloseHandle(info.hThread) };

    let child = ChildHandle {
        handle: info.hProcess,
        id: info.dwProcessId,
        closed: AtomicBool::new(false),
    };
    info!("spawned child {} ({program:?})", child.id());

    // retain only the parent-side ends; the child-side handles drop
    // (close) when the StreamHandles go out of scope below
    let stdin = stdin_handles
        .write
        .take()
        .map(|h| SharedHandle::new(h.into_raw(), true));
    let stdout = stdout_handles
        .read
        .take()
        .map(|h| SharedHandle::new(h.into_raw(), false));
    let stderr = stderr_handles
        .read
        .take()
        .map(|h| SharedHandle::new(h.into_raw(), false));

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
    fn quotes_plain_args_untouched() {
        let line = build_command_line(&["prog".into(), "arg1".into()]);
        assert_eq!(line, "prog arg1");
    }

    #[test]
    fn quotes_args_with_spaces_and_quotes() {
        let line = build_command_line(&["prog".into(), "a b".into(), "say \"hi\"".into()]);
        assert_eq!(line, "prog \"a b\" \"say \\\"hi\\\"\"");
    }

    #[test]
    fn probes_every_pathext_extension() {
        let names = candidate_names("tool", ".COM;.EXE;.BAT;.CMD");
        assert_eq!(names, ["tool", "tool.COM", "tool.EXE", "tool.BAT", "tool.CMD"]);
    }

    #[test]
    fn explicit_extension_skips_pathext() {
        let names = candidate_names("tool.exe", ".COM;.EXE");
        assert_eq!(names, ["tool.exe"]);
    }

    #[test]
    fn malformed_pathext_entries_are_ignored() {
        let names = candidate_names("tool", ";.EXE; CMD ;");
        assert_eq!(names, ["tool", "tool.EXE"]);
    }
}
