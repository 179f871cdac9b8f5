/*!
 * Windows Handle I/O
 * Raw positioned and sequential I/O over NT handles
 */

use log::warn;
use std::io;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_BROKEN_PIPE, ERROR_HANDLE_EOF, HANDLE,
};
use windows_sys::Win32::Storage::FileSystem::{
    FlushFileBuffers, GetFileSizeEx, ReadFile, SetEndOfFile, SetFilePointerEx, WriteFile,
    FILE_CURRENT, FILE_BEGIN,
};
use windows_sys::Win32::System::IO::OVERLAPPED;

/// OS-level identifier for an open file or pipe end.
pub type RawDescriptor = HANDLE;

fn overlapped_at(offset: u64) -> OVERLAPPED {
    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    overlapped.Anonymous.Anonymous.Offset = offset as u32;
    overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;
    overlapped
}

/// Probe whether the handle supports seeking. Pipes refuse `SetFilePointerEx`.
pub(crate) fn is_seekable(handle: RawDescriptor) -> bool {
    let mut pos = 0i64;
    unsafe { SetFilePointerEx(handle, 0, &mut pos, FILE_CURRENT) != 0 }
}

/// Read at `offset` via overlapped I/O for seekable handles; pipes fall back
/// to a plain read and ignore the offset. Returns 0 at end-of-stream, which
/// the OS reports as `ERROR_BROKEN_PIPE` or `ERROR_HANDLE_EOF` here.
pub(crate) fn read_at(
    handle: RawDescriptor,
    seekable: bool,
    offset: u64,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut read = 0u32;
    let ok = unsafe {
        if seekable {
            let mut overlapped = overlapped_at(offset);
            ReadFile(
                handle,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut read,
                &mut overlapped,
            )
        } else {
            ReadFile(
                handle,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut read,
                std::ptr::null_mut(),
            )
        }
    };
    if ok == 0 {
        match unsafe { GetLastError() } {
            ERROR_BROKEN_PIPE | ERROR_HANDLE_EOF => Ok(0),
            _ => Err(io::Error::last_os_error()),
        }
    } else {
        Ok(read as usize)
    }
}

/// Write at `offset` via overlapped I/O for seekable handles; pipes fall back
/// to a plain write and ignore the offset.
pub(crate) fn write_at(
    handle: RawDescriptor,
    seekable: bool,
    offset: u64,
    buf: &[u8],
) -> io::Result<usize> {
    let mut written = 0u32;
    let ok = unsafe {
        if seekable {
            let mut overlapped = overlapped_at(offset);
            WriteFile(
                handle,
                buf.as_ptr(),
                buf.len() as u32,
                &mut written,
                &mut overlapped,
            )
        } else {
            WriteFile(
                handle,
                buf.as_ptr(),
                buf.len() as u32,
                &mut written,
                std::ptr::null_mut(),
            )
        }
    };
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(written as usize)
    }
}

pub(crate) fn flush(handle: RawDescriptor) -> io::Result<()> {
    if unsafe { FlushFileBuffers(handle) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn size(handle: RawDescriptor) -> io::Result<u64> {
    let mut size = 0i64;
    if unsafe { GetFileSizeEx(handle, &mut size) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size as u64)
}

pub(crate) fn resize(handle: RawDescriptor, len: u64) -> io::Result<()> {
    let mut previous = 0i64;
    unsafe {
        if SetFilePointerEx(handle, 0, &mut previous, FILE_CURRENT) == 0 {
            return Err(io::Error::last_os_error());
        }
        if SetFilePointerEx(handle, len as i64, std::ptr::null_mut(), FILE_BEGIN) == 0 {
            return Err(io::Error::last_os_error());
        }
        if SetEndOfFile(handle) == 0 {
            return Err(io::Error::last_os_error());
        }
        // restore the original position
        if SetFilePointerEx(handle, previous, std::ptr::null_mut(), FILE_BEGIN) == 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub(crate) fn close(handle: RawDescriptor) {
    if unsafe { CloseHandle(handle) } == 0 {
        warn!("failed to close handle: {}", io::Error::last_os_error());
    }
}
