/*!
 * Unix Descriptor I/O
 * Raw positioned and sequential I/O over file descriptors
 */

use log::warn;
use std::io;
use std::os::unix::io::RawFd;

/// OS-level identifier for an open file or pipe end.
pub type RawDescriptor = RawFd;

/// Probe whether the descriptor supports seeking. Pipes report `ESPIPE`.
pub(crate) fn is_seekable(fd: RawDescriptor) -> bool {
    unsafe { libc::lseek(fd, 0, libc::SEEK_CUR) != -1 }
}

/// Read at `offset` via `pread` for seekable descriptors; pipes fall back
/// to a plain `read` and ignore the offset. Returns 0 at end-of-stream.
pub(crate) fn read_at(
    fd: RawDescriptor,
    seekable: bool,
    offset: u64,
    buf: &mut [u8],
) -> io::Result<usize> {
    let n = unsafe {
        if seekable {
            libc::pread(
                fd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                offset as libc::off_t,
            )
        } else {
            libc::read(fd, buf.as_mut_ptr().cast(), buf.len())
        }
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Write at `offset` via `pwrite` for seekable descriptors; pipes fall back
/// to a plain `write` and ignore the offset.
pub(crate) fn write_at(
    fd: RawDescriptor,
    seekable: bool,
    offset: u64,
    buf: &[u8],
) -> io::Result<usize> {
    let n = unsafe {
        if seekable {
            libc::pwrite(fd, buf.as_ptr().cast(), buf.len(), offset as libc::off_t)
        } else {
            libc::write(fd, buf.as_ptr().cast(), buf.len())
        }
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Raw descriptors carry no userspace buffer, so there is nothing to push.
pub(crate) fn flush(_fd: RawDescriptor) -> io::Result<()> {
    Ok(())
}

pub(crate) fn size(fd: RawDescriptor) -> io::Result<u64> {
    let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };
    Ok(stat.st_size as u64)
}

pub(crate) fn resize(fd: RawDescriptor, len: u64) -> io::Result<()> {
    if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn close(fd: RawDescriptor) {
    if unsafe { libc::close(fd) } != 0 {
        warn!(
            "failed to close descriptor {}: {}",
            fd,
            io::Error::last_os_error()
        );
    }
}
