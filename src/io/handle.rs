/*!
 * Shared Handle
 * Ref-counted wrapper turning a raw descriptor into a safely closable stream source
 */

use super::platform;
use super::platform::RawDescriptor;
use super::stream::{HandleReader, HandleWriter};
use log::debug;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

#[derive(Debug)]
struct HandleState {
    closed: bool,
    open_streams: usize,
    released: bool,
}

/// Shared wrapper around one raw OS descriptor.
///
/// The descriptor is physically released only once the owner has called
/// [`close`](Self::close) AND every derived stream has been dropped,
/// whichever happens last. A pipe end is handed to callers as independently
/// closable streams while the spawn engine can still force-release the
/// handle during process cleanup, so both conditions are tracked under one
/// lock.
///
/// Concurrent reads/writes from several tasks are the caller's concern;
/// only the close bookkeeping is serialized here.
#[derive(Debug)]
pub struct SharedHandle {
    raw: RawDescriptor,
    writable: bool,
    seekable: bool,
    state: Mutex<HandleState>,
}

impl SharedHandle {
    /// Take ownership of `raw`. The handle probes seekability once; pipes
    /// and other non-seekable descriptors use sequential I/O from then on.
    pub(crate) fn new(raw: RawDescriptor, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            raw,
            writable,
            seekable: platform::is_seekable(raw),
            state: Mutex::new(HandleState {
                closed: false,
                open_streams: 0,
                released: false,
            }),
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Derive a sequential reader starting at offset 0.
    pub fn reader(self: &Arc<Self>) -> io::Result<HandleReader> {
        HandleReader::derive(Arc::clone(self))
    }

    /// Derive a sequential writer starting at offset 0.
    pub fn writer(self: &Arc<Self>) -> io::Result<HandleWriter> {
        HandleWriter::derive(Arc::clone(self))
    }

    /// Read up to `buf.len()` bytes at `offset`. Non-seekable handles read
    /// sequentially and ignore the offset. Returns 0 at end-of-stream.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        platform::read_at(self.raw, self.seekable, offset, buf)
    }

    /// Write `buf` at `offset`. Non-seekable handles write sequentially and
    /// ignore the offset.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.ensure_writable()?;
        platform::write_at(self.raw, self.seekable, offset, buf)
    }

    pub fn flush(&self) -> io::Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        platform::flush(self.raw)
    }

    /// Size of the underlying file, where the descriptor has one.
    pub fn size(&self) -> io::Result<u64> {
        self.ensure_open()?;
        platform::size(self.raw)
    }

    /// Resize the underlying file.
    pub fn resize(&self, len: u64) -> io::Result<()> {
        self.ensure_open()?;
        self.ensure_writable()?;
        platform::resize(self.raw, len)
    }

    /// Owner-side close. Safe to call multiple times. The descriptor is
    /// released now if no derived streams remain, otherwise when the last
    /// one is dropped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if state.open_streams == 0 {
            self.release(&mut state);
        }
    }

    pub(crate) fn attach_stream(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(closed_error());
        }
        state.open_streams += 1;
        Ok(())
    }

    pub(crate) fn detach_stream(&self) {
        let mut state = self.state.lock();
        state.open_streams -= 1;
        if state.closed && state.open_streams == 0 {
            self.release(&mut state);
        }
    }

    fn release(&self, state: &mut HandleState) {
        if state.released {
            return;
        }
        state.released = true;
        debug!("releasing descriptor {:?}", self.raw);
        platform::close(self.raw);
    }

    // Owner close only blocks new derives; I/O stays legal until the
    // descriptor is actually released.
    fn ensure_open(&self) -> io::Result<()> {
        if self.state.lock().released {
            return Err(closed_error());
        }
        Ok(())
    }

    fn ensure_writable(&self) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle is not opened for write",
            ));
        }
        Ok(())
    }
}

impl Drop for SharedHandle {
    fn drop(&mut self) {
        // Last reference gone: no owner, no streams. Release if nobody did.
        let state = self.state.get_mut();
        if !state.released {
            state.released = true;
            platform::close(self.raw);
        }
    }
}

// RawDescriptor is a plain integer on both platforms.
unsafe impl Send for SharedHandle {}
unsafe impl Sync for SharedHandle {}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "handle is closed")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn pipe_handles() -> (Arc<SharedHandle>, Arc<SharedHandle>) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (SharedHandle::new(fds[0], false), SharedHandle::new(fds[1], true))
    }

    #[test]
    fn pipe_round_trip() {
        let (read, write) = pipe_handles();
        assert!(!write.is_seekable());

        let mut writer = write.writer().unwrap();
        writer.write_all(b"hello").unwrap();
        drop(writer);
        write.close();

        let mut reader = read.reader().unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }

    #[test]
    fn close_defers_release_to_last_stream() {
        let (read, write) = pipe_handles();
        let mut reader = read.reader().unwrap();

        // owner close with a live stream: descriptor stays usable
        read.close();
        let mut writer = write.writer().unwrap();
        writer.write_all(b"x").unwrap();
        drop(writer);
        write.close();

        let mut buf = [0u8; 4];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"x");
        drop(reader);

        // deriving after close fails
        assert!(read.reader().is_err());
    }

    #[test]
    fn double_close_is_noop() {
        let (read, _write) = pipe_handles();
        read.close();
        read.close();
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let (read, _write) = pipe_handles();
        assert!(read.writer().is_err() || read.write_at(0, b"x").is_err());
    }

    #[test]
    fn file_handle_positioned_io() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let fd = unsafe {
            libc::open(
                std::ffi::CString::new(file.path().to_str().unwrap())
                    .unwrap()
                    .as_ptr(),
                libc::O_RDWR,
            )
        };
        assert!(fd >= 0);
        let handle = SharedHandle::new(fd, true);
        assert!(handle.is_seekable());

        handle.write_at(0, b"abcdef").unwrap();
        handle.resize(3).unwrap();
        assert_eq!(handle.size().unwrap(), 3);

        let mut buf = [0u8; 8];
        let n = handle.read_at(1, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"bc");
        handle.close();
    }
}
