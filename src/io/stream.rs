/*!
 * Derived Streams
 * Sequential reader/writer views over a SharedHandle, plus a lazy line stream
 */

use super::handle::SharedHandle;
use crate::core::errors::{Error, Result};
use async_stream::try_stream;
use futures::Stream;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sequential reader over a [`SharedHandle`].
///
/// Tracks its own position; on non-seekable handles the position is
/// advisory and reads are plainly sequential. Dropping the reader counts
/// as closing it.
pub struct HandleReader {
    handle: Arc<SharedHandle>,
    position: u64,
    closed: bool,
}

impl HandleReader {
    pub(crate) fn derive(handle: Arc<SharedHandle>) -> io::Result<Self> {
        handle.attach_stream()?;
        Ok(Self {
            handle,
            position: 0,
            closed: false,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Close this stream. The underlying descriptor is released once the
    /// owner has closed the handle and this was the last derived stream.
    pub fn close(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.closed {
            self.closed = true;
            self.handle.detach_stream();
        }
    }
}

impl Read for HandleReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(stream_closed());
        }
        let n = self.handle.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Drop for HandleReader {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Sequential writer over a [`SharedHandle`].
pub struct HandleWriter {
    handle: Arc<SharedHandle>,
    position: u64,
    closed: bool,
}

impl HandleWriter {
    pub(crate) fn derive(handle: Arc<SharedHandle>) -> io::Result<Self> {
        if !handle.is_writable() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle is not opened for write",
            ));
        }
        handle.attach_stream()?;
        Ok(Self {
            handle,
            position: 0,
            closed: false,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Close this stream, releasing the descriptor if it was the last
    /// holder. For a piped stdin this is what signals end-of-input once
    /// the owner side is closed as well.
    pub fn close(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.closed {
            self.closed = true;
            self.handle.detach_stream();
        }
    }
}

impl Write for HandleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(stream_closed());
        }
        let n = self.handle.write_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(stream_closed());
        }
        self.handle.flush()
    }
}

impl Drop for HandleWriter {
    fn drop(&mut self) {
        self.detach();
    }
}

fn stream_closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "stream is closed")
}

/// Lazy, finite, non-restartable stream of text lines over a reader.
///
/// `None` yields an empty stream, covering standard streams that were not
/// piped. Line terminators (`\n`, `\r\n`) are stripped. A single blocking
/// task reads ahead and feeds lines through a bounded channel, so a
/// stalled pipe never blocks the async scheduler and a slow consumer
/// backpressures the reader.
pub fn lines<R>(reader: Option<R>) -> impl Stream<Item = Result<String>> + Send
where
    R: Read + Send + 'static,
{
    try_stream! {
        if let Some(reader) = reader {
            let (tx, mut rx) = mpsc::channel::<io::Result<String>>(64);
            let worker = tokio::task::spawn_blocking(move || {
                let mut reader = BufReader::new(reader);
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) => break,
                        Ok(_) => {
                            if line.ends_with('\n') {
                                line.pop();
                                if line.ends_with('\r') {
                                    line.pop();
                                }
                            }
                            // receiver dropped: the stream was abandoned
                            if tx.blocking_send(Ok(line)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.blocking_send(Err(e));
                            break;
                        }
                    }
                }
            });
            while let Some(item) = rx.recv().await {
                yield item?;
            }
            worker.await.map_err(|e| {
                Error::runtime("line reader task failed", io::Error::new(io::ErrorKind::Other, e))
            })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn lines_splits_and_strips_terminators() {
        let data: &[u8] = b"first\nsecond\r\nlast";
        let collected: Vec<String> = lines(Some(data))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["first", "second", "last"]);
    }

    #[tokio::test]
    async fn lines_of_none_is_empty() {
        let collected: Vec<_> = lines(None::<&[u8]>).collect().await;
        assert!(collected.is_empty());
    }

    struct FailingReader {
        prefix: &'static [u8],
        served: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served < self.prefix.len() {
                let n = buf.len().min(self.prefix.len() - self.served);
                buf[..n].copy_from_slice(&self.prefix[self.served..self.served + n]);
                self.served += n;
                return Ok(n);
            }
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke"))
        }
    }

    #[tokio::test]
    async fn lines_surface_read_errors_after_complete_lines() {
        let reader = FailingReader {
            prefix: b"good line\n",
            served: 0,
        };
        let mut stream = Box::pin(lines(Some(reader)));
        assert_eq!(stream.next().await.unwrap().unwrap(), "good line");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
