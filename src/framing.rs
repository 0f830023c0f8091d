//! Blocking frame reader for the server byte stream.
//!
//! The socket carries two message shapes: newline-terminated status lines
//! and binary image payloads preceded by a fixed 10-byte ASCII length
//! header. Reads honor a shared cancellation flag: a socket read timeout is
//! not an error, it is the point where the loop gets to re-check the flag.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::SIZE_HEADER_LEN;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("end of stream")]
    EndOfStream,
    #[error("malformed length header: {0:?}")]
    MalformedHeader(String),
    #[error("read cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decodes discrete messages from a blocking byte stream.
pub struct FrameReader<R> {
    inner: R,
    running: Arc<AtomicBool>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, running: Arc<AtomicBool>) -> Self {
        Self { inner, running }
    }

    /// The underlying stream, e.g. to adjust its read timeout.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    fn check_running(&self) -> Result<(), FrameError> {
        if self.running.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(FrameError::Cancelled)
        }
    }

    /// Read one line, stripping the terminator and surrounding whitespace.
    ///
    /// Fails with `EndOfStream` if the peer closes mid-line.
    pub fn read_line(&mut self) -> Result<String, FrameError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.check_running()?;
            match self.inner.read(&mut byte) {
                Ok(0) => return Err(FrameError::EndOfStream),
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    buf.push(byte[0]);
                }
                Err(ref e) if is_retryable(e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(String::from_utf8_lossy(&buf).trim().to_string())
    }

    /// Read exactly `n` bytes, or fail with `EndOfStream`.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, FrameError> {
        let mut data = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            self.check_running()?;
            match self.inner.read(&mut data[filled..]) {
                Ok(0) => return Err(FrameError::EndOfStream),
                Ok(read) => filled += read,
                Err(ref e) if is_retryable(e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(data)
    }

    /// Read one length-prefixed image frame.
    ///
    /// Returns `None` when the header announces a size ≤ 0; the frame is
    /// skipped and the stream stays aligned on the next message.
    pub fn read_image_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let header = self.read_exact(SIZE_HEADER_LEN)?;
        let text = String::from_utf8_lossy(&header).trim().to_string();
        let size: i64 = text
            .parse()
            .map_err(|_| FrameError::MalformedHeader(text.clone()))?;
        if size <= 0 {
            log::debug!("skipping empty image frame (header size {size})");
            return Ok(None);
        }
        let payload = self.read_exact(size as usize)?;
        Ok(Some(payload))
    }
}

fn is_retryable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
