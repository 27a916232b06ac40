use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ClientError, ClientResult};

const READ_CHUNK: usize = 4096;

/// Default upper bound on a single line, terminator included.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Splits a byte stream into LF-terminated lines.
///
/// The reader owns the stream, so at most one read can be pending at a time.
/// Bytes received past the end of a line stay buffered for the next call.
///
/// Once the stream errors or closes, the reader is failed for good: the error
/// is returned from that call and every call after it. A timeout is not a
/// failure; the next call picks up where the timed-out one stopped.
#[derive(Debug)]
pub struct LineReader<S> {
    stream: S,
    buffer: Vec<u8>,
    max_line: usize,
    failed: Option<ClientError>,
}

impl<S> LineReader<S> {
    pub const fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            max_line: DEFAULT_MAX_LINE,
            failed: None,
        }
    }

    #[must_use]
    pub const fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    pub const fn get_ref(&self) -> &S {
        &self.stream
    }

    pub const fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes received but not yet returned as a line.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub const fn failure(&self) -> Option<&ClientError> {
        self.failed.as_ref()
    }

    /// Stops the reader. Later reads fail with [`ClientError::ConnectionClosed`].
    /// Calling this more than once has no further effect.
    pub fn dispose(&mut self) {
        self.buffer.clear();
        self.failed.get_or_insert(ClientError::ConnectionClosed);
    }

    /// Releases the stream along with any bytes still buffered.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        (self.stream, self.buffer)
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        self.failed = Some(err.clone());
        err
    }
}

impl<S: AsyncRead + Unpin> LineReader<S> {
    /// Next line with the trailing CR stripped, lossily decoded as UTF-8.
    pub async fn read_line(&mut self, timeout: Duration) -> ClientResult<String> {
        let line = self.read_raw_line(timeout).await?;
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Next line as raw bytes with the trailing CRLF or LF stripped.
    pub async fn read_raw_line(&mut self, timeout: Duration) -> ClientResult<Vec<u8>> {
        tokio::time::timeout(timeout, self.next_line())
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Unbounded wait for the next line. Cancel safe: dropping the future
    /// loses no received bytes.
    pub(crate) async fn next_line(&mut self) -> ClientResult<Vec<u8>> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }

        let mut scanned = 0;

        loop {
            if let Some(offset) = self.buffer[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + offset;
                if end >= self.max_line {
                    return Err(self.fail(ClientError::LineTooLong(self.max_line)));
                }

                let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }

                return Ok(line);
            }

            scanned = self.buffer.len();
            if scanned >= self.max_line {
                return Err(self.fail(ClientError::LineTooLong(self.max_line)));
            }

            let mut chunk = [0; READ_CHUNK];
            match self.stream.read(&mut chunk).await {
                Ok(0) => return Err(self.fail(ClientError::ConnectionClosed)),
                Ok(read) => self.buffer.extend_from_slice(&chunk[..read]),
                Err(err) => return Err(self.fail(err.into())),
            }
        }
    }
}
