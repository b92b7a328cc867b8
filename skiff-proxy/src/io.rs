use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::ProxyError;

const MAX_LINE_BYTES: usize = 8 * 1024;
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Line-oriented I/O over one socket for the header phases. Bytes read past
/// the consumed lines stay in `pending` and later seed the relay buffers.
pub struct LineIo<S = TcpStream> {
    stream: S,
    pending: Vec<u8>,
    deadline: Duration,
}

impl<S> LineIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, deadline: Duration) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            deadline,
        }
    }

    pub async fn read_line(&mut self) -> Result<String, ProxyError> {
        loop {
            if let Some(end) = twoway::find_bytes(&self.pending, b"\n") {
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line)
                    .map_err(|_| ProxyError::Read("line is not valid UTF-8".to_string()));
            }

            if self.pending.len() > MAX_LINE_BYTES {
                return Err(ProxyError::Read("line exceeds maximum length".to_string()));
            }

            if self.fill().await? == 0 {
                return Err(ProxyError::Read(
                    "peer closed before end of line".to_string(),
                ));
            }
        }
    }

    pub async fn read_body_chunk(&mut self, max: usize) -> Result<Vec<u8>, ProxyError> {
        if !self.pending.is_empty() {
            let take = self.pending.len().min(max);
            return Ok(self.pending.drain(..take).collect());
        }

        let mut chunk = vec![0u8; max.min(READ_CHUNK_BYTES)];
        let read = timeout(self.deadline, self.stream.read(&mut chunk))
            .await
            .map_err(|_| ProxyError::Timeout(self.deadline))?
            .map_err(|err| ProxyError::Read(err.to_string()))?;
        chunk.truncate(read);
        Ok(chunk)
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProxyError> {
        timeout(self.deadline, self.stream.write_all(bytes))
            .await
            .map_err(|_| ProxyError::Timeout(self.deadline))?
            .map_err(|err| ProxyError::Write(err.to_string()))
    }

    async fn fill(&mut self) -> Result<usize, ProxyError> {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        let read = timeout(self.deadline, self.stream.read(&mut chunk))
            .await
            .map_err(|_| ProxyError::Timeout(self.deadline))?
            .map_err(|err| ProxyError::Read(err.to_string()))?;
        self.pending.extend_from_slice(&chunk[..read]);
        Ok(read)
    }
}

impl LineIo<TcpStream> {
    /// Consume the stray CRLF some clients append after a POST body, without
    /// blocking when nothing further was sent.
    pub fn consume_trailing_crlf(&mut self) {
        while self.pending.len() < 2 {
            let mut probe = [0u8; 2];
            match self.stream.try_read(&mut probe) {
                Ok(0) => break,
                Ok(read) => self.pending.extend_from_slice(&probe[..read]),
                Err(_) => break,
            }
        }
        if self.pending.starts_with(b"\r\n") {
            self.pending.drain(..2);
        }
    }

    /// Best-effort drain of whatever the client already sent, so an error
    /// document can be written without colliding with an in-flight body.
    pub fn drain_pending_input(&mut self) {
        self.pending.clear();
        let mut sink = [0u8; READ_CHUNK_BYTES];
        let _ = self.stream.try_read(&mut sink);
    }

    pub fn into_parts(self) -> (TcpStream, Vec<u8>) {
        (self.stream, self.pending)
    }
}
