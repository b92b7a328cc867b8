use std::io;

use tokio::net::TcpStream;

/// Bounded FIFO byte buffer for one relay direction.
#[derive(Debug)]
pub struct RelayBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl RelayBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    /// Preloads bytes that were read past the header terminator. The seed may
    /// exceed the capacity; reads stay ineligible until it drains below it.
    pub fn seed(&mut self, bytes: Vec<u8>) {
        self.data = bytes;
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has_space(&self) -> bool {
        self.data.len() < self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn consume(&mut self, count: usize) {
        self.data.drain(..count);
    }

    /// Non-blocking read into the spare capacity, bounded by `limit`.
    pub fn fill_from(&mut self, stream: &TcpStream, limit: usize) -> io::Result<usize> {
        let want = self.capacity.saturating_sub(self.data.len()).min(limit);
        let start = self.data.len();
        self.data.resize(start + want, 0);
        match stream.try_read(&mut self.data[start..]) {
            Ok(read) => {
                self.data.truncate(start + read);
                Ok(read)
            }
            Err(err) => {
                self.data.truncate(start);
                Err(err)
            }
        }
    }

    /// Non-blocking write of the front of the buffer.
    pub fn drain_to(&mut self, stream: &TcpStream) -> io::Result<usize> {
        match stream.try_write(&self.data) {
            Ok(written) => {
                self.data.drain(..written);
                Ok(written)
            }
            Err(err) => Err(err),
        }
    }
}
