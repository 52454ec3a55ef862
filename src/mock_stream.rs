use std::cmp::min;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::sync::{Arc, Mutex};

/// Everything a test wrote through its [`MockStream`], shared so it stays
/// inspectable after the stream has been boxed into a client.
pub type WrittenBuf = Arc<Mutex<Vec<u8>>>;

/// A scripted `Read + Write` stand-in for a server socket.
pub struct MockStream {
    read_buf: Vec<u8>,
    read_pos: usize,
    written: WrittenBuf,
    err_on_read: bool,
}

impl MockStream {
    pub fn new(read_buf: Vec<u8>) -> MockStream {
        MockStream {
            read_buf,
            read_pos: 0,
            written: Arc::new(Mutex::new(Vec::new())),
            err_on_read: false,
        }
    }

    pub fn new_err() -> MockStream {
        MockStream {
            read_buf: Vec::new(),
            read_pos: 0,
            written: Arc::new(Mutex::new(Vec::new())),
            err_on_read: true,
        }
    }

    /// Handle onto the write side; clone it before boxing the stream.
    pub fn written(&self) -> WrittenBuf {
        Arc::clone(&self.written)
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.err_on_read {
            return Err(Error::new(ErrorKind::Other, "MockStream error"));
        }
        if self.read_pos >= self.read_buf.len() {
            return Ok(0);
        }
        let len = min(buf.len(), self.read_buf.len() - self.read_pos);
        buf[..len].copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + len]);
        self.read_pos += len;
        Ok(len)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.written
            .lock()
            .expect("mock write buffer")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
