use crate::conn::WireConn;
use crate::error::ArborResult;
use crossbeam::channel::{Receiver, Sender};
use std::io::{self, Cursor, Read, Write};

/// scripted input plus captured output, for single-ended codec tests
pub struct MemStream {
    input: Cursor<Vec<u8>>,
    pub output: Vec<u8>,
}

impl MemStream {
    pub fn new(input: &[u8]) -> Self {
        Self { input: Cursor::new(input.to_vec()), output: vec![] }
    }
}

impl Read for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MemStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// serialize through a connection and return the raw bytes put on the wire
pub fn wire_to_bytes(
    f: impl FnOnce(&mut WireConn<MemStream>) -> ArborResult<()>,
) -> ArborResult<Vec<u8>> {
    let mut conn = WireConn::new(MemStream::new(b""));
    f(&mut conn)?;
    conn.flush()?;
    Ok(conn.into_inner().output)
}

/// a connection whose inbound bytes are scripted up front
pub fn conn_over(input: &[u8]) -> WireConn<MemStream> {
    WireConn::new(MemStream::new(input))
}

/// one end of a blocking in-memory duplex stream
///
/// reads block until the peer writes; dropping an end surfaces EOF on the
/// other side, which the connection reports as closed
pub struct PipeEnd {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

pub fn pipe() -> (PipeEnd, PipeEnd) {
    let (atx, arx) = crossbeam::channel::unbounded();
    let (btx, brx) = crossbeam::channel::unbounded();
    let a = PipeEnd { tx: atx, rx: brx, pending: vec![], pos: 0 };
    let b = PipeEnd { tx: btx, rx: arx, pending: vec![], pos: 0 };
    (a, b)
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                // peer dropped, clean EOF
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
