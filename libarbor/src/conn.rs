use crate::error::{ArborError, ArborResult};
use std::io::{Read, Write};

/// capacity of each direction's buffer
pub const BUF_CAPACITY: usize = 4096;

/// a stateful endpoint bound to one bidirectional byte stream
///
/// buffered in both directions; the read path always drains the write buffer
/// before blocking, otherwise interleaved request/response traffic deadlocks
/// when both peers hold pending outbound data
pub struct WireConn<S> {
    stream: S,
    read_buf: Box<[u8]>,
    read_ptr: usize,
    read_end: usize,
    write_buf: Box<[u8]>,
    write_pos: usize,
}

impl<S: Read + Write> WireConn<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: vec![0; BUF_CAPACITY].into_boxed_slice(),
            read_ptr: 0,
            read_end: 0,
            write_buf: vec![0; BUF_CAPACITY].into_boxed_slice(),
            write_pos: 0,
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// drain the write buffer to the stream, accumulating short writes
    fn flush_write_buf(&mut self) -> ArborResult<()> {
        let mut written = 0;
        while written < self.write_pos {
            let n = self.stream.write(&self.write_buf[written..self.write_pos])?;
            ensure!(n > 0, "stream accepted zero bytes while flushing");
            written += n;
        }
        self.write_pos = 0;
        Ok(())
    }

    /// flush buffered output through to the stream
    pub fn flush(&mut self) -> ArborResult<()> {
        self.flush_write_buf()?;
        self.stream.flush()?;
        Ok(())
    }

    fn write_direct(&mut self, mut data: &[u8]) -> ArborResult<()> {
        while !data.is_empty() {
            let n = self.stream.write(data)?;
            ensure!(n > 0, "stream accepted zero bytes");
            data = &data[n..];
        }
        Ok(())
    }

    /// buffered write; oversized payloads bypass the buffer after a flush
    pub(crate) fn write(&mut self, mut data: &[u8]) -> ArborResult<()> {
        while !data.is_empty() {
            if self.write_pos == self.write_buf.len() {
                self.flush_write_buf()?;
            }
            if self.write_pos == 0 && data.len() >= self.write_buf.len() {
                // no point staging a payload larger than the buffer
                return self.write_direct(data);
            }
            let room = self.write_buf.len() - self.write_pos;
            let n = room.min(data.len());
            self.write_buf[self.write_pos..self.write_pos + n].copy_from_slice(&data[..n]);
            self.write_pos += n;
            data = &data[n..];
        }
        Ok(())
    }

    /// refill the empty read buffer; zero bytes from the stream means the peer
    /// hung up mid-frame
    fn fill_read_buf(&mut self) -> ArborResult<()> {
        assert_eq!(self.read_ptr, self.read_end, "refilling a non-empty read buffer");
        // the peer may be waiting on our pending output before it can reply
        self.flush()?;
        let n = self.stream.read(&mut self.read_buf)?;
        if n == 0 {
            return Err(ArborError::ConnectionClosed.into());
        }
        self.read_ptr = 0;
        self.read_end = n;
        Ok(())
    }

    pub(crate) fn getchar(&mut self) -> ArborResult<u8> {
        if self.read_ptr == self.read_end {
            self.fill_read_buf()?;
        }
        let byte = self.read_buf[self.read_ptr];
        self.read_ptr += 1;
        Ok(byte)
    }

    /// advance past space/newline bytes and return the first item byte
    pub(crate) fn getchar_skip_whitespace(&mut self) -> ArborResult<u8> {
        loop {
            match self.getchar()? {
                b' ' | b'\n' => continue,
                byte => return Ok(byte),
            }
        }
    }

    /// read exactly `remaining` payload bytes, handing each buffered slice to
    /// `sink`; slices do not outlive the call, copy what must be kept
    pub(crate) fn read_exact_with(
        &mut self,
        mut remaining: usize,
        mut sink: impl FnMut(&[u8]),
    ) -> ArborResult<()> {
        while remaining > 0 {
            if self.read_ptr == self.read_end {
                self.fill_read_buf()?;
            }
            let avail = self.read_end - self.read_ptr;
            let n = avail.min(remaining);
            sink(&self.read_buf[self.read_ptr..self.read_ptr + n]);
            self.read_ptr += n;
            remaining -= n;
        }
        Ok(())
    }

    /// bytes currently staged for write, for assertions only
    #[cfg(test)]
    pub(crate) fn pending_write_len(&self) -> usize {
        self.write_pos
    }
}
