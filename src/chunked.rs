//! HTTP chunked transfer-encoding reader.
//!
//! Grounded on `original_source/opendrop/server.py`'s `HTTPChunkedReader`:
//! read a hex length line, read exactly that many octets, consume the
//! trailing CRLF, repeat until a zero-length chunk. Implemented here as a
//! `std::io::Read` adapter (SPEC_FULL §9: "implement as a readable stream
//! adapter") so it composes directly with `flate2::read::GzDecoder` and the
//! CPIO extractor without ever buffering the whole body.
//!
//! This type is synchronous by design: the server runs it inside
//! `spawn_blocking` over a `tokio_util::io::SyncIoBridge` wrapping the
//! already-async-buffered TLS connection, so the blocking reads here never
//! block the async runtime's other tasks.

use std::io::{self, BufRead, Read};

pub struct ChunkedBodyReader<R> {
    inner: R,
    remaining_in_chunk: usize,
    finished: bool,
}

impl<R: BufRead> ChunkedBodyReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            remaining_in_chunk: 0,
            finished: false,
        }
    }

    fn read_chunk_size(&mut self) -> io::Result<usize> {
        let mut line = String::new();
        self.inner.read_line(&mut line)?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        usize::from_str_radix(trimmed.trim(), 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad chunk size"))
    }

    fn consume_trailing_crlf(&mut self) -> io::Result<()> {
        let mut crlf = [0u8; 2];
        self.inner.read_exact(&mut crlf)
    }
}

impl<R: BufRead> Read for ChunkedBodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }

        if self.remaining_in_chunk == 0 {
            let size = self.read_chunk_size()?;
            if size == 0 {
                // A zero-length chunk also carries a trailing CRLF.
                self.consume_trailing_crlf().ok();
                self.finished = true;
                return Ok(0);
            }
            self.remaining_in_chunk = size;
        }

        let to_read = buf.len().min(self.remaining_in_chunk);
        let n = self.inner.read(&mut buf[..to_read])?;
        self.remaining_in_chunk -= n;

        if self.remaining_in_chunk == 0 {
            self.consume_trailing_crlf()?;
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn decodes_multiple_chunks() {
        let wire = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let mut reader = ChunkedBodyReader::new(Cursor::new(wire.to_vec()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn empty_body_is_just_the_terminator() {
        let wire = b"0\r\n\r\n";
        let mut reader = ChunkedBodyReader::new(Cursor::new(wire.to_vec()));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
