//! Counting response bodies without keeping them.
//!
//! When gzip was requested and the server answered with `Content-Encoding: gzip`,
//! the count is of decoded bytes. Decoding streams through the decoder's fixed
//! buffer into a sink that only adds up lengths.

use std::io::{self, Write};

use flate2::write::GzDecoder;
use http::{header::CONTENT_ENCODING, HeaderMap};

/// Adds up the length of everything written to it and drops the bytes.
#[derive(Debug, Default)]
struct Tally(u64);

impl Write for Tally {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Count {
    Wire(u64),
    Gzip { decoder: GzDecoder<Tally>, fed: bool },
}

pub struct BodyCounter(Count);

impl BodyCounter {
    /// Picks wire or decoded counting for a response with these headers.
    pub fn new(headers: &HeaderMap, decode_gzip: bool) -> Self {
        if decode_gzip && is_gzip(headers) {
            BodyCounter(Count::Gzip {
                decoder: GzDecoder::new(Tally::default()),
                fed: false,
            })
        } else {
            BodyCounter(Count::Wire(0))
        }
    }

    pub fn is_decoding(&self) -> bool {
        matches!(self.0, Count::Gzip { .. })
    }

    pub fn feed(&mut self, chunk: &[u8]) -> io::Result<()> {
        match &mut self.0 {
            Count::Wire(count) => {
                *count += chunk.len() as u64;
                Ok(())
            }
            Count::Gzip { decoder, fed } => {
                *fed |= !chunk.is_empty();
                decoder.write_all(chunk)
            }
        }
    }

    /// The final count. A gzip stream that ended early is an error.
    pub fn finish(self) -> io::Result<u64> {
        match self.0 {
            Count::Wire(count) => Ok(count),
            // an empty body has no gzip header to check
            Count::Gzip { fed: false, .. } => Ok(0),
            Count::Gzip { decoder, .. } => decoder.finish().map(|tally| tally.0),
        }
    }
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
}
