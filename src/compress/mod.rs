//! Compression engine: codecs, pooled scratch state and `Accept-Encoding`
//! negotiation.

mod negotiate;
mod pool;

use std::fmt;
use std::io::{self, Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub use negotiate::{acceptable, negotiate, AcceptEncoding};
pub use pool::{Pool, Pooled};

const GZIP_LEVELS: (i32, i32) = (1, 9);
const MAX_IDLE: usize = 16;
// Scratch buffers above this capacity are not kept around after use.
const MAX_POOLED_CAPACITY: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Zstd,
    Gzip,
}

impl Codec {
    pub const ALL: [Codec; 2] = [Codec::Zstd, Codec::Gzip];

    /// `Content-Encoding` / `Accept-Encoding` token.
    pub fn token(self) -> &'static str {
        match self {
            Codec::Zstd => "zstd",
            Codec::Gzip => "gzip",
        }
    }

    pub fn from_token(token: &str) -> Option<Codec> {
        Codec::ALL
            .into_iter()
            .find(|codec| codec.token().eq_ignore_ascii_case(token.trim()))
    }

    /// Out-of-range levels are clamped, never rejected.
    pub fn clamp_level(self, level: i32) -> i32 {
        match self {
            Codec::Gzip => level.clamp(GZIP_LEVELS.0, GZIP_LEVELS.1),
            Codec::Zstd => level.clamp(1, *zstd::compression_level_range().end()),
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Codec::Zstd => 0,
            Codec::Gzip => 1,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{codec} failed: {source}")]
pub struct CompressionError {
    pub codec: Codec,
    #[source]
    pub source: io::Error,
}

impl CompressionError {
    pub fn new(codec: Codec, source: io::Error) -> Self {
        Self { codec, source }
    }
}

/// Owns the reusable encoder state. One instance is shared by every request
/// the engine serves.
pub struct CompressionEngine {
    scratch: Pool<Vec<u8>>,
    zstd: Pool<zstd::bulk::Compressor<'static>>,
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionEngine {
    pub fn new() -> Self {
        Self {
            scratch: Pool::new(MAX_IDLE),
            zstd: Pool::new(MAX_IDLE),
        }
    }

    /// Deterministic for a given `(codec, data, level)`.
    pub fn compress(
        &self,
        codec: Codec,
        data: &[u8],
        level: i32,
    ) -> Result<Bytes, CompressionError> {
        let level = codec.clamp_level(level);
        let mut scratch = self.scratch.take(Vec::new);
        scratch.clear();

        let result = match codec {
            Codec::Gzip => self.gzip_into(&mut scratch, data, level),
            Codec::Zstd => self.zstd_into(&mut scratch, data, level),
        };

        let compressed = Bytes::copy_from_slice(&scratch);
        if scratch.capacity() > MAX_POOLED_CAPACITY {
            scratch.discard();
        }

        result.map(|_| compressed)
    }

    fn gzip_into(
        &self,
        out: &mut Vec<u8>,
        data: &[u8],
        level: i32,
    ) -> Result<(), CompressionError> {
        let buf = std::mem::take(out);
        let mut encoder = GzEncoder::new(buf, Compression::new(level as u32));
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::new(Codec::Gzip, e))?;
        *out = encoder
            .finish()
            .map_err(|e| CompressionError::new(Codec::Gzip, e))?;
        Ok(())
    }

    fn zstd_into(
        &self,
        out: &mut Vec<u8>,
        data: &[u8],
        level: i32,
    ) -> Result<(), CompressionError> {
        let wrap = |e: io::Error| CompressionError::new(Codec::Zstd, e);

        let mut compressor = self
            .zstd
            .try_take(|| zstd::bulk::Compressor::new(level))
            .map_err(wrap)?;
        if let Err(e) = compressor.set_compression_level(level) {
            compressor.discard();
            return Err(wrap(e));
        }

        out.reserve(zstd::zstd_safe::compress_bound(data.len()));
        let written = compressor.compress_to_buffer(data, out);
        match written {
            Ok(_) => Ok(()),
            Err(e) => {
                compressor.discard();
                Err(wrap(e))
            }
        }
    }

    pub fn decompress(&self, codec: Codec, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match codec {
            Codec::Gzip => {
                let mut out = Vec::with_capacity(data.len() * 2);
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| CompressionError::new(Codec::Gzip, e))?;
                Ok(out)
            }
            Codec::Zstd => {
                zstd::stream::decode_all(data).map_err(|e| CompressionError::new(Codec::Zstd, e))
            }
        }
    }

    pub fn idle_buffers(&self) -> usize {
        self.scratch.idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_clamp_per_codec() {
        assert_eq!(Codec::Gzip.clamp_level(0), 1);
        assert_eq!(Codec::Gzip.clamp_level(42), 9);
        assert_eq!(Codec::Gzip.clamp_level(6), 6);
        assert_eq!(Codec::Zstd.clamp_level(-5), 1);
        assert_eq!(
            Codec::Zstd.clamp_level(1000),
            *zstd::compression_level_range().end()
        );
    }

    #[test]
    fn tokens_round_trip() {
        for codec in Codec::ALL {
            assert_eq!(Codec::from_token(codec.token()), Some(codec));
        }
        assert_eq!(Codec::from_token(" GZIP "), Some(Codec::Gzip));
        assert_eq!(Codec::from_token("br"), None);
    }

    #[test]
    fn output_is_deterministic() {
        let engine = CompressionEngine::new();
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(64);
        for codec in Codec::ALL {
            let a = engine.compress(codec, &data, 3).unwrap();
            let b = engine.compress(codec, &data, 3).unwrap();
            assert_eq!(a, b, "{codec} output changed between runs");
            assert!(a.len() < data.len());
        }
    }

    #[test]
    fn scratch_buffers_are_returned() {
        let engine = CompressionEngine::new();
        engine.compress(Codec::Gzip, b"abc", 1).unwrap();
        assert_eq!(engine.idle_buffers(), 1);
        engine.compress(Codec::Zstd, b"abc", 1).unwrap();
        assert_eq!(engine.idle_buffers(), 1);
    }
}
