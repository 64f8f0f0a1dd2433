use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use once_cell::sync::OnceCell;
use rustc_hash::FxHasher;

use crate::compress::{Codec, CompressionError};
use crate::store::Content;

/// What a compression attempt left behind for one codec.
#[derive(Debug, Clone)]
pub enum Variant {
    Compressed(Bytes),
    /// The codec did not beat the raw size; serve identity.
    NotSmaller,
}

/// One cached file.
///
/// Raw bytes, timestamp and fingerprint are fixed at construction. The only
/// later mutations are the access stamp and the one-time attachment of each
/// codec's compressed form.
#[derive(Debug)]
pub struct CacheEntry {
    raw: Bytes,
    modified: SystemTime,
    fingerprint: String,
    last_accessed: AtomicU64,
    variants: [OnceCell<Variant>; 2],
}

impl CacheEntry {
    pub fn new(key: &str, content: Content) -> Self {
        let fingerprint = fingerprint(key, content.bytes.len() as u64, content.modified);
        Self {
            raw: content.bytes,
            modified: content.modified,
            fingerprint,
            last_accessed: AtomicU64::new(0),
            variants: [OnceCell::new(), OnceCell::new()],
        }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Bytes counted against the cache bound.
    pub fn size(&self) -> u64 {
        self.raw.len() as u64
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Quoted ETag value.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, stamp: u64) {
        self.last_accessed.fetch_max(stamp, Ordering::Relaxed);
    }

    /// The compressed form for `codec`, if it has been produced already.
    pub fn compressed(&self, codec: Codec) -> Option<&Bytes> {
        match self.variants[codec.index()].get() {
            Some(Variant::Compressed(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Runs `compress` at most once per codec across all threads. A failed
    /// attempt attaches nothing, so a later request may try again.
    pub fn compressed_or_init(
        &self,
        codec: Codec,
        compress: impl FnOnce(&[u8]) -> Result<Bytes, CompressionError>,
    ) -> Result<Option<&Bytes>, CompressionError> {
        let variant = self.variants[codec.index()].get_or_try_init(|| {
            let compressed = compress(&self.raw)?;
            if compressed.len() < self.raw.len() {
                Ok(Variant::Compressed(compressed))
            } else {
                Ok(Variant::NotSmaller)
            }
        })?;

        Ok(match variant {
            Variant::Compressed(bytes) => Some(bytes),
            Variant::NotSmaller => None,
        })
    }
}

/// Derives the ETag from size, modification time and path. Stable across
/// restarts for an unchanged file; no content hashing.
pub fn fingerprint(path: &str, size: u64, modified: SystemTime) -> String {
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut hasher = FxHasher::default();
    size.hash(&mut hasher);
    nanos.hash(&mut hasher);
    path.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn content(data: &'static [u8], secs: u64) -> Content {
        Content {
            bytes: Bytes::from_static(data),
            modified: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn fingerprint_is_quoted_and_stable() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let a = fingerprint("app.js", 2000, t);
        assert_eq!(a, fingerprint("app.js", 2000, t));
        assert!(a.starts_with('"') && a.ends_with('"'));
        assert_eq!(a.len(), 18);
    }

    #[test]
    fn fingerprint_tracks_each_input() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let base = fingerprint("app.js", 2000, t);
        assert_ne!(base, fingerprint("app.js", 2001, t));
        assert_ne!(base, fingerprint("app.js", 2000, t + Duration::from_nanos(1)));
        assert_ne!(base, fingerprint("main.js", 2000, t));
    }

    #[test]
    fn compression_runs_once_per_codec() {
        let entry = CacheEntry::new("a.txt", content(&[b'a'; 40], 1));
        let mut calls = 0;
        for _ in 0..3 {
            let got = entry
                .compressed_or_init(Codec::Gzip, |_| {
                    calls += 1;
                    Ok(Bytes::from_static(b"tiny"))
                })
                .unwrap();
            assert_eq!(got.map(|b| &b[..]), Some(&b"tiny"[..]));
        }
        assert_eq!(calls, 1);
        assert!(entry.compressed(Codec::Zstd).is_none());
    }

    #[test]
    fn larger_output_is_not_attached() {
        let entry = CacheEntry::new("a.txt", content(b"ab", 1));
        let got = entry
            .compressed_or_init(Codec::Zstd, |_| Ok(Bytes::from_static(b"much longer")))
            .unwrap();
        assert!(got.is_none());
        assert!(entry.compressed(Codec::Zstd).is_none());
    }

    #[test]
    fn failed_compression_can_retry() {
        let entry = CacheEntry::new("a.txt", content(b"aaaaaaaaaaaaaaaa", 1));
        let failed = entry.compressed_or_init(Codec::Gzip, |_| {
            Err(CompressionError {
                codec: Codec::Gzip,
                source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
            })
        });
        assert!(failed.is_err());

        let ok = entry
            .compressed_or_init(Codec::Gzip, |_| Ok(Bytes::from_static(b"x")))
            .unwrap();
        assert!(ok.is_some());
    }
}
