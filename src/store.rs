//! Backing sources for file bytes.
//!
//! The variant is chosen once when the engine is built; requests never
//! re-inspect what kind of source they are reading from.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};

// Archive entries carry no timestamps of their own. Whole seconds so the
// value survives a round trip through an HTTP date.
static ARCHIVE_TIMESTAMP: Lazy<SystemTime> = Lazy::new(|| {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    UNIX_EPOCH + Duration::from_secs(secs)
});

/// Whole-file contents plus the timestamp used for validation headers.
#[derive(Debug, Clone)]
pub struct Content {
    pub bytes: Bytes,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub enum ContentStore {
    Filesystem(FsStore),
    Archive(EmbeddedArchive),
}

impl ContentStore {
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        ContentStore::Filesystem(FsStore::new(root))
    }

    pub fn archive(archive: EmbeddedArchive) -> Self {
        ContentStore::Archive(archive)
    }

    /// Root that resolved paths are checked against.
    pub fn root(&self) -> &Path {
        match self {
            ContentStore::Filesystem(fs) => &fs.root,
            ContentStore::Archive(archive) => Path::new(&archive.root),
        }
    }

    /// Reads `rel_path` (already cleaned by the path resolver).
    pub fn read(&self, rel_path: &str) -> Result<Content> {
        match self {
            ContentStore::Filesystem(fs) => fs.read(rel_path),
            ContentStore::Archive(archive) => archive.read(rel_path),
        }
    }

    /// Every servable file, as root-relative `/`-separated paths.
    pub fn list_files(&self) -> Vec<String> {
        match self {
            ContentStore::Filesystem(fs) => fs.list_files(),
            ContentStore::Archive(archive) => archive.list_files(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(&self, rel_path: &str) -> Result<Content> {
        let full_path = self.root.join(rel_path);
        read_file(&full_path).map_err(|err| {
            debug!(path = %full_path.display(), kind = ?err.kind(), "content read failed");
            Error::not_found(rel_path)
        })
    }

    fn list_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        if let Err(e) = discover_files_recursive(&self.root, "", &mut files) {
            debug!(root = %self.root.display(), error = %e, "directory walk stopped early");
        }
        files.sort();
        files
    }
}

fn read_file(path: &Path) -> io::Result<Content> {
    let mut file = File::open(path)?;
    let metadata = file.metadata()?;
    if metadata.is_dir() {
        return Err(io::Error::new(io::ErrorKind::Other, "is a directory"));
    }

    let mut buf = Vec::with_capacity(metadata.len() as usize);
    file.read_to_end(&mut buf)?;

    Ok(Content {
        bytes: Bytes::from(buf),
        modified: metadata.modified().unwrap_or(UNIX_EPOCH),
    })
}

fn discover_files_recursive(
    base_dir: &Path,
    relative_path: &str,
    files: &mut Vec<String>,
) -> io::Result<()> {
    let full_path = if relative_path.is_empty() {
        base_dir.to_path_buf()
    } else {
        base_dir.join(relative_path)
    };

    for entry in fs::read_dir(&full_path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let file_name = entry.file_name().to_string_lossy().to_string();

        let current_relative = if relative_path.is_empty() {
            file_name
        } else {
            format!("{}/{}", relative_path, file_name)
        };

        if file_type.is_file() {
            files.push(current_relative);
        } else if file_type.is_dir() {
            discover_files_recursive(base_dir, &current_relative, files)?;
        }
    }

    Ok(())
}

/// Immutable in-memory file tree, typically built from `include_bytes!`
/// tables at compile time.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedArchive {
    files: FxHashMap<String, Bytes>,
    root: String,
}

impl EmbeddedArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_static(entries: &[(&'static str, &'static [u8])]) -> Self {
        entries
            .iter()
            .fold(Self::new(), |archive, &(path, data)| {
                archive.with_file(path, Bytes::from_static(data))
            })
    }

    pub fn with_file(mut self, path: &str, data: impl Into<Bytes>) -> Self {
        let key = path.trim_start_matches("./").trim_start_matches('/').to_string();
        self.files.insert(key, data.into());
        self
    }

    /// Serves only the sub-tree under `root` (e.g. `dist`).
    pub fn with_root(mut self, root: &str) -> Self {
        self.root = root.trim_matches('/').to_string();
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn full_key(&self, rel_path: &str) -> String {
        if self.root.is_empty() {
            rel_path.to_string()
        } else if rel_path.is_empty() {
            self.root.clone()
        } else {
            format!("{}/{}", self.root, rel_path)
        }
    }

    fn read(&self, rel_path: &str) -> Result<Content> {
        match self.files.get(&self.full_key(rel_path)) {
            Some(bytes) => Ok(Content {
                bytes: bytes.clone(),
                modified: *ARCHIVE_TIMESTAMP,
            }),
            None => {
                debug!(path = rel_path, "archive entry missing");
                Err(Error::not_found(rel_path))
            }
        }
    }

    fn list_files(&self) -> Vec<String> {
        let mut files: Vec<String> = if self.root.is_empty() {
            self.files.keys().cloned().collect()
        } else {
            let prefix = format!("{}/", self.root);
            self.files
                .keys()
                .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
                .collect()
        };
        files.sort();
        files
    }
}
