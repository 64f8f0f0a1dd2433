//! Engine configuration.
//!
//! Everything here is supplied by the caller; the library never reads the
//! environment or config files on its own.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::cache::EvictionCallback;
use crate::compress::Codec;
use crate::path::{HiddenFiles, PathPolicy};
use crate::store::{ContentStore, EmbeddedArchive};

pub const DEFAULT_MAX_CACHE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 500;
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=60";
pub const DEFAULT_INDEX_FILE: &str = "index.html";

/// Extensions a middleware-mode engine will look at by default.
pub const DEFAULT_STATIC_EXTENSIONS: &[&str] = &[
    "html", "htm", "js", "mjs", "css", "scss", "less", "json", "map", "woff", "woff2", "ttf",
    "eot", "otf", "svg", "png", "jpg", "jpeg", "gif", "ico", "webp", "avif", "wasm", "txt", "md",
    "xml", "pdf", "zip", "gz", "tar",
];

/// Request admission hook: receives the resolved path, returns `false` to
/// answer 403.
pub type AdmissionCallback = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub enum Source {
    Directory(PathBuf),
    Archive(EmbeddedArchive),
}

impl Source {
    pub(crate) fn into_store(self) -> ContentStore {
        match self {
            Source::Directory(root) => ContentStore::filesystem(root),
            Source::Archive(archive) => ContentStore::archive(archive),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeMode {
    /// The engine owns the route: misses become 404.
    Terminal,
    /// The engine sits in front of other handlers and declines what it
    /// cannot serve.
    Middleware { extensions: Vec<String> },
}

impl ServeMode {
    pub fn middleware() -> Self {
        ServeMode::Middleware {
            extensions: DEFAULT_STATIC_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    pub fn is_middleware(&self) -> bool {
        matches!(self, ServeMode::Middleware { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionSettings {
    pub enabled: bool,
    /// Server priority order used to break ties between acceptable codecs.
    pub codecs: Vec<Codec>,
    pub level: i32,
    /// Files smaller than this are always sent as-is.
    pub min_size: u64,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            codecs: Codec::ALL.to_vec(),
            level: 1,
            min_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_bytes: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: DEFAULT_MAX_CACHE_BYTES,
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
        }
    }
}

#[derive(Clone)]
pub struct ServingConfig {
    pub source: Source,
    pub prefix: String,
    pub cache: CacheSettings,
    pub compression: CompressionSettings,
    pub conditional: bool,
    pub use_etag: bool,
    pub cache_control: Option<String>,
    pub index_file: Option<String>,
    pub spa_fallback: bool,
    pub path_policy: PathPolicy,
    pub custom_404: Option<String>,
    pub mime_overrides: FxHashMap<String, String>,
    pub mode: ServeMode,
    pub preload_on_start: bool,
    pub on_evict: Option<EvictionCallback>,
    pub admission: Option<AdmissionCallback>,
}

impl ServingConfig {
    fn with_source(source: Source) -> Self {
        Self {
            source,
            prefix: String::new(),
            cache: CacheSettings::default(),
            compression: CompressionSettings::default(),
            conditional: true,
            use_etag: true,
            cache_control: Some(DEFAULT_CACHE_CONTROL.to_string()),
            index_file: Some(DEFAULT_INDEX_FILE.to_string()),
            spa_fallback: false,
            path_policy: PathPolicy::default(),
            custom_404: None,
            mime_overrides: FxHashMap::default(),
            mode: ServeMode::Terminal,
            preload_on_start: false,
            on_evict: None,
            admission: None,
        }
    }

    pub fn directory(root: impl Into<PathBuf>) -> Self {
        Self::with_source(Source::Directory(root.into()))
    }

    pub fn archive(archive: EmbeddedArchive) -> Self {
        Self::with_source(Source::Archive(archive))
    }

    /// URL prefix the engine is mounted under, e.g. `/static`.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache.enabled = enabled;
        self
    }

    pub fn with_cache_limits(mut self, max_bytes: u64, max_entries: usize) -> Self {
        self.cache.max_bytes = max_bytes;
        self.cache.max_entries = max_entries;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression.enabled = enabled;
        self
    }

    pub fn with_codecs(mut self, codecs: &[Codec]) -> Self {
        let mut ordered: Vec<Codec> = Vec::with_capacity(codecs.len());
        for codec in codecs {
            if !ordered.contains(codec) {
                ordered.push(*codec);
            }
        }
        self.compression.codecs = ordered;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression.level = level;
        self
    }

    pub fn with_compression_min_size(mut self, min_size: u64) -> Self {
        self.compression.min_size = min_size;
        self
    }

    pub fn with_conditional(mut self, enabled: bool) -> Self {
        self.conditional = enabled;
        self
    }

    pub fn with_etag(mut self, enabled: bool) -> Self {
        self.use_etag = enabled;
        self
    }

    /// `None` suppresses the `Cache-Control` header.
    pub fn with_cache_control(mut self, value: Option<&str>) -> Self {
        self.cache_control = value.map(str::to_string);
        self
    }

    pub fn with_index_file(mut self, index: Option<&str>) -> Self {
        self.index_file = index.map(|name| name.trim_start_matches('/').to_string());
        self
    }

    /// Serve the index document for any path the store does not have.
    pub fn with_spa_fallback(mut self, enabled: bool) -> Self {
        self.spa_fallback = enabled;
        self
    }

    pub fn with_hidden_files(mut self, hidden: HiddenFiles) -> Self {
        self.path_policy.hidden = hidden;
        self
    }

    pub fn with_name_validation(mut self, enabled: bool) -> Self {
        self.path_policy.validate_names = enabled;
        self
    }

    pub fn with_custom_404(mut self, path: &str) -> Self {
        self.custom_404 = Some(path.trim_start_matches('/').to_string());
        self
    }

    /// Maps an extension (with or without the leading dot) to a content type,
    /// taking precedence over the built-in table.
    pub fn with_mime_type(mut self, extension: &str, content_type: &str) -> Self {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.mime_overrides.insert(ext, content_type.to_string());
        self
    }

    pub fn with_mode(mut self, mode: ServeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_preload(mut self, enabled: bool) -> Self {
        self.preload_on_start = enabled;
        self
    }

    pub fn with_eviction_callback(
        mut self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_evict = Some(Arc::new(callback));
        self
    }

    pub fn with_admission(
        mut self,
        callback: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.admission = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ServingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServingConfig")
            .field("source", &self.source)
            .field("prefix", &self.prefix)
            .field("cache", &self.cache)
            .field("compression", &self.compression)
            .field("conditional", &self.conditional)
            .field("use_etag", &self.use_etag)
            .field("cache_control", &self.cache_control)
            .field("index_file", &self.index_file)
            .field("spa_fallback", &self.spa_fallback)
            .field("path_policy", &self.path_policy)
            .field("custom_404", &self.custom_404)
            .field("mime_overrides", &self.mime_overrides)
            .field("mode", &self.mode)
            .field("preload_on_start", &self.preload_on_start)
            .field("on_evict", &self.on_evict.is_some())
            .field("admission", &self.admission.is_some())
            .finish()
    }
}
