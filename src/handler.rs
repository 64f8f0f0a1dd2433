//! Request handling: path → cache → validators → representation → response.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheEntry};
use crate::compress::{acceptable, Codec, CompressionEngine, CompressionError};
use crate::conditional::{format_http_date, is_not_modified};
use crate::config::{ServeMode, ServingConfig};
use crate::error::{Error, ErrorKind, ForbiddenReason, Result};
use crate::mime::{extension_of, mime_type_for};
use crate::path::{check_hidden, resolve};
use crate::store::ContentStore;

const ALLOWED_METHODS: &str = "GET, HEAD";

/// Outcome of offering a request to the engine.
#[derive(Debug)]
pub enum Handled {
    Response(Response<Bytes>),
    /// Not ours; the next handler in the chain should take it.
    Declined,
}

impl Handled {
    pub fn is_declined(&self) -> bool {
        matches!(self, Handled::Declined)
    }

    pub fn into_response(self) -> Option<Response<Bytes>> {
        match self {
            Handled::Response(response) => Some(response),
            Handled::Declined => None,
        }
    }
}

/// A cache entry together with the path it was actually loaded from, which
/// differs from the request after an index fallback.
struct Served {
    path: String,
    entry: Arc<CacheEntry>,
}

pub struct StaticEngine {
    config: ServingConfig,
    store: ContentStore,
    cache: Option<Cache>,
    compressor: CompressionEngine,
}

impl StaticEngine {
    pub fn new(config: ServingConfig) -> Self {
        let store = config.source.clone().into_store();
        let cache = config.cache.enabled.then(|| {
            let cache = Cache::new(config.cache.max_bytes, config.cache.max_entries);
            match &config.on_evict {
                Some(callback) => cache.with_eviction_callback(Arc::clone(callback)),
                None => cache,
            }
        });

        let engine = Self {
            config,
            store,
            cache,
            compressor: CompressionEngine::new(),
        };
        if engine.config.preload_on_start {
            engine.preload();
        }
        engine
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    /// `None` when caching is disabled.
    pub fn cache(&self) -> Option<&Cache> {
        self.cache.as_ref()
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn handle<B>(&self, request: &Request<B>) -> Handled {
        let method = request.method();
        let head = method == Method::HEAD;
        if method != Method::GET && !head {
            if self.is_middleware() {
                return Handled::Declined;
            }
            let mut response =
                text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", false);
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            return Handled::Response(response);
        }

        let decoded = match percent_decode_str(request.uri().path()).decode_utf8() {
            Ok(decoded) => decoded,
            Err(_) => {
                debug!(path = request.uri().path(), "path is not valid UTF-8");
                return Handled::Response(text_response(StatusCode::FORBIDDEN, "Forbidden", head));
            }
        };

        let requested = match self.strip_prefix(&decoded) {
            Some(rel) => rel,
            None => return self.not_found(head),
        };
        let requested = match (&self.config.index_file, requested.trim_matches('/').is_empty()) {
            (Some(index), true) => index.as_str(),
            _ => requested,
        };

        if let ServeMode::Middleware { extensions } = &self.config.mode {
            let wanted = extension_of(requested)
                .map_or(false, |ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)));
            if !wanted {
                return Handled::Declined;
            }
        }

        let served = match self.admit(requested).and_then(|path| self.lookup(path)) {
            Ok(served) => served,
            Err(err) => return self.error_response(err, head),
        };

        Handled::Response(self.respond(request.headers(), &served, head))
    }

    fn is_middleware(&self) -> bool {
        self.config.mode.is_middleware()
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        let prefix = self.config.prefix.as_str();
        if prefix.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(prefix)?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// Path resolution, hidden-file policy and the admission hook, in that
    /// order. Nothing is read until all three pass.
    fn admit(&self, requested: &str) -> Result<String> {
        let policy = &self.config.path_policy;
        let resolved = resolve(self.store.root(), requested, policy)?;
        check_hidden(&resolved, policy.hidden)?;

        if let Some(admission) = &self.config.admission {
            if !admission(&resolved) {
                return Err(Error::forbidden(resolved, ForbiddenReason::Rejected));
            }
        }
        Ok(resolved)
    }

    fn lookup(&self, resolved: String) -> Result<Served> {
        match self.load(&resolved) {
            Ok(entry) => Ok(Served { path: resolved, entry }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let index = match (&self.config.index_file, self.config.spa_fallback) {
                    (Some(index), true) if *index != resolved => index,
                    _ => return Err(err),
                };
                debug!(path = %resolved, fallback = %index, "not found, serving index document");
                let entry = self.load(index)?;
                Ok(Served {
                    path: index.clone(),
                    entry,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn load(&self, path: &str) -> Result<Arc<CacheEntry>> {
        let read = || {
            self.store
                .read(path)
                .map(|content| CacheEntry::new(path, content))
        };
        match &self.cache {
            Some(cache) => cache.get_or_load(path, read),
            None => read().map(Arc::new),
        }
    }

    fn respond(&self, request_headers: &HeaderMap, served: &Served, head: bool) -> Response<Bytes> {
        let level = self.config.compression.level;
        self.respond_with(request_headers, served, head, |codec, raw| {
            self.compressor.compress(codec, raw, level)
        })
    }

    fn respond_with<C>(
        &self,
        request_headers: &HeaderMap,
        served: &Served,
        head: bool,
        compress: C,
    ) -> Response<Bytes>
    where
        C: Fn(Codec, &[u8]) -> std::result::Result<Bytes, CompressionError>,
    {
        let entry = &served.entry;
        let etag = self.config.use_etag.then(|| entry.fingerprint());

        if self.config.conditional && is_not_modified(request_headers, etag, entry.modified()) {
            let mut response = Response::new(Bytes::new());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            self.insert_validators(response.headers_mut(), entry);
            return response;
        }

        let content_type = mime_type_for(&served.path, &self.config.mime_overrides);
        let (body, encoding) = self.select_body(request_headers, served, compress);

        let mut response = Response::new(Bytes::new());
        let headers = response.headers_mut();
        insert_header(headers, header::CONTENT_TYPE, &content_type);
        self.insert_validators(headers, entry);
        if let Some(codec) = encoding {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(codec.token()));
            headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        if !head {
            *response.body_mut() = body;
        }
        response
    }

    /// Walks the accepted codecs in server priority order and takes the first
    /// compressed form that beats the raw size. A codec that fails or does
    /// not shrink the body is skipped; with none left the raw bytes go out.
    fn select_body<C>(
        &self,
        request_headers: &HeaderMap,
        served: &Served,
        compress: C,
    ) -> (Bytes, Option<Codec>)
    where
        C: Fn(Codec, &[u8]) -> std::result::Result<Bytes, CompressionError>,
    {
        let entry = &served.entry;
        let settings = &self.config.compression;
        if !settings.enabled || entry.size() == 0 || entry.size() < settings.min_size {
            return (entry.raw().clone(), None);
        }

        let accept = request_headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|value| value.to_str().ok());

        for codec in acceptable(accept, &settings.codecs) {
            match entry.compressed_or_init(codec, |raw| compress(codec, raw)) {
                Ok(Some(bytes)) => return (bytes.clone(), Some(codec)),
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        path = %served.path,
                        error = %e,
                        "compression failed, trying next coding"
                    );
                }
            }
        }
        (entry.raw().clone(), None)
    }

    fn insert_validators(&self, headers: &mut HeaderMap, entry: &CacheEntry) {
        insert_header(headers, header::LAST_MODIFIED, &format_http_date(entry.modified()));
        if self.config.use_etag {
            insert_header(headers, header::ETAG, entry.fingerprint());
        }
        if let Some(cache_control) = &self.config.cache_control {
            insert_header(headers, header::CACHE_CONTROL, cache_control);
        }
    }

    fn error_response(&self, err: Error, head: bool) -> Handled {
        match err {
            Error::Forbidden { path, reason } => {
                debug!(path = %path, %reason, "forbidden");
                Handled::Response(text_response(StatusCode::FORBIDDEN, "Forbidden", head))
            }
            Error::NotFound { path } => {
                debug!(path = %path, "not found");
                self.not_found(head)
            }
        }
    }

    fn not_found(&self, head: bool) -> Handled {
        if self.is_middleware() {
            return Handled::Declined;
        }

        let custom = self
            .config
            .custom_404
            .as_deref()
            .and_then(|page| self.load(page).ok().map(|entry| (page, entry)));
        match custom {
            Some((page, entry)) => {
                let body = entry.raw().clone();
                let mut response = Response::new(Bytes::new());
                *response.status_mut() = StatusCode::NOT_FOUND;
                let headers = response.headers_mut();
                insert_header(
                    headers,
                    header::CONTENT_TYPE,
                    &mime_type_for(page, &self.config.mime_overrides),
                );
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                if !head {
                    *response.body_mut() = body;
                }
                Handled::Response(response)
            }
            None => Handled::Response(text_response(StatusCode::NOT_FOUND, "File not found", head)),
        }
    }

    /// Loads every servable file into the cache. Returns how many entries
    /// were loaded; zero when caching is disabled.
    pub fn preload(&self) -> usize {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return 0,
        };

        let mut loaded = 0;
        let mut skipped = 0;
        for file in self.store.list_files() {
            let admitted = resolve(self.store.root(), &file, &self.config.path_policy)
                .and_then(|path| check_hidden(&path, self.config.path_policy.hidden).map(|_| path));
            let path = match admitted {
                Ok(path) => path,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            match self.load(&path) {
                Ok(_) if cache.contains(&path) => loaded += 1,
                _ => skipped += 1,
            }
        }

        info!(
            loaded,
            skipped,
            bytes = cache.size_bytes(),
            "cache preloaded"
        );
        loaded
    }

    /// Drops every cached entry.
    pub fn reset_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("cache cleared");
        }
    }

    /// Clears the cache, then preloads it again from the store.
    pub fn reload_cache(&self) -> usize {
        self.reset_cache();
        self.preload()
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, value, "dropping invalid header value"),
    }
}

fn text_response(status: StatusCode, message: &'static str, head: bool) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(message.len()));
    if !head {
        *response.body_mut() = Bytes::from_static(message.as_bytes());
    }
    response
}
