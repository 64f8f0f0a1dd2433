use std::path::Path;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

pub const OCTET_STREAM: &str = "application/octet-stream";

static MIME_TYPES: Lazy<FxHashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("html", "text/html; charset=utf-8"),
        ("htm", "text/html; charset=utf-8"),
        ("css", "text/css; charset=utf-8"),
        ("js", "text/javascript; charset=utf-8"),
        ("mjs", "text/javascript; charset=utf-8"),
        ("json", "application/json; charset=utf-8"),
        ("map", "application/json; charset=utf-8"),
        ("xml", "application/xml; charset=utf-8"),
        ("txt", "text/plain; charset=utf-8"),
        ("md", "text/markdown; charset=utf-8"),
        ("ico", "image/x-icon"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("svg", "image/svg+xml"),
        ("webp", "image/webp"),
        ("avif", "image/avif"),
        ("pdf", "application/pdf"),
        ("zip", "application/zip"),
        ("gz", "application/gzip"),
        ("tar", "application/x-tar"),
        ("wasm", "application/wasm"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("ttf", "font/ttf"),
        ("otf", "font/otf"),
        ("eot", "application/vnd.ms-fontobject"),
    ]
    .into_iter()
    .collect()
});

/// Lowercased extension of the final path segment, without the dot.
pub fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Built-in lookup only.
pub fn get_mime_type(file_path: &str) -> &'static str {
    extension_of(file_path)
        .and_then(|ext| MIME_TYPES.get(ext.as_str()).copied())
        .unwrap_or(OCTET_STREAM)
}

/// Resolves the `Content-Type` for `file_path`. Entries in `overrides` (keyed
/// by lowercased extension) win over the built-in table.
pub fn mime_type_for(file_path: &str, overrides: &FxHashMap<String, String>) -> String {
    match extension_of(file_path) {
        Some(ext) => {
            if let Some(custom) = overrides.get(&ext) {
                return custom.clone();
            }
            MIME_TYPES
                .get(ext.as_str())
                .copied()
                .unwrap_or(OCTET_STREAM)
                .to_string()
        }
        None => OCTET_STREAM.to_string(),
    }
}
