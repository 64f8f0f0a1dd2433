use std::fmt;

/// Why a path was refused before any content lookup happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// The cleaned path escapes the serving root.
    Traversal,
    /// A segment starts with `.` while hidden files are disabled.
    HiddenFile,
    /// Control characters, embedded separators or a reserved device name.
    InvalidName,
    /// The admission callback declined the request.
    Rejected,
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ForbiddenReason::Traversal => "path escapes root",
            ForbiddenReason::HiddenFile => "hidden file",
            ForbiddenReason::InvalidName => "invalid file name",
            ForbiddenReason::Rejected => "rejected by admission callback",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Forbidden,
    NotFound,
}

/// Outcomes that change the response. Everything else is absorbed inside the
/// engine with a safe fallback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("forbidden: {path} ({reason})")]
    Forbidden {
        path: String,
        reason: ForbiddenReason,
    },
    #[error("not found: {path}")]
    NotFound { path: String },
}

impl Error {
    pub fn forbidden(path: impl Into<String>, reason: ForbiddenReason) -> Self {
        Error::Forbidden {
            path: path.into(),
            reason,
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Forbidden { .. } => ErrorKind::Forbidden,
            Error::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
