//! Request path validation.
//!
//! Paths arrive already percent-decoded. Cleaning is purely lexical: no
//! filesystem access, no symlink resolution.

use std::path::Path;

use crate::error::{Error, ForbiddenReason, Result};

/// Windows device names that may not appear as a file stem.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiddenFiles {
    Allow,
    /// Reject when the final segment starts with `.`.
    DenyLastSegment,
    /// Reject when any segment starts with `.`.
    DenyAnySegment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathPolicy {
    pub hidden: HiddenFiles,
    /// Reject control characters, embedded separators and reserved device names.
    pub validate_names: bool,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self {
            hidden: HiddenFiles::DenyAnySegment,
            validate_names: true,
        }
    }
}

/// Lexically normalizes `path`: unifies separators, drops empty and `.`
/// segments and folds `..` into its parent. Returns `None` if a `..` would
/// climb above the root.
pub fn clean(path: &str) -> Option<String> {
    let mut stack: Vec<&str> = Vec::new();

    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => {
                stack.pop()?;
            }
            _ => stack.push(part),
        }
    }

    Some(stack.join("/"))
}

/// Produces a root-relative path that is safe to join onto `root`.
///
/// The returned string has no leading slash; an empty string denotes the root
/// itself.
pub fn resolve(root: &Path, rel_path: &str, policy: &PathPolicy) -> Result<String> {
    let cleaned =
        clean(rel_path).ok_or_else(|| Error::forbidden(rel_path, ForbiddenReason::Traversal))?;

    // Belt over the lexical pass: the joined path must still live under root.
    let joined = root.join(&cleaned);
    if !joined.starts_with(root) || cleaned.split('/').any(|segment| segment == "..") {
        return Err(Error::forbidden(rel_path, ForbiddenReason::Traversal));
    }

    if policy.validate_names
        && !cleaned.is_empty()
        && !cleaned.split('/').all(is_valid_file_name)
    {
        return Err(Error::forbidden(cleaned, ForbiddenReason::InvalidName));
    }

    Ok(cleaned)
}

/// Applies the hidden-file policy to an already cleaned path.
pub fn check_hidden(cleaned: &str, hidden: HiddenFiles) -> Result<()> {
    let denied = match hidden {
        HiddenFiles::Allow => false,
        HiddenFiles::DenyLastSegment => is_hidden_file(cleaned),
        HiddenFiles::DenyAnySegment => is_hidden_path(cleaned),
    };
    if denied {
        return Err(Error::forbidden(cleaned, ForbiddenReason::HiddenFile));
    }
    Ok(())
}

pub fn is_hidden_file(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .map(is_dot_segment)
        .unwrap_or(false)
}

pub fn is_hidden_path(path: &str) -> bool {
    path.split('/').any(is_dot_segment)
}

fn is_dot_segment(segment: &str) -> bool {
    segment.starts_with('.') && segment != "." && segment != ".."
}

/// Checks a single path segment.
pub fn is_valid_file_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return false;
    }

    let upper = name.to_ascii_uppercase();
    let stem = upper.split('.').next().unwrap_or(&upper);
    !RESERVED_NAMES.contains(&stem)
}
