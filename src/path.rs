//! Path validation and manipulation.
//!
//! Paths are absolute and slash-delimited: `/`, `/services`, `/services/api`.

use crate::error::{CoordError, Result};
use crate::op::OpCode;

/// The root path. Always present, never deletable.
pub const ROOT: &str = "/";

/// Default maximum path length in bytes.
pub const MAX_PATH_LENGTH: usize = 1024;

/// Validate that a path is well-formed.
pub fn validate_path(path: &str, max_len: usize, op: OpCode) -> Result<()> {
    let invalid = |reason: &str| CoordError::InvalidPath {
        op,
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path cannot be empty"));
    }
    if path.len() > max_len {
        return Err(invalid(&format!(
            "path exceeds maximum length of {} bytes",
            max_len
        )));
    }
    if !path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(invalid("path must not end with '/'"));
    }
    if path.contains('\0') {
        return Err(invalid("path must not contain NUL"));
    }
    for component in path[1..].split('/') {
        match component {
            "" => return Err(invalid("empty path component")),
            "." | ".." => return Err(invalid("relative path component")),
            _ => {}
        }
    }
    Ok(())
}

/// Parent of a validated path. `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of a validated path. Empty for the root.
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a parent path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}
