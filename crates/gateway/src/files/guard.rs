//! Path guard: confines operation paths to a mount's root.
//!
//! Paths are normalised lexically (repeated separators collapsed, `.` and `..`
//! resolved) before the containment check, and containment is decided on
//! component boundaries: root `/data` admits `/data` and `/data/x` but not
//! `/data2`.

use protocol::{FileMount, GatewayError};

/// Lexically normalise a slash-separated path.
///
/// `..` never climbs above the root of an absolute path. A trailing separator
/// is dropped (except for `/` itself).
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Whether normalised `path` equals or lies beneath normalised `root`.
pub fn is_within(root: &str, path: &str) -> bool {
    if path == root {
        return true;
    }
    if root == "/" {
        return path.starts_with('/');
    }
    path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/'
}

/// Check every candidate path against the mount root.
///
/// Returns the normalised paths, in input order, for the caller to operate
/// on. An empty candidate list is trivially authorised. The first offending
/// path is reported as it was supplied.
pub fn authorize<S: AsRef<str>>(
    mount: &FileMount,
    paths: &[S],
) -> Result<Vec<String>, GatewayError> {
    if mount.path.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(format!(
            "file mount {} has no root path",
            mount.id
        )));
    }
    let root = normalize(&mount.path);

    paths
        .iter()
        .map(|p| {
            let raw = p.as_ref();
            let normalized = normalize(raw);
            if is_within(&root, &normalized) {
                Ok(normalized)
            } else {
                tracing::warn!(mount_id = mount.id, root = %root, path = %raw, "Path outside mount root");
                Err(GatewayError::AccessDenied {
                    path: raw.to_string(),
                })
            }
        })
        .collect()
}

/// Append a trailing separator if missing.
pub fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}
