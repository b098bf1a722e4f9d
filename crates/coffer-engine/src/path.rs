use crate::error::{EngineError, EngineResult};

pub(crate) const ROOT: &str = "/";

/// Normalize an absolute repository path.
///
/// Repeated and trailing separators are collapsed. Relative paths and `.` or
/// `..` components are rejected.
pub(crate) fn normalize(path: &str) -> EngineResult<String> {
    if !path.starts_with('/') {
        return Err(EngineError::InvalidPath(path.to_string()));
    }
    let mut out = String::with_capacity(path.len());
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if part == "." || part == ".." {
            return Err(EngineError::InvalidPath(path.to_string()));
        }
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Parent of a normalized path; `None` for the root.
pub(crate) fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Last component of a normalized path; empty for the root.
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Join a normalized directory path and a child name.
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Whether `path` is `ancestor` or lies beneath it.
pub(crate) fn is_within(path: &str, ancestor: &str) -> bool {
    ancestor == ROOT
        || path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Prefix every strict descendant of `dir` starts with.
pub(crate) fn child_prefix(dir: &str) -> String {
    if dir == ROOT {
        ROOT.to_string()
    } else {
        format!("{dir}/")
    }
}
