use crate::debugger::error::Error;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static DRIVE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new("^([A-Za-z]):/").expect("must compile"));

pub(super) fn clone_string_attribute<R: gimli::Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R, R::Offset>,
    attr: gimli::AttributeValue<R>,
) -> Result<String, Error> {
    Ok(dwarf
        .attr_string(unit, attr)?
        .to_string()?
        .as_ref()
        .to_string())
}

/// Rewrite a windows style path (`C:\dir\file.cpp`) into the canonical form
/// used by all indexes (`c:/dir/file.cpp`).
pub(super) fn from_windows_path(path: &str) -> String {
    let backslash_escaped = path.replace('\\', "/");
    DRIVE_PREFIX
        .replace_all(&backslash_escaped, |captured: &Captures| {
            format!("{}:/", captured[1].to_lowercase())
        })
        .into_owned()
}

pub(super) fn is_absolute_path(path: &str) -> bool {
    path.starts_with('/') || DRIVE_PREFIX.is_match(path)
}

/// Collapse `.` and `..` segments without touching the filesystem.
pub(super) fn normalize_path(path: &str) -> String {
    let mut stack = Vec::new();
    for component in path.split('/') {
        match component {
            ".." => {
                stack.pop();
            }
            "." => {}
            other => stack.push(other),
        }
    }
    stack.join("/")
}

/// Canonical form of any path arriving from DWARF or from the user.
pub fn canonicalize_path(path: &str) -> String {
    normalize_path(&from_windows_path(path))
}
