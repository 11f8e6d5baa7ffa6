//! Identifier namespacing.
//!
//! # Responsibility
//! - Derive fully-qualified ids (`<extensionId>.<localId>`).
//! - Resolve possibly-unqualified ids relative to a calling extension.
//!
//! # Invariants
//! - Extension ids never contain the separator, so the first separator of a
//!   qualified id always splits owner from local segment (`a.b.c` is owner
//!   `a`, local `b.c`).
//! - An id that already contains the separator is treated as fully qualified.

use crate::error::{EntityKind, HostError, HostResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Separator between owner and local segments.
pub const ID_SEPARATOR: char = '.';

/// Owner id used for host-provided registrations.
pub const HOST_OWNER_ID: &str = "host";

static EXTENSION_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("extension id pattern is valid"));

static LOCAL_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_:/-]+(\.[A-Za-z0-9_:/-]+)*$").expect("local id pattern is valid")
});

/// Validates an extension id (lowercase, digits, `_`, `-`; no separator).
pub fn validate_extension_id(value: &str) -> HostResult<()> {
    if EXTENSION_ID_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(HostError::InvalidId(value.to_string()))
    }
}

/// Validates a local or qualified id segment list.
pub fn validate_local_id(value: &str) -> HostResult<()> {
    if LOCAL_ID_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(HostError::InvalidId(value.to_string()))
    }
}

/// Concatenates owner and local id with the separator.
pub fn qualify(owner: &str, local: &str) -> String {
    format!("{owner}{ID_SEPARATOR}{local}")
}

/// Returns `id` unchanged when it is already qualified, else qualifies it
/// against `owner`.
pub fn resolve(owner: &str, id: &str) -> String {
    if is_qualified(id) {
        id.to_string()
    } else {
        qualify(owner, id)
    }
}

/// Qualifies an id being registered by `owner`.
///
/// Registrations always land in the owner's namespace: a local id is
/// qualified, an id already prefixed with `owner.` is kept, and an id naming
/// another namespace is a `Conflict` with that namespace's owner.
pub fn qualify_for(owner: &str, id: &str, kind: EntityKind) -> HostResult<String> {
    match split_qualified(id) {
        Some((prefix, _)) if prefix == owner => Ok(id.to_string()),
        Some((prefix, _)) => Err(HostError::conflict(kind, id, prefix)),
        None => Ok(qualify(owner, id)),
    }
}

pub fn is_qualified(id: &str) -> bool {
    id.contains(ID_SEPARATOR)
}

/// Splits a qualified id at its first separator.
pub fn split_qualified(id: &str) -> Option<(&str, &str)> {
    id.split_once(ID_SEPARATOR)
        .filter(|(owner, local)| !owner.is_empty() && !local.is_empty())
}

pub fn owner_of(id: &str) -> Option<&str> {
    split_qualified(id).map(|(owner, _)| owner)
}

/// Resolves a settings path relative to `owner`.
///
/// Paths with three or more segments (`section.subsection.setting`) are
/// fully qualified; shorter paths are prefixed with the owner's section.
pub fn resolve_setting_path(owner: &str, path: &str) -> String {
    if path.matches(ID_SEPARATOR).count() >= 2 {
        path.to_string()
    } else {
        qualify(owner, path)
    }
}

/// Splits `section.subsection.setting`; the setting segment keeps any
/// remaining separators.
pub fn split_setting_path(path: &str) -> Option<(&str, &str, &str)> {
    let (section, rest) = split_qualified(path)?;
    let (subsection, setting) = split_qualified(rest)?;
    Some((section, subsection, setting))
}
