//! Purpose: Derive stable, opaque identity keys from file paths.
//! Exports: `IdentityKey`, `IdentityResolver`, `PathPolicy`, `CaseRule`.
//! Role: Leaf component; every coordinator call resolves paths through here.
//! Invariants: Resolution is pure (no filesystem access) and deterministic.
//! Invariants: Malformed input yields `ErrorKind::IdentityResolution`, never a panic.
//! Invariants: Keys are never derived from file contents.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};

const KEY_PREFIX: &str = "fsk-";

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rehydrates a key read back from the store.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CaseRule {
    Sensitive,
    Insensitive,
}

/// Platform rules applied before hashing a path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PathPolicy {
    case: CaseRule,
    backslash_is_separator: bool,
}

impl PathPolicy {
    pub const fn posix() -> Self {
        Self {
            case: CaseRule::Sensitive,
            backslash_is_separator: false,
        }
    }

    pub const fn macos() -> Self {
        Self {
            case: CaseRule::Insensitive,
            backslash_is_separator: false,
        }
    }

    pub const fn windows() -> Self {
        Self {
            case: CaseRule::Insensitive,
            backslash_is_separator: true,
        }
    }

    pub const fn native() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else if cfg!(target_os = "macos") {
            Self::macos()
        } else {
            Self::posix()
        }
    }

    pub fn case_rule(&self) -> CaseRule {
        self.case
    }

    /// Lexically normalizes `path` under this policy.
    pub fn normalize(&self, path: &str) -> Result<String, Error> {
        if path.trim().is_empty() {
            return Err(invalid("path is empty"));
        }
        if path.contains('\0') {
            return Err(invalid("path contains a NUL byte"));
        }

        let unified: String = if self.backslash_is_separator {
            path.replace('\\', "/")
        } else {
            path.to_string()
        };

        let (prefix, rest) = split_prefix(&unified, self.backslash_is_separator)?;
        let absolute = prefix.ends_with('/');

        let mut segments: Vec<&str> = Vec::new();
        for segment in rest.split('/') {
            match segment {
                "" | "." => {}
                ".." => match segments.last() {
                    Some(&last) if last != ".." => {
                        segments.pop();
                    }
                    _ if absolute => {}
                    _ => segments.push(".."),
                },
                other => segments.push(other),
            }
        }

        if !absolute && segments.is_empty() {
            return Err(invalid("path normalizes to nothing"));
        }

        let mut normalized = String::with_capacity(unified.len());
        normalized.push_str(&prefix);
        normalized.push_str(&segments.join("/"));

        Ok(match self.case {
            CaseRule::Sensitive => normalized,
            CaseRule::Insensitive => normalized.to_lowercase(),
        })
    }
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self::native()
    }
}

/// Splits an absolute prefix (`/`, `//server/share/`, `c:/`) from the rest.
/// Relative paths return an empty prefix. A drive-relative `c:foo` keeps the
/// bare `c:` prefix so it never collides with `c:/foo`.
fn split_prefix(path: &str, windows_rules: bool) -> Result<(String, &str), Error> {
    if windows_rules {
        if let Some(rest) = path.strip_prefix("//") {
            let mut parts = rest.splitn(3, '/');
            let server = parts.next().unwrap_or_default();
            let share = parts.next().unwrap_or_default();
            if server.is_empty() || share.is_empty() {
                return Err(invalid("UNC path needs both a server and a share"));
            }
            let tail = parts.next().unwrap_or_default();
            return Ok((format!("//{server}/{share}/"), tail));
        }
        let bytes = path.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            let drive = &path[..2];
            return Ok(match path[2..].strip_prefix('/') {
                Some(tail) => (format!("{drive}/"), tail),
                None => (drive.to_string(), &path[2..]),
            });
        }
    }
    Ok(match path.strip_prefix('/') {
        Some(rest) => ("/".to_string(), rest),
        None => (String::new(), path),
    })
}

fn invalid(message: &str) -> Error {
    Error::new(ErrorKind::IdentityResolution).with_message(message)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityResolver {
    policy: PathPolicy,
}

impl IdentityResolver {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PathPolicy {
        self.policy
    }

    pub fn identity(&self, path: &str) -> Result<IdentityKey, Error> {
        let normalized = self.policy.normalize(path)?;
        let digest = Sha256::digest(normalized.as_bytes());
        let mut key = String::with_capacity(KEY_PREFIX.len() + digest.len() * 2);
        key.push_str(KEY_PREFIX);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(key, "{byte:02x}");
        }
        Ok(IdentityKey(key))
    }
}
