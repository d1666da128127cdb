//! Content identity
//!
//! A `ContentId` names one logical prompt source: a file path, or a URI for
//! link-like references. It is the key of the parser cache and the subject of
//! every resolution error. Paths always use `/` separators and are kept in
//! lexically normalized form so two spellings of the same file compare equal.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Opaque, comparable handle identifying one prompt source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Create an identity from a path or URI string
    ///
    /// Paths are normalized (`.` and `..` segments resolved lexically),
    /// URIs are kept verbatim.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        if is_url(&value) {
            Self(value)
        } else {
            Self(normalize(&value))
        }
    }

    /// Create an identity from a filesystem path
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy().replace('\\', "/");
        Self(normalize(&raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this identity is a URI with a scheme (`https://...`)
    pub fn is_url(&self) -> bool {
        is_url(&self.0)
    }

    /// The identity as a filesystem path
    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Last path segment, used for short-name rendering
    pub fn file_name(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Identity of the containing directory, if any
    pub fn parent(&self) -> Option<ContentId> {
        if self.is_url() {
            return None;
        }
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            return Some(Self("/".to_string()));
        }
        Some(Self(self.0[..idx].to_string()))
    }

    /// Resolve a reference written inside this source
    ///
    /// URIs and absolute paths stand on their own; relative paths are resolved
    /// against the directory containing this identity.
    pub fn join(&self, reference: &str) -> ContentId {
        let reference = reference.trim();
        if is_url(reference) {
            return Self(reference.to_string());
        }
        if reference.starts_with('/') {
            return Self(normalize(reference));
        }
        match self.parent() {
            Some(parent) if parent.0 == "/" => Self(normalize(&format!("/{}", reference))),
            Some(parent) => Self(normalize(&format!("{}/{}", parent.0, reference))),
            None => Self(normalize(reference)),
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<PathBuf> for ContentId {
    fn from(value: PathBuf) -> Self {
        Self::from_path(value)
    }
}

/// True when `target` starts with a URI scheme such as `https:` or `file:`
///
/// Single-letter schemes are rejected so Windows drive letters stay paths.
pub fn is_url(target: &str) -> bool {
    let Some((scheme, _)) = target.split_once(':') else {
        return false;
    };
    scheme.len() > 1
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
}

fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_paths() {
        assert_eq!(ContentId::new("/a/./b/../c.md").as_str(), "/a/c.md");
        assert_eq!(ContentId::new("a//b.md").as_str(), "a/b.md");
        assert_eq!(ContentId::new("../x.md").as_str(), "../x.md");
        assert_eq!(ContentId::new("/../x.md").as_str(), "/x.md");
    }

    #[test]
    fn test_urls_kept_verbatim() {
        let id = ContentId::new("https://example.com/a/../b");
        assert!(id.is_url());
        assert_eq!(id.as_str(), "https://example.com/a/../b");
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com"));
        assert!(is_url("mailto:someone@example.com"));
        assert!(!is_url("C:/prompts/a.md"));
        assert!(!is_url("./other.md"));
        assert!(!is_url("other.md"));
    }

    #[test]
    fn test_join_relative() {
        let id = ContentId::new("/prompts/main.prompt.md");
        assert_eq!(id.join("other.md").as_str(), "/prompts/other.md");
        assert_eq!(id.join("./nested/x.md").as_str(), "/prompts/nested/x.md");
        assert_eq!(id.join("../up.md").as_str(), "/up.md");
        assert_eq!(id.join("/abs/y.md").as_str(), "/abs/y.md");
        assert_eq!(id.join("https://x.dev/p.md").as_str(), "https://x.dev/p.md");
    }

    #[test]
    fn test_join_at_root() {
        let id = ContentId::new("/main.md");
        assert_eq!(id.join("other.md").as_str(), "/other.md");
    }

    #[test]
    fn test_file_name_and_parent() {
        let id = ContentId::new("/a/b/c.prompt.md");
        assert_eq!(id.file_name(), "c.prompt.md");
        assert_eq!(id.parent(), Some(ContentId::new("/a/b")));
        assert_eq!(ContentId::new("rel.md").parent(), None);
    }
}
