//! References to other prompt sources

use serde::Serialize;

use crate::codec::{Range, ReferenceKind, Token};
use crate::identity::{ContentId, is_url};

/// A reference found in a prompt body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    /// Target resolved against the referencing source
    pub identity: ContentId,
    /// Target as written, without any `#fragment`
    pub path: String,
    pub kind: ReferenceKind,
    #[serde(skip)]
    pub token: Token,
}

impl Reference {
    /// Convert a reference-shaped token
    ///
    /// URL targets and pure in-document anchors (`#section`) do not point at
    /// another prompt source and yield `None`.
    pub fn from_token(parent: &ContentId, token: &Token) -> Option<Self> {
        let (target, kind) = token.reference_target()?;
        let target = target.trim();
        if target.is_empty() || target.starts_with('#') || is_url(target) {
            return None;
        }
        let path = target.split_once('#').map_or(target, |(path, _)| path);
        if path.is_empty() {
            return None;
        }
        Some(Self {
            identity: parent.join(path),
            path: path.to_string(),
            kind,
            token: token.clone(),
        })
    }

    pub fn range(&self) -> Range {
        self.token.range
    }
}
