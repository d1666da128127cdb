//! Prompt file kinds
//!
//! The declared content type of a prompt source, derived from its file name
//! suffix or forced through a language override.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::ContentId;

/// Declared content type of a prompt source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKind {
    /// Reusable prompt (`*.prompt.md`)
    Prompt,
    /// Custom instructions (`*.instructions.md`)
    Instructions,
    /// Chat mode definition (`*.chatmode.md`, `*.mode.md`)
    Mode,
}

const SUFFIXES: &[(&str, PromptKind)] = &[
    (".prompt.md", PromptKind::Prompt),
    (".instructions.md", PromptKind::Instructions),
    (".chatmode.md", PromptKind::Mode),
    (".mode.md", PromptKind::Mode),
];

impl PromptKind {
    /// Kind implied by the identity's file name, if it is an eligible prompt file
    pub fn from_identity(identity: &ContentId) -> Option<Self> {
        let name = identity.file_name().to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.len() > suffix.len() && name.ends_with(suffix))
            .map(|(_, kind)| *kind)
    }

    /// Parse a language id (`prompt`, `instructions`, `chatmode`/`mode`)
    pub fn from_language_id(language_id: &str) -> Option<Self> {
        match language_id.trim().to_ascii_lowercase().as_str() {
            "prompt" => Some(Self::Prompt),
            "instructions" => Some(Self::Instructions),
            "chatmode" | "mode" => Some(Self::Mode),
            _ => None,
        }
    }

    pub fn language_id(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Instructions => "instructions",
            Self::Mode => "chatmode",
        }
    }

    /// Preferred file name suffix
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Self::Prompt => ".prompt.md",
            Self::Instructions => ".instructions.md",
            Self::Mode => ".chatmode.md",
        }
    }

    /// Resolve the kind from an optional override, falling back to the identity
    pub fn resolve(identity: &ContentId, language_override: Option<&str>) -> Option<Self> {
        language_override
            .and_then(Self::from_language_id)
            .or_else(|| Self::from_identity(identity))
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.language_id())
    }
}

/// True when the identity names an eligible prompt file
pub fn is_prompt_file(identity: &ContentId) -> bool {
    PromptKind::from_identity(identity).is_some()
}
