//! Resolution error taxonomy
//!
//! Every way resolving a prompt source can fail, as one closed enum. Transport
//! errors never cross the provider boundary: they are flattened into a
//! message string inside `OpenFailure` or `FailedToResolveStream`, so two
//! errors describing the same condition compare equal regardless of which
//! backend produced them.

use std::fmt;
use std::sync::OnceLock;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::identity::ContentId;

/// Separator used by the default chain rendering
pub const DEFAULT_CHAIN_SEPARATOR: &str = " -> ";

/// Discriminant of a [`ResolutionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    OpenFailure,
    FailedToResolveStream,
    NotAPromptFile,
    FolderReference,
    RecursiveReference,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenFailure => "open-failure",
            Self::FailedToResolveStream => "failed-to-resolve-stream",
            Self::NotAPromptFile => "not-a-prompt-file",
            Self::FolderReference => "folder-reference",
            Self::RecursiveReference => "recursive-reference",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a recursion chain renders each identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRender {
    /// The full identity (`/prompts/a.prompt.md`)
    FullPath,
    /// Only the last path segment (`a.prompt.md`)
    ShortName,
}

/// Errors resolving a prompt source
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("Failed to open '{identity}': {cause}.")]
    OpenFailure { identity: ContentId, cause: String },

    #[error("Failed to resolve contents stream for '{identity}': {cause}.")]
    FailedToResolveStream { identity: ContentId, cause: String },

    #[error("Resource at '{identity}' is not a prompt file{}.", detail_suffix(.detail))]
    NotAPromptFile {
        identity: ContentId,
        detail: Option<String>,
    },

    #[error("Entity at '{identity}' is a folder{}.", detail_suffix(.detail))]
    FolderReference {
        identity: ContentId,
        detail: Option<String>,
    },

    #[error("{0}")]
    RecursiveReference(RecursiveReference),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {}", d),
        None => String::new(),
    }
}

impl ResolutionError {
    pub fn open_failure(identity: ContentId, cause: impl fmt::Display) -> Self {
        Self::OpenFailure {
            identity,
            cause: cause.to_string(),
        }
    }

    pub fn failed_to_resolve_stream(identity: ContentId, cause: impl fmt::Display) -> Self {
        Self::FailedToResolveStream {
            identity,
            cause: cause.to_string(),
        }
    }

    pub fn not_a_prompt_file(identity: ContentId, detail: Option<String>) -> Self {
        Self::NotAPromptFile { identity, detail }
    }

    pub fn folder_reference(identity: ContentId, detail: Option<String>) -> Self {
        Self::FolderReference { identity, detail }
    }

    /// Build a recursion error
    ///
    /// # Panics
    /// If `chain` has fewer than two identities.
    pub fn recursive_reference(identity: ContentId, chain: Vec<ContentId>) -> Self {
        Self::RecursiveReference(RecursiveReference::new(identity, chain))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OpenFailure { .. } => ErrorKind::OpenFailure,
            Self::FailedToResolveStream { .. } => ErrorKind::FailedToResolveStream,
            Self::NotAPromptFile { .. } => ErrorKind::NotAPromptFile,
            Self::FolderReference { .. } => ErrorKind::FolderReference,
            Self::RecursiveReference(_) => ErrorKind::RecursiveReference,
        }
    }

    /// The source this error is about
    pub fn identity(&self) -> &ContentId {
        match self {
            Self::OpenFailure { identity, .. }
            | Self::FailedToResolveStream { identity, .. }
            | Self::NotAPromptFile { identity, .. }
            | Self::FolderReference { identity, .. } => identity,
            Self::RecursiveReference(r) => r.identity(),
        }
    }

    /// Human-readable diagnostic
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Nominal equality: same variant
    pub fn same_kind_as(&self, other: &ResolutionError) -> bool {
        self.kind() == other.kind()
    }

    /// Value equality: same kind, same identity, and for recursion the same chain
    pub fn equals(&self, other: &ResolutionError) -> bool {
        match (self, other) {
            (Self::RecursiveReference(a), Self::RecursiveReference(b)) => a.equals(b),
            _ => self.same_kind_as(other) && self.identity() == other.identity(),
        }
    }

    /// True for `NotAPromptFile` and its specialization `FolderReference`
    pub fn is_not_a_prompt_file(&self) -> bool {
        matches!(self, Self::NotAPromptFile { .. } | Self::FolderReference { .. })
    }

    /// True for failures raised while reading content
    pub fn is_read_failure(&self) -> bool {
        matches!(self, Self::OpenFailure { .. } | Self::FailedToResolveStream { .. })
    }

    pub fn as_recursive(&self) -> Option<&RecursiveReference> {
        match self {
            Self::RecursiveReference(r) => Some(r),
            _ => None,
        }
    }
}

impl PartialEq for ResolutionError {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for ResolutionError {}

impl Serialize for ResolutionError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ResolutionError", 3)?;
        s.serialize_field("kind", &self.kind())?;
        s.serialize_field("identity", self.identity())?;
        s.serialize_field("message", &self.message())?;
        s.end()
    }
}

/// A reference cycle: `chain` is the ordered path of identities that led back
/// to `identity`
#[derive(Debug, Clone)]
pub struct RecursiveReference {
    identity: ContentId,
    chain: Vec<ContentId>,
    default_rendering: OnceLock<String>,
}

impl RecursiveReference {
    /// # Panics
    /// If `chain` has fewer than two identities: a cycle needs at least an
    /// origin and the reference back to it.
    pub fn new(identity: ContentId, chain: Vec<ContentId>) -> Self {
        assert!(
            chain.len() >= 2,
            "recursion chain must contain at least 2 identities, got {}",
            chain.len()
        );
        debug!(%identity, chain_len = chain.len(), "RecursiveReference::new: called");
        Self {
            identity,
            chain,
            default_rendering: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &ContentId {
        &self.identity
    }

    pub fn chain(&self) -> &[ContentId] {
        &self.chain
    }

    /// Render the chain with the given mode and separator
    ///
    /// Only the full-path rendering with the default separator is memoized.
    pub fn render_chain(&self, mode: ChainRender, separator: &str) -> String {
        if mode == ChainRender::FullPath && separator == DEFAULT_CHAIN_SEPARATOR {
            return self.default_rendering().to_string();
        }
        self.render_uncached(mode, separator)
    }

    /// Chain joined by ` -> `
    pub fn recursive_path_string(&self, mode: ChainRender) -> String {
        self.render_chain(mode, DEFAULT_CHAIN_SEPARATOR)
    }

    fn default_rendering(&self) -> &str {
        self.default_rendering
            .get_or_init(|| self.render_uncached(ChainRender::FullPath, DEFAULT_CHAIN_SEPARATOR))
    }

    fn render_uncached(&self, mode: ChainRender, separator: &str) -> String {
        self.chain
            .iter()
            .map(|id| match mode {
                ChainRender::FullPath => id.as_str(),
                ChainRender::ShortName => id.file_name(),
            })
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Chain length first, then identity, then the rendered chains
    pub fn equals(&self, other: &RecursiveReference) -> bool {
        if self.chain.len() != other.chain.len() {
            return false;
        }
        if self.identity != other.identity {
            return false;
        }
        self.default_rendering() == other.default_rendering()
    }
}

impl fmt::Display for RecursiveReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recursive references found: {}.", self.default_rendering())
    }
}
