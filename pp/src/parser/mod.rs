//! Prompt parsing
//!
//! [`PromptParser`] drives a content provider through a decoder and keeps the
//! results of the latest round: tokens, an optional [`Header`], and the
//! [`Reference`]s found in the body.

mod events;
mod header;
mod prompt_parser;
mod reference;

use thiserror::Error;

use crate::identity::ContentId;

pub use events::ParserUpdate;
pub use header::{CHAT_MODES, Header, HeaderDiagnostic, HeaderMetadata};
pub use prompt_parser::PromptParser;
pub use reference::Reference;

/// Lifecycle misuse reported as a value instead of a panic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParserError {
    #[error("Parser for '{0}' is disposed")]
    Disposed(ContentId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_error_display() {
        let err = ParserError::Disposed(ContentId::new("/a.prompt.md"));
        assert_eq!(err.to_string(), "Parser for '/a.prompt.md' is disposed");
    }
}
