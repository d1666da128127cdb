//! Token model and decoding
//!
//! The parser treats the grammar as a black box producing typed, range-tagged
//! tokens. [`MarkdownDecoder`] is the built-in implementation.

mod decoder;
mod token;

pub use decoder::{Decoder, MarkdownDecoder, UNDO_STOP_MARKER};
pub use token::{Range, ReferenceKind, Token, TokenKind};
