//! promptparse - streaming prompt-file parser
//!
//! Reads prompt, instructions and chat-mode markdown files as a stream of
//! lines, decodes them into tokens, and extracts a front-matter header plus
//! the file references in the body. Parsers re-run when their source changes
//! and are shared through a cache, so a reference tree can be walked
//! recursively with cycle detection.
//!
//! # Modules
//!
//! - [`stream`] - Pausable, batched object streams
//! - [`codec`] - Line-oriented markdown decoder and tokens
//! - [`storage`] - File storage, in-memory storage and text buffers
//! - [`provider`] - Content providers over files and buffers
//! - [`parser`] - Prompt parser, header and references
//! - [`cache`] - Instance caches keyed by identity
//! - [`resolver`] - Recursive reference resolution
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cache;
pub mod cli;
pub mod codec;
pub mod config;
pub mod errors;
pub mod identity;
pub mod kind;
pub mod lifecycle;
pub mod parser;
pub mod provider;
pub mod resolver;
pub mod storage;
pub mod stream;

pub use cache::{ObjectCache, ParserCache};
pub use codec::{Decoder, MarkdownDecoder, Range, Token, TokenKind};
pub use config::Config;
pub use errors::{ErrorKind, RecursiveReference, ResolutionError};
pub use identity::ContentId;
pub use kind::PromptKind;
pub use lifecycle::Disposable;
pub use parser::{Header, HeaderMetadata, ParserError, ParserUpdate, PromptParser, Reference};
pub use provider::{BufferContentProvider, ContentProvider, FileContentProvider, ParseOptions};
pub use resolver::{ReferenceResolver, ResolvedPrompt};
pub use storage::{FsStorage, MemoryBuffer, MemoryStorage, Storage, TextBuffer};
pub use stream::{ObjectStream, StreamEvent};
