//! Token model
//!
//! Tokens are immutable and tagged with their source range. The parser only
//! looks at the kind tag and the range; `text` holds the exact source text
//! so concatenating a run of tokens reproduces that part of the source.

use serde::Serialize;

/// Source range. Lines and columns are 1-based; `end_column` is exclusive
/// and counts bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Range {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Range {
    pub fn new(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Range within a single line
    pub fn on_line(line: usize, start_column: usize, end_column: usize) -> Self {
        Self::new(line, start_column, line, end_column)
    }
}

/// How a reference was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    /// `#file:path`
    PathLike,
    /// `[text](target)`
    LinkLike,
}

/// Kind tag of a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TokenKind {
    /// A complete `---`-fenced block at the top of the source; `body` is the
    /// text between the fences
    FrontMatter { body: String },
    /// Plain text
    Text,
    /// Line terminator (`\n` or `\r\n`)
    NewLine,
    /// `#file:<path>` variable
    FileReference { path: String },
    /// Markdown link
    Link { text: String, target: String },
    /// Opening or closing code fence line
    CodeFence {
        info: String,
        opening: bool,
        /// Last content line before an opening fence
        preceding_content_line: Option<usize>,
    },
    /// `<!-- undo-stop -->` marker line
    UndoStop,
}

/// One decoded unit of a prompt source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub range: Range,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, range: Range, text: impl Into<String>) -> Self {
        Self {
            kind,
            range,
            text: text.into(),
        }
    }

    /// True for the token that opens a header block
    pub fn is_header_opening(&self) -> bool {
        matches!(self.kind, TokenKind::FrontMatter { .. })
    }

    /// The reference target and how it was written, for reference-shaped tokens
    pub fn reference_target(&self) -> Option<(&str, ReferenceKind)> {
        match &self.kind {
            TokenKind::FileReference { path } => Some((path.as_str(), ReferenceKind::PathLike)),
            TokenKind::Link { target, .. } => Some((target.as_str(), ReferenceKind::LinkLike)),
            _ => None,
        }
    }

    /// Source text of this token
    pub fn render(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_target() {
        let file = Token::new(
            TokenKind::FileReference {
                path: "a.md".to_string(),
            },
            Range::on_line(1, 1, 12),
            "#file:a.md",
        );
        assert_eq!(file.reference_target(), Some(("a.md", ReferenceKind::PathLike)));

        let link = Token::new(
            TokenKind::Link {
                text: "b".to_string(),
                target: "./b.md".to_string(),
            },
            Range::on_line(1, 1, 11),
            "[b](./b.md)",
        );
        assert_eq!(link.reference_target(), Some(("./b.md", ReferenceKind::LinkLike)));

        let text = Token::new(TokenKind::Text, Range::on_line(1, 1, 4), "abc");
        assert_eq!(text.reference_target(), None);
        assert!(!text.is_header_opening());
    }
}
