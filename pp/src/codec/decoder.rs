//! Line-oriented markdown decoder
//!
//! Turns a stream of text chunks into a stream of [`Token`]s. This is the
//! minimal grammar the crate ships with; anything implementing [`Decoder`]
//! can replace it, the parser only relies on token kinds and ranges.

use std::collections::VecDeque;
use std::sync::LazyLock;

use futures::stream;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::token::{Range, Token, TokenKind};
use crate::stream::{ObjectStream, StreamEvent};

/// Marker line that separates undoable edit groups
pub const UNDO_STOP_MARKER: &str = "<!-- undo-stop -->";

const FRONT_MATTER_FENCE: &str = "---";

static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#file:(?P<path>[^\s\[\]()]+)|\[(?P<text>[^\]]*)\]\((?P<target>[^)\s]+)\)")
        .expect("reference pattern is valid")
});

/// Decodes a chunk stream into a token stream
pub trait Decoder: Send + Sync {
    fn decode(&self, chunks: ObjectStream<String>, cancel: &CancellationToken) -> ObjectStream<Token>;
}

/// Default decoder: front matter, references, links, code fences, undo stops
#[derive(Debug, Default, Clone)]
pub struct MarkdownDecoder;

impl MarkdownDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Tokenize a complete text synchronously
    pub fn tokenize(text: &str) -> Vec<Token> {
        let mut assembler = LineAssembler::default();
        let mut tokenizer = LineTokenizer::new();
        let mut tokens = Vec::new();
        for line in assembler.push(text) {
            tokens.extend(tokenizer.feed(line));
        }
        if let Some(line) = assembler.finish() {
            tokens.extend(tokenizer.feed(line));
        }
        tokens.extend(tokenizer.finish());
        tokens
    }
}

struct DecodeState {
    chunks: ObjectStream<String>,
    assembler: LineAssembler,
    tokenizer: LineTokenizer,
    pending: VecDeque<Token>,
    done: bool,
}

impl Decoder for MarkdownDecoder {
    fn decode(&self, chunks: ObjectStream<String>, cancel: &CancellationToken) -> ObjectStream<Token> {
        debug!("MarkdownDecoder::decode: called");
        let state = DecodeState {
            chunks,
            assembler: LineAssembler::default(),
            tokenizer: LineTokenizer::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let tokens = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(token) = st.pending.pop_front() {
                    return Some((Ok(token), st));
                }
                if st.done {
                    return None;
                }
                match st.chunks.next_event().await {
                    Some(StreamEvent::Data(chunk)) => {
                        for line in st.assembler.push(&chunk) {
                            let tokens = st.tokenizer.feed(line);
                            st.pending.extend(tokens);
                        }
                    }
                    Some(StreamEvent::Error(e)) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                    Some(StreamEvent::End) | None => {
                        st.done = true;
                        if let Some(line) = st.assembler.finish() {
                            let tokens = st.tokenizer.feed(line);
                            st.pending.extend(tokens);
                        }
                        let tokens = st.tokenizer.finish();
                        st.pending.extend(tokens);
                    }
                }
            }
        });

        ObjectStream::from_stream(tokens, cancel)
    }
}

#[derive(Debug)]
struct RawLine {
    content: String,
    terminator: String,
}

/// Reassembles lines from arbitrarily split chunks
#[derive(Debug, Default)]
struct LineAssembler {
    buffer: String,
}

impl LineAssembler {
    fn push(&mut self, chunk: &str) -> Vec<RawLine> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].find('\n') {
            let end = start + offset;
            let raw = &self.buffer[start..end];
            let (content, terminator) = match raw.strip_suffix('\r') {
                Some(content) => (content, "\r\n"),
                None => (raw, "\n"),
            };
            lines.push(RawLine {
                content: content.to_string(),
                terminator: terminator.to_string(),
            });
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    fn finish(&mut self) -> Option<RawLine> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(RawLine {
            content: std::mem::take(&mut self.buffer),
            terminator: String::new(),
        })
    }
}

enum Mode {
    Start,
    FrontMatter { lines: Vec<(usize, RawLine)> },
    Body,
    Fence { marker: &'static str },
}

struct LineTokenizer {
    next_line: usize,
    mode: Mode,
    undo_stop_line: Option<usize>,
}

impl LineTokenizer {
    fn new() -> Self {
        Self {
            next_line: 1,
            mode: Mode::Start,
            undo_stop_line: None,
        }
    }

    fn feed(&mut self, raw: RawLine) -> Vec<Token> {
        let line = self.next_line;
        self.next_line += 1;

        match std::mem::replace(&mut self.mode, Mode::Body) {
            Mode::Start => {
                if is_front_matter_fence(&raw.content) {
                    self.mode = Mode::FrontMatter {
                        lines: vec![(line, raw)],
                    };
                    Vec::new()
                } else {
                    self.body_line(line, raw)
                }
            }
            Mode::FrontMatter { mut lines } => {
                let closes = is_front_matter_fence(&raw.content);
                lines.push((line, raw));
                if closes {
                    front_matter_tokens(lines)
                } else {
                    self.mode = Mode::FrontMatter { lines };
                    Vec::new()
                }
            }
            mode => {
                self.mode = mode;
                self.body_line(line, raw)
            }
        }
    }

    /// Flush state at end of input
    ///
    /// An unterminated front matter is not a header: its lines are re-read as
    /// ordinary body lines.
    fn finish(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        if let Mode::FrontMatter { lines } = std::mem::replace(&mut self.mode, Mode::Body) {
            debug!(lines = lines.len(), "LineTokenizer::finish: unterminated front matter");
            for (line, raw) in lines {
                tokens.extend(self.body_line(line, raw));
            }
        }
        tokens
    }

    fn body_line(&mut self, line: usize, raw: RawLine) -> Vec<Token> {
        let mut tokens = Vec::new();
        let content = raw.content.as_str();
        let trimmed = content.trim();
        let line_end = content.len() + 1;

        match self.mode {
            Mode::Fence { marker } => {
                if trimmed.starts_with(marker) {
                    tokens.push(Token::new(
                        TokenKind::CodeFence {
                            info: String::new(),
                            opening: false,
                            preceding_content_line: None,
                        },
                        Range::on_line(line, 1, line_end),
                        content,
                    ));
                    self.mode = Mode::Body;
                } else if !content.is_empty() {
                    tokens.push(Token::new(TokenKind::Text, Range::on_line(line, 1, line_end), content));
                }
            }
            _ => {
                if let Some(marker) = fence_marker(trimmed) {
                    let info = trimmed[marker.len()..].trim().to_string();
                    tokens.push(Token::new(
                        TokenKind::CodeFence {
                            info,
                            opening: true,
                            preceding_content_line: self.preceding_content_line(line),
                        },
                        Range::on_line(line, 1, line_end),
                        content,
                    ));
                    self.mode = Mode::Fence { marker };
                } else if trimmed == UNDO_STOP_MARKER {
                    tokens.push(Token::new(TokenKind::UndoStop, Range::on_line(line, 1, line_end), content));
                    self.undo_stop_line = Some(line);
                } else {
                    tokens.extend(inline_tokens(line, content));
                }
            }
        }

        if !raw.terminator.is_empty() {
            tokens.push(Token::new(
                TokenKind::NewLine,
                Range::on_line(line, line_end, line_end + raw.terminator.len()),
                raw.terminator,
            ));
        }
        tokens
    }

    /// Line of the content an opening fence follows
    ///
    /// Known special case: when an undo-stop marker sits directly between the
    /// fence and the content above it, the index is shifted up by one so the
    /// fence attaches to that content. Only a single marker line is skipped;
    /// blank lines or repeated markers are not.
    fn preceding_content_line(&self, line: usize) -> Option<usize> {
        if line <= 1 {
            return None;
        }
        let previous = line - 1;
        if self.undo_stop_line == Some(previous) {
            (previous > 1).then(|| previous - 1)
        } else {
            Some(previous)
        }
    }
}

fn is_front_matter_fence(content: &str) -> bool {
    content.trim_end() == FRONT_MATTER_FENCE
}

fn fence_marker(trimmed: &str) -> Option<&'static str> {
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

fn front_matter_tokens(lines: Vec<(usize, RawLine)>) -> Vec<Token> {
    let start_line = lines.first().map_or(1, |(line, _)| *line);
    let end_line = lines.last().map_or(start_line, |(line, _)| *line);
    let last_index = lines.len().saturating_sub(1);

    let mut text = String::new();
    let mut body = String::new();
    let mut last_len = 0;
    let mut last_terminator = String::new();
    for (index, (_, raw)) in lines.into_iter().enumerate() {
        text.push_str(&raw.content);
        if index == last_index {
            last_len = raw.content.len();
            last_terminator = raw.terminator;
            continue;
        }
        text.push_str(&raw.terminator);
        if index > 0 {
            body.push_str(&raw.content);
            body.push_str(&raw.terminator);
        }
    }

    let mut tokens = vec![Token::new(
        TokenKind::FrontMatter { body },
        Range::new(start_line, 1, end_line, last_len + 1),
        text,
    )];
    if !last_terminator.is_empty() {
        tokens.push(Token::new(
            TokenKind::NewLine,
            Range::on_line(end_line, last_len + 1, last_len + 1 + last_terminator.len()),
            last_terminator,
        ));
    }
    tokens
}

fn inline_tokens(line: usize, content: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut cursor = 0;
    for caps in REFERENCE_PATTERN.captures_iter(content) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > cursor {
            tokens.push(Token::new(
                TokenKind::Text,
                Range::on_line(line, cursor + 1, whole.start() + 1),
                &content[cursor..whole.start()],
            ));
        }
        let kind = match caps.name("path") {
            Some(path) => TokenKind::FileReference {
                path: path.as_str().to_string(),
            },
            None => TokenKind::Link {
                text: caps.name("text").map_or("", |m| m.as_str()).to_string(),
                target: caps.name("target").map_or("", |m| m.as_str()).to_string(),
            },
        };
        tokens.push(Token::new(
            kind,
            Range::on_line(line, whole.start() + 1, whole.end() + 1),
            whole.as_str(),
        ));
        cursor = whole.end();
    }
    if cursor < content.len() {
        tokens.push(Token::new(
            TokenKind::Text,
            Range::on_line(line, cursor + 1, content.len() + 1),
            &content[cursor..],
        ));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(tokens: &[Token]) -> String {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_tokens_reproduce_source() {
        let source = "---\ndescription: x\n---\nSee #file:a.md and [b](./b.md).\r\n\n```sh\n#file:ignored.md\n```\ntail";
        let tokens = MarkdownDecoder::tokenize(source);
        assert_eq!(render(&tokens), source);
    }

    #[test]
    fn test_front_matter_token() {
        let tokens = MarkdownDecoder::tokenize("---\nmode: agent\ntools: [a]\n---\nbody\n");
        let header = &tokens[0];
        assert!(header.is_header_opening());
        assert_eq!(header.range.start_line, 1);
        assert_eq!(header.range.end_line, 4);
        match &header.kind {
            TokenKind::FrontMatter { body } => assert_eq!(body, "mode: agent\ntools: [a]\n"),
            other => panic!("expected front matter, got {:?}", other),
        }
        assert_eq!(tokens[1].kind, TokenKind::NewLine);
        assert_eq!(tokens[2].range.start_line, 5);
    }

    #[test]
    fn test_unterminated_front_matter_is_text() {
        let source = "---\nmode: agent\nbody #file:x.md\n";
        let tokens = MarkdownDecoder::tokenize(source);
        assert!(tokens.iter().all(|t| !t.is_header_opening()));
        assert!(tokens.iter().any(|t| matches!(t.kind, TokenKind::FileReference { .. })));
        assert_eq!(render(&tokens), source);
    }

    #[test]
    fn test_front_matter_only_at_start() {
        let tokens = MarkdownDecoder::tokenize("text\n---\na: b\n---\n");
        assert!(tokens.iter().all(|t| !t.is_header_opening()));
    }

    #[test]
    fn test_inline_references() {
        let tokens = MarkdownDecoder::tokenize("use #file:../x.md then [doc](docs/y.md)");
        let refs: Vec<_> = tokens.iter().filter_map(|t| t.reference_target()).collect();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].0, "../x.md");
        assert_eq!(refs[1].0, "docs/y.md");

        let file_ref = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::FileReference { .. }))
            .unwrap();
        assert_eq!(file_ref.range, Range::on_line(1, 5, 18));
    }

    #[test]
    fn test_references_inside_fence_are_text() {
        let tokens = MarkdownDecoder::tokenize("```\n#file:a.md\n```\n#file:b.md\n");
        let refs: Vec<_> = tokens.iter().filter_map(|t| t.reference_target()).collect();
        assert_eq!(refs, vec![("b.md", crate::codec::ReferenceKind::PathLike)]);
    }

    #[test]
    fn test_undo_stop_shifts_fence_anchor() {
        let tokens = MarkdownDecoder::tokenize("intro\n<!-- undo-stop -->\n```rust\nfn x() {}\n```\n");
        let fence = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::CodeFence { opening: true, .. }))
            .unwrap();
        match &fence.kind {
            TokenKind::CodeFence {
                info,
                preceding_content_line,
                ..
            } => {
                assert_eq!(info, "rust");
                assert_eq!(*preceding_content_line, Some(1));
            }
            _ => unreachable!(),
        }
        assert!(tokens.iter().any(|t| t.kind == TokenKind::UndoStop));
    }

    #[test]
    fn test_fence_without_undo_stop() {
        let tokens = MarkdownDecoder::tokenize("a\nb\n```\n```\n");
        let fence = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::CodeFence { opening: true, .. }))
            .unwrap();
        assert!(matches!(
            fence.kind,
            TokenKind::CodeFence {
                preceding_content_line: Some(2),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_decode_across_chunk_boundaries() {
        let cancel = CancellationToken::new();
        let source = "---\ndescription: split\n---\nline #file:one.md\nline two\n";
        let chunks: Vec<String> = source
            .as_bytes()
            .chunks(3)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();
        let input = ObjectStream::from_vec(chunks, &cancel);

        let tokens = MarkdownDecoder::new()
            .decode(input, &cancel)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(tokens, MarkdownDecoder::tokenize(source));
    }

    #[tokio::test]
    async fn test_decode_propagates_source_error() {
        let cancel = CancellationToken::new();
        let input = ObjectStream::from_results(
            vec![
                Ok("line\n".to_string()),
                Err(crate::stream::StreamError::Source("gone".to_string())),
            ],
            &cancel,
        );
        let result = MarkdownDecoder::new().decode(input, &cancel).collect_all().await;
        assert_eq!(result, Err(crate::stream::StreamError::Source("gone".to_string())));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_tokens_reproduce_any_source(source in "(---|```|#file:[a-z./]{0,6}|\\[[a-z]{0,3}\\]\\([a-z./#]{0,6}\\)|[a-z ]{0,8}|\r?\n){0,24}") {
                let tokens = MarkdownDecoder::tokenize(&source);
                prop_assert_eq!(render(&tokens), source);
            }

            #[test]
            fn prop_token_lines_never_decrease(source in "([a-z#:\\[\\]()-]{0,10}\n){0,16}") {
                let tokens = MarkdownDecoder::tokenize(&source);
                for pair in tokens.windows(2) {
                    prop_assert!(pair[0].range.start_line <= pair[1].range.start_line);
                }
            }
        }
    }
}
