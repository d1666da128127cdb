//! Prompt header
//!
//! The front-matter block at the top of a prompt source, parsed as a YAML
//! mapping. Which keys are recognized depends on the declared prompt kind.
//! Unknown keys and wrongly typed values become diagnostics; only a block
//! that is not a mapping at all makes the header invalid.

use serde::Serialize;
use serde_yaml::Value;
use tracing::debug;

use crate::codec::{Range, Token, TokenKind};
use crate::kind::PromptKind;

const PROMPT_KEYS: &[&str] = &["description", "mode", "tools", "model"];
const INSTRUCTIONS_KEYS: &[&str] = &["description", "applyTo"];
const MODE_KEYS: &[&str] = &["description", "tools", "model"];
const ANY_KEYS: &[&str] = &["description", "mode", "tools", "model", "applyTo"];

/// Chat modes accepted by the `mode` key
pub const CHAT_MODES: &[&str] = &["ask", "edit", "agent"];

/// Recognized metadata values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_to: Option<String>,
}

/// A problem found in the header that does not invalidate it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderDiagnostic {
    pub key: Option<String>,
    pub message: String,
}

impl HeaderDiagnostic {
    fn for_key(key: &str, message: impl Into<String>) -> Self {
        Self {
            key: Some(key.to_string()),
            message: message.into(),
        }
    }
}

/// Parsed front-matter header
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    kind: Option<PromptKind>,
    range: Range,
    metadata: HeaderMetadata,
    diagnostics: Vec<HeaderDiagnostic>,
    valid: bool,
}

impl Header {
    /// Build a header from a front-matter token
    ///
    /// Returns `None` for any other token kind.
    pub fn from_token(kind: Option<PromptKind>, token: &Token) -> Option<Self> {
        let TokenKind::FrontMatter { body } = &token.kind else {
            return None;
        };
        Some(Self::parse(kind, token.range, body))
    }

    /// Parse a front-matter body
    pub fn parse(kind: Option<PromptKind>, range: Range, body: &str) -> Self {
        debug!(?kind, lines = range.end_line - range.start_line + 1, "Header::parse: called");
        let mut header = Self {
            kind,
            range,
            metadata: HeaderMetadata::default(),
            diagnostics: Vec::new(),
            valid: true,
        };

        if body.trim().is_empty() {
            return header;
        }

        match serde_yaml::from_str::<Value>(body) {
            Ok(Value::Mapping(map)) => {
                for (key, value) in map {
                    match key {
                        Value::String(key) => header.apply(&key, value),
                        other => header.diagnostics.push(HeaderDiagnostic {
                            key: None,
                            message: format!("Metadata keys must be strings, found {}", value_type(&other)),
                        }),
                    }
                }
            }
            Ok(Value::Null) => {}
            Ok(other) => {
                header.valid = false;
                header.diagnostics.push(HeaderDiagnostic {
                    key: None,
                    message: format!("Header must be a mapping, found {}", value_type(&other)),
                });
            }
            Err(e) => {
                header.valid = false;
                header.diagnostics.push(HeaderDiagnostic {
                    key: None,
                    message: format!("Invalid YAML: {}", e),
                });
            }
        }
        header
    }

    fn allowed_keys(&self) -> &'static [&'static str] {
        match self.kind {
            Some(PromptKind::Prompt) => PROMPT_KEYS,
            Some(PromptKind::Instructions) => INSTRUCTIONS_KEYS,
            Some(PromptKind::Mode) => MODE_KEYS,
            None => ANY_KEYS,
        }
    }

    fn apply(&mut self, key: &str, value: Value) {
        if !self.allowed_keys().contains(&key) {
            self.diagnostics
                .push(HeaderDiagnostic::for_key(key, format!("Unknown metadata key '{}'", key)));
            return;
        }

        match key {
            "description" => self.metadata.description = self.expect_string(key, value),
            "model" => self.metadata.model = self.expect_string(key, value),
            "applyTo" => self.metadata.apply_to = self.expect_string(key, value),
            "mode" => {
                let mode = self.expect_string(key, value);
                if let Some(mode) = &mode
                    && !CHAT_MODES.contains(&mode.as_str())
                {
                    self.diagnostics.push(HeaderDiagnostic::for_key(
                        key,
                        format!("Unknown mode '{}', expected one of: {}", mode, CHAT_MODES.join(", ")),
                    ));
                }
                self.metadata.mode = mode;
            }
            "tools" => self.metadata.tools = self.expect_string_list(key, value),
            _ => {}
        }
    }

    fn expect_string(&mut self, key: &str, value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            other => {
                self.diagnostics.push(HeaderDiagnostic::for_key(
                    key,
                    format!("'{}' must be a string, found {}", key, value_type(&other)),
                ));
                None
            }
        }
    }

    fn expect_string_list(&mut self, key: &str, value: Value) -> Option<Vec<String>> {
        let Value::Sequence(items) = value else {
            self.diagnostics.push(HeaderDiagnostic::for_key(
                key,
                format!("'{}' must be a list of strings, found {}", key, value_type(&value)),
            ));
            return None;
        };
        let mut list = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) => list.push(s),
                other => self.diagnostics.push(HeaderDiagnostic::for_key(
                    key,
                    format!("'{}' entries must be strings, found {}", key, value_type(&other)),
                )),
            }
        }
        Some(list)
    }

    pub fn kind(&self) -> Option<PromptKind> {
        self.kind
    }

    /// Source range of the whole block, fences included
    pub fn range(&self) -> Range {
        self.range
    }

    pub fn metadata(&self) -> &HeaderMetadata {
        &self.metadata
    }

    pub fn diagnostics(&self) -> &[HeaderDiagnostic] {
        &self.diagnostics
    }

    /// Whether the header settled cleanly
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> Range {
        Range::new(1, 1, 4, 4)
    }

    #[test]
    fn test_prompt_metadata() {
        let body = "description: Review code\nmode: agent\ntools: [search, edit]\nmodel: gpt\n";
        let header = Header::parse(Some(PromptKind::Prompt), range(), body);
        assert!(header.is_valid());
        assert!(header.diagnostics().is_empty());
        let meta = header.metadata();
        assert_eq!(meta.description.as_deref(), Some("Review code"));
        assert_eq!(meta.mode.as_deref(), Some("agent"));
        assert_eq!(meta.tools, Some(vec!["search".to_string(), "edit".to_string()]));
        assert_eq!(meta.model.as_deref(), Some("gpt"));
    }

    #[test]
    fn test_keys_depend_on_kind() {
        let body = "applyTo: '**/*.rs'\nmode: agent\n";
        let header = Header::parse(Some(PromptKind::Instructions), range(), body);
        assert!(header.is_valid());
        assert_eq!(header.metadata().apply_to.as_deref(), Some("**/*.rs"));
        assert_eq!(header.metadata().mode, None);
        assert_eq!(header.diagnostics().len(), 1);
        assert_eq!(header.diagnostics()[0].key.as_deref(), Some("mode"));
    }

    #[test]
    fn test_wrong_types_are_diagnostics() {
        let body = "description: 42\ntools: edit\nmode: dance\n";
        let header = Header::parse(Some(PromptKind::Prompt), range(), body);
        assert!(header.is_valid());
        assert_eq!(header.metadata().description, None);
        assert_eq!(header.metadata().tools, None);
        assert_eq!(header.metadata().mode.as_deref(), Some("dance"));
        assert_eq!(header.diagnostics().len(), 3);
    }

    #[test]
    fn test_non_mapping_is_invalid() {
        let header = Header::parse(Some(PromptKind::Prompt), range(), "- a\n- b\n");
        assert!(!header.is_valid());

        let header = Header::parse(Some(PromptKind::Prompt), range(), "key: [unclosed\n");
        assert!(!header.is_valid());
    }

    #[test]
    fn test_empty_body_is_valid() {
        let header = Header::parse(Some(PromptKind::Mode), range(), "\n");
        assert!(header.is_valid());
        assert_eq!(header.metadata(), &HeaderMetadata::default());
    }

    #[test]
    fn test_from_token() {
        let token = Token::new(
            TokenKind::FrontMatter {
                body: "description: x\n".to_string(),
            },
            Range::new(1, 1, 3, 4),
            "---\ndescription: x\n---",
        );
        let header = Header::from_token(Some(PromptKind::Prompt), &token).unwrap();
        assert_eq!(header.range().end_line, 3);

        let text = Token::new(TokenKind::Text, Range::on_line(1, 1, 2), "x");
        assert!(Header::from_token(None, &text).is_none());
    }
}
