//! Parser update events

use super::Reference;

/// Published on the parser's update channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserUpdate {
    /// A new parse round began; previous tokens, header and references are gone
    ContentChanged { round: u64 },

    /// The front-matter header of the current round was parsed
    HeaderParsed { round: u64 },

    /// A reference was discovered in the current round
    ReferenceAdded { round: u64, reference: Reference },

    /// The round finished; `ok` is false on error or an invalid header
    Settled { round: u64, ok: bool },
}

impl ParserUpdate {
    pub fn round(&self) -> u64 {
        match self {
            Self::ContentChanged { round }
            | Self::HeaderParsed { round }
            | Self::ReferenceAdded { round, .. }
            | Self::Settled { round, .. } => *round,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_accessor() {
        assert_eq!(ParserUpdate::ContentChanged { round: 3 }.round(), 3);
        let settled = ParserUpdate::Settled { round: 4, ok: true };
        assert_eq!(settled.round(), 4);
        assert!(settled.is_settled());
        assert!(!ParserUpdate::HeaderParsed { round: 1 }.is_settled());
    }
}
