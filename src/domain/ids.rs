//! Identifiers: actors, deals, and the deal id sequence.
//!
//! Deal ids are human-shareable tokens of the form `#<LETTER><NNNN>`.
//! They are produced by `DealIdSequence`, a letter/number counter that
//! walks `A1000..=Z9999` and wraps back to `A1000`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a chat participant (or of the custody account).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ActorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for ActorId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Deal identifier as shown to users, e.g. `#A7342`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(String);

impl DealId {
    /// Parse free text typed by a buyer.
    ///
    /// Accepts `#<token>` where the token is non-empty and has no
    /// whitespace. Whether the deal exists is the registry's concern.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let token = text.strip_prefix('#')?;
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DealId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

const MIN_NUMBER: u16 = 1000;
const MAX_NUMBER: u16 = 9999;

/// Letter/number counter behind deal ids.
///
/// `next_id` hands out the current value and then advances. Callers that
/// must persist the counter before using the id work with `peek` and
/// `advanced` instead, so a failed write never burns or reuses an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSequence")]
pub struct DealIdSequence {
    letter: char,
    number: u16,
}

impl DealIdSequence {
    /// Starting point of a fresh store (`#A7342`).
    pub const DEFAULT_SEED: Self = Self {
        letter: 'A',
        number: 7342,
    };

    /// Build a sequence at `letter`/`number`, rejecting out-of-range values.
    pub fn new(letter: char, number: u16) -> Option<Self> {
        if !letter.is_ascii_uppercase() || !(MIN_NUMBER..=MAX_NUMBER).contains(&number) {
            return None;
        }
        Some(Self { letter, number })
    }

    /// Parse a seed written as `A7342` (a leading `#` is tolerated).
    pub fn parse_seed(seed: &str) -> Option<Self> {
        let seed = seed.trim();
        let seed = seed.strip_prefix('#').unwrap_or(seed);
        let mut chars = seed.chars();
        let letter = chars.next()?;
        let digits = chars.as_str();
        if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Self::new(letter, digits.parse().ok()?)
    }

    /// The id this sequence will hand out next.
    pub fn peek(&self) -> DealId {
        DealId(format!("#{}{}", self.letter, self.number))
    }

    /// The sequence state after handing out `peek()`.
    pub fn advanced(&self) -> Self {
        if self.number < MAX_NUMBER {
            return Self {
                letter: self.letter,
                number: self.number + 1,
            };
        }
        let letter = if self.letter == 'Z' {
            'A'
        } else {
            char::from(self.letter as u8 + 1)
        };
        Self {
            letter,
            number: MIN_NUMBER,
        }
    }

    /// Hand out the current id and advance.
    pub fn next_id(&mut self) -> DealId {
        let id = self.peek();
        *self = self.advanced();
        id
    }

    pub fn letter(&self) -> char {
        self.letter
    }

    pub fn number(&self) -> u16 {
        self.number
    }
}

/// Unchecked on-disk form of [`DealIdSequence`].
#[derive(Deserialize)]
struct RawSequence {
    letter: char,
    number: u16,
}

impl TryFrom<RawSequence> for DealIdSequence {
    type Error = String;

    fn try_from(raw: RawSequence) -> Result<Self, Self::Error> {
        Self::new(raw.letter, raw.number).ok_or_else(|| {
            format!(
                "invalid deal id sequence {}{}: expected A-Z and {MIN_NUMBER}..={MAX_NUMBER}",
                raw.letter, raw.number
            )
        })
    }
}

impl Default for DealIdSequence {
    fn default() -> Self {
        Self::DEFAULT_SEED
    }
}
