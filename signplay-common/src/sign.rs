//! Sign identifier helpers
//!
//! A sign identifier is an opaque, non-empty token naming one playable sign:
//! a letter, a digit, or a word (`"A"`, `"7"`, `"Thank_You"`). Repeats are
//! legal and meaningful (spelling a name), so nothing here enforces uniqueness.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated sign identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignId(String);

impl SignId {
    /// Create a sign identifier, rejecting empty or whitespace-only tokens
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("sign identifier must not be empty".to_string()));
        }
        Ok(Self(id))
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Token class of this identifier
    pub fn class(&self) -> SignClass {
        SignClass::of(&self.0)
    }
}

impl TryFrom<String> for SignId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SignId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SignId> for String {
    fn from(id: SignId) -> Self {
        id.0
    }
}

impl AsRef<str> for SignId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token class of a sign identifier
///
/// Single glyphs (one letter or digit) are simpler to perceive than word
/// signs and get shorter hold durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignClass {
    /// One letter or digit
    Glyph,
    /// Anything longer
    Word,
}

impl SignClass {
    /// Classify a raw identifier
    pub fn of(id: &str) -> Self {
        let mut chars = id.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_alphanumeric() => SignClass::Glyph,
            _ => SignClass::Word,
        }
    }
}

/// True when the identifier is a single letter or digit
pub fn is_glyph(id: &str) -> bool {
    SignClass::of(id) == SignClass::Glyph
}
