use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Longest identifier Postgres keeps without truncating.
pub const MAX_IDENT_LEN: usize = 63;

/// Validated SQL identifier.
///
/// Table and column names end up interpolated into DDL text, so every name
/// crosses this boundary first: ascii alphanumeric/underscore, not starting
/// with a digit, length-bounded. Anything else is rejected before a single
/// statement is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ident(String);

impl Ident {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let mut chars = value.chars();

        let head_ok = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !head_ok || !tail_ok || value.len() > MAX_IDENT_LEN {
            return Err(EngineError::InvalidIdent(value));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Ident {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Ident {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Ident> for String {
    fn from(ident: Ident) -> Self {
        ident.0
    }
}
