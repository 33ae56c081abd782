use crate::error::{CsrfError, Result};
use crate::validator::constant_time_equals;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Random bytes per generated token (160 bits, 40 hex characters).
pub const TOKEN_BYTES: usize = 20;

/// Smallest token size a generator may be configured with (128 bits).
pub const MIN_TOKEN_BYTES: usize = 16;

/// An issued CSRF token.
///
/// Equality is checked in constant time. `Debug` output never contains the
/// token value so tokens can travel through structured logs safely; use
/// [`Token::as_str`] or `Display` when rendering into a page.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wrap an existing token value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare against a submitted value in constant time.
    pub fn matches(&self, submitted: &str) -> bool {
        constant_time_equals(self.0.as_bytes(), submitted.as_bytes())
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for Token {}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").field("len", &self.0.len()).finish()
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Source of fresh token values.
pub trait TokenGenerator: Send + Sync {
    /// Produce a new unpredictable token, or fail with [`CsrfError::Entropy`].
    fn generate(&self) -> Result<Token>;
}

impl<F> TokenGenerator for F
where
    F: Fn() -> Result<Token> + Send + Sync,
{
    fn generate(&self) -> Result<Token> {
        self()
    }
}

/// Hex tokens read straight from the operating system CSPRNG.
#[derive(Debug, Clone)]
pub struct RandomTokenGenerator {
    bytes: usize,
}

impl RandomTokenGenerator {
    pub fn new() -> Self {
        Self { bytes: TOKEN_BYTES }
    }

    /// Generator producing `bytes` random bytes per token.
    pub fn with_bytes(bytes: usize) -> Result<Self> {
        if bytes < MIN_TOKEN_BYTES {
            return Err(CsrfError::config(format!(
                "Tokens need at least {} random bytes, got {}",
                MIN_TOKEN_BYTES, bytes
            )));
        }
        Ok(Self { bytes })
    }
}

impl Default for RandomTokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> Result<Token> {
        let bytes = random_bytes(self.bytes)?;
        Ok(Token(hex::encode(bytes)))
    }
}

/// Fill a buffer from the OS CSPRNG, surfacing failure instead of degrading.
pub(crate) fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CsrfError::Entropy(e.to_string()))?;
    Ok(buf)
}
