use super::{TokenPolicy, require_session};
use crate::clock::{Clock, SystemClock};
use crate::config::MIN_SECRET_LEN;
use crate::error::{CsrfError, Result};
use crate::session::SessionAdapter;
use crate::token::Token;
use crate::validator::{check_submitted, constant_time_equals};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

type HmacSha256 = Hmac<Sha256>;

/// Tolerated drift for tokens stamped slightly in the future.
const CLOCK_SKEW_SECS: i64 = 5;

#[derive(Clone)]
struct RetiredKey {
    secret: Vec<u8>,
    retire_at: Option<DateTime<Utc>>,
}

/// Signing secrets for the stateless policy.
///
/// New tokens are always signed with the current secret. Previous secrets
/// still verify tokens until their retirement time so rotating the secret
/// does not invalidate every open form at once.
#[derive(Clone)]
pub struct SigningKeys {
    current: Vec<u8>,
    previous: Vec<RetiredKey>,
}

impl SigningKeys {
    /// Keys with a single signing secret (at least 32 bytes)
    pub fn new(secret: Vec<u8>) -> Result<Self> {
        check_secret(&secret)?;
        Ok(Self {
            current: secret,
            previous: Vec::new(),
        })
    }

    /// Keep accepting tokens signed with `secret` until it is removed
    pub fn with_previous(mut self, secret: Vec<u8>) -> Result<Self> {
        check_secret(&secret)?;
        self.previous.push(RetiredKey {
            secret,
            retire_at: None,
        });
        Ok(self)
    }

    /// Switch to `secret`, accepting the old one until `grace_until`
    pub fn rotate(mut self, secret: Vec<u8>, grace_until: DateTime<Utc>) -> Result<Self> {
        check_secret(&secret)?;
        let old = std::mem::replace(&mut self.current, secret);
        self.previous.insert(
            0,
            RetiredKey {
                secret: old,
                retire_at: Some(grace_until),
            },
        );
        Ok(self)
    }

    /// Number of secrets that may still verify tokens at `now`
    pub fn accepted_count(&self, now: DateTime<Utc>) -> usize {
        self.accepted(now).count()
    }

    fn accepted(&self, now: DateTime<Utc>) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.current.as_slice()).chain(
            self.previous
                .iter()
                .filter(move |key| key.retire_at.is_none_or(|at| now < at))
                .map(|key| key.secret.as_slice()),
        )
    }
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeys")
            .field("previous", &self.previous.len())
            .finish_non_exhaustive()
    }
}

fn check_secret(secret: &[u8]) -> Result<()> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(CsrfError::config(format!(
            "Secret key must be at least {} bytes",
            MIN_SECRET_LEN
        )));
    }
    Ok(())
}

/// Wire form of a stateless token: `<issued_at>.<base64url signature>`.
///
/// The session ID is not carried; it is supplied by the session at
/// validation time and covered by the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    /// Unix timestamp (seconds) the token was signed at
    pub issued_at: i64,
    /// HMAC-SHA256 over the session ID and `issued_at`
    pub signature: Vec<u8>,
}

impl SignedToken {
    /// Sign `session_id` at `issued_at` with `secret`
    pub fn sign(secret: &[u8], session_id: &str, issued_at: i64) -> Result<Self> {
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| CsrfError::config(e.to_string()))?;
        // Length prefix keeps (session_id, issued_at) pairs unambiguous.
        mac.update(&(session_id.len() as u64).to_be_bytes());
        mac.update(session_id.as_bytes());
        mac.update(&issued_at.to_be_bytes());

        Ok(Self {
            issued_at,
            signature: mac.finalize().into_bytes().to_vec(),
        })
    }

    /// Encode to the string handed to clients
    pub fn encode(&self) -> String {
        format!("{}.{}", self.issued_at, URL_SAFE_NO_PAD.encode(&self.signature))
    }

    /// Parse a submitted value; any malformation is a mismatch.
    pub fn decode(encoded: &str) -> Result<Self> {
        let (issued_at, signature) = encoded
            .split_once('.')
            .ok_or(CsrfError::TokenMismatch)?;
        // Only the exact form `encode` emits: no sign, no leading zeros.
        let canonical = issued_at.bytes().all(|b| b.is_ascii_digit())
            && (issued_at == "0" || !issued_at.starts_with('0'));
        if !canonical {
            return Err(CsrfError::TokenMismatch);
        }
        let issued_at = issued_at
            .parse::<i64>()
            .map_err(|_| CsrfError::TokenMismatch)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CsrfError::TokenMismatch)?;

        Ok(Self {
            issued_at,
            signature,
        })
    }
}

/// Double-submit style policy verifying HMAC-signed tokens without storage.
#[derive(Clone)]
pub struct StatelessSignedPolicy {
    keys: SigningKeys,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl StatelessSignedPolicy {
    /// Create a policy whose tokens stay valid for `max_age` (at least 2s)
    pub fn new(keys: SigningKeys, max_age: Duration) -> Result<Self> {
        if max_age.as_secs() < 2 {
            return Err(CsrfError::config("max_age must be at least 2 seconds"));
        }
        debug!(max_age = ?max_age, "Creating stateless signed CSRF policy");
        Ok(Self {
            keys,
            max_age,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn max_age_secs(&self) -> i64 {
        i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX)
    }

    /// Retrievals inside one window re-derive the same token; a window is
    /// half the token lifetime so a retrieved token has at least half of
    /// its lifetime left.
    fn window_start(&self, now: i64) -> i64 {
        let window = (self.max_age_secs() / 2).max(1);
        now - now.rem_euclid(window)
    }

    fn sign_at(&self, session: &dyn SessionAdapter, issued_at: i64) -> Result<Token> {
        let signed = SignedToken::sign(&self.keys.current, session.session_id(), issued_at)?;
        Ok(Token::new(signed.encode()))
    }
}

impl TokenPolicy for StatelessSignedPolicy {
    fn name(&self) -> &'static str {
        "stateless_signed"
    }

    fn issue(&self, session: Option<&dyn SessionAdapter>) -> Result<Token> {
        let session = require_session(session)?;
        let now = self.clock.now().timestamp();
        let token = self.sign_at(session, now)?;

        debug!(session_id = %session.session_id(), issued_at = now, "Issued signed CSRF token");
        Ok(token)
    }

    fn retrieve_or_issue(&self, session: Option<&dyn SessionAdapter>) -> Result<Token> {
        let session = require_session(session)?;
        let issued_at = self.window_start(self.clock.now().timestamp());
        self.sign_at(session, issued_at)
    }

    fn validate(&self, session: Option<&dyn SessionAdapter>, submitted: &str) -> Result<()> {
        let session = require_session(session)?;
        if submitted.is_empty() {
            return Err(CsrfError::MissingToken);
        }
        check_submitted(submitted)?;

        let claimed = SignedToken::decode(submitted)?;
        let now = self.clock.now();

        let mut verified = false;
        for secret in self.keys.accepted(now) {
            let expected = SignedToken::sign(secret, session.session_id(), claimed.issued_at)?;
            verified |= constant_time_equals(&expected.signature, &claimed.signature);
        }
        if !verified {
            trace!(session_id = %session.session_id(), "Signed CSRF token failed verification");
            return Err(CsrfError::TokenMismatch);
        }

        let age = now.timestamp() - claimed.issued_at;
        if age < -CLOCK_SKEW_SECS || age > self.max_age_secs() {
            trace!(session_id = %session.session_id(), age, "Signed CSRF token outside its lifetime");
            return Err(CsrfError::TokenMismatch);
        }

        trace!(session_id = %session.session_id(), "Signed CSRF token accepted");
        Ok(())
    }
}
