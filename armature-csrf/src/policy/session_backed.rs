use super::{TokenPolicy, require_session};
use crate::config::DEFAULT_STORAGE_KEY;
use crate::error::{CsrfError, Result};
use crate::session::SessionAdapter;
use crate::token::{RandomTokenGenerator, Token, TokenGenerator};
use crate::validator::{check_submitted, constant_time_equals};
use std::sync::Arc;
use tracing::{debug, trace};

/// Synchronizer-token policy: the token is stored in the session itself.
#[derive(Clone)]
pub struct SessionBackedPolicy {
    storage_key: String,
    generator: Arc<dyn TokenGenerator>,
}

impl SessionBackedPolicy {
    /// Create a policy storing tokens under `storage_key`
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            generator: Arc::new(RandomTokenGenerator::new()),
        }
    }

    /// Replace the token generator
    pub fn with_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn bound_token(&self, session: &dyn SessionAdapter) -> Result<Option<String>> {
        Ok(session
            .read(&self.storage_key)?
            .filter(|value| !value.is_empty()))
    }
}

impl Default for SessionBackedPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_KEY)
    }
}

impl TokenPolicy for SessionBackedPolicy {
    fn name(&self) -> &'static str {
        "session"
    }

    fn issue(&self, session: Option<&dyn SessionAdapter>) -> Result<Token> {
        let session = require_session(session)?;
        let token = self.generator.generate()?;
        session.write(&self.storage_key, token.as_str())?;

        debug!(
            session_id = %session.session_id(),
            key = %self.storage_key,
            "Issued new CSRF token"
        );
        Ok(token)
    }

    fn retrieve_or_issue(&self, session: Option<&dyn SessionAdapter>) -> Result<Token> {
        let session = require_session(session)?;
        if let Some(existing) = self.bound_token(session)? {
            return Ok(Token::new(existing));
        }

        let candidate = self.generator.generate()?;
        let stored = session.set_if_absent(&self.storage_key, candidate.as_str())?;
        if stored.is_empty() {
            return Err(CsrfError::session(format!(
                "Session store kept an empty value under '{}'",
                self.storage_key
            )));
        }
        if candidate.matches(&stored) {
            debug!(session_id = %session.session_id(), "Issued first CSRF token for session");
        } else {
            trace!(
                session_id = %session.session_id(),
                "Concurrent request bound the token first"
            );
        }
        Ok(Token::new(stored))
    }

    fn validate(&self, session: Option<&dyn SessionAdapter>, submitted: &str) -> Result<()> {
        let session = require_session(session)?;
        let expected = self.bound_token(session)?.ok_or(CsrfError::MissingToken)?;
        check_submitted(submitted)?;

        if constant_time_equals(expected.as_bytes(), submitted.as_bytes()) {
            trace!(session_id = %session.session_id(), "CSRF token accepted");
            Ok(())
        } else {
            trace!(session_id = %session.session_id(), "CSRF token mismatch");
            Err(CsrfError::TokenMismatch)
        }
    }
}
