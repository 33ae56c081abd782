use super::{SessionBackedPolicy, TokenPolicy};
use crate::config::DEFAULT_LEGACY_KEY;
use crate::error::{CsrfError, Result};
use crate::session::SessionAdapter;
use crate::token::{Token, TokenGenerator};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Callback receiving a [`CsrfError::DeprecatedPathUsed`] signal.
pub type DeprecationReporter = Arc<dyn Fn(&CsrfError) + Send + Sync>;

/// Session-backed policy reading the token from the predecessor's session key.
///
/// Exists only to migrate sessions written by the old layout. Every call logs
/// a deprecation warning and notifies the optional reporter; behavior is
/// otherwise identical to [`SessionBackedPolicy`].
pub struct LegacyDelegatingPolicy {
    inner: SessionBackedPolicy,
    uses: AtomicU64,
    reporter: Option<DeprecationReporter>,
}

impl LegacyDelegatingPolicy {
    pub fn new(legacy_key: impl Into<String>) -> Self {
        Self {
            inner: SessionBackedPolicy::new(legacy_key),
            uses: AtomicU64::new(0),
            reporter: None,
        }
    }

    /// Replace the token generator
    pub fn with_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.inner = self.inner.with_generator(generator);
        self
    }

    /// Report every deprecated call to `reporter` in addition to the log
    pub fn on_deprecated(mut self, reporter: DeprecationReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn legacy_key(&self) -> &str {
        self.inner.storage_key()
    }

    /// Calls served through the legacy layout since construction
    pub fn deprecated_uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    fn signal(&self, operation: &'static str) {
        let uses = self.uses.fetch_add(1, Ordering::Relaxed) + 1;
        let signal = CsrfError::DeprecatedPathUsed {
            key: self.legacy_key().to_string(),
        };
        warn!(
            operation,
            uses,
            "{}; migrate sessions to the session-backed CSRF policy", signal
        );
        if let Some(reporter) = &self.reporter {
            reporter(&signal);
        }
    }
}

impl Default for LegacyDelegatingPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LEGACY_KEY)
    }
}

impl TokenPolicy for LegacyDelegatingPolicy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn issue(&self, session: Option<&dyn SessionAdapter>) -> Result<Token> {
        self.signal("issue");
        self.inner.issue(session)
    }

    fn retrieve_or_issue(&self, session: Option<&dyn SessionAdapter>) -> Result<Token> {
        self.signal("retrieve_or_issue");
        self.inner.retrieve_or_issue(session)
    }

    fn validate(&self, session: Option<&dyn SessionAdapter>, submitted: &str) -> Result<()> {
        self.signal("validate");
        self.inner.validate(session, submitted)
    }
}
