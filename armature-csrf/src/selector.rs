//! Per-application policy selection.

use crate::config::{CsrfConfig, PolicyKind};
use crate::error::Result;
use crate::policy::{
    LegacyDelegatingPolicy, SessionBackedPolicy, SigningKeys, StatelessSignedPolicy, TokenPolicy,
};
use crate::session::SessionAdapter;
use crate::token::Token;
use std::sync::Arc;
use tracing::{debug, info};

/// The token policy chosen for one application instance.
///
/// Built once at startup and handed to whatever needs it; cloning shares the
/// same policy. Separate application instances hold separate selectors, so
/// several policies can run side by side in one process.
#[derive(Clone)]
pub struct PolicySelector {
    policy: Arc<dyn TokenPolicy>,
}

impl PolicySelector {
    /// Wrap an already constructed policy
    pub fn new(policy: Arc<dyn TokenPolicy>) -> Self {
        debug!(policy = policy.name(), "Selected CSRF policy");
        Self { policy }
    }

    /// Build the policy described by `config`
    pub fn from_config(config: &CsrfConfig) -> Result<Self> {
        config.validate()?;

        let policy: Arc<dyn TokenPolicy> = match config.policy {
            PolicyKind::Session => Arc::new(SessionBackedPolicy::new(config.storage_key.clone())),
            PolicyKind::StatelessSigned => {
                let mut keys = SigningKeys::new(config.secret.clone())?;
                for secret in &config.previous_secrets {
                    keys = keys.with_previous(secret.clone())?;
                }
                Arc::new(StatelessSignedPolicy::new(keys, config.max_age)?)
            }
            PolicyKind::Legacy => Arc::new(LegacyDelegatingPolicy::new(config.legacy_key.clone())),
        };

        Ok(Self::new(policy))
    }

    /// The active policy, shared
    pub fn active_policy(&self) -> Arc<dyn TokenPolicy> {
        Arc::clone(&self.policy)
    }

    /// The active policy, borrowed
    pub fn policy(&self) -> &dyn TokenPolicy {
        self.policy.as_ref()
    }

    pub fn name(&self) -> &'static str {
        self.policy.name()
    }

    /// Replace the session's token, e.g. after login or logout.
    pub fn rotate(&self, session: Option<&dyn SessionAdapter>) -> Result<Token> {
        if let Some(session) = session {
            info!(session_id = %session.session_id(), policy = self.name(), "Rotating CSRF token");
        }
        self.policy.issue(session)
    }
}

impl std::fmt::Debug for PolicySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySelector")
            .field("policy", &self.policy.name())
            .finish()
    }
}
