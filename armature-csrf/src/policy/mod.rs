//! Token storage policies
//!
//! Every policy exposes the same three operations:
//!
//! - **issue** binds a fresh token to the session, replacing any previous one
//! - **retrieve_or_issue** returns the bound token, issuing one on first use
//! - **validate** checks a submitted token against the session and fails closed
//!
//! Variants differ only in where the token lives:
//!
//! - [`SessionBackedPolicy`]: stored under a reserved session key
//! - [`StatelessSignedPolicy`]: HMAC-signed, re-derived from the session ID
//! - [`LegacyDelegatingPolicy`]: session-backed under the predecessor's key,
//!   warning on every call

mod legacy;
mod session_backed;
mod stateless;

pub use legacy::{DeprecationReporter, LegacyDelegatingPolicy};
pub use session_backed::SessionBackedPolicy;
pub use stateless::{SignedToken, SigningKeys, StatelessSignedPolicy};

use crate::error::{CsrfError, Result};
use crate::session::SessionAdapter;
use crate::token::Token;

/// Uniform token lifecycle contract.
///
/// `session` is `None` when the request carries no session context; every
/// operation then fails with [`CsrfError::MissingSession`].
pub trait TokenPolicy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Create and bind a fresh token, overwriting any existing one.
    fn issue(&self, session: Option<&dyn SessionAdapter>) -> Result<Token>;

    /// Return the bound token, issuing one if none exists yet.
    ///
    /// Concurrent first calls for one session return the same token.
    fn retrieve_or_issue(&self, session: Option<&dyn SessionAdapter>) -> Result<Token>;

    /// Check a submitted token.
    ///
    /// Fails with `MissingSession`, `MissingToken` or `TokenMismatch`; never
    /// succeeds unless the token was issued for this same session.
    fn validate(&self, session: Option<&dyn SessionAdapter>, submitted: &str) -> Result<()>;
}

pub(crate) fn require_session(
    session: Option<&dyn SessionAdapter>,
) -> Result<&dyn SessionAdapter> {
    session.ok_or(CsrfError::MissingSession)
}
