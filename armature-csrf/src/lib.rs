//! # Armature CSRF Protection
//!
//! Cross-Site Request Forgery (CSRF) protection for Armature applications.
//!
//! ## Features
//!
//! - ✅ **Session-bound Tokens** - Synchronizer token stored in the session
//! - ✅ **Signed Tokens** - Stateless HMAC-SHA256 tokens with secret rotation
//! - ✅ **Legacy Layout** - Read tokens written by the previous session layout
//! - ✅ **Race-free Issuance** - Concurrent first requests agree on one token
//! - ✅ **Template Binding** - One token per request for every form on a page
//! - ✅ **Origin Checking** - Origin/Referer verification for HTTPS requests
//!
//! ## Quick Start
//!
//! ```rust
//! use armature_csrf::{CsrfConfig, CsrfGuard, CsrfRequest, MemorySessionStore, SessionAdapter};
//! use http::Method;
//! use std::sync::Arc;
//!
//! let guard = CsrfGuard::new(CsrfConfig::default()).unwrap();
//! let store = MemorySessionStore::new();
//! let session: Arc<dyn SessionAdapter> = Arc::new(store.create());
//!
//! // GET: render the token into the form
//! let binding = guard.binding(Some(session.clone()));
//! let token = binding.get_csrf_token().unwrap();
//! assert_eq!(binding.get_csrf_token().unwrap(), token);
//!
//! // POST: the submitted token must match the session
//! let request = CsrfRequest::new(Method::POST, "/profile")
//!     .with_body(format!("csrf_token={}", token))
//!     .with_session(session);
//! assert!(guard.require_valid_csrf(&request).is_ok());
//! ```
//!
//! ## Stateless Tokens
//!
//! ```rust
//! use armature_csrf::{CsrfConfig, MemorySessionStore, PolicySelector};
//! use std::time::Duration;
//!
//! let secret = CsrfConfig::generate_secret().unwrap();
//! let config = CsrfConfig::stateless(secret)
//!     .unwrap()
//!     .with_max_age(Duration::from_secs(1800));
//! let selector = PolicySelector::from_config(&config).unwrap();
//!
//! let store = MemorySessionStore::new();
//! let session = store.create();
//! let token = selector.policy().issue(Some(&session)).unwrap();
//! assert!(selector.policy().validate(Some(&session), token.as_str()).is_ok());
//!
//! // Tokens are bound to the session they were issued for
//! let other = store.create();
//! assert!(selector.policy().validate(Some(&other), token.as_str()).is_err());
//! ```
//!
//! ## Usage with Armature
//!
//! ```ignore
//! use armature::prelude::*;
//! use armature_csrf::{CsrfConfig, CsrfGuard, CsrfRequest};
//!
//! #[controller("/account")]
//! struct AccountController {
//!     csrf: CsrfGuard,
//! }
//!
//! impl AccountController {
//!     #[post("/email")]
//!     async fn change_email(&self, req: HttpRequest) -> Result<HttpResponse, Error> {
//!         let check = to_csrf_request(&req);
//!         self.csrf
//!             .require_valid_csrf(&check)
//!             .map_err(|e| Error::Forbidden(e.to_string()))?;
//!
//!         // Process request
//!         Ok(HttpResponse::ok())
//!     }
//! }
//! ```

pub mod binding;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod policy;
pub mod selector;
pub mod session;
pub mod token;
pub mod validator;

pub use binding::TemplateBinding;
pub use clock::{Clock, SystemClock};
pub use config::{CsrfConfig, PolicyKind};
pub use error::{CsrfError, Result};
pub use guard::{CsrfGuard, CsrfRequest};
pub use policy::{
    DeprecationReporter, LegacyDelegatingPolicy, SessionBackedPolicy, SignedToken, SigningKeys,
    StatelessSignedPolicy, TokenPolicy,
};
pub use selector::PolicySelector;
pub use session::{MemorySession, MemorySessionStore, SessionAdapter, generate_session_id};
pub use token::{RandomTokenGenerator, Token, TokenGenerator};
pub use validator::constant_time_equals;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::binding::TemplateBinding;
    pub use crate::config::{CsrfConfig, PolicyKind};
    pub use crate::error::{CsrfError, Result};
    pub use crate::guard::{CsrfGuard, CsrfRequest};
    pub use crate::policy::TokenPolicy;
    pub use crate::selector::PolicySelector;
    pub use crate::session::SessionAdapter;
    pub use crate::token::Token;
}
