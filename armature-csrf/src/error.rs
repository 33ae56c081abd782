use thiserror::Error;

#[derive(Error, Debug)]
pub enum CsrfError {
    /// The operating system could not supply secure randomness.
    #[error("Secure randomness unavailable: {0}")]
    Entropy(String),

    #[error("No session available for CSRF validation")]
    MissingSession,

    #[error("Missing CSRF token")]
    MissingToken,

    #[error("Invalid CSRF token")]
    TokenMismatch,

    /// Raised as a signal by the legacy policy; never returned from a request check.
    #[error("Deprecated CSRF session layout used (key '{key}')")]
    DeprecatedPathUsed { key: String },

    #[error("CSRF origin check failed: {0}")]
    BadOrigin(String),

    #[error("Session store error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CsrfError {
    /// Create a session store error
    pub fn session<S: Into<String>>(msg: S) -> Self {
        Self::Session(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the request must be denied as forged.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::MissingSession | Self::MissingToken | Self::TokenMismatch | Self::BadOrigin(_)
        )
    }

    /// HTTP status the framework should answer with.
    pub fn status_code(&self) -> u16 {
        if self.is_rejection() { 403 } else { 500 }
    }
}

pub type Result<T> = std::result::Result<T, CsrfError>;
