use crate::error::{CsrfError, Result};
use crate::token::random_bytes;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Session key holding the token for the session-backed policy.
pub const DEFAULT_STORAGE_KEY: &str = "_csrf_token";

/// Session key used by the predecessor implementation.
pub const DEFAULT_LEGACY_KEY: &str = "_csrft_";

/// Minimum signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Prefix of the environment variables read by [`CsrfConfig::from_env`].
pub const ENV_PREFIX: &str = "ARMATURE_CSRF_";

/// Which token policy an application runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Token stored in the session (default)
    #[default]
    Session,
    /// HMAC-signed token, no server-side storage
    StatelessSigned,
    /// Session-backed under the predecessor's key, with deprecation warnings
    Legacy,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Session => "session",
            PolicyKind::StatelessSigned => "stateless_signed",
            PolicyKind::Legacy => "legacy",
        }
    }
}

impl FromStr for PolicyKind {
    type Err = CsrfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "session" | "session_backed" => Ok(PolicyKind::Session),
            "stateless" | "stateless_signed" | "signed" => Ok(PolicyKind::StatelessSigned),
            "legacy" => Ok(PolicyKind::Legacy),
            other => Err(CsrfError::config(format!("Unknown CSRF policy '{}'", other))),
        }
    }
}

/// CSRF protection configuration
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Active token policy
    pub policy: PolicyKind,

    /// Session key for the session-backed policy
    pub storage_key: String,

    /// Session key read by the legacy policy
    pub legacy_key: String,

    /// Signing secret for the stateless policy (at least 32 bytes)
    pub secret: Vec<u8>,

    /// Retired secrets still accepted by the stateless policy
    pub previous_secrets: Vec<Vec<u8>>,

    /// Maximum age of a signed token
    pub max_age: Duration,

    /// Header name for CSRF token
    pub header_name: String,

    /// Form field name for CSRF token
    pub field_name: String,

    /// Safe HTTP methods (not checked for CSRF)
    pub safe_methods: Vec<String>,

    /// Paths to exclude from CSRF protection
    pub exclude_paths: Vec<String>,

    /// Check Origin/Referer on HTTPS requests
    pub check_origin: bool,

    /// Extra origins trusted by the origin check; a leading dot matches subdomains
    pub trusted_origins: Vec<String>,
}

impl CsrfConfig {
    /// Session-backed configuration with default keys
    pub fn new() -> Self {
        Self {
            policy: PolicyKind::Session,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            legacy_key: DEFAULT_LEGACY_KEY.to_string(),
            secret: Vec::new(),
            previous_secrets: Vec::new(),
            max_age: Duration::from_secs(3600), // 1 hour
            header_name: "X-CSRF-Token".to_string(),
            field_name: "csrf_token".to_string(),
            safe_methods: vec![
                "GET".to_string(),
                "HEAD".to_string(),
                "OPTIONS".to_string(),
                "TRACE".to_string(),
            ],
            exclude_paths: Vec::new(),
            check_origin: true,
            trusted_origins: Vec::new(),
        }
    }

    /// Stateless signed configuration
    pub fn stateless(secret: Vec<u8>) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CsrfError::config(format!(
                "Secret key must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self::new()
            .with_policy(PolicyKind::StatelessSigned)
            .with_secret(secret))
    }

    /// Legacy configuration reading tokens from `legacy_key`
    pub fn legacy(legacy_key: impl Into<String>) -> Self {
        Self::new()
            .with_policy(PolicyKind::Legacy)
            .with_legacy_key(legacy_key)
    }

    /// Generate a secret key
    pub fn generate_secret() -> Result<Vec<u8>> {
        random_bytes(MIN_SECRET_LEN)
    }

    /// Set the active policy
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    /// Set the session storage key
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Set the legacy session key
    pub fn with_legacy_key(mut self, key: impl Into<String>) -> Self {
        self.legacy_key = key.into();
        self
    }

    /// Set the signing secret
    pub fn with_secret(mut self, secret: Vec<u8>) -> Self {
        self.secret = secret;
        self
    }

    /// Keep accepting tokens signed with a retired secret
    pub fn with_previous_secret(mut self, secret: Vec<u8>) -> Self {
        self.previous_secrets.push(secret);
        self
    }

    /// Set signed token lifetime
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set header name
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Set field name
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Replace safe methods
    pub fn with_safe_methods(mut self, methods: Vec<String>) -> Self {
        self.safe_methods = methods;
        self
    }

    /// Add excluded paths
    pub fn with_exclude_paths(mut self, paths: Vec<String>) -> Self {
        self.exclude_paths = paths;
        self
    }

    /// Enable or disable the origin check
    pub fn with_check_origin(mut self, enabled: bool) -> Self {
        self.check_origin = enabled;
        self
    }

    /// Set trusted origins
    pub fn with_trusted_origins(mut self, origins: Vec<String>) -> Self {
        self.trusted_origins = origins;
        self
    }

    /// Check the configuration is usable for its policy.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("storage_key", &self.storage_key),
            ("legacy_key", &self.legacy_key),
            ("header_name", &self.header_name),
            ("field_name", &self.field_name),
        ] {
            if value.trim().is_empty() {
                return Err(CsrfError::config(format!("{} must not be empty", name)));
            }
        }

        if self.policy == PolicyKind::StatelessSigned {
            let short = std::iter::once(&self.secret)
                .chain(&self.previous_secrets)
                .any(|secret| secret.len() < MIN_SECRET_LEN);
            if short {
                return Err(CsrfError::config(format!(
                    "Secret keys must be at least {} bytes",
                    MIN_SECRET_LEN
                )));
            }
            if self.max_age.as_secs() < 2 {
                return Err(CsrfError::config("max_age must be at least 2 seconds"));
            }
        }

        Ok(())
    }

    /// Load configuration from JSON.
    ///
    /// Secrets are base64url strings (no padding); `max_age` is in seconds.
    /// Unset fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        raw.apply(Self::new())
    }

    /// Load configuration from `ARMATURE_CSRF_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from `ARMATURE_CSRF_*` key/value pairs.
    ///
    /// Recognized suffixes: `POLICY`, `STORAGE_KEY`, `LEGACY_KEY`, `SECRET`,
    /// `PREVIOUS_SECRETS`, `MAX_AGE`, `HEADER_NAME`, `FIELD_NAME`,
    /// `CHECK_ORIGIN`, `TRUSTED_ORIGINS`, `EXCLUDE_PATHS`. List values are
    /// comma separated.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut raw = RawConfig::default();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "POLICY" => raw.policy = Some(value.parse()?),
                "STORAGE_KEY" => raw.storage_key = Some(value),
                "LEGACY_KEY" => raw.legacy_key = Some(value),
                "SECRET" => raw.secret = Some(value),
                "PREVIOUS_SECRETS" => raw.previous_secrets = split_list(&value),
                "MAX_AGE" => {
                    let secs = value.trim().parse::<u64>().map_err(|e| {
                        CsrfError::config(format!("Invalid {}MAX_AGE: {}", ENV_PREFIX, e))
                    })?;
                    raw.max_age = Some(secs);
                }
                "HEADER_NAME" => raw.header_name = Some(value),
                "FIELD_NAME" => raw.field_name = Some(value),
                "CHECK_ORIGIN" => raw.check_origin = Some(parse_flag(&value)?),
                "TRUSTED_ORIGINS" => raw.trusted_origins = split_list(&value),
                "EXCLUDE_PATHS" => raw.exclude_paths = split_list(&value),
                _ => {}
            }
        }
        raw.apply(Self::new())
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized configuration surface.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    policy: Option<PolicyKind>,
    storage_key: Option<String>,
    legacy_key: Option<String>,
    secret: Option<String>,
    previous_secrets: Vec<String>,
    max_age: Option<u64>,
    header_name: Option<String>,
    field_name: Option<String>,
    safe_methods: Option<Vec<String>>,
    exclude_paths: Vec<String>,
    check_origin: Option<bool>,
    trusted_origins: Vec<String>,
}

impl RawConfig {
    fn apply(self, mut config: CsrfConfig) -> Result<CsrfConfig> {
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(key) = self.storage_key {
            config.storage_key = key;
        }
        if let Some(key) = self.legacy_key {
            config.legacy_key = key;
        }
        if let Some(secret) = self.secret {
            config.secret = decode_secret(&secret)?;
        }
        for secret in &self.previous_secrets {
            config.previous_secrets.push(decode_secret(secret)?);
        }
        if let Some(secs) = self.max_age {
            config.max_age = Duration::from_secs(secs);
        }
        if let Some(name) = self.header_name {
            config.header_name = name;
        }
        if let Some(name) = self.field_name {
            config.field_name = name;
        }
        if let Some(methods) = self.safe_methods {
            config.safe_methods = methods.into_iter().map(|m| m.to_uppercase()).collect();
        }
        config.exclude_paths.extend(self.exclude_paths);
        if let Some(enabled) = self.check_origin {
            config.check_origin = enabled;
        }
        config.trusted_origins.extend(self.trusted_origins);

        config.validate()?;
        Ok(config)
    }
}

fn decode_secret(encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .map_err(|e| CsrfError::config(format!("Secret is not valid base64url: {}", e)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CsrfError::config(format!("Invalid boolean '{}'", other))),
    }
}
