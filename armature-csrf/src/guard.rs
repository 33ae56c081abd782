use crate::binding::TemplateBinding;
use crate::config::CsrfConfig;
use crate::error::{CsrfError, Result};
use crate::selector::PolicySelector;
use crate::session::SessionAdapter;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The parts of an incoming request the CSRF check needs.
#[derive(Clone)]
pub struct CsrfRequest {
    pub method: Method,
    pub path: String,
    /// `http` or `https`
    pub scheme: String,
    /// Host the request was addressed to, with port when non-default
    pub host: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Session resolved by the framework, if any
    pub session: Option<Arc<dyn SessionAdapter>>,
}

impl CsrfRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            scheme: "http".to_string(),
            host: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
            session: None,
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_session(mut self, session: Arc<dyn SessionAdapter>) -> Self {
        self.session = Some(session);
        self
    }

    /// Header value as a string, ignoring non-UTF-8 values
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    fn effective_host(&self) -> Option<String> {
        self.host
            .clone()
            .or_else(|| self.header("host").map(str::to_string))
            .map(|host| strip_default_port(&host.to_lowercase()))
    }
}

/// CSRF enforcement for one application instance.
///
/// Handlers call [`CsrfGuard::require_valid_csrf`] before running
/// state-changing logic; a failure must be answered with
/// [`CsrfError::status_code`] (403) without running the handler body.
#[derive(Clone)]
pub struct CsrfGuard {
    config: Arc<CsrfConfig>,
    selector: PolicySelector,
}

impl CsrfGuard {
    /// Create a guard running the policy selected by `config`
    pub fn new(config: CsrfConfig) -> Result<Self> {
        let selector = PolicySelector::from_config(&config)?;
        Ok(Self::with_selector(config, selector))
    }

    /// Create a guard around an explicitly built selector
    pub fn with_selector(config: CsrfConfig, selector: PolicySelector) -> Self {
        debug!(policy = selector.name(), "Creating CSRF guard");
        Self {
            config: Arc::new(config),
            selector,
        }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    pub fn selector(&self) -> &PolicySelector {
        &self.selector
    }

    /// Template binding for a request carrying `session`
    pub fn binding(&self, session: Option<Arc<dyn SessionAdapter>>) -> TemplateBinding {
        TemplateBinding::new(
            self.selector.active_policy(),
            session,
            self.config.field_name.clone(),
        )
    }

    /// Check if request needs CSRF protection
    pub fn needs_protection(&self, request: &CsrfRequest) -> bool {
        if self
            .config
            .safe_methods
            .iter()
            .any(|method| method.eq_ignore_ascii_case(request.method.as_str()))
        {
            return false;
        }

        !self
            .config
            .exclude_paths
            .iter()
            .any(|excluded| request.path.starts_with(excluded.as_str()))
    }

    /// Reject the request unless it carries a valid token for its session.
    pub fn require_valid_csrf(&self, request: &CsrfRequest) -> Result<()> {
        if !self.needs_protection(request) {
            trace!(method = %request.method, path = %request.path, "CSRF check skipped");
            return Ok(());
        }

        let result = self.check(request);
        if let Err(ref error) = result {
            warn!(
                method = %request.method,
                path = %request.path,
                policy = self.selector.name(),
                error = %error,
                "Rejected request failing CSRF check"
            );
        }
        result
    }

    fn check(&self, request: &CsrfRequest) -> Result<()> {
        if self.config.check_origin {
            self.check_origin(request)?;
        }
        let submitted = self.submitted_token(request).unwrap_or_default();
        self.selector
            .policy()
            .validate(request.session.as_deref(), &submitted)
    }

    /// Verify Origin (or Referer) of an HTTPS request against trusted hosts.
    ///
    /// Plain HTTP requests pass; for them the check adds nothing an active
    /// attacker could not forge.
    pub fn check_origin(&self, request: &CsrfRequest) -> Result<()> {
        if !request.scheme.eq_ignore_ascii_case("https") {
            return Ok(());
        }

        let origin = request
            .header("origin")
            .or_else(|| request.header("referer"))
            .filter(|value| !value.is_empty())
            .ok_or_else(|| CsrfError::BadOrigin("no Origin or Referer".to_string()))?;

        let uri: Uri = origin
            .parse()
            .map_err(|_| CsrfError::BadOrigin(format!("unparseable origin '{}'", origin)))?;
        if uri.scheme_str() != Some("https") {
            return Err(CsrfError::BadOrigin(
                "Referer is insecure while host is secure".to_string(),
            ));
        }
        let netloc = uri
            .authority()
            .map(|authority| strip_https_port(&authority.as_str().to_lowercase()))
            .ok_or_else(|| CsrfError::BadOrigin(format!("origin '{}' has no host", origin)))?;

        let trusted = self
            .config
            .trusted_origins
            .iter()
            .map(|host| host.to_lowercase())
            .chain(request.effective_host());
        for host in trusted {
            if is_same_domain(&netloc, &host) {
                return Ok(());
            }
        }

        Err(CsrfError::BadOrigin(format!(
            "{} does not match any trusted origins",
            origin
        )))
    }

    /// Token from the body field (JSON or form), then from the header.
    fn submitted_token(&self, request: &CsrfRequest) -> Option<String> {
        self.token_from_body(request)
            .filter(|token| !token.is_empty())
            .or_else(|| {
                request
                    .header(&self.config.header_name)
                    .map(str::to_string)
            })
    }

    fn token_from_body(&self, request: &CsrfRequest) -> Option<String> {
        if request.body.is_empty() {
            return None;
        }

        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(&request.body) {
            return json
                .get(&self.config.field_name)
                .and_then(|token| token.as_str())
                .map(str::to_string);
        }

        serde_urlencoded::from_bytes::<Vec<(String, String)>>(&request.body)
            .ok()?
            .into_iter()
            .find(|(key, _)| *key == self.config.field_name)
            .map(|(_, value)| value)
    }
}

/// Drop `:443` from an https origin; any other port is significant.
fn strip_https_port(netloc: &str) -> String {
    netloc.strip_suffix(":443").unwrap_or(netloc).to_string()
}

fn strip_default_port(host: &str) -> String {
    host.strip_suffix(":443")
        .or_else(|| host.strip_suffix(":80"))
        .unwrap_or(host)
        .to_string()
}

/// `pattern` matches `host` exactly, or any subdomain when it starts with a dot.
fn is_same_domain(host: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    match pattern.strip_prefix('.') {
        Some(domain) => host == domain || host.ends_with(pattern),
        None => host == pattern,
    }
}
