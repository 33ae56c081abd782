//! Token accessor for template rendering.

use crate::error::{CsrfError, Result};
use crate::policy::TokenPolicy;
use crate::session::SessionAdapter;
use crate::token::Token;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Request-scoped handle templates use to obtain the CSRF token.
///
/// The token is resolved through the active policy's `retrieve_or_issue` on
/// first use and cached, so every call within one request renders the same
/// value. Build a new binding for each request.
pub struct TemplateBinding {
    policy: Arc<dyn TokenPolicy>,
    session: Option<Arc<dyn SessionAdapter>>,
    field_name: String,
    resolved: OnceCell<Token>,
}

impl TemplateBinding {
    pub fn new(
        policy: Arc<dyn TokenPolicy>,
        session: Option<Arc<dyn SessionAdapter>>,
        field_name: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            session,
            field_name: field_name.into(),
            resolved: OnceCell::new(),
        }
    }

    /// The current request's token.
    pub fn get_csrf_token(&self) -> Result<Token> {
        self.resolved
            .get_or_try_init(|| self.policy.retrieve_or_issue(self.session.as_deref()))
            .cloned()
    }

    /// Form field name the token is submitted under
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// `<input type="hidden">` carrying the token
    pub fn hidden_input(&self) -> Result<String> {
        let token = self.get_csrf_token()?;
        Ok(format!(
            r#"<input type="hidden" name="{}" value="{}">"#,
            escape_attr(&self.field_name),
            escape_attr(token.as_str())
        ))
    }

    /// Add `csrf_token` and `csrf_field_name` to a JSON render context.
    pub fn extend_context(&self, context: &mut serde_json::Value) -> Result<()> {
        let token = self.get_csrf_token()?;
        let map = context
            .as_object_mut()
            .ok_or_else(|| CsrfError::config("Template context must be a JSON object"))?;
        map.insert("csrf_token".to_string(), token.as_str().into());
        map.insert("csrf_field_name".to_string(), self.field_name.clone().into());
        Ok(())
    }
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
