//! Best-effort secret redaction for every string leaving the core.
//!
//! Applied to error messages surfaced in receipts and to every payload
//! handed to the audit log. Redaction is one-way: configured secrets,
//! bearer credentials and authorization header fragments are replaced,
//! and token-bearing fields are dropped from maps entirely.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Replacement marker for redacted content.
pub const REDACTED: &str = "[REDACTED]";

/// Map keys that are dropped outright before serialization.
pub const SECRET_FIELDS: [&str; 2] = ["confirmation_token", "steward_key_token"];

static BEARER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Bearer\s+\S+").expect("bearer regex"));

static AUTH_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"]?Authorization['"]?\s*:\s*['"]?[^'"}\]]+['"]?"#).expect("auth header regex")
});

/// One-way redactor for a fixed set of configured secrets.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    secrets: Vec<String>,
}

impl Sanitizer {
    /// Build a sanitizer over the given secret strings; empties are ignored.
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let secrets = secrets.into_iter().map(Into::into).filter(|s| !s.is_empty()).collect();
        Self { secrets }
    }

    /// Redact configured secrets, bearer credentials and authorization
    /// header fragments from `s`.
    pub fn sanitize(&self, s: &str) -> String {
        let mut out = s.to_string();
        for secret in &self.secrets {
            out = out.replace(secret, REDACTED);
        }
        out = BEARER_RE.replace_all(&out, format!("Bearer {REDACTED}")).into_owned();
        out = AUTH_HEADER_RE.replace_all(&out, format!("Authorization: {REDACTED}")).into_owned();
        out
    }

    /// Recursively sanitize a JSON value in place: strings are redacted and
    /// secret-bearing keys are removed from objects.
    pub fn sanitize_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                let clean = self.sanitize(s);
                if clean != *s {
                    *s = clean;
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.sanitize_value(item);
                }
            }
            Value::Object(map) => {
                for field in SECRET_FIELDS {
                    map.remove(field);
                }
                for (_, v) in map.iter_mut() {
                    self.sanitize_value(v);
                }
            }
            _ => {}
        }
    }
}
