//! Entity identifier validation.
//!
//! Entity ids look like `light.kitchen`: a domain and an object id joined by
//! a dot, lowercase alphanumerics and underscores only. Any entity id that
//! crosses a trust boundary is re-checked here even when an outer layer has
//! already pattern-validated it.

use once_cell::sync::Lazy;
use regex::Regex;

static ENTITY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").expect("entity id regex"));

/// Whether `s` is a well-formed entity identifier.
pub fn is_valid_entity_id(s: &str) -> bool {
    ENTITY_ID_RE.is_match(s)
}
