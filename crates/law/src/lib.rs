//! Law: the deny-first policy evaluator guarding device actions.
//!
//! The security baseline is deny-on-anything: deny rules are evaluated in a
//! fixed order and the first failing rule decides the outcome. No allow rule
//! can short-circuit a pending deny. The evaluator is a pure function of
//! `(Proposal, PolicyConfig)`, so identical inputs always produce identical
//! decisions.
//!
//! Alongside the binding evaluator, the advisory module computes per-policy
//! sub-results in no particular order. Those never decide anything by
//! themselves; they feed the `explain` audit stage and the auto-approval
//! predicate.

#![deny(unsafe_code)]

pub mod advisory;
pub mod config;
pub mod rules;

pub use advisory::{explain, Explanation, PolicyCheck};
pub use config::{PolicyConfig, PolicyError, VerificationConfig};
pub use rules::{evaluate, LawDecision};

/// Rule identifiers carried in `policy_basis` lists.
pub mod rule_ids {
    /// Prefix of every deny basis.
    pub const DEFAULT_DENY: &str = "law.v1.default_deny";
    /// Target or verify entity id is malformed.
    pub const INVALID_ENTITY_FORMAT: &str = "law.v1.invalid_entity_format";
    /// Target and verify entities differ while equality is enforced.
    pub const TARGET_VERIFY_MISMATCH: &str = "law.v1.target_verify_mismatch";
    /// Action type outside the configured allowlist.
    pub const ACTION_NOT_ALLOWED: &str = "law.v1.action_not_allowed";
    /// Target entity outside the configured allowlist.
    pub const ENTITY_NOT_ALLOWLISTED: &str = "law.v1.entity_not_allowlisted";
    /// Declared blast radius wider than the configured ceiling.
    pub const BLAST_RADIUS_EXCEEDED: &str = "law.v1.blast_radius_exceeded";
    /// Action requires a declared expected outcome and none was given.
    pub const MISSING_EXPECTED_OUTCOME: &str = "law.v1.missing_expected_outcome";
    /// Rollback plan required but absent or empty.
    pub const MISSING_ROLLBACK: &str = "law.v1.missing_rollback";
    /// Every rule passed.
    pub const ALLOWLIST_MATCH: &str = "law.v1.allowlist_match";
    /// Device API credentials missing at execution time.
    pub const MISCONFIGURED_NO_TOKEN: &str = "law.v1.misconfigured.no_token";
}
