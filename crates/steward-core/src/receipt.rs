//! Execution receipts: the signed-off statement of what happened for one
//! proposal, including before/after state and verification evidence.

use crate::proposal::{ActionType, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Evidence strings are capped so receipts stay bounded.
pub const MAX_EVIDENCE_LEN: usize = 1500;

/// Terminal outcome of a proposal's pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptDecision {
    /// Executed and the declared outcome was observed.
    Allowed,
    /// Executed, but nothing was declared to verify against.
    AllowedWithConditions,
    /// Refused by the law evaluator.
    Denied,
    /// Execution or verification failed.
    Failed,
    /// The approval outlived its TTL before execution.
    Expired,
    /// Not executed: unapproved decision or rate limit.
    Skipped,
    /// Refused at execution time for a missing expected outcome.
    Rejected,
}

impl ReceiptDecision {
    /// Wire label of this decision.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::AllowedWithConditions => "allowed_with_conditions",
            Self::Denied => "denied",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Skipped => "skipped",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReceiptDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome verification attached to a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    #[serde(rename = "pass")]
    pub passed: bool,
    pub evidence: String,
}

impl Verification {
    /// Build a verification record, truncating over-long evidence.
    pub fn new(passed: bool, evidence: impl Into<String>) -> Self {
        let mut evidence = evidence.into();
        if evidence.len() > MAX_EVIDENCE_LEN {
            let cut = (0..=MAX_EVIDENCE_LEN).rev().find(|i| evidence.is_char_boundary(*i));
            evidence.truncate(cut.unwrap_or(0));
        }
        Self { passed, evidence }
    }
}

/// Exact dispatch record of the single service call a run performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTaken {
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub entity_id: String,
    pub endpoint: String,
    pub logical_service: String,
    pub payload: Value,
    pub status_code: u16,
}

/// The receipt returned for every proposal that parsed, whatever happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub schema_version: String,
    pub proposal_id: String,
    pub timestamp: String,
    pub source: Source,
    pub decision: ReceiptDecision,
    pub policy_basis: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<ActionTaken>,
    pub verification: Verification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_state: Option<Value>,
    pub audit_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_language_hint: Option<String>,
}

impl ExecutionReceipt {
    /// Audit reference for a proposal id.
    pub fn audit_ref_for(proposal_id: &str) -> String {
        format!("audit:{proposal_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_labels_are_snake_case() {
        assert_eq!(serde_json::to_string(&ReceiptDecision::Allowed).unwrap(), "\"allowed\"");
        assert_eq!(
            serde_json::to_string(&ReceiptDecision::AllowedWithConditions).unwrap(),
            "\"allowed_with_conditions\""
        );
        assert_eq!(ReceiptDecision::Expired.to_string(), "expired");
    }

    #[test]
    fn verification_serializes_pass_alias() {
        let v = Verification::new(true, "ok");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["pass"], true);
        assert_eq!(json["evidence"], "ok");
    }

    #[test]
    fn evidence_is_truncated() {
        let v = Verification::new(false, "x".repeat(MAX_EVIDENCE_LEN + 100));
        assert_eq!(v.evidence.len(), MAX_EVIDENCE_LEN);
    }

    #[test]
    fn audit_ref_format() {
        assert_eq!(ExecutionReceipt::audit_ref_for("pl-1234"), "audit:pl-1234");
    }
}
