//! Approval decisions and the human-approval capability.

use law::Explanation;
use serde::Serialize;
use steward_core::ids;

/// An approval (or refusal) produced for one proposal.
///
/// Once execution completes, the `(Proposal, Decision)` pair is logically
/// sealed; re-running the action requires a fresh proposal and decision.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub decision_id: String,
    pub proposal_id: String,
    pub approved: bool,
    pub approver: String,
    /// Millisecond timestamp the decision was taken at.
    pub decided_at_ms: u64,
    /// Maximum age before execution must refuse the decision.
    pub ttl_seconds: u64,
    pub reason: String,
}

impl Decision {
    /// Build a decision with a fresh id.
    pub fn new(
        proposal_id: impl Into<String>,
        approved: bool,
        approver: impl Into<String>,
        decided_at_ms: u64,
        ttl_seconds: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            decision_id: ids::new_decision_id(),
            proposal_id: proposal_id.into(),
            approved,
            approver: approver.into(),
            decided_at_ms,
            ttl_seconds,
            reason: reason.into(),
        }
    }

    /// Whether the decision has outlived its TTL at `now_ms`.
    pub fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.decided_at_ms) > self.ttl_seconds.saturating_mul(1000)
    }
}

/// Capability consulted when a proposal cannot be auto-approved. A single
/// method passed by value; there is no global hook registry, and the
/// auto-approval path never calls it.
pub trait Approver {
    /// Approve or refuse based on the advisory explanation.
    fn approve(&self, explanation: &Explanation) -> bool;
}

impl<F> Approver for F
where
    F: Fn(&Explanation) -> bool,
{
    fn approve(&self, explanation: &Explanation) -> bool {
        self(explanation)
    }
}
