//! Advisory policy checks and the human-readable explanation.
//!
//! Unlike the ordered law rules, these run independently and all of them
//! always run, so an operator (or the approval capability) sees the full
//! picture rather than just the first failure.

use crate::config::PolicyConfig;
use serde::Serialize;
use std::fmt::Write as _;
use steward_core::proposal::{Proposal, Reversibility};

/// One advisory sub-result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyCheck {
    pub name: &'static str,
    pub allowed: bool,
    pub reason: String,
}

impl PolicyCheck {
    fn new(name: &'static str, allowed: bool, reason: impl Into<String>) -> Self {
        Self { name, allowed, reason: reason.into() }
    }
}

/// Per-policy sub-results plus a one-line summary for audit and approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub checks: Vec<PolicyCheck>,
    pub summary: String,
}

impl Explanation {
    /// Whether every advisory check passed.
    pub fn all_pass(&self) -> bool {
        self.checks.iter().all(|c| c.allowed)
    }
}

/// Compute every advisory check for `proposal` under `config`.
pub fn explain(proposal: &Proposal, config: &PolicyConfig) -> Explanation {
    let action = &proposal.action;
    let entity_id = action.target.entity_id.as_str();

    let mut checks = Vec::with_capacity(5);
    checks.push(if config.allowed_actions.contains(&action.kind) {
        PolicyCheck::new("action_allowlisted", true, "action type allowlisted")
    } else {
        PolicyCheck::new(
            "action_allowlisted",
            false,
            format!("action type '{}' not allowlisted", action.kind),
        )
    });
    checks.push(if config.allowed_entities.contains(entity_id) {
        PolicyCheck::new("entity_allowlisted", true, "entity allowlisted")
    } else {
        PolicyCheck::new(
            "entity_allowlisted",
            false,
            format!("entity '{entity_id}' not allowlisted"),
        )
    });
    let radius = action.metadata.blast_radius;
    checks.push(if radius.rank() <= config.max_blast_radius.rank() {
        PolicyCheck::new("blast_radius", true, format!("'{radius}' within policy ceiling"))
    } else {
        PolicyCheck::new(
            "blast_radius",
            false,
            format!("'{radius}' exceeds policy ceiling '{}'", config.max_blast_radius),
        )
    });
    let has_rollback =
        proposal.rollback_plan.as_deref().map_or(false, |plan| !plan.trim().is_empty());
    checks.push(if has_rollback {
        PolicyCheck::new("rollback_plan", true, "rollback available")
    } else {
        PolicyCheck::new("rollback_plan", false, "missing rollback plan")
    });
    checks.push(match action.metadata.reversibility {
        Reversibility::Reversible => PolicyCheck::new("reversible", true, "action is reversible"),
        Reversibility::Semi => {
            PolicyCheck::new("reversible", false, "action is only semi-reversible")
        }
        Reversibility::Irreversible => {
            PolicyCheck::new("reversible", false, "action is irreversible")
        }
    });

    let mut summary = format!(
        "Action: {} on {} in {}. Justification: {}. Rollback: {}. Policies -> ",
        action.kind,
        entity_id,
        action.domain,
        proposal.justification,
        proposal.rollback_plan.as_deref().unwrap_or("none"),
    );
    for (i, check) in checks.iter().enumerate() {
        if i > 0 {
            summary.push_str("; ");
        }
        let _ = write!(summary, "{}: {}", check.name, check.reason);
    }

    Explanation { checks, summary }
}
