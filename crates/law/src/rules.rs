//! Ordered deny rules and the pure law evaluator.

use crate::config::PolicyConfig;
use crate::rule_ids;
use serde::Serialize;
use steward_core::entity::is_valid_entity_id;
use steward_core::proposal::Proposal;

/// Result of evaluating the law against one proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LawDecision {
    /// Whether every deny rule passed.
    pub allowed: bool,
    /// Ordered rule identifiers explaining the decision.
    pub policy_basis: Vec<String>,
    /// Human-readable reason; empty on allow.
    pub reason: String,
}

impl LawDecision {
    fn deny(rule: &str, reason: String) -> Self {
        Self {
            allowed: false,
            policy_basis: vec![rule_ids::DEFAULT_DENY.to_string(), rule.to_string()],
            reason,
        }
    }

    fn allow(entity_id: &str, action_type: &str) -> Self {
        Self {
            allowed: true,
            policy_basis: vec![
                rule_ids::ALLOWLIST_MATCH.to_string(),
                format!("entity={entity_id}"),
                format!("type={action_type}"),
            ],
            reason: String::new(),
        }
    }
}

/// Evaluate the ordered deny rules; the first failing rule decides.
///
/// Pure: no clock, no I/O, no interior state. Entity ids are re-validated
/// here even though the ingress layer already pattern-checks them.
pub fn evaluate(proposal: &Proposal, config: &PolicyConfig) -> LawDecision {
    let action = &proposal.action;
    let entity_id = action.target.entity_id.as_str();
    let verify_entity = action
        .expected_outcome
        .as_ref()
        .map(|outcome| outcome.verify.entity_id.as_str());

    // 1) entity id format, target then verify
    if !is_valid_entity_id(entity_id) {
        return LawDecision::deny(
            rule_ids::INVALID_ENTITY_FORMAT,
            format!("Entity id '{entity_id}' does not match the required format"),
        );
    }
    if let Some(verify_id) = verify_entity {
        if !is_valid_entity_id(verify_id) {
            return LawDecision::deny(
                rule_ids::INVALID_ENTITY_FORMAT,
                format!("Verify entity id '{verify_id}' does not match the required format"),
            );
        }
    }

    // 2) target and verify entity must agree when equality is enforced
    if config.enforce_target_verify_equality {
        if let Some(verify_id) = verify_entity {
            if verify_id != entity_id {
                return LawDecision::deny(
                    rule_ids::TARGET_VERIFY_MISMATCH,
                    format!(
                        "target.entity_id ({entity_id}) != verify.entity_id ({verify_id}); \
                         they must match"
                    ),
                );
            }
        }
    }

    // 3) action type allowlist
    if !config.allowed_actions.contains(&action.kind) {
        let mut allowed: Vec<&str> =
            config.allowed_actions.iter().map(|a| a.as_str()).collect();
        allowed.sort_unstable();
        return LawDecision::deny(
            rule_ids::ACTION_NOT_ALLOWED,
            format!(
                "Action type '{}' is not in the allowed set: {allowed:?}",
                action.kind
            ),
        );
    }

    // 4) entity allowlist
    if !config.allowed_entities.contains(entity_id) {
        return LawDecision::deny(
            rule_ids::ENTITY_NOT_ALLOWLISTED,
            format!("Entity '{entity_id}' is not in the entity allowlist"),
        );
    }

    // 5) blast radius ceiling (semantic ordering, unknown ranks worst)
    let radius = action.metadata.blast_radius;
    if radius.rank() > config.max_blast_radius.rank() {
        return LawDecision::deny(
            rule_ids::BLAST_RADIUS_EXCEEDED,
            format!(
                "Blast radius '{radius}' exceeds the policy maximum '{}'",
                config.max_blast_radius
            ),
        );
    }

    // 6) expected outcome required for some action types
    if config.require_expected_outcome_for.contains(&action.kind)
        && action.expected_outcome.is_none()
    {
        return LawDecision::deny(
            rule_ids::MISSING_EXPECTED_OUTCOME,
            format!("Action type '{}' requires an explicit expected_outcome", action.kind),
        );
    }

    // 7) rollback plan required by policy
    if config.require_rollback
        && proposal.rollback_plan.as_deref().map_or(true, |plan| plan.trim().is_empty())
    {
        return LawDecision::deny(
            rule_ids::MISSING_ROLLBACK,
            "Policy requires a rollback plan and the proposal declares none".to_string(),
        );
    }

    LawDecision::allow(entity_id, action.kind.as_str())
}
