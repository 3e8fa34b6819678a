//! Proposal schema: the structured request to perform one device action
//! with a verifiable outcome.
//!
//! The ingress variants use `deny_unknown_fields` so unexpected keys are
//! rejected at the boundary rather than silently dropped.

use crate::ids;
use crate::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action types the v1 control plane knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ToggleEntity,
    TurnOn,
    TurnOff,
}

impl ActionType {
    /// Wire label of this action type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToggleEntity => "toggle_entity",
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
        }
    }

    /// Parse a wire label; `None` for anything outside the v1 set.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "toggle_entity" => Some(Self::ToggleEntity),
            "turn_on" => Some(Self::TurnOn),
            "turn_off" => Some(Self::TurnOff),
            _ => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How readily an action can be undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    Reversible,
    Semi,
    Irreversible,
}

/// Ordered scope of an action's physical impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlastRadius {
    SingleDevice,
    Room,
    WholeHome,
    NetworkWide,
}

/// Defined blast radius labels, narrowest first.
pub const BLAST_RADIUS_LEVELS: [&str; 4] = ["single_device", "room", "whole_home", "network_wide"];

impl BlastRadius {
    /// Wire label of this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleDevice => "single_device",
            Self::Room => "room",
            Self::WholeHome => "whole_home",
            Self::NetworkWide => "network_wide",
        }
    }

    /// Ordinal rank, narrowest scope first.
    pub fn rank(self) -> usize {
        rank_of(self.as_str())
    }

    /// Parse a wire label into a defined level.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "single_device" => Some(Self::SingleDevice),
            "room" => Some(Self::Room),
            "whole_home" => Some(Self::WholeHome),
            "network_wide" => Some(Self::NetworkWide),
            _ => None,
        }
    }
}

/// Ordinal rank of a raw blast radius label. Unknown labels rank above
/// every defined level, so comparisons against a ceiling fail closed.
pub fn rank_of(label: &str) -> usize {
    BLAST_RADIUS_LEVELS
        .iter()
        .position(|l| *l == label)
        .unwrap_or(BLAST_RADIUS_LEVELS.len())
}

impl fmt::Display for BlastRadius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Originating service and instance of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    pub service: String,
    pub instance: String,
}

/// The entity an action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionTarget {
    pub entity_id: String,
}

/// Optional action parameters (v1 actions take none, but the schema
/// reserves the envelope).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ScalarValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Safety metadata every proposal must declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionMetadata {
    pub reversibility: Reversibility,
    pub blast_radius: BlastRadius,
    #[serde(default)]
    pub safety_tags: Vec<String>,
}

/// What to observe after execution: one attribute of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifySpec {
    pub entity_id: String,
    pub attribute: String,
    #[serde(default)]
    pub equals: ScalarValue,
}

/// The declared post-condition with its polling budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedOutcome {
    pub verify: VerifySpec,
    pub timeout_seconds: u64,
}

/// One privileged device action with target, metadata and post-condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceAction {
    /// Logical grouping, e.g. `home_assistant` or `lighting`.
    pub domain: String,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub target: ActionTarget,
    #[serde(default)]
    pub parameters: ActionParameters,
    pub metadata: ActionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<ExpectedOutcome>,
}

/// A structured request to perform one device action. Immutable once
/// constructed; a re-run is a new proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Proposal {
    pub schema_version: String,
    pub proposal_id: String,
    pub request_id: String,
    #[serde(default = "ids::new_trace_id")]
    pub trace_id: String,
    pub timestamp: String,
    pub source: Source,
    pub action: DeviceAction,
    pub justification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steward_key_token: Option<String>,
}

impl Proposal {
    /// The submitter identity used for rate limiting.
    pub fn actor(&self) -> &str {
        &self.source.service
    }
}

/// Everything a caller supplies to open a proposal; the gate assigns the
/// identifiers and timestamp.
#[derive(Debug, Clone)]
pub struct ProposalDraft {
    pub source: Source,
    pub action: DeviceAction,
    pub justification: String,
    pub rollback_plan: Option<String>,
    pub confirmation_token: Option<String>,
    pub steward_key_token: Option<String>,
}

impl ProposalDraft {
    /// Seal the draft into a proposal with fresh identifiers.
    pub fn into_proposal(self) -> Proposal {
        Proposal {
            schema_version: crate::SCHEMA_VERSION.to_string(),
            proposal_id: ids::new_proposal_id(),
            request_id: ids::new_request_id(),
            trace_id: ids::new_trace_id(),
            timestamp: ids::now_iso(),
            source: self.source,
            action: self.action,
            justification: self.justification,
            rollback_plan: self.rollback_plan,
            confirmation_token: self.confirmation_token,
            steward_key_token: self.steward_key_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_action() -> serde_json::Value {
        json!({
            "domain": "home_assistant",
            "type": "turn_on",
            "target": {"entity_id": "light.kitchen"},
            "metadata": {
                "reversibility": "reversible",
                "blast_radius": "single_device",
                "safety_tags": []
            },
            "expected_outcome": {
                "verify": {"entity_id": "light.kitchen", "attribute": "state", "equals": "on"},
                "timeout_seconds": 5
            }
        })
    }

    #[test]
    fn blast_radius_is_ordered() {
        assert!(BlastRadius::SingleDevice.rank() < BlastRadius::Room.rank());
        assert!(BlastRadius::Room.rank() < BlastRadius::WholeHome.rank());
        assert!(BlastRadius::WholeHome.rank() < BlastRadius::NetworkWide.rank());
    }

    #[test]
    fn unknown_radius_label_ranks_worst() {
        assert!(rank_of("galaxy_wide") > BlastRadius::NetworkWide.rank());
        assert_eq!(rank_of("room"), 1);
    }

    #[test]
    fn action_type_round_trips_labels() {
        for t in [ActionType::ToggleEntity, ActionType::TurnOn, ActionType::TurnOff] {
            assert_eq!(ActionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ActionType::parse("set_scene"), None);
    }

    #[test]
    fn action_deserializes_from_wire_shape() {
        let action: DeviceAction = serde_json::from_value(sample_action()).unwrap();
        assert_eq!(action.kind, ActionType::TurnOn);
        assert_eq!(action.target.entity_id, "light.kitchen");
        let outcome = action.expected_outcome.unwrap();
        assert_eq!(outcome.verify.equals, ScalarValue::String("on".into()));
        assert_eq!(outcome.timeout_seconds, 5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut v = sample_action();
        v["surprise"] = json!(1);
        assert!(serde_json::from_value::<DeviceAction>(v).is_err());
    }

    #[test]
    fn draft_assigns_fresh_identifiers() {
        let draft = ProposalDraft {
            source: Source { service: "agent".into(), instance: "agent-1".into() },
            action: serde_json::from_value(sample_action()).unwrap(),
            justification: "test".into(),
            rollback_plan: None,
            confirmation_token: None,
            steward_key_token: None,
        };
        let a = draft.clone().into_proposal();
        let b = draft.into_proposal();
        assert_ne!(a.proposal_id, b.proposal_id);
        assert_ne!(a.request_id, b.request_id);
        assert!(a.proposal_id.starts_with("pl-"));
        assert_eq!(a.schema_version, "v1");
        assert_eq!(a.actor(), "agent");
    }
}
