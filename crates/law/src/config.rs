//! Frozen policy configuration.
//!
//! Loaded once at gate construction from an optional YAML file plus the
//! environment, then shared read-only. A missing file falls back to
//! deny-by-default values; a malformed file is an error, not a fallback.
//!
//! Allowlist precedence is override, not merge: a non-empty
//! environment-provided entity list replaces the file list entirely, so a
//! deploy can pin entities without editing YAML.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use steward_core::proposal::{ActionType, BlastRadius};
use thiserror::Error;
use tracing::info;

/// Errors raised while loading or validating policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed YAML in policy file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Verification caps and pacing.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Hard cap: proposal timeouts are clamped to this.
    pub max_timeout_seconds: u64,
    /// Timeout assumed when a proposal declares none.
    pub default_timeout_seconds: u64,
    /// Sleep between unsuccessful polls.
    pub poll_interval: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_timeout_seconds: 60,
            default_timeout_seconds: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Immutable policy the gate is constructed with.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Action types the law will consider at all.
    pub allowed_actions: HashSet<ActionType>,
    /// Entities the law will allow actions against.
    pub allowed_entities: HashSet<String>,
    /// Widest blast radius a proposal may declare.
    pub max_blast_radius: BlastRadius,
    /// Require `target.entity_id == verify.entity_id`.
    pub enforce_target_verify_equality: bool,
    /// Require a non-empty rollback plan on every proposal.
    pub require_rollback: bool,
    /// Action types that must declare an expected outcome.
    pub require_expected_outcome_for: HashSet<ActionType>,
    /// Verification caps and pacing.
    pub verification: VerificationConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_actions: [ActionType::ToggleEntity, ActionType::TurnOn, ActionType::TurnOff]
                .into_iter()
                .collect(),
            allowed_entities: HashSet::new(),
            max_blast_radius: BlastRadius::Room,
            enforce_target_verify_equality: true,
            require_rollback: false,
            require_expected_outcome_for: [ActionType::ToggleEntity].into_iter().collect(),
            verification: VerificationConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VerificationFile {
    #[serde(default = "default_max_timeout")]
    max_timeout_seconds: u64,
    #[serde(default = "default_timeout")]
    default_timeout_seconds: u64,
    #[serde(default = "default_poll_interval")]
    poll_interval_seconds: f64,
}

fn default_max_timeout() -> u64 {
    60
}
fn default_timeout() -> u64 {
    10
}
fn default_poll_interval() -> f64 {
    1.0
}

impl Default for VerificationFile {
    fn default() -> Self {
        Self {
            max_timeout_seconds: default_max_timeout(),
            default_timeout_seconds: default_timeout(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    #[serde(default = "default_decision")]
    default_decision: String,
    #[serde(default = "default_actions")]
    allow_actions: Vec<String>,
    #[serde(default)]
    allow_entities: Vec<String>,
    #[serde(default = "default_true")]
    enforce_target_verify_equality: bool,
    #[serde(default = "default_radius")]
    max_blast_radius: String,
    #[serde(default)]
    require_rollback: bool,
    #[serde(default = "default_expected_outcome_for")]
    require_expected_outcome_for: Vec<String>,
    #[serde(default)]
    verification: VerificationFile,
}

fn default_decision() -> String {
    "deny".to_string()
}
fn default_actions() -> Vec<String> {
    vec!["toggle_entity".into(), "turn_on".into(), "turn_off".into()]
}
fn default_true() -> bool {
    true
}
fn default_radius() -> String {
    "room".to_string()
}
fn default_expected_outcome_for() -> Vec<String> {
    vec!["toggle_entity".into()]
}

fn parse_actions(labels: &[String], field: &str) -> Result<HashSet<ActionType>, PolicyError> {
    labels
        .iter()
        .map(|label| {
            ActionType::parse(label).ok_or_else(|| {
                PolicyError::Invalid(format!("{field} contains unknown action type '{label}'"))
            })
        })
        .collect()
}

impl PolicyConfig {
    /// Load policy from an optional YAML file and an optional CSV entity
    /// allowlist from the environment. A missing file yields defaults; a
    /// present but unreadable or invalid file is an error.
    pub fn load(path: Option<&Path>, env_allowlist: Option<&str>) -> Result<Self, PolicyError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_yaml_path(p)?,
            Some(p) => {
                info!(path = %p.display(), "policy file missing, using deny-by-default policy");
                Self::default()
            }
            None => Self::default(),
        };
        if let Some(csv) = env_allowlist {
            config.apply_env_allowlist(csv);
        }
        Ok(config)
    }

    /// Parse and validate a policy YAML file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: PolicyFile = serde_yaml::from_str(&raw).map_err(|source| PolicyError::Yaml {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_file(file)
    }

    fn from_file(file: PolicyFile) -> Result<Self, PolicyError> {
        if file.default_decision != "deny" {
            return Err(PolicyError::Invalid(format!(
                "default_decision must be 'deny', got '{}'",
                file.default_decision
            )));
        }
        let max_blast_radius = BlastRadius::parse(&file.max_blast_radius).ok_or_else(|| {
            PolicyError::Invalid(format!(
                "max_blast_radius '{}' is not a defined level",
                file.max_blast_radius
            ))
        })?;
        if file.verification.max_timeout_seconds == 0 {
            return Err(PolicyError::Invalid(
                "verification.max_timeout_seconds must be at least 1".into(),
            ));
        }
        Ok(Self {
            allowed_actions: parse_actions(&file.allow_actions, "allow_actions")?,
            allowed_entities: file.allow_entities.into_iter().collect(),
            max_blast_radius,
            enforce_target_verify_equality: file.enforce_target_verify_equality,
            require_rollback: file.require_rollback,
            require_expected_outcome_for: parse_actions(
                &file.require_expected_outcome_for,
                "require_expected_outcome_for",
            )?,
            verification: VerificationConfig {
                max_timeout_seconds: file.verification.max_timeout_seconds,
                default_timeout_seconds: file.verification.default_timeout_seconds,
                poll_interval: Duration::from_secs_f64(
                    file.verification.poll_interval_seconds.max(0.0),
                ),
            },
        })
    }

    /// Replace the entity allowlist with a CSV from the environment.
    /// A blank value leaves the file allowlist in place; anything else
    /// replaces it entirely.
    pub fn apply_env_allowlist(&mut self, csv: &str) {
        let entries: HashSet<String> = csv
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(ToString::to_string)
            .collect();
        if !entries.is_empty() {
            info!(entries = entries.len(), "entity allowlist overridden from environment");
            self.allowed_entities = entries;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_policy(yaml: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn missing_file_yields_deny_defaults() {
        let config =
            PolicyConfig::load(Some(Path::new("/nonexistent/policy.yaml")), None).unwrap();
        assert!(config.allowed_entities.is_empty());
        assert_eq!(config.max_blast_radius, BlastRadius::Room);
        assert!(config.enforce_target_verify_equality);
        assert!(config.require_expected_outcome_for.contains(&ActionType::ToggleEntity));
    }

    #[test]
    fn full_file_parses() {
        let f = write_policy(
            r"
default_decision: deny
allow_actions: [turn_on, turn_off]
allow_entities: [light.kitchen, switch.heater]
enforce_target_verify_equality: false
max_blast_radius: whole_home
require_rollback: true
verification:
  max_timeout_seconds: 30
  default_timeout_seconds: 5
  poll_interval_seconds: 0.5
",
        );
        let config = PolicyConfig::from_yaml_path(f.path()).unwrap();
        assert_eq!(config.allowed_actions.len(), 2);
        assert!(!config.allowed_actions.contains(&ActionType::ToggleEntity));
        assert!(config.allowed_entities.contains("light.kitchen"));
        assert_eq!(config.max_blast_radius, BlastRadius::WholeHome);
        assert!(!config.enforce_target_verify_equality);
        assert!(config.require_rollback);
        assert_eq!(config.verification.max_timeout_seconds, 30);
        assert_eq!(config.verification.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let f = write_policy("allow_actions: [");
        assert!(matches!(
            PolicyConfig::from_yaml_path(f.path()),
            Err(PolicyError::Yaml { .. })
        ));
    }

    #[test]
    fn unknown_action_label_is_rejected() {
        let f = write_policy("allow_actions: [set_scene]");
        let err = PolicyConfig::from_yaml_path(f.path()).unwrap_err();
        assert!(err.to_string().contains("set_scene"));
    }

    #[test]
    fn unknown_blast_radius_ceiling_is_rejected() {
        let f = write_policy("max_blast_radius: galaxy_wide");
        let err = PolicyConfig::from_yaml_path(f.path()).unwrap_err();
        assert!(err.to_string().contains("galaxy_wide"));
    }

    #[test]
    fn allow_only_deny_default_decision() {
        let f = write_policy("default_decision: allow");
        assert!(PolicyConfig::from_yaml_path(f.path()).is_err());
    }

    #[test]
    fn env_allowlist_overrides_file_not_merges() {
        let f = write_policy("allow_entities: [light.a, light.b]");
        let config =
            PolicyConfig::load(Some(f.path()), Some("switch.x , switch.y,")).unwrap();
        assert_eq!(config.allowed_entities.len(), 2);
        assert!(config.allowed_entities.contains("switch.x"));
        assert!(!config.allowed_entities.contains("light.a"));
    }

    #[test]
    fn blank_env_allowlist_keeps_file_entities() {
        let f = write_policy("allow_entities: [light.a]");
        let config = PolicyConfig::load(Some(f.path()), Some("  ")).unwrap();
        assert!(config.allowed_entities.contains("light.a"));
    }
}
