//! Stewardship gate CLI: readiness probe, demo proposal runs and audit
//! log inspection.
//!
//! Exit codes: 0 success, 2 configuration error, 3 device unreachable on
//! the readiness probe.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use audit_log::{AuditEvent, AuditLog};
use clap::{Parser, Subcommand};
use device_api::{DeviceApi, HttpDeviceClient};
use gate::GateBuilder;
use law::{Explanation, PolicyConfig};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use steward_core::proposal::{
    ActionMetadata, ActionParameters, ActionTarget, ActionType, BlastRadius, DeviceAction,
    ExpectedOutcome, ProposalDraft, Reversibility, Source, VerifySpec,
};
use steward_core::{Sanitizer, ScalarValue};
use tracing::error;

const EXIT_CONFIG: i32 = 2;
const EXIT_UNREACHABLE: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "steward", about = "Policy-gated action executor for device control planes")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe device API reachability and report readiness
    Ready,
    /// Drive one proposal end-to-end and print its receipt
    Demo {
        /// Target entity, e.g. light.kitchen
        #[arg(short, long)]
        entity: String,
        /// Action type: toggle_entity | turn_on | turn_off
        #[arg(short, long, default_value = "turn_on")]
        action: String,
        /// Expected state after execution
        #[arg(long, default_value = "on")]
        expect: String,
        /// Verification timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
        /// Approve interactively-refused proposals without asking
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Show per-stage stats for an audit JSONL file
    Inspect {
        #[arg(short, long)]
        audit: Option<PathBuf>,
    },
}

/// Environment-provided configuration.
struct EnvConfig {
    device_url: String,
    device_token: String,
    audit_path: PathBuf,
    instance: String,
    allowlist: Option<String>,
    policy_path: Option<PathBuf>,
}

impl EnvConfig {
    fn from_env() -> Result<Self> {
        let device_url =
            std::env::var("DEVICE_API_URL").unwrap_or_else(|_| "http://device.lan:8123".into());
        let device_token = std::env::var("DEVICE_API_TOKEN").unwrap_or_default();
        let audit_path = std::env::var("AUDIT_PATH")
            .unwrap_or_else(|_| "shared/audit/events.jsonl".into())
            .into();
        let instance = std::env::var("INSTANCE_ID").unwrap_or_else(|_| "steward-1".into());
        let allowlist = std::env::var("ALLOWLIST").ok();
        let policy_path = std::env::var("POLICY_PATH").ok().map(PathBuf::from);
        Ok(Self { device_url, device_token, audit_path, instance, allowlist, policy_path })
    }

    fn policy(&self) -> Result<PolicyConfig> {
        PolicyConfig::load(self.policy_path.as_deref(), self.allowlist.as_deref())
            .context("loading policy")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_json_logging();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Ready => cmd_ready().await,
        Command::Demo { entity, action, expect, timeout, yes } => {
            cmd_demo(&entity, &action, &expect, timeout, yes).await
        }
        Command::Inspect { audit } => cmd_inspect(audit),
    }
}

async fn cmd_ready() -> Result<()> {
    let env = EnvConfig::from_env()?;
    if env.device_token.is_empty() {
        error!("DEVICE_API_TOKEN is not configured");
        println!("{}", json!({"ready": false, "token_configured": false}));
        std::process::exit(EXIT_CONFIG);
    }
    if let Err(err) = env.policy() {
        error!(error = %err, "policy configuration invalid");
        std::process::exit(EXIT_CONFIG);
    }
    let client = HttpDeviceClient::new(&env.device_url, &env.device_token)?;
    let reachable = client.ready_probe().await.unwrap_or(false);
    println!(
        "{}",
        json!({
            "service": "steward-gate",
            "instance": env.instance,
            "token_configured": true,
            "device_url": env.device_url,
            "device_reachable": reachable,
            "ready": reachable,
        })
    );
    if !reachable {
        std::process::exit(EXIT_UNREACHABLE);
    }
    Ok(())
}

async fn cmd_demo(entity: &str, action: &str, expect: &str, timeout: u64, yes: bool) -> Result<()> {
    let env = EnvConfig::from_env()?;
    let kind = match ActionType::parse(action) {
        Some(kind) => kind,
        None => {
            error!(action, "unknown action type");
            std::process::exit(EXIT_CONFIG);
        }
    };
    let policy = match env.policy() {
        Ok(policy) => policy,
        Err(err) => {
            error!(error = %err, "policy configuration invalid");
            std::process::exit(EXIT_CONFIG);
        }
    };
    let sanitizer = Sanitizer::new([env.device_token.clone()]);
    let device = Arc::new(HttpDeviceClient::new(&env.device_url, &env.device_token)?);
    let gate = GateBuilder::new(
        policy,
        AuditLog::open(&env.audit_path, sanitizer.clone()),
        device as Arc<dyn DeviceApi>,
    )
    .sanitizer(sanitizer)
    .source("steward-gate", &env.instance)
    .build();

    let draft = ProposalDraft {
        source: Source { service: "steward-cli".into(), instance: env.instance.clone() },
        action: DeviceAction {
            domain: "home_assistant".into(),
            kind,
            target: ActionTarget { entity_id: entity.into() },
            parameters: ActionParameters::default(),
            metadata: ActionMetadata {
                reversibility: Reversibility::Reversible,
                blast_radius: BlastRadius::SingleDevice,
                safety_tags: Vec::new(),
            },
            expected_outcome: Some(ExpectedOutcome {
                verify: VerifySpec {
                    entity_id: entity.into(),
                    attribute: "state".into(),
                    equals: ScalarValue::String(expect.into()),
                },
                timeout_seconds: timeout,
            }),
        },
        justification: format!("CLI demo: {action} on {entity}"),
        rollback_plan: Some("re-run with the opposite action".into()),
        confirmation_token: None,
        steward_key_token: None,
    };

    let approver = move |explanation: &Explanation| {
        if !yes {
            eprintln!("refusing non-auto-approvable proposal (pass --yes to override):");
            eprintln!("  {}", explanation.summary);
        }
        yes
    };
    let receipt = gate.steward(draft, "steward-cli", &approver).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn cmd_inspect(audit: Option<PathBuf>) -> Result<()> {
    let env = EnvConfig::from_env()?;
    let path = audit.unwrap_or(env.audit_path);
    let log = AuditLog::open(&path, Sanitizer::default());
    let entries = log.entries().with_context(|| format!("reading audit log {path:?}"))?;
    println!("{}", serde_json::to_string_pretty(&stats(&entries))?);
    Ok(())
}

fn stats(entries: &[AuditEvent]) -> serde_json::Value {
    let mut by_stage = std::collections::BTreeMap::<&str, usize>::new();
    let mut proposals = std::collections::BTreeSet::<&str>::new();
    for entry in entries {
        *by_stage.entry(entry.event_type.as_str()).or_default() += 1;
        proposals.insert(entry.correlation.proposal_id.as_str());
    }
    json!({
        "total": entries.len(),
        "proposals": proposals.len(),
        "first_ts": entries.first().map(|e| e.timestamp.clone()),
        "last_ts": entries.last().map(|e| e.timestamp.clone()),
        "by_stage": by_stage,
    })
}
