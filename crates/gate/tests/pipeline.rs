//! End-to-end pipeline tests against a scripted device and a virtual clock.

use async_trait::async_trait;
use audit_log::{AuditLog, AuditStage};
use device_api::{service_route, DeviceApi, DeviceError, DeviceState, DispatchRecord};
use gate::{Approver, Clock, DecideOutcome, Decision, GateBuilder, StewardshipGate, VirtualClock};
use law::{Explanation, PolicyConfig};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steward_core::proposal::{
    ActionMetadata, ActionParameters, ActionTarget, ActionType, BlastRadius, DeviceAction,
    ExpectedOutcome, ProposalDraft, Reversibility, Source, VerifySpec,
};
use steward_core::receipt::ReceiptDecision;
use steward_core::{Sanitizer, ScalarValue};

/// Device stub: scripted read sequence, then a steady state; counts
/// invocations and advances the virtual clock on every read so polling
/// loops progress deterministically.
struct ScriptedDevice {
    configured: bool,
    reads: Mutex<VecDeque<DeviceState>>,
    steady: Mutex<Option<DeviceState>>,
    read_error: Mutex<Option<String>>,
    invoke_error: Mutex<Option<String>>,
    invoke_count: AtomicUsize,
    clock: Arc<VirtualClock>,
    advance_per_read_ms: u64,
}

impl ScriptedDevice {
    fn new(clock: Arc<VirtualClock>) -> Self {
        Self {
            configured: true,
            reads: Mutex::new(VecDeque::new()),
            steady: Mutex::new(None),
            read_error: Mutex::new(None),
            invoke_error: Mutex::new(None),
            invoke_count: AtomicUsize::new(0),
            clock,
            advance_per_read_ms: 500,
        }
    }

    fn push_read(&self, state: DeviceState) {
        self.reads.lock().unwrap().push_back(state);
    }

    fn set_steady(&self, state: DeviceState) {
        *self.steady.lock().unwrap() = Some(state);
    }

    fn fail_reads(&self, message: &str) {
        *self.read_error.lock().unwrap() = Some(message.to_string());
    }

    fn fail_invoke(&self, message: &str) {
        *self.invoke_error.lock().unwrap() = Some(message.to_string());
    }

    fn invocations(&self) -> usize {
        self.invoke_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceApi for ScriptedDevice {
    async fn read_state(&self, _entity_id: &str) -> Result<DeviceState, DeviceError> {
        self.clock.advance_ms(self.advance_per_read_ms);
        if let Some(message) = self.read_error.lock().unwrap().clone() {
            return Err(DeviceError::Transport(message));
        }
        if let Some(state) = self.reads.lock().unwrap().pop_front() {
            return Ok(state);
        }
        self.steady
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DeviceError::Transport("no scripted state".into()))
    }

    async fn invoke(&self, action: &DeviceAction) -> Result<DispatchRecord, DeviceError> {
        self.invoke_count.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.invoke_error.lock().unwrap().clone() {
            return Err(DeviceError::Transport(message));
        }
        let route = service_route(action.kind);
        Ok(DispatchRecord {
            endpoint: format!("/api/services/{route}"),
            logical_service: route.to_string(),
            payload: json!({ "entity_id": action.target.entity_id }),
            status_code: 200,
        })
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

fn device_state(entity: &str, state: &str) -> DeviceState {
    serde_json::from_value(json!({
        "entity_id": entity,
        "state": state,
        "attributes": {}
    }))
    .unwrap()
}

fn test_policy(entities: &[&str]) -> PolicyConfig {
    let mut policy = PolicyConfig {
        allowed_entities: entities.iter().map(ToString::to_string).collect(),
        ..PolicyConfig::default()
    };
    policy.verification.max_timeout_seconds = 5;
    policy.verification.poll_interval = Duration::ZERO;
    policy
}

struct Harness {
    gate: StewardshipGate,
    device: Arc<ScriptedDevice>,
    clock: Arc<VirtualClock>,
    _dir: tempfile::TempDir,
    audit_path: std::path::PathBuf,
}

fn harness(policy: PolicyConfig, secrets: &[&str]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit").join("events.jsonl");
    let clock = Arc::new(VirtualClock::new(1_000_000));
    let device = Arc::new(ScriptedDevice::new(Arc::clone(&clock)));
    let sanitizer = Sanitizer::new(secrets.iter().copied());
    let gate = GateBuilder::new(
        policy,
        AuditLog::open(&audit_path, sanitizer.clone()),
        Arc::clone(&device) as Arc<dyn DeviceApi>,
    )
    .sanitizer(sanitizer)
    .clock(Arc::clone(&clock) as Arc<dyn Clock>)
    .source("steward-gate", "gate-test")
    .build();
    Harness { gate, device, clock, _dir: dir, audit_path }
}

fn draft(entity: &str, kind: ActionType) -> ProposalDraft {
    ProposalDraft {
        source: Source { service: "agent".into(), instance: "agent-1".into() },
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
                    equals: ScalarValue::String("on".into()),
                },
                timeout_seconds: 5,
            }),
        },
        justification: "integration test run".into(),
        rollback_plan: Some("turn_off".into()),
        confirmation_token: None,
        steward_key_token: None,
    }
}

fn never_consulted() -> impl Approver {
    |_: &Explanation| -> bool { panic!("approver must not be consulted on this path") }
}

fn refusing() -> impl Approver {
    |_: &Explanation| false
}

#[tokio::test]
async fn denied_when_entity_not_allowlisted() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    let receipt = h
        .gate
        .steward(draft("switch.unsafe", ActionType::TurnOn), "tester", &refusing())
        .await
        .unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Denied);
    assert!(receipt.policy_basis.contains(&"law.v1.default_deny".to_string()));
    assert!(receipt.policy_basis.contains(&"law.v1.entity_not_allowlisted".to_string()));
    assert!(!receipt.verification.passed);
    assert_eq!(h.device.invocations(), 0, "law denial must not reach the device");
}

#[tokio::test]
async fn auto_approved_run_verifies_and_reports_states() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    h.device.push_read(device_state("light.safe", "off")); // before-state
    h.device.set_steady(device_state("light.safe", "on")); // verification polls
    let receipt = h
        .gate
        .steward(draft("light.safe", ActionType::TurnOn), "tester", &never_consulted())
        .await
        .unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Allowed);
    assert!(receipt.verification.passed);
    assert!(receipt.verification.evidence.contains("poll"));
    assert_eq!(receipt.before_state.unwrap()["state"], "off");
    assert_eq!(receipt.after_state.unwrap()["state"], "on");
    assert!(receipt.policy_basis.contains(&"law.v1.allowlist_match".to_string()));
    let action = receipt.action_taken.unwrap();
    assert_eq!(action.endpoint, "/api/services/homeassistant/turn_on");
    assert_eq!(action.logical_service, "homeassistant/turn_on");
    assert_eq!(action.payload, json!({"entity_id": "light.safe"}));
    assert_eq!(action.status_code, 200);
    assert_eq!(h.device.invocations(), 1, "exactly one dispatch per run");
}

#[tokio::test]
async fn verification_timeout_yields_failed_receipt() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    h.device.set_steady(device_state("light.safe", "off"));
    let mut d = draft("light.safe", ActionType::ToggleEntity);
    d.action.expected_outcome.as_mut().unwrap().timeout_seconds = 2;
    let receipt = h.gate.steward(d, "tester", &never_consulted()).await.unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Failed);
    assert!(!receipt.verification.passed);
    let evidence = &receipt.verification.evidence;
    assert!(evidence.starts_with("Timeout"), "evidence was: {evidence}");
    assert!(evidence.contains("expected 'on'"));
    assert!(evidence.contains("observed 'off'"));
    assert!(evidence.contains("poll"));
    assert_eq!(h.device.invocations(), 1);
}

#[tokio::test]
async fn audit_trail_covers_every_stage_in_order() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    h.device.push_read(device_state("light.safe", "off"));
    h.device.set_steady(device_state("light.safe", "on"));
    let proposal = h.gate.propose(draft("light.safe", ActionType::TurnOn)).await.unwrap();
    let decision = match h.gate.decide(&proposal, "tester", &never_consulted()).await.unwrap() {
        DecideOutcome::Decided(d) => d,
        DecideOutcome::Denied(r) => panic!("unexpected denial: {r:?}"),
    };
    let receipt = h.gate.execute(&proposal, &decision).await.unwrap();
    h.gate.learn(&proposal, &receipt, Some("looks good")).await.unwrap();

    let entries = h.gate.audit_log().entries().unwrap();
    let stages: Vec<AuditStage> = entries.iter().map(|e| e.event_type).collect();
    let pos = |stage: AuditStage| stages.iter().position(|s| *s == stage).unwrap();
    assert!(pos(AuditStage::Propose) < pos(AuditStage::Explain));
    assert!(pos(AuditStage::Explain) < pos(AuditStage::LawDecision));
    assert!(pos(AuditStage::LawDecision) < pos(AuditStage::Decision));
    assert!(pos(AuditStage::Decision) < pos(AuditStage::ExecutionAttempt));
    assert!(pos(AuditStage::ExecutionAttempt) < pos(AuditStage::Execute));
    assert!(pos(AuditStage::Execute) < pos(AuditStage::Receipt));
    assert!(pos(AuditStage::Receipt) < pos(AuditStage::Learn));

    for entry in &entries {
        assert_eq!(entry.correlation.proposal_id, proposal.proposal_id);
        assert_eq!(entry.correlation.request_id, proposal.request_id);
    }
    let receipt_entry = entries.iter().find(|e| e.event_type == AuditStage::Receipt).unwrap();
    assert_eq!(receipt_entry.correlation.decision_id.as_deref(), Some(decision.decision_id.as_str()));
}

#[tokio::test]
async fn human_refusal_skips_execution() {
    let mut policy = test_policy(&["light.safe"]);
    // Nothing passes the reversibility gate automatically here.
    policy.require_rollback = false;
    let h = harness(policy, &[]);
    let mut d = draft("light.safe", ActionType::TurnOn);
    d.action.metadata.reversibility = Reversibility::Semi;
    let receipt = h.gate.steward(d, "tester", &refusing()).await.unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Skipped);
    assert_eq!(receipt.verification.evidence, "human denied");
    assert_eq!(h.device.invocations(), 0);
}

#[tokio::test]
async fn rate_limiter_skips_third_run() {
    let h = {
        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("events.jsonl");
        let clock = Arc::new(VirtualClock::new(1_000_000));
        let device = Arc::new(ScriptedDevice::new(Arc::clone(&clock)));
        let gate = GateBuilder::new(
            test_policy(&["light.safe"]),
            AuditLog::open(&audit_path, Sanitizer::default()),
            Arc::clone(&device) as Arc<dyn DeviceApi>,
        )
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .limiter(2, 60)
        .build();
        Harness { gate, device, clock, _dir: dir, audit_path }
    };
    h.device.set_steady(device_state("light.safe", "on"));

    let mut decisions = Vec::new();
    for _ in 0..3 {
        let receipt = h
            .gate
            .steward(draft("light.safe", ActionType::TurnOn), "tester", &never_consulted())
            .await
            .unwrap();
        decisions.push(receipt);
    }
    assert_eq!(decisions[0].decision, ReceiptDecision::Allowed);
    assert_eq!(decisions[1].decision, ReceiptDecision::Allowed);
    assert_eq!(decisions[2].decision, ReceiptDecision::Skipped);
    assert_eq!(decisions[2].verification.evidence, "rate limit exceeded");
    assert_eq!(h.device.invocations(), 2);
}

#[tokio::test]
async fn stale_decision_expires_instead_of_executing() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(VirtualClock::new(1_000_000));
    let device = Arc::new(ScriptedDevice::new(Arc::clone(&clock)));
    device.set_steady(device_state("light.safe", "on"));
    let gate = GateBuilder::new(
        test_policy(&["light.safe"]),
        AuditLog::open(dir.path().join("events.jsonl"), Sanitizer::default()),
        Arc::clone(&device) as Arc<dyn DeviceApi>,
    )
    .clock(Arc::clone(&clock) as Arc<dyn Clock>)
    .decision_ttl(0)
    .build();

    let proposal = gate.propose(draft("light.safe", ActionType::TurnOn)).await.unwrap();
    let decision = match gate.decide(&proposal, "tester", &never_consulted()).await.unwrap() {
        DecideOutcome::Decided(d) => d,
        DecideOutcome::Denied(r) => panic!("unexpected denial: {r:?}"),
    };
    clock.advance_ms(10);
    let receipt = gate.execute(&proposal, &decision).await.unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Expired);
    assert_eq!(receipt.verification.evidence, "decision TTL elapsed");
    assert_eq!(device.invocations(), 0);
}

#[tokio::test]
async fn toggle_without_expected_outcome_is_rejected_at_execution() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    let mut d = draft("light.safe", ActionType::ToggleEntity);
    d.action.expected_outcome = None;
    let proposal = h.gate.propose(d).await.unwrap();
    // An externally approved decision still hits the execution-time guard.
    let decision = Decision::new(
        proposal.proposal_id.clone(),
        true,
        "external",
        h.clock.now_ms(),
        300,
        "approved",
    );
    let receipt = h.gate.execute(&proposal, &decision).await.unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Rejected);
    assert!(receipt.verification.evidence.contains("expected_outcome"));
    assert_eq!(h.device.invocations(), 0);
}

#[tokio::test]
async fn before_state_failure_stops_before_dispatch() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    h.device.fail_reads("connect timeout to control plane");
    let receipt = h
        .gate
        .steward(draft("light.safe", ActionType::TurnOn), "tester", &never_consulted())
        .await
        .unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Failed);
    assert!(receipt.verification.evidence.starts_with("Failed to read before-state:"));
    assert!(receipt.before_state.is_none());
    assert_eq!(h.device.invocations(), 0, "read failure must not dispatch");
}

#[tokio::test]
async fn invoke_failure_reports_before_state() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    h.device.push_read(device_state("light.safe", "off"));
    h.device.fail_invoke("service dispatch refused");
    let receipt = h
        .gate
        .steward(draft("light.safe", ActionType::TurnOn), "tester", &never_consulted())
        .await
        .unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Failed);
    assert!(receipt.verification.evidence.starts_with("Service call failed:"));
    assert_eq!(receipt.before_state.unwrap()["state"], "off");
    assert_eq!(h.device.invocations(), 1);
}

#[tokio::test]
async fn unconfigured_device_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(VirtualClock::new(1_000_000));
    let mut device = ScriptedDevice::new(Arc::clone(&clock));
    device.configured = false;
    let device = Arc::new(device);
    let gate = GateBuilder::new(
        test_policy(&["light.safe"]),
        AuditLog::open(dir.path().join("events.jsonl"), Sanitizer::default()),
        Arc::clone(&device) as Arc<dyn DeviceApi>,
    )
    .clock(Arc::clone(&clock) as Arc<dyn Clock>)
    .build();
    let receipt = gate
        .steward(draft("light.safe", ActionType::TurnOn), "tester", &never_consulted())
        .await
        .unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Failed);
    assert!(receipt.policy_basis.contains(&"law.v1.misconfigured.no_token".to_string()));
    assert!(receipt.verification.evidence.contains("token"));
    assert_eq!(device.invocations(), 0);
}

#[tokio::test]
async fn turn_on_without_outcome_executes_unverified() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    h.device.push_read(device_state("light.safe", "off"));
    let mut d = draft("light.safe", ActionType::TurnOn);
    d.action.expected_outcome = None;
    let receipt = h.gate.steward(d, "tester", &never_consulted()).await.unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::AllowedWithConditions);
    assert!(receipt.verification.passed);
    assert!(receipt.after_state.is_none());
    assert_eq!(h.device.invocations(), 1);
}

#[tokio::test]
async fn secrets_never_reach_audit_or_receipt() {
    let h = harness(test_policy(&["light.safe"]), &["tok-3"]);
    h.device.push_read(device_state("light.safe", "off"));
    h.device.fail_invoke("upstream rejected Bearer tok-3 for this call");
    let mut d = draft("light.safe", ActionType::TurnOn);
    d.confirmation_token = Some("sct-1".into());
    d.steward_key_token = Some("sct-2".into());
    let receipt = h.gate.steward(d, "tester", &never_consulted()).await.unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Failed);

    let receipt_json = serde_json::to_string(&receipt).unwrap();
    assert!(!receipt_json.contains("tok-3"));
    assert!(receipt_json.contains("[REDACTED]"));

    let raw_audit = std::fs::read_to_string(&h.audit_path).unwrap();
    assert!(!raw_audit.contains("sct-1"));
    assert!(!raw_audit.contains("sct-2"));
    assert!(!raw_audit.contains("tok-3"));
    assert!(raw_audit.contains("[REDACTED]"));
}

#[tokio::test]
async fn denied_run_still_records_decision_stage() {
    let h = harness(test_policy(&["light.safe"]), &[]);
    let receipt = h
        .gate
        .steward(draft("switch.unsafe", ActionType::TurnOn), "tester", &refusing())
        .await
        .unwrap();
    assert_eq!(receipt.decision, ReceiptDecision::Denied);
    let entries = h.gate.audit_log().entries().unwrap();
    let stages: Vec<AuditStage> = entries.iter().map(|e| e.event_type).collect();
    for required in [
        AuditStage::Propose,
        AuditStage::Explain,
        AuditStage::LawDecision,
        AuditStage::Decision,
        AuditStage::Execute,
        AuditStage::Receipt,
    ] {
        assert!(stages.contains(&required), "missing stage {required:?} in {stages:?}");
    }
}
