//! Stewardship gate: the policy-gated action executor.
//!
//! One gate instance sits between autonomous agents and the device control
//! plane. For each proposal it runs the pipeline
//! propose → explain → decide → execute → (learn), emitting one audit event
//! per transition and finishing every parsed proposal with a terminal
//! receipt. The only error that crosses the receipt boundary is an audit
//! write failure, which is a broken core invariant rather than an outcome.
//!
//! Proposals do not share mutable state with each other except through the
//! audit log and the rate limiter; the policy config and device client are
//! created at construction and shared read-only.

#![deny(unsafe_code)]

pub mod clock;
pub mod decision;
pub mod verify;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use decision::{Approver, Decision};
pub use verify::{verify_outcome, VerifyReport};

use audit_log::{AuditError, AuditEvent, AuditLog, AuditStage, Correlation};
use device_api::DeviceApi;
use law::{rule_ids, PolicyConfig};
use ratelimit::SlidingWindow;
use serde_json::{json, Value};
use std::sync::Arc;
use steward_core::proposal::{Proposal, ProposalDraft, Reversibility, Source};
use steward_core::receipt::{ActionTaken, ExecutionReceipt, ReceiptDecision, Verification};
use steward_core::{ids, Sanitizer, SCHEMA_VERSION};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Basis identifiers for terminal states the gate reaches on its own,
/// before or instead of the law's allow basis.
pub mod basis {
    /// The decision attached to the execution was not an approval.
    pub const DECISION_NOT_APPROVED: &str = "gate.v1.decision_not_approved";
    /// The approval outlived its TTL.
    pub const DECISION_EXPIRED: &str = "gate.v1.decision_expired";
    /// The action requires an expected outcome and none was declared.
    pub const MISSING_EXPECTED_OUTCOME: &str = "gate.v1.missing_expected_outcome";
    /// The actor exhausted its rate-limit window.
    pub const RATE_LIMITED: &str = "gate.v1.rate_limited";
}

/// Errors the gate surfaces instead of a receipt.
#[derive(Debug, Error)]
pub enum GateError {
    /// An audit write failed; the pipeline step must not claim success.
    #[error("audit: {0}")]
    Audit(#[from] AuditError),
}

/// Outcome of the decide stage: either a terminal denial receipt or a
/// decision to hand to `execute`.
#[derive(Debug)]
pub enum DecideOutcome {
    /// Law refused; the receipt is terminal.
    Denied(Box<ExecutionReceipt>),
    /// A decision was taken (approved or refused by the approver).
    Decided(Decision),
}

/// Builder for [`StewardshipGate`].
pub struct GateBuilder {
    policy: PolicyConfig,
    audit: AuditLog,
    device: Arc<dyn DeviceApi>,
    limiter: SlidingWindow,
    clock: Arc<dyn Clock>,
    sanitizer: Sanitizer,
    source: Source,
    decision_ttl_seconds: u64,
}

impl GateBuilder {
    /// Start a builder over the three mandatory collaborators.
    pub fn new(policy: PolicyConfig, audit: AuditLog, device: Arc<dyn DeviceApi>) -> Self {
        Self {
            policy,
            audit,
            device,
            limiter: SlidingWindow::new(30, 60),
            clock: Arc::new(SystemClock),
            sanitizer: Sanitizer::default(),
            source: Source { service: "steward-gate".into(), instance: "steward-1".into() },
            decision_ttl_seconds: 300,
        }
    }

    /// Replace the default rate limiter (30 admissions per 60 s).
    #[must_use]
    pub fn limiter(mut self, limit: usize, window_seconds: u64) -> Self {
        self.limiter = SlidingWindow::new(limit, window_seconds);
        self
    }

    /// Replace the system clock (tests use [`VirtualClock`]).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install the sanitizer used for receipt-bound strings. The audit log
    /// carries its own copy.
    #[must_use]
    pub fn sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Identify this gate in receipts and audit events.
    #[must_use]
    pub fn source(mut self, service: &str, instance: &str) -> Self {
        self.source = Source { service: service.into(), instance: instance.into() };
        self
    }

    /// Maximum age of an approval before execution refuses it.
    #[must_use]
    pub fn decision_ttl(mut self, seconds: u64) -> Self {
        self.decision_ttl_seconds = seconds;
        self
    }

    /// Freeze the configuration into a gate.
    #[must_use]
    pub fn build(self) -> StewardshipGate {
        StewardshipGate {
            policy: self.policy,
            audit: self.audit,
            device: self.device,
            limiter: self.limiter,
            clock: self.clock,
            sanitizer: self.sanitizer,
            source: self.source,
            decision_ttl_seconds: self.decision_ttl_seconds,
        }
    }
}

/// The policy-gated action executor.
pub struct StewardshipGate {
    policy: PolicyConfig,
    audit: AuditLog,
    device: Arc<dyn DeviceApi>,
    limiter: SlidingWindow,
    clock: Arc<dyn Clock>,
    sanitizer: Sanitizer,
    source: Source,
    decision_ttl_seconds: u64,
}

impl StewardshipGate {
    /// The audit log this gate writes to.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// The frozen policy this gate enforces.
    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    fn append(
        &self,
        stage: AuditStage,
        proposal: &Proposal,
        decision_id: Option<&str>,
        payload: Value,
    ) -> Result<(), AuditError> {
        let event = AuditEvent::new(
            self.source.service.clone(),
            stage,
            Correlation {
                request_id: proposal.request_id.clone(),
                proposal_id: proposal.proposal_id.clone(),
                decision_id: decision_id.map(ToString::to_string),
            },
            payload,
        );
        self.audit.append(&event)
    }

    #[allow(clippy::too_many_arguments)]
    fn receipt(
        &self,
        proposal: &Proposal,
        decision: ReceiptDecision,
        policy_basis: Vec<String>,
        verification: Verification,
        action_taken: Option<ActionTaken>,
        before_state: Option<Value>,
        after_state: Option<Value>,
        failure_language_hint: Option<String>,
    ) -> ExecutionReceipt {
        ExecutionReceipt {
            schema_version: SCHEMA_VERSION.to_string(),
            proposal_id: proposal.proposal_id.clone(),
            timestamp: ids::now_iso(),
            source: self.source.clone(),
            decision,
            policy_basis,
            action_taken,
            verification,
            before_state,
            after_state,
            audit_ref: ExecutionReceipt::audit_ref_for(&proposal.proposal_id),
            failure_language_hint,
        }
    }

    /// Emit the terminal `execute` and `receipt` audit events, then hand
    /// the receipt back. Every terminal path funnels through here.
    fn finish(
        &self,
        proposal: &Proposal,
        decision_id: Option<&str>,
        receipt: ExecutionReceipt,
    ) -> Result<ExecutionReceipt, GateError> {
        self.append(
            AuditStage::Execute,
            proposal,
            decision_id,
            json!({
                "status": receipt.decision.as_str(),
                "evidence": receipt.verification.evidence,
            }),
        )?;
        let payload = serde_json::to_value(&receipt).map_err(AuditError::Serde)?;
        self.append(AuditStage::Receipt, proposal, decision_id, payload)?;
        info!(
            proposal = %proposal.proposal_id,
            decision = %receipt.decision,
            "receipt issued"
        );
        Ok(receipt)
    }

    /// Open a proposal: seal the draft with fresh identifiers and record
    /// the sanitized proposal in the audit log.
    #[instrument(skip_all)]
    pub async fn propose(&self, draft: ProposalDraft) -> Result<Proposal, GateError> {
        let proposal = draft.into_proposal();
        let payload = serde_json::to_value(&proposal).map_err(AuditError::Serde)?;
        self.append(AuditStage::Propose, &proposal, None, payload)?;
        info!(
            proposal = %proposal.proposal_id,
            actor = %proposal.actor(),
            entity = %proposal.action.target.entity_id,
            "proposal opened"
        );
        Ok(proposal)
    }

    /// Compute the advisory explanation and record it. Runs before every
    /// decision so the decision path is auditable.
    #[instrument(skip_all, fields(proposal = %proposal.proposal_id))]
    pub async fn explain(&self, proposal: &Proposal) -> Result<law::Explanation, GateError> {
        let explanation = law::explain(proposal, &self.policy);
        self.append(
            AuditStage::Explain,
            proposal,
            None,
            json!({
                "summary": explanation.summary,
                "checks": explanation.checks,
            }),
        )?;
        Ok(explanation)
    }

    /// Run the law and take a decision.
    ///
    /// A law denial terminates the pipeline with a denied receipt. When the
    /// law allows, the proposal auto-approves if every advisory check
    /// passes and the action is reversible; otherwise the injected approver
    /// capability is consulted.
    #[instrument(skip_all, fields(proposal = %proposal.proposal_id))]
    pub async fn decide(
        &self,
        proposal: &Proposal,
        approver_name: &str,
        approver: &dyn Approver,
    ) -> Result<DecideOutcome, GateError> {
        let explanation = self.explain(proposal).await?;
        let law_decision = law::evaluate(proposal, &self.policy);
        self.append(
            AuditStage::LawDecision,
            proposal,
            None,
            json!({
                "allowed": law_decision.allowed,
                "policy_basis": law_decision.policy_basis,
                "reason": law_decision.reason,
            }),
        )?;

        if !law_decision.allowed {
            warn!(
                proposal = %proposal.proposal_id,
                basis = ?law_decision.policy_basis,
                "law denied proposal"
            );
            let refusal = Decision::new(
                proposal.proposal_id.clone(),
                false,
                "law",
                self.clock.now_ms(),
                0,
                law_decision.reason.clone(),
            );
            self.record_decision(proposal, &refusal)?;
            let receipt = self.receipt(
                proposal,
                ReceiptDecision::Denied,
                law_decision.policy_basis,
                Verification::new(false, law_decision.reason.clone()),
                None,
                None,
                None,
                Some(law_decision.reason.clone()),
            );
            let receipt = self.finish(proposal, Some(&refusal.decision_id), receipt)?;
            return Ok(DecideOutcome::Denied(Box::new(receipt)));
        }

        let auto_approve = explanation.all_pass()
            && proposal.action.metadata.reversibility == Reversibility::Reversible;
        let (approved, approver_id, reason) = if auto_approve {
            (true, "policy".to_string(), "auto-approved".to_string())
        } else {
            let approved = approver.approve(&explanation);
            let reason = if approved { "human approved" } else { "human denied" };
            (approved, approver_name.to_string(), reason.to_string())
        };
        let decision = Decision::new(
            proposal.proposal_id.clone(),
            approved,
            approver_id,
            self.clock.now_ms(),
            self.decision_ttl_seconds,
            reason,
        );
        self.record_decision(proposal, &decision)?;
        Ok(DecideOutcome::Decided(decision))
    }

    fn record_decision(&self, proposal: &Proposal, decision: &Decision) -> Result<(), AuditError> {
        self.append(
            AuditStage::Decision,
            proposal,
            Some(&decision.decision_id),
            json!({
                "decision_id": decision.decision_id,
                "approved": decision.approved,
                "approver": decision.approver,
                "reason": decision.reason,
                "ttl_seconds": decision.ttl_seconds,
            }),
        )
    }

    /// Execute an approved decision: admit the actor, capture the before
    /// state, dispatch at most one service call, verify the outcome and
    /// seal the run with a receipt.
    ///
    /// Accepts any `(proposal, decision)` pair, so callers that construct
    /// approvals outside [`Self::decide`] still hit every guard here.
    #[instrument(skip_all, fields(proposal = %proposal.proposal_id))]
    pub async fn execute(
        &self,
        proposal: &Proposal,
        decision: &Decision,
    ) -> Result<ExecutionReceipt, GateError> {
        let decision_id = Some(decision.decision_id.as_str());
        let entity_id = proposal.action.target.entity_id.clone();

        if !self.device.is_configured() {
            let receipt = self.receipt(
                proposal,
                ReceiptDecision::Failed,
                vec![rule_ids::MISCONFIGURED_NO_TOKEN.to_string()],
                Verification::new(
                    false,
                    "The device API token is not configured. Cannot reach the control plane.",
                ),
                None,
                None,
                None,
                Some("The gate is misconfigured: the device API token is empty.".to_string()),
            );
            return self.finish(proposal, decision_id, receipt);
        }

        if !decision.approved {
            let receipt = self.receipt(
                proposal,
                ReceiptDecision::Skipped,
                vec![basis::DECISION_NOT_APPROVED.to_string()],
                Verification::new(false, decision.reason.clone()),
                None,
                None,
                None,
                None,
            );
            return self.finish(proposal, decision_id, receipt);
        }

        let now = self.clock.now_ms();
        if decision.expired(now) {
            warn!(
                proposal = %proposal.proposal_id,
                ttl = decision.ttl_seconds,
                "decision expired before execution"
            );
            let receipt = self.receipt(
                proposal,
                ReceiptDecision::Expired,
                vec![basis::DECISION_EXPIRED.to_string()],
                Verification::new(false, "decision TTL elapsed"),
                None,
                None,
                None,
                Some("The approval aged out before execution; submit a fresh proposal.".into()),
            );
            return self.finish(proposal, decision_id, receipt);
        }

        if self.policy.require_expected_outcome_for.contains(&proposal.action.kind)
            && proposal.action.expected_outcome.is_none()
        {
            let receipt = self.receipt(
                proposal,
                ReceiptDecision::Rejected,
                vec![basis::MISSING_EXPECTED_OUTCOME.to_string()],
                Verification::new(
                    false,
                    format!(
                        "Proposal for '{}' declares no expected_outcome; refusing to execute \
                         an unverifiable action",
                        proposal.action.kind
                    ),
                ),
                None,
                None,
                None,
                Some("Declare an expected_outcome so the result can be verified.".into()),
            );
            return self.finish(proposal, decision_id, receipt);
        }

        let admission = self.limiter.accept(proposal.actor(), now);
        if !admission.allowed {
            warn!(actor = %proposal.actor(), "actor rate limited");
            let receipt = self.receipt(
                proposal,
                ReceiptDecision::Skipped,
                vec![basis::RATE_LIMITED.to_string()],
                Verification::new(false, admission.reason.clone()),
                None,
                None,
                None,
                None,
            );
            return self.finish(proposal, decision_id, receipt);
        }

        // Law basis for everything that actually touches the device.
        let law_basis = law::evaluate(proposal, &self.policy).policy_basis;

        let before_state = match self.device.read_state(&entity_id).await {
            Ok(state) => state.to_value(),
            Err(err) => {
                let safe = self.sanitizer.sanitize(&err.to_string());
                let receipt = self.receipt(
                    proposal,
                    ReceiptDecision::Failed,
                    law_basis,
                    Verification::new(false, format!("Failed to read before-state: {safe}")),
                    None,
                    None,
                    None,
                    Some(format!(
                        "Could not reach the control plane to read state for {entity_id}"
                    )),
                );
                return self.finish(proposal, decision_id, receipt);
            }
        };

        self.append(
            AuditStage::ExecutionAttempt,
            proposal,
            decision_id,
            json!({
                "action_type": proposal.action.kind.as_str(),
                "entity_id": entity_id,
            }),
        )?;

        let dispatch = match self.device.invoke(&proposal.action).await {
            Ok(dispatch) => dispatch,
            Err(err) => {
                let safe = self.sanitizer.sanitize(&err.to_string());
                let receipt = self.receipt(
                    proposal,
                    ReceiptDecision::Failed,
                    law_basis,
                    Verification::new(false, format!("Service call failed: {safe}")),
                    None,
                    Some(before_state),
                    None,
                    Some(format!("Device service call failed for {entity_id}")),
                );
                return self.finish(proposal, decision_id, receipt);
            }
        };
        let action_taken = ActionTaken {
            kind: proposal.action.kind,
            entity_id: entity_id.clone(),
            endpoint: dispatch.endpoint,
            logical_service: dispatch.logical_service,
            payload: dispatch.payload,
            status_code: dispatch.status_code,
        };

        let receipt = match &proposal.action.expected_outcome {
            Some(outcome) => {
                let report = verify_outcome(
                    outcome,
                    &self.policy.verification,
                    self.device.as_ref(),
                    self.clock.as_ref(),
                    &self.sanitizer,
                )
                .await;
                let decision_kind = if report.passed {
                    ReceiptDecision::Allowed
                } else {
                    ReceiptDecision::Failed
                };
                let hint = (!report.passed).then(|| report.evidence.clone());
                self.receipt(
                    proposal,
                    decision_kind,
                    law_basis,
                    Verification::new(report.passed, report.evidence),
                    Some(action_taken),
                    Some(before_state),
                    report.last_state,
                    hint,
                )
            }
            None => self.receipt(
                proposal,
                ReceiptDecision::AllowedWithConditions,
                law_basis,
                Verification::new(
                    true,
                    "Dispatch accepted; no expected outcome declared, result not verified",
                ),
                Some(action_taken),
                Some(before_state),
                None,
                None,
            ),
        };
        self.finish(proposal, decision_id, receipt)
    }

    /// Post-hoc learning hook: append status and feedback for a sealed
    /// run. Never rewrites prior entries.
    #[instrument(skip_all, fields(proposal = %proposal.proposal_id))]
    pub async fn learn(
        &self,
        proposal: &Proposal,
        receipt: &ExecutionReceipt,
        feedback: Option<&str>,
    ) -> Result<(), GateError> {
        self.append(
            AuditStage::Learn,
            proposal,
            None,
            json!({
                "execution_status": receipt.decision.as_str(),
                "verification_pass": receipt.verification.passed,
                "feedback": feedback.unwrap_or(""),
            }),
        )?;
        Ok(())
    }

    /// Drive one draft through the whole pipeline and return its receipt.
    pub async fn steward(
        &self,
        draft: ProposalDraft,
        approver_name: &str,
        approver: &dyn Approver,
    ) -> Result<ExecutionReceipt, GateError> {
        let proposal = self.propose(draft).await?;
        match self.decide(&proposal, approver_name, approver).await? {
            DecideOutcome::Denied(receipt) => Ok(*receipt),
            DecideOutcome::Decided(decision) => self.execute(&proposal, &decision).await,
        }
    }
}
