//! Stewardship gate core primitives and shared types.

#![deny(unsafe_code)]

/// Version of the core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version stamped on every proposal, receipt and audit event.
pub const SCHEMA_VERSION: &str = "v1";

pub mod entity;
pub mod ids;
pub mod proposal;
pub mod receipt;
pub mod redact;
pub mod scalar;

pub use proposal::{
    ActionMetadata, ActionParameters, ActionTarget, ActionType, BlastRadius, DeviceAction,
    ExpectedOutcome, Proposal, ProposalDraft, Reversibility, Source, VerifySpec,
};
pub use receipt::{ActionTaken, ExecutionReceipt, ReceiptDecision, Verification};
pub use redact::Sanitizer;
pub use scalar::ScalarValue;
