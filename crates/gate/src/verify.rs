//! Outcome verification: bounded polling until the declared expectation is
//! observed or the clamped deadline elapses.

use crate::clock::Clock;
use device_api::DeviceApi;
use law::VerificationConfig;
use serde_json::{json, Value};
use steward_core::proposal::ExpectedOutcome;
use steward_core::scalar::display_observed;
use steward_core::Sanitizer;
use tracing::debug;

/// Structured result of one verification run.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub passed: bool,
    pub evidence: String,
    /// Last state snapshot observed, or a sanitized error record.
    pub last_state: Option<Value>,
}

fn plural(n: u32) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn observed_in(last_state: Option<&Value>, attribute: &str) -> Option<Value> {
    let state = last_state?;
    if attribute == "state" {
        state.get("state").cloned()
    } else {
        state.get("attributes").and_then(|a| a.get(attribute)).cloned()
    }
}

/// Poll the device until `expected` is observed or the deadline elapses.
///
/// The proposal's timeout is clamped to the policy maximum, so a proposal
/// can never widen its own verification window. At least one poll always
/// happens, even with a deadline already in the past. Poll errors are
/// captured into the last-state record and do not abort the loop.
pub async fn verify_outcome(
    expected: &ExpectedOutcome,
    verification: &VerificationConfig,
    device: &dyn DeviceApi,
    clock: &dyn Clock,
    sanitizer: &Sanitizer,
) -> VerifyReport {
    let verify = &expected.verify;
    let effective_timeout =
        expected.timeout_seconds.min(verification.max_timeout_seconds);
    let start = clock.now_ms();
    let deadline = start + effective_timeout.saturating_mul(1000);
    let mut last_state: Option<Value> = None;
    let mut poll_count: u32 = 0;

    loop {
        poll_count += 1;
        match device.read_state(&verify.entity_id).await {
            Ok(state) => {
                let actual = state.value_of(&verify.attribute);
                last_state = Some(state.to_value());
                if verify.equals.matches(actual.as_ref()) {
                    let elapsed = (clock.now_ms().saturating_sub(start)) as f64 / 1000.0;
                    return VerifyReport {
                        passed: true,
                        evidence: format!(
                            "Verified: {}.{} expected {}; observed {} after {elapsed:.2}s \
                             ({poll_count} poll{})",
                            verify.entity_id,
                            verify.attribute,
                            verify.equals,
                            display_observed(actual.as_ref()),
                            plural(poll_count),
                        ),
                        last_state,
                    };
                }
                debug!(
                    entity = %verify.entity_id,
                    attribute = %verify.attribute,
                    poll = poll_count,
                    "expectation not yet observed"
                );
            }
            Err(err) => {
                last_state = Some(json!({ "error": sanitizer.sanitize(&err.to_string()) }));
            }
        }
        if clock.now_ms() >= deadline {
            break;
        }
        tokio::time::sleep(verification.poll_interval).await;
    }

    let elapsed = (clock.now_ms().saturating_sub(start)) as f64 / 1000.0;
    let final_actual = observed_in(last_state.as_ref(), &verify.attribute);
    VerifyReport {
        passed: false,
        evidence: format!(
            "Timeout: {}.{} expected {}; observed {} after {elapsed:.2}s ({poll_count} poll{})",
            verify.entity_id,
            verify.attribute,
            verify.equals,
            display_observed(final_actual.as_ref()),
            plural(poll_count),
        ),
        last_state,
    }
}
