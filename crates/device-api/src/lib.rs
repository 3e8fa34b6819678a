//! Narrow contract over the device control plane.
//!
//! Two methods is the whole surface: `read_state` and `invoke`. The gate
//! never talks HTTP itself; it holds an `Arc<dyn DeviceApi>` created at
//! construction and released with it, which is also the seam the tests use
//! to script device behavior.

#![deny(unsafe_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use steward_core::proposal::{ActionType, DeviceAction};
use thiserror::Error;
use tracing::debug;

/// Request timeout for individual control-plane calls, independent of any
/// verification deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the device control plane.
///
/// Message text may embed upstream detail (URLs, headers); callers must
/// sanitize the string form before it escapes into receipts or audit
/// payloads.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("unexpected status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },
    /// Routing misses are programming errors: the law must already have
    /// rejected unknown action types.
    #[error("no service route for action type '{0}'")]
    Unroutable(String),
    #[error("device API token is not configured")]
    Unconfigured,
}

impl From<reqwest::Error> for DeviceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A full entity state snapshot as returned by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceState {
    /// Value of `attribute`: the top-level state for the literal
    /// `"state"`, otherwise the named entry under `attributes`.
    pub fn value_of(&self, attribute: &str) -> Option<Value> {
        if attribute == "state" {
            Some(Value::String(self.state.clone()))
        } else {
            self.attributes.get(attribute).cloned()
        }
    }

    /// JSON form of the snapshot for receipts and audit payloads.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Exact record of one service dispatch, embedded verbatim into receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub endpoint: String,
    pub logical_service: String,
    pub payload: Value,
    pub status_code: u16,
}

/// Fixed routing table from action type to logical service path.
pub fn service_route(kind: ActionType) -> &'static str {
    match kind {
        ActionType::ToggleEntity => "homeassistant/toggle",
        ActionType::TurnOn => "homeassistant/turn_on",
        ActionType::TurnOff => "homeassistant/turn_off",
    }
}

/// The two-method device contract.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Read the current state of one entity.
    async fn read_state(&self, entity_id: &str) -> Result<DeviceState, DeviceError>;

    /// Dispatch the service call for `action` and return the exact record
    /// of what was sent.
    async fn invoke(&self, action: &DeviceAction) -> Result<DispatchRecord, DeviceError>;

    /// Whether credentials are present. The gate fails fast with a
    /// misconfiguration receipt when this is false.
    fn is_configured(&self) -> bool {
        true
    }
}

/// HTTP client for the device control plane, bearer-authenticated.
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpDeviceClient {
    /// Build a client for `base_url` (trailing slashes stripped) using
    /// `token` for bearer auth. The underlying connection pool is created
    /// once and shared by clones.
    pub fn new(base_url: &str, token: &str) -> Result<Self, DeviceError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Probe `GET /api/` for reachability. `Ok(true)` means a 200.
    pub async fn ready_probe(&self) -> Result<bool, DeviceError> {
        if self.token.is_empty() {
            return Err(DeviceError::Unconfigured);
        }
        let resp = self
            .http
            .get(format!("{}/api/", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(resp.status().as_u16() == 200)
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceClient {
    async fn read_state(&self, entity_id: &str) -> Result<DeviceState, DeviceError> {
        let endpoint = format!("/api/states/{entity_id}");
        debug!(entity = entity_id, "reading device state");
        let resp = self
            .http
            .get(format!("{}{endpoint}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(DeviceError::Status { status, endpoint });
        }
        Ok(resp.json().await?)
    }

    async fn invoke(&self, action: &DeviceAction) -> Result<DispatchRecord, DeviceError> {
        let route = service_route(action.kind);
        let endpoint = format!("/api/services/{route}");
        let payload = json!({ "entity_id": action.target.entity_id });
        debug!(service = route, entity = %action.target.entity_id, "invoking device service");
        let resp = self
            .http
            .post(format!("{}{endpoint}", self.base_url))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let status_code = resp.status().as_u16();
        if status_code != 200 {
            return Err(DeviceError::Status { status: status_code, endpoint });
        }
        Ok(DispatchRecord { endpoint, logical_service: route.to_string(), payload, status_code })
    }

    fn is_configured(&self) -> bool {
        !self.token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_table_is_fixed() {
        assert_eq!(service_route(ActionType::ToggleEntity), "homeassistant/toggle");
        assert_eq!(service_route(ActionType::TurnOn), "homeassistant/turn_on");
        assert_eq!(service_route(ActionType::TurnOff), "homeassistant/turn_off");
    }

    #[test]
    fn state_attribute_extraction() {
        let state: DeviceState = serde_json::from_value(json!({
            "entity_id": "light.kitchen",
            "state": "on",
            "attributes": {"brightness": 128},
            "last_changed": "2026-01-01T00:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(state.value_of("state"), Some(json!("on")));
        assert_eq!(state.value_of("brightness"), Some(json!(128)));
        assert_eq!(state.value_of("color"), None);
        assert_eq!(state.extra["last_changed"], json!("2026-01-01T00:00:00+00:00"));
    }

    #[test]
    fn snapshot_round_trips_extra_fields() {
        let raw = json!({
            "entity_id": "switch.heater",
            "state": "off",
            "attributes": {},
            "last_updated": "2026-01-01T00:00:00+00:00"
        });
        let state: DeviceState = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(state.to_value(), raw);
    }

    #[test]
    fn client_without_token_reports_unconfigured() {
        let client = HttpDeviceClient::new("http://device.local:8123/", "").unwrap();
        assert!(!client.is_configured());
        let with_token = HttpDeviceClient::new("http://device.local:8123", "tok").unwrap();
        assert!(with_token.is_configured());
    }
}
