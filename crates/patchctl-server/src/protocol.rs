//! JSON command/response envelope.
//!
//! Every operation is invoked with a flat JSON payload naming an `action`
//! and returns one envelope: `{protocol_version, request_id, state,
//! results|error, timestamp_ms}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use patchctl_core::error::PatchError;

pub const PROTOCOL_VERSION: &str = "2.0";

/// An inbound command. Action-specific fields stay in the flattened map
/// until the dispatcher pulls them out.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub action: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}

impl CommandRequest {
    /// Required string field.
    pub fn str_field(&self, key: &str) -> Result<String, PatchError> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                PatchError::Validation(format!("missing {key} for {}", self.action))
            })
    }

    pub fn opt_str_field(&self, key: &str) -> Option<String> {
        self.params.get(key).and_then(Value::as_str).map(String::from)
    }

    /// Required `[x, y]` position field.
    pub fn position_field(&self, key: &str) -> Result<(f64, f64), PatchError> {
        let pair = self
            .params
            .get(key)
            .and_then(Value::as_array)
            .filter(|a| a.len() == 2)
            .and_then(|a| Some((a[0].as_f64()?, a[1].as_f64()?)));
        pair.ok_or_else(|| {
            PatchError::Validation(format!("missing {key} for {}", self.action))
        })
    }

    pub fn f64_field(&self, key: &str) -> Result<f64, PatchError> {
        self.params.get(key).and_then(Value::as_f64).ok_or_else(|| {
            PatchError::Validation(format!("missing {key} for {}", self.action))
        })
    }

    /// Optional non-negative integer, e.g. a port index or chunk size.
    pub fn opt_u64_field(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    /// Required field deserialized into a concrete type.
    pub fn typed_field<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<T, PatchError> {
        let value = self.params.get(key).ok_or_else(|| {
            PatchError::Validation(format!("missing {key} for {}", self.action))
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| PatchError::Validation(format!("malformed {key}: {e}")))
    }

    pub fn opt_typed_field<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, PatchError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| PatchError::Validation(format!("malformed {key}: {e}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub details: Value,
}

/// The one response shape every operation returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub protocol_version: String,
    pub request_id: Option<String>,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub timestamp_ms: i64,
}

impl ResponseEnvelope {
    pub fn succeeded(request_id: Option<String>, results: Value) -> Self {
        ResponseEnvelope {
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_id,
            state: "succeeded".to_string(),
            results: Some(results),
            error: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn failed(request_id: Option<String>, err: &PatchError) -> Self {
        ResponseEnvelope {
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_id,
            state: "failed".to_string(),
            results: None,
            error: Some(ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
                recoverable: err.recoverable(),
                hint: err.hint().map(String::from),
                details: Value::Object(serde_json::Map::new()),
            }),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
