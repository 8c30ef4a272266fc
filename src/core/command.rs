//! Command envelopes and results.
//!
//! A command travels to the device as the JSON object
//! `{"id": <id>, "method": "<method>", "params": <array-or-object>}` and comes
//! back as an object holding `result` or `error` next to the echoed `id`.

use crate::config::{HEADER_SIZE, MAX_DATAGRAM_SIZE};
use crate::error::{constants, MiioError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Largest request text that still fits one frame once encrypted.
/// PKCS#7 always adds between 1 and 16 bytes of padding.
pub const MAX_REQUEST_SIZE: usize = (MAX_DATAGRAM_SIZE - HEADER_SIZE) / 16 * 16 - 1;

/// Envelope text around the id, method and params
const ENVELOPE_SKELETON: &str = r#"{"id":,"method":,"params":}"#;

/// Decimal digits of the widest correlation id
const MAX_ID_DIGITS: usize = 10;

/// A validated command that has not been given its correlation id yet.
///
/// Validation happens here so that rejected input never consumes an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDraft {
    method: String,
    method_json: String,
    params_json: String,
}

impl CommandDraft {
    /// Validate `params_json` and `method`.
    ///
    /// # Errors
    /// `MiioError::InvalidCommand` when the method is empty, the parameters
    /// are not a JSON array or object, or the envelope is too large for one frame.
    pub fn new(method: &str, params_json: &str) -> Result<Self> {
        let params: Value = serde_json::from_str(params_json).map_err(|e| {
            MiioError::InvalidCommand(format!("{}: {e}", constants::ERR_PARAMS_NOT_JSON))
        })?;
        Self::with_value(method, params)
    }

    /// Validate already parsed parameters.
    pub fn with_value(method: &str, params: Value) -> Result<Self> {
        if method.trim().is_empty() {
            return Err(MiioError::InvalidCommand(constants::ERR_EMPTY_METHOD.into()));
        }
        if !(params.is_array() || params.is_object()) {
            return Err(MiioError::InvalidCommand(constants::ERR_PARAMS_SHAPE.into()));
        }

        let draft = Self {
            method: method.to_string(),
            method_json: Value::from(method).to_string(),
            params_json: params.to_string(),
        };
        // Sized for the widest id so that any id assigned later fits.
        let worst_case = ENVELOPE_SKELETON.len()
            + MAX_ID_DIGITS
            + draft.method_json.len()
            + draft.params_json.len();
        if worst_case > MAX_REQUEST_SIZE {
            return Err(MiioError::InvalidCommand(format!(
                "{}: {worst_case} bytes",
                constants::ERR_REQUEST_TOO_LARGE
            )));
        }
        Ok(draft)
    }

    /// Attach the correlation id and render the request envelope
    pub fn assign(self, id: u32) -> QueuedCommand {
        let request = format!(
            r#"{{"id":{id},"method":{},"params":{}}}"#,
            self.method_json, self.params_json
        );
        QueuedCommand {
            id,
            method: self.method,
            request,
        }
    }
}

/// A validated command waiting in the dispatcher queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    id: u32,
    method: String,
    request: String,
}

impl QueuedCommand {
    /// Validate and build the envelope in one step. See [`CommandDraft::new`].
    pub fn new(id: u32, method: &str, params_json: &str) -> Result<Self> {
        Ok(CommandDraft::new(method, params_json)?.assign(id))
    }

    pub fn with_value(id: u32, method: &str, params: Value) -> Result<Self> {
        Ok(CommandDraft::with_value(method, params)?.assign(id))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Full JSON request as sent (before encryption)
    pub fn request(&self) -> &str {
        &self.request
    }
}

/// Outcome of one command, delivered to every listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiioResponse {
    /// Correlation id assigned by `enqueue`
    pub id: u32,
    /// Command method name
    pub method: String,
    /// Reply object without its `id`, or `{"error": "<reason>"}`
    pub payload: Value,
}

impl MiioResponse {
    pub fn success(command: &QueuedCommand, payload: Value) -> Self {
        Self {
            id: command.id,
            method: command.method.clone(),
            payload,
        }
    }

    pub fn error(command: &QueuedCommand, reason: &str) -> Self {
        Self {
            id: command.id,
            method: command.method.clone(),
            payload: json!({ "error": reason }),
        }
    }

    /// Whether the payload carries an `error` member (local or device-side)
    pub fn is_error(&self) -> bool {
        self.payload.get("error").is_some()
    }

    /// The device's `result` member, if any
    pub fn result(&self) -> Option<&Value> {
        self.payload.get("result")
    }
}

/// A decrypted device reply split into its echoed id and the rest of the object
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReply {
    pub id: Option<u64>,
    pub payload: Value,
}

impl DeviceReply {
    /// Parse decrypted reply text.
    ///
    /// # Errors
    /// `MiioError::MalformedResponse` when the text is not a JSON object.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| MiioError::MalformedResponse(e.to_string()))?;
        let mut object: Map<String, Value> = match value {
            Value::Object(object) => object,
            other => {
                return Err(MiioError::MalformedResponse(format!(
                    "expected a JSON object, got {other}"
                )))
            }
        };
        let id = object.remove("id").and_then(|id| id.as_u64());
        Ok(Self {
            id,
            payload: Value::Object(object),
        })
    }
}
