//! Wire format shared by the scheduler HTTP API and the agents.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema violation: {0}")]
    Schema(String),
    #[error("invalid output encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
}

fn schema(msg: impl Into<String>) -> ProtocolError {
    ProtocolError::Schema(msg.into())
}

/// Scan configuration of a queue: the module name plus free-form module keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentConfig {
    pub module: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AssignmentConfig {
    pub fn new(module: impl Into<String>) -> Self {
        Self { module: module.into(), extra: Map::new() }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }

    /// Parse a stored queue config, requiring a non-empty `module`.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        validate_config(&value)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Unit of work handed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub config: AssignmentConfig,
    pub targets: Vec<String>,
}

impl Assignment {
    pub fn new(config: AssignmentConfig, targets: Vec<String>) -> Self {
        Self { id: Uuid::new_v4().to_string(), config, targets }
    }

    /// Validate a decoded JSON value against the assignment schema and convert it.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        validate_assignment(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Assignment typed in by hand: the `id` may be omitted and is generated then.
    pub fn from_manual(text: &str) -> Result<Self, ProtocolError> {
        let mut value: Value = serde_json::from_str(text)?;
        if let Value::Object(map) = &mut value {
            map.entry("id").or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        }
        Self::from_value(value)
    }
}

/// Decoded answer of the assignment endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignResponse {
    Work(Assignment),
    NoWork,
}

impl AssignResponse {
    /// `{}` (or `null`) means there is no work; anything else must be a valid assignment.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        match &value {
            Value::Null => Ok(AssignResponse::NoWork),
            Value::Object(map) if map.is_empty() => Ok(AssignResponse::NoWork),
            _ => Assignment::from_value(value).map(AssignResponse::Work),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            AssignResponse::Work(a) => serde_json::to_value(a).unwrap_or(Value::Null),
            AssignResponse::NoWork => Value::Object(Map::new()),
        }
    }
}

/// Job output as uploaded by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputUpload {
    pub id: String,
    pub retval: i32,
    /// Base64 encoded zip archive.
    pub output: String,
}

impl OutputUpload {
    pub fn from_archive(id: &str, retval: i32, archive: &[u8]) -> Self {
        Self { id: id.to_string(), retval, output: STANDARD.encode(archive) }
    }

    pub fn decode_output(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.id.trim().is_empty() {
            return Err(schema("output id must not be empty"));
        }
        Ok(STANDARD.decode(self.output.as_bytes())?)
    }
}

/// Job ids name files and directories on both sides, so only `[A-Za-z0-9-]` is allowed.
pub fn is_job_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn validate_config(value: &Value) -> Result<(), ProtocolError> {
    let config = value.as_object().ok_or_else(|| schema("config must be an object"))?;
    match config.get("module") {
        Some(Value::String(m)) if !m.is_empty() => Ok(()),
        _ => Err(schema("config.module must be a non-empty string")),
    }
}

fn validate_assignment(value: &Value) -> Result<(), ProtocolError> {
    let obj = value.as_object().ok_or_else(|| schema("assignment must be an object"))?;
    if let Some(key) = obj.keys().find(|k| !matches!(k.as_str(), "id" | "config" | "targets")) {
        return Err(schema(format!("unexpected property {key}")));
    }
    match obj.get("id") {
        Some(Value::String(id)) if is_job_id(id) => {}
        Some(Value::String(id)) => return Err(schema(format!("invalid job id {id:?}"))),
        _ => return Err(schema("id must be a non-empty string")),
    }
    validate_config(obj.get("config").ok_or_else(|| schema("config is required"))?)?;
    let targets = obj
        .get("targets")
        .and_then(Value::as_array)
        .ok_or_else(|| schema("targets must be an array"))?;
    if !targets.iter().all(Value::is_string) {
        return Err(schema("targets must be strings"));
    }
    Ok(())
}
