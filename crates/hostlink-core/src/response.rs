//! Protocol-agnostic response value

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

/// Result of one request: status code, status, payload and message.
///
/// Transports never raise out of `send`; every outcome, including
/// transport errors, is expressed as a `Response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    code: u16,
    status: Status,
    payload: Value,
    message: String,
}

impl Response {
    pub fn success(code: u16, payload: impl Into<Value>) -> Self {
        Self {
            code,
            status: Status::Success,
            payload: payload.into(),
            message: String::new(),
        }
    }

    pub fn failure(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status: Status::Failure,
            payload: Value::Null,
            message: message.into(),
        }
    }

    /// Attach diagnostic payload (e.g. the undecodable body)
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
