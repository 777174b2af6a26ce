//! JSON-wire response envelope and status codes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;

/// JSON-wire protocol status codes used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireStatus {
    Success,
    NoSuchDriver,
    UnknownCommand,
    UnknownError,
    SessionNotCreated,
    NoSuchContext,
}

impl WireStatus {
    /// Numeric code carried in the `status` field.
    pub fn code(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::NoSuchDriver => 6,
            Self::UnknownCommand => 9,
            Self::UnknownError => 13,
            Self::SessionNotCreated => 33,
            Self::NoSuchContext => 35,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            6 => Some(Self::NoSuchDriver),
            9 => Some(Self::UnknownCommand),
            13 => Some(Self::UnknownError),
            33 => Some(Self::SessionNotCreated),
            35 => Some(Self::NoSuchContext),
            _ => None,
        }
    }

    /// Default human-readable summary for the status.
    pub fn summary(self) -> &'static str {
        match self {
            Self::Success => "The command executed successfully.",
            Self::NoSuchDriver => "A session is either terminated or not started",
            Self::UnknownCommand => {
                "The requested resource could not be found, or a request was received \
                 using an HTTP method that is not supported by the mapped resource."
            }
            Self::UnknownError => {
                "An unknown server-side error occurred while processing the command."
            }
            Self::SessionNotCreated => "A new session could not be created.",
            Self::NoSuchContext => "No such context found.",
        }
    }
}

impl fmt::Display for WireStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.summary(), self.code())
    }
}

impl Serialize for WireStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for WireStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown wire status {code}")))
    }
}

/// `{sessionId, status, value}` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub status: i64,
    pub value: Value,
}

impl WireResponse {
    pub fn success(session_id: Option<String>, value: Value) -> Self {
        Self {
            session_id,
            status: WireStatus::Success.code(),
            value,
        }
    }

    /// Error response whose value is `{message}`.
    pub fn error(session_id: Option<String>, status: WireStatus, message: impl Into<String>) -> Self {
        Self {
            session_id,
            status: status.code(),
            value: json!({ "message": message.into() }),
        }
    }

    /// Synthetic failure produced when the backend cannot answer.
    pub fn failure(message: impl Into<String>) -> Value {
        json!({
            "status": WireStatus::UnknownError.code(),
            "value": { "message": message.into() },
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == WireStatus::Success.code()
    }
}
