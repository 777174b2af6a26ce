//! Normalization of native backend results into JSON-wire responses.

use serde_json::{Value, json};
use switchyard_protocols::{WireResponse, WireStatus};

use crate::error::SessionError;

/// Turn a raw native result into a `{status, value}` response.
///
/// A missing result is a success with an empty string value. Non-object
/// results become an unknown error; objects must carry a numeric (or
/// numeric string) `status`.
pub fn normalize_native(raw: Value) -> Result<WireResponse, SessionError> {
    let object = match raw {
        Value::Null => return Ok(WireResponse::success(None, json!(""))),
        Value::Object(object) => object,
        other => {
            return Ok(WireResponse::error(
                None,
                WireStatus::UnknownError,
                format!("Did not get a valid response object. Object was: {}", other),
            ));
        }
    };

    let status = match object.get("status") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        SessionError::Protocol(format!(
            "Did not get a valid response status. Object was: {}",
            Value::Object(object.clone())
        ))
    })?;

    Ok(WireResponse {
        session_id: None,
        status,
        value: object.get("value").cloned().unwrap_or(Value::Null),
    })
}
