//! Unwrapping of status/negotiation responses.
//!
//! The gateway in front of the analysis backend may wrap a payload as
//! `{"statusCode": 200, "body": ...}`, and the body may arrive as an object or
//! as a JSON document serialized into a string. Normalization runs a fixed
//! list of layers, each of which passes values it does not recognize through
//! untouched.

use crate::api::PipelineError;
use serde_json::Value;
use std::borrow::Cow;

type Layer = fn(Value) -> Result<Value, PipelineError>;

/// Applied in order after the initial parse.
const LAYERS: &[Layer] = &[unwrap_gateway, reparse_string];

/// Bare tokens some JSON encoders emit that are not valid JSON.
const INVALID_TOKENS: &[&str] = &["-Infinity", "Infinity", "NaN"];

/// Parses a raw response body and strips every wrapping layer.
pub fn normalize(raw: &str) -> Result<Value, PipelineError> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| PipelineError::MalformedEnvelope(format!("response is not JSON: {}", e)))?;
    normalize_value(parsed)
}

/// Same as [`normalize`] for a value that is already parsed.
pub fn normalize_value(value: Value) -> Result<Value, PipelineError> {
    LAYERS.iter().try_fold(value, |value, layer| layer(value))
}

/// An object carrying both a status code and a `body` field.
pub fn is_gateway_envelope(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| {
        obj.get("statusCode")
            .is_some_and(|code| code.is_number() || code.is_string())
            && obj.contains_key("body")
    })
}

/// Replaces a gateway envelope with its body, parsing string bodies.
pub fn unwrap_gateway(value: Value) -> Result<Value, PipelineError> {
    if !is_gateway_envelope(&value) {
        return Ok(value);
    }

    let body = match value {
        Value::Object(mut obj) => obj.remove("body").unwrap_or(Value::Null),
        other => return Ok(other),
    };

    match body {
        Value::String(text) => serde_json::from_str(&sanitize_tokens(&text)).map_err(|e| {
            PipelineError::MalformedEnvelope(format!("gateway body is not JSON: {}", e))
        }),
        other => Ok(other),
    }
}

/// Parses a string value once more; keeps the string if it is not JSON.
pub fn reparse_string(value: Value) -> Result<Value, PipelineError> {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(inner) => Ok(inner),
            Err(_) => Ok(Value::String(text)),
        },
        other => Ok(other),
    }
}

/// Rewrites `NaN`, `Infinity` and `-Infinity` outside string literals to `null`.
pub fn sanitize_tokens(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let mut out: Option<String> = None;
    let mut last = 0;
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }

        if let Some(token) = INVALID_TOKENS
            .iter()
            .find(|token| bytes[i..].starts_with(token.as_bytes()))
        {
            let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
            buf.push_str(&text[last..i]);
            buf.push_str("null");
            i += token.len();
            last = i;
            continue;
        }

        i += 1;
    }

    match out {
        None => Cow::Borrowed(text),
        Some(mut buf) => {
            buf.push_str(&text[last..]);
            Cow::Owned(buf)
        }
    }
}
