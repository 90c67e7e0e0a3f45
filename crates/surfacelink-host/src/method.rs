//! Method-call codec: the request shape, the error vocabulary the host sees,
//! and typed readers for the argument payloads.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::browser::{PermissionState, PointerButton};

/// One command sent by the host, e.g.
/// `{"method": "setSize", "arguments": [800, 600]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default, alias = "args")]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self { method: method.into(), arguments }
    }
}

pub type MethodResult = Result<Value, MethodError>;

// MARK: - MethodError

/// Errors reported back to the host. Each carries a stable string code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodError {
    #[error("invalid arguments")]
    InvalidArguments,

    #[error("browser rejected the operation")]
    MethodFailed,

    #[error("{0}")]
    ScriptFailed(String),

    #[error("{0}")]
    NotSupported(String),

    #[error("the browser environment is already initialized")]
    AlreadyInitialized,

    #[error("no such instance: {0}")]
    NoSuchInstance(i64),

    #[error("method not implemented: {0}")]
    NotImplemented(String),

    #[error("{0}")]
    InitializationFailed(String),
}

impl MethodError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArguments => "invalidArguments",
            Self::MethodFailed => "method_failed",
            Self::ScriptFailed(_) => "script_failed",
            Self::NotSupported(_) => "not_supported",
            Self::AlreadyInitialized => "already_initialized",
            Self::NoSuchInstance(_) => "no_such_instance",
            Self::NotImplemented(_) => "not_implemented",
            Self::InitializationFailed(_) => "initialization_failed",
        }
    }

    /// `{"code": ..., "message": ...}` as sent over the host channel.
    pub fn to_json(&self) -> Value {
        json!({ "code": self.code(), "message": self.to_string() })
    }
}

// MARK: - Argument readers

/// `[x, y]` with two numbers.
pub fn point(args: &Value) -> Result<(f64, f64), MethodError> {
    match args.as_array().map(Vec::as_slice) {
        Some([x, y]) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(MethodError::InvalidArguments),
        },
        _ => Err(MethodError::InvalidArguments),
    }
}

/// `[width, height]`, truncated to whole non-negative pixels.
pub fn size(args: &Value) -> Result<(u32, u32), MethodError> {
    let (w, h) = point(args)?;
    if !(w.is_finite() && h.is_finite()) || w < 0.0 || h < 0.0 {
        return Err(MethodError::InvalidArguments);
    }
    Ok((w as u32, h as u32))
}

pub fn string(args: &Value) -> Result<&str, MethodError> {
    args.as_str().ok_or(MethodError::InvalidArguments)
}

/// A 32-bit integer; ARGB colors arrive either signed or unsigned.
pub fn argb(args: &Value) -> Result<u32, MethodError> {
    let v = args.as_i64().ok_or(MethodError::InvalidArguments)?;
    if v < i64::from(i32::MIN) || v > i64::from(u32::MAX) {
        return Err(MethodError::InvalidArguments);
    }
    Ok(v as u32)
}

pub fn texture_id(args: &Value) -> Result<i64, MethodError> {
    args.as_i64().ok_or(MethodError::InvalidArguments)
}

/// `{"button": int, "isDown": bool}`.
pub fn pointer_button(args: &Value) -> Result<(PointerButton, bool), MethodError> {
    let button = args
        .get("button")
        .and_then(Value::as_i64)
        .and_then(|b| PointerButton::try_from(b).ok())
        .ok_or(MethodError::InvalidArguments)?;
    let is_down = args.get("isDown").and_then(Value::as_bool).ok_or(MethodError::InvalidArguments)?;
    Ok((button, is_down))
}

/// `{"id": int, "allow": bool | null}`. A missing or null `allow` leaves the
/// decision to the browser.
pub fn permission_reply(args: &Value) -> Result<(u64, PermissionState), MethodError> {
    let id = args.get("id").and_then(Value::as_u64).ok_or(MethodError::InvalidArguments)?;
    let allow = match args.get("allow") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_bool().ok_or(MethodError::InvalidArguments)?),
    };
    Ok((id, PermissionState::from(allow)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_call() {
        let call: MethodCall =
            serde_json::from_str(r#"{"method":"setSize","arguments":[800.0,600]}"#).expect("valid call");
        assert_eq!(call.method, "setSize");
        assert_eq!(size(&call.arguments), Ok((800, 600)));

        let bare: MethodCall = serde_json::from_str(r#"{"method":"reload"}"#).expect("valid call");
        assert!(bare.arguments.is_null());
    }

    #[test]
    fn point_requires_exactly_two_numbers() {
        assert_eq!(point(&json!([1.5, -2])), Ok((1.5, -2.0)));
        assert_eq!(point(&json!([1.5])), Err(MethodError::InvalidArguments));
        assert_eq!(point(&json!([1, 2, 3])), Err(MethodError::InvalidArguments));
        assert_eq!(point(&json!(["1", 2])), Err(MethodError::InvalidArguments));
        assert_eq!(point(&json!({"x": 1, "y": 2})), Err(MethodError::InvalidArguments));
    }

    #[test]
    fn size_rejects_negative_dimensions() {
        assert_eq!(size(&json!([-1, 10])), Err(MethodError::InvalidArguments));
        assert_eq!(size(&json!([10.9, 0])), Ok((10, 0)));
    }

    #[test]
    fn pointer_button_map() {
        assert_eq!(pointer_button(&json!({"button": 1, "isDown": true})), Ok((PointerButton::Primary, true)));
        assert_eq!(pointer_button(&json!({"button": 9, "isDown": true})), Err(MethodError::InvalidArguments));
        assert_eq!(pointer_button(&json!({"button": 1})), Err(MethodError::InvalidArguments));
        assert_eq!(pointer_button(&json!([1, true])), Err(MethodError::InvalidArguments));
    }

    #[test]
    fn permission_reply_allows_a_null_decision() {
        assert_eq!(permission_reply(&json!({"id": 2, "allow": true})), Ok((2, PermissionState::Allow)));
        assert_eq!(permission_reply(&json!({"id": 2, "allow": false})), Ok((2, PermissionState::Deny)));
        assert_eq!(permission_reply(&json!({"id": 2, "allow": null})), Ok((2, PermissionState::Default)));
        assert_eq!(permission_reply(&json!({"id": 2})), Ok((2, PermissionState::Default)));
        assert_eq!(permission_reply(&json!({"id": 2, "allow": "yes"})), Err(MethodError::InvalidArguments));
        assert_eq!(permission_reply(&json!({"allow": true})), Err(MethodError::InvalidArguments));
    }

    #[test]
    fn argb_accepts_signed_and_unsigned() {
        assert_eq!(argb(&json!(-1)), Ok(0xFFFF_FFFF));
        assert_eq!(argb(&json!(0xFF00_00FFu32)), Ok(0xFF00_00FF));
        assert_eq!(argb(&json!(1u64 << 33)), Err(MethodError::InvalidArguments));
        assert_eq!(argb(&json!("red")), Err(MethodError::InvalidArguments));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(MethodError::InvalidArguments.code(), "invalidArguments");
        assert_eq!(MethodError::NotSupported("x".into()).to_json()["code"], "not_supported");
        assert_eq!(MethodError::NoSuchInstance(7).to_json()["message"], "no such instance: 7");
    }
}
