//! JS value tags, the raw value union, and the central coercion routine.
//!
//! Every conversion the handle API offers (`as_bool`, `as_i32`, `as_f64`,
//! `as_string`, `as_date`) funnels through [`coerce`]. There is no bespoke
//! per-type coercion logic anywhere else, so conversion semantics stay
//! uniform across the crate.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::HandleError;

/// Value-type tag carried by every proxy record.
///
/// `Uninitialized` means the record's cached value has never been fetched
/// from the engine. The three error tags represent script-level failures
/// riding on the handle itself (see [`crate::error`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JsValueKind {
    Uninitialized = 0,
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Object,
    Array,
    Function,
    Date,
    RegExp,
    CompilerError,
    ExecutionError,
    InternalError,
}

impl JsValueKind {
    /// Object-family tags: property and call operations are only valid on
    /// handles carrying one of these.
    pub fn is_object_family(self) -> bool {
        matches!(
            self,
            JsValueKind::Object
                | JsValueKind::Array
                | JsValueKind::Function
                | JsValueKind::Date
                | JsValueKind::RegExp
        )
    }

    /// Script-level error tags.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            JsValueKind::CompilerError | JsValueKind::ExecutionError | JsValueKind::InternalError
        )
    }

    pub(crate) fn from_u8(tag: u8) -> JsValueKind {
        match tag {
            1 => JsValueKind::Undefined,
            2 => JsValueKind::Null,
            3 => JsValueKind::Bool,
            4 => JsValueKind::Number,
            5 => JsValueKind::String,
            6 => JsValueKind::Object,
            7 => JsValueKind::Array,
            8 => JsValueKind::Function,
            9 => JsValueKind::Date,
            10 => JsValueKind::RegExp,
            11 => JsValueKind::CompilerError,
            12 => JsValueKind::ExecutionError,
            13 => JsValueKind::InternalError,
            _ => JsValueKind::Uninitialized,
        }
    }
}

/// The raw value union spoken across the engine boundary.
///
/// `Object` is a marker: the actual object lives on the native side and is
/// only reachable through its proxy id. `Date` is milliseconds since the
/// Unix epoch, interpreted as a UTC offset from 1970-01-01.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Date(f64),
    Error(JsValueKind, String),
    Object,
}

impl RawValue {
    /// The value-type tag this raw value implies.
    ///
    /// `Object` maps to the generic object tag; the engine reports the
    /// precise object-family tag (array, function, ...) alongside the proxy
    /// itself, so callers should prefer the record's tag where one exists.
    pub fn kind(&self) -> JsValueKind {
        match self {
            RawValue::Undefined => JsValueKind::Undefined,
            RawValue::Null => JsValueKind::Null,
            RawValue::Bool(_) => JsValueKind::Bool,
            RawValue::Number(_) => JsValueKind::Number,
            RawValue::Str(_) => JsValueKind::String,
            RawValue::Date(_) => JsValueKind::Date,
            RawValue::Error(kind, _) => *kind,
            RawValue::Object => JsValueKind::Object,
        }
    }

    /// Bytes of heap memory backing this value, for GC pressure accounting.
    pub(crate) fn heap_size(&self) -> usize {
        match self {
            RawValue::Str(s) => s.capacity(),
            RawValue::Error(_, msg) => msg.capacity(),
            _ => 0,
        }
    }
}

pub(crate) enum CoerceTarget {
    Bool,
    Number,
    Int32,
    Text,
}

pub(crate) enum Coerced {
    Bool(bool),
    Number(f64),
    Int(i32),
    Text(String),
}

/// The single central conversion routine.
///
/// Error-tagged values refuse coercion: converting a script error into a
/// bool or number would silently hide the failure, so the caller gets a
/// coercion error and can use `throw_on_error` to see the real one.
pub(crate) fn coerce(value: &RawValue, target: CoerceTarget) -> Result<Coerced, HandleError> {
    if let RawValue::Error(kind, _) = value {
        return Err(HandleError::Coercion {
            from: *kind,
            to: target.name(),
        });
    }

    Ok(match target {
        CoerceTarget::Bool => Coerced::Bool(match value {
            RawValue::Undefined | RawValue::Null => false,
            RawValue::Bool(b) => *b,
            RawValue::Number(n) => *n != 0.0 && !n.is_nan(),
            RawValue::Str(s) => !s.is_empty(),
            RawValue::Date(_) | RawValue::Object => true,
            RawValue::Error(..) => unreachable!(),
        }),
        CoerceTarget::Number => Coerced::Number(number_of(value)),
        CoerceTarget::Int32 => Coerced::Int(to_int32(number_of(value))),
        CoerceTarget::Text => Coerced::Text(match value {
            RawValue::Undefined => "undefined".to_string(),
            RawValue::Null => "null".to_string(),
            RawValue::Bool(b) => b.to_string(),
            RawValue::Number(n) => format_number(*n),
            RawValue::Str(s) => s.clone(),
            RawValue::Date(ms) => format_number(*ms),
            RawValue::Object => "[object Object]".to_string(),
            RawValue::Error(..) => unreachable!(),
        }),
    })
}

impl CoerceTarget {
    fn name(&self) -> &'static str {
        match self {
            CoerceTarget::Bool => "bool",
            CoerceTarget::Number => "number",
            CoerceTarget::Int32 => "int32",
            CoerceTarget::Text => "string",
        }
    }
}

fn number_of(value: &RawValue) -> f64 {
    match value {
        RawValue::Undefined => f64::NAN,
        RawValue::Null => 0.0,
        RawValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        RawValue::Number(n) => *n,
        RawValue::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        RawValue::Date(ms) => *ms,
        RawValue::Object => f64::NAN,
        RawValue::Error(..) => unreachable!(),
    }
}

/// Script semantics for 32-bit integer conversion: truncate toward zero,
/// then wrap modulo 2^32 into the signed range. NaN and infinities map
/// to zero.
fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    const TWO_32: f64 = 4_294_967_296.0;
    let m = n.trunc().rem_euclid(TWO_32);
    if m >= TWO_32 / 2.0 {
        (m - TWO_32) as i32
    } else {
        m as i32
    }
}

/// Convert a milliseconds-since-epoch offset into a `SystemTime`.
///
/// Negative offsets (dates before 1970) are valid.
pub(crate) fn epoch_millis_to_time(millis: f64) -> Result<SystemTime, HandleError> {
    if millis.is_nan() || millis.is_infinite() {
        return Err(HandleError::Coercion {
            from: JsValueKind::Number,
            to: "date",
        });
    }
    let duration = Duration::from_millis(millis.abs() as u64);
    if millis >= 0.0 {
        Ok(UNIX_EPOCH + duration)
    } else {
        Ok(UNIX_EPOCH - duration)
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
