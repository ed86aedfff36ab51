// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Type coercion of extracted JSON values into column types
//!
//! Besides the plain SQL types, Kubernetes quantities are understood:
//! memory sizes (`128Mi`), CPU amounts (`250m`) and short ages (`1d12h`).
//! The inverse formatters back the `to_size`, `to_age` and `to_utc` SQL
//! functions.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;

use crate::error::CoercionError;
use crate::schema::ColumnType;

/// A typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    /// Milliseconds since the Unix epoch, UTC
    Timestamp(i64),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("null"),
            CellValue::Text(s) => write!(f, "{:?}", s),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Real(r) => write!(f, "{}", r),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Timestamp(ms) => match DateTime::<Utc>::from_timestamp_millis(*ms) {
                Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
                None => write!(f, "{}ms", ms),
            },
        }
    }
}

/// Quantity: optional sign, decimal or exponent number, optional suffix
static QUANTITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)([a-zA-Z]*)$").unwrap()
});

/// Age: one or more `<number><unit>` pairs, e.g. `1d12h`
static AGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+[wdhms])+$").unwrap());

static AGE_PART: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)([wdhms])").unwrap());

/// Convert a JSON value to the given column type.
pub fn coerce(value: &Value, ty: ColumnType) -> Result<CellValue, CoercionError> {
    if value.is_null() {
        return Ok(CellValue::Null);
    }
    let fail = || CoercionError {
        expected: ty,
        value: truncate(value.to_string()),
    };

    match ty {
        ColumnType::Text => Ok(CellValue::Text(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        ColumnType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.2e18).map(|f| f as i64))
                .map(CellValue::Integer)
                .ok_or_else(fail),
            Value::String(s) => s.trim().parse().map(CellValue::Integer).map_err(|_| fail()),
            _ => Err(fail()),
        },
        ColumnType::Real => match value {
            Value::Number(n) => n.as_f64().map(CellValue::Real).ok_or_else(fail),
            Value::String(s) => s.trim().parse().map(CellValue::Real).map_err(|_| fail()),
            _ => Err(fail()),
        },
        ColumnType::Bool => match value {
            Value::Bool(b) => Ok(CellValue::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(CellValue::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(CellValue::Bool(false)),
            _ => Err(fail()),
        },
        ColumnType::Timestamp => match value {
            Value::String(s) => parse_timestamp(s).map(CellValue::Timestamp).ok_or_else(fail),
            Value::Number(n) => n
                .as_i64()
                .map(|secs| CellValue::Timestamp(secs.saturating_mul(1000)))
                .ok_or_else(fail),
            _ => Err(fail()),
        },
        ColumnType::Size => match value {
            Value::Number(n) => n.as_f64().map(|f| CellValue::Integer(f.round() as i64)).ok_or_else(fail),
            Value::String(s) => parse_size(s).map(CellValue::Integer).ok_or_else(fail),
            _ => Err(fail()),
        },
        ColumnType::Cpu => match value {
            Value::Number(n) => n.as_f64().map(CellValue::Real).ok_or_else(fail),
            Value::String(s) => parse_cpu(s).map(CellValue::Real).ok_or_else(fail),
            _ => Err(fail()),
        },
        ColumnType::Age => match value {
            Value::Number(n) => n.as_i64().map(CellValue::Integer).ok_or_else(fail),
            Value::String(s) => parse_age(s).map(CellValue::Integer).ok_or_else(fail),
            _ => Err(fail()),
        },
    }
}

fn truncate(mut s: String) -> String {
    const MAX: usize = 80;
    if s.chars().count() > MAX {
        s = s.chars().take(MAX - 3).collect::<String>() + "...";
    }
    s
}

/// RFC 3339 or a bare `YYYY-MM-DD` date, as epoch milliseconds
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Split a quantity into its numeric value and suffix
fn parse_quantity(s: &str) -> Option<(f64, &str)> {
    let caps = QUANTITY_PATTERN.captures(s.trim())?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let suffix = caps.get(2).map_or("", |m| m.as_str());
    Some((number, suffix))
}

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    const KI: f64 = 1024.0;
    const K: f64 = 1000.0;
    Some(match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" | "K" => K,
        "M" => K.powi(2),
        "G" => K.powi(3),
        "T" => K.powi(4),
        "P" => K.powi(5),
        "E" => K.powi(6),
        "Ki" => KI,
        "Mi" => KI.powi(2),
        "Gi" => KI.powi(3),
        "Ti" => KI.powi(4),
        "Pi" => KI.powi(5),
        "Ei" => KI.powi(6),
        _ => return None,
    })
}

/// Memory quantity in bytes: `10Ki` → 10240, `2Gi` → 2147483648, `1e3` → 1000
pub fn parse_size(s: &str) -> Option<i64> {
    let (number, suffix) = parse_quantity(s)?;
    let bytes = number * suffix_multiplier(suffix)?;
    bytes.is_finite().then(|| bytes.round() as i64)
}

/// CPU quantity in cores: `300m` → 0.3, `2` → 2.0
pub fn parse_cpu(s: &str) -> Option<f64> {
    let (number, suffix) = parse_quantity(s)?;
    Some(number * suffix_multiplier(suffix)?)
}

/// Age in seconds: `2d` → 172800, `1d12h` → 129600, `90` → 90
pub fn parse_age(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return Some(secs);
    }
    if !AGE_PATTERN.is_match(s) {
        return None;
    }
    AGE_PART.captures_iter(s).try_fold(0i64, |total, caps| {
        let n: i64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "w" => 7 * 86400,
            "d" => 86400,
            "h" => 3600,
            "m" => 60,
            _ => 1,
        };
        total.checked_add(n.checked_mul(unit)?)
    })
}

/// Bytes as a binary-suffixed size: 10240 → `10Ki`, 1610612736 → `1.5Gi`
pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
    let mut value = bytes as f64;
    let mut unit = "";
    for u in UNITS {
        if value.abs() < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    if unit.is_empty() || value.fract() == 0.0 {
        format!("{}{}", value as i64, unit)
    } else {
        format!("{:.1}{}", value, unit)
    }
}

/// Seconds as a short age: 172800 → `2d`, 129600 → `1d12h`, 200 → `3m20s`
pub fn format_age(seconds: i64) -> String {
    const UNITS: [(u64, &str); 4] = [(86400, "d"), (3600, "h"), (60, "m"), (1, "s")];
    let sign = if seconds < 0 { "-" } else { "" };
    let mut rest = seconds.unsigned_abs();
    if rest == 0 {
        return "0s".to_string();
    }

    let mut parts = Vec::new();
    for (size, name) in UNITS {
        if rest >= size {
            parts.push(format!("{}{}", rest / size, name));
            rest %= size;
        }
        // Two most significant units are enough
        if parts.len() == 2 || (!parts.is_empty() && rest == 0) {
            break;
        }
    }
    format!("{}{}", sign, parts.join(""))
}

/// Epoch seconds as an RFC 3339 UTC timestamp
pub fn format_utc(seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}
