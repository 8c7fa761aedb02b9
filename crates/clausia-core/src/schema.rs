//! Field shapes and type coercion for clause parameters and inputs
//!
//! Every action declares the fields it reads as a [`Shape`]. Mutating
//! transactions filter incoming payloads down to the declared fields and
//! coerce each value to its declared kind before anything reaches the
//! ledger, so handlers can trust what they decode.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::merge::sanitize_field_name;
use crate::{DataBag, Error, Result};

/// Declared kind of a clause field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    String,
    /// String that becomes a data-bag key; sanitized to `[A-Za-z0-9_]`
    Label,
    Number,
    Boolean,
    /// Any accepted date layout, stored as RFC 3339
    Date,
    /// 64 hex characters
    Sha256,
    Object,
    /// Named choice with a numeric code; stored by name
    Choice(&'static [(&'static str, i64)]),
}

/// A single declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub tag: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(tag: &'static str, label: &'static str, kind: FieldKind) -> Self {
        FieldSpec { tag, label, kind }
    }
}

/// Ordered field declarations for one action's parameters or inputs
pub type Shape = &'static [FieldSpec];

// ── Dates ─────────────────────────────────────────────────

/// Parse a date in any of the accepted layouts, normalized to UTC
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    Err(Error::InvalidData(format!("'{}' is not a recognised date", raw)))
}

/// Canonical stored form of a date
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ── Hashes ────────────────────────────────────────────────

/// Validate a SHA-256 hex digest
pub fn parse_sha256(raw: &str) -> Result<String> {
    if !raw.chars().all(|c| c.is_ascii_hexdigit()) || raw.is_empty() {
        return Err(Error::BadRequest(
            "The hash digest must be a hexadecimal string".into(),
        ));
    }
    if raw.len() != 64 {
        return Err(Error::BadRequest(
            "The hash digest must have 64 characters".into(),
        ));
    }
    Ok(raw.to_ascii_lowercase())
}

// ── Choices ───────────────────────────────────────────────

/// Resolve a choice given by name (case-insensitive) or numeric code
pub fn choice_name(
    value: &Value,
    choices: &'static [(&'static str, i64)],
) -> Result<&'static str> {
    let found = match value {
        Value::String(s) => {
            let s = s.trim();
            choices
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(s))
                .or_else(|| {
                    s.parse::<i64>()
                        .ok()
                        .and_then(|code| choices.iter().find(|(_, c)| *c == code))
                })
        }
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .and_then(|f| choices.iter().find(|(_, c)| *c as f64 == f)),
        _ => None,
    };
    found.map(|(name, _)| *name).ok_or_else(|| {
        let names: Vec<&str> = choices.iter().map(|(n, _)| *n).collect();
        Error::BadRequest(format!(
            "Invalid choice {}, expected one of: {}",
            value,
            names.join(", ")
        ))
    })
}

// ── Coercion ──────────────────────────────────────────────

/// Name of a JSON value's runtime kind, for error messages
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a value to the field's declared kind
pub fn coerce(spec: &FieldSpec, value: &Value) -> Result<Value> {
    let mismatch = || {
        Error::BadRequest(format!(
            "Field '{}' expects {:?}, got {} ({})",
            spec.tag,
            spec.kind,
            kind_name(value),
            value
        ))
    };

    match spec.kind {
        FieldKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        FieldKind::Label => match value {
            Value::String(s) => Ok(Value::String(sanitize_field_name(s))),
            _ => Err(mismatch()),
        },
        FieldKind::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        FieldKind::Date => match value {
            Value::String(s) => {
                let date = parse_date(s).map_err(|_| mismatch())?;
                Ok(Value::String(format_date(&date)))
            }
            _ => Err(mismatch()),
        },
        FieldKind::Sha256 => match value {
            Value::String(s) => parse_sha256(s).map(Value::String),
            _ => Err(mismatch()),
        },
        FieldKind::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        FieldKind::Choice(choices) => {
            choice_name(value, choices).map(|name| Value::String(name.to_string()))
        }
    }
}

/// Keep only the fields declared in `shape`, coercing each one.
/// Undeclared fields are dropped; `null` values are skipped.
pub fn filter_fields(data: &DataBag, shape: Shape) -> Result<DataBag> {
    let mut filtered = DataBag::new();
    for spec in shape {
        match data.get(spec.tag) {
            None | Some(Value::Null) => {}
            Some(value) => {
                filtered.insert(spec.tag.to_string(), coerce(spec, value)?);
            }
        }
    }
    Ok(filtered)
}

// ── Tests ─────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DIRECTION: &[(&str, i64)] = &[("before", -1), ("after", 1)];

    const SHAPE: Shape = &[
        FieldSpec::new("name", "Name", FieldKind::Label),
        FieldSpec::new("amount", "Amount", FieldKind::Number),
        FieldSpec::new("date", "Date", FieldKind::Date),
        FieldSpec::new("direction", "Direction", FieldKind::Choice(DIRECTION)),
    ];

    #[test]
    fn test_parse_date_layouts() {
        let expected = parse_date("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(parse_date("2024-01-01").unwrap(), expected);
        assert_eq!(parse_date("2024-01-01 00:00:00").unwrap(), expected);
        assert_eq!(parse_date("2024-01-01T03:00:00+03:00").unwrap(), expected);
        assert_eq!(
            parse_date("Mon, 01 Jan 2024 00:00:00 +0000").unwrap(),
            expected
        );
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_format_date_is_rfc3339_utc() {
        let date = parse_date("2024-03-05").unwrap();
        assert_eq!(format_date(&date), "2024-03-05T00:00:00Z");
    }

    #[test]
    fn test_parse_sha256() {
        let hash = "a".repeat(64);
        assert_eq!(parse_sha256(&hash).unwrap(), hash);
        assert_eq!(parse_sha256(&"AB".repeat(32)).unwrap(), "ab".repeat(32));
        assert!(parse_sha256("xyz").is_err());
        assert!(parse_sha256(&"a".repeat(63)).is_err());
    }

    #[test]
    fn test_choice_by_name_or_code() {
        assert_eq!(choice_name(&json!("before"), DIRECTION).unwrap(), "before");
        assert_eq!(choice_name(&json!("AFTER"), DIRECTION).unwrap(), "after");
        assert_eq!(choice_name(&json!(-1), DIRECTION).unwrap(), "before");
        assert_eq!(choice_name(&json!("1"), DIRECTION).unwrap(), "after");
        assert!(choice_name(&json!(0), DIRECTION).is_err());
        assert!(choice_name(&json!(true), DIRECTION).is_err());
    }

    #[test]
    fn test_kind_name() {
        assert_eq!(kind_name(&json!(1)), "int");
        assert_eq!(kind_name(&json!(1.5)), "float");
        assert_eq!(kind_name(&json!("x")), "string");
    }

    #[test]
    fn test_filter_fields_drops_unknown_and_coerces() {
        let data = json!({
            "name": "Late delivery!",
            "amount": "12.5",
            "date": "2024-01-01",
            "direction": -1,
            "unexpected": 1,
            "ignored": null
        });
        let filtered = filter_fields(data.as_object().unwrap(), SHAPE).unwrap();
        assert_eq!(filtered.len(), 4);
        assert_eq!(filtered["name"], json!("Late_delivery"));
        assert_eq!(filtered["amount"], json!(12.5));
        assert_eq!(filtered["date"], json!("2024-01-01T00:00:00Z"));
        assert_eq!(filtered["direction"], json!("before"));
    }

    #[test]
    fn test_filter_fields_rejects_bad_kind() {
        let data = json!({"amount": true});
        let err = filter_fields(data.as_object().unwrap(), SHAPE).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.to_string().contains("amount"));
    }
}
