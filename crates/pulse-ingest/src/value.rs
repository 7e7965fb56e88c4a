//! Field value coercion.
//!
//! Sources disagree on types (SQLite stores dates as text, CSV imports store
//! numbers as strings), so every canonical field accepts a small set of
//! encodings and rejects anything else with a reason.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

pub type FieldResult<T> = Result<T, String>;

pub fn text(value: &Value) -> FieldResult<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => return Err(format!("expected text, got {}", kind(other))),
    };
    if s.is_empty() {
        return Err("empty text".to_string());
    }
    Ok(s)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`, `YYYY-MM-DDTHH:MM:SS[.f]`,
/// `YYYY-MM-DD`, or integer epoch seconds. Naive values are taken as UTC.
pub fn timestamp(value: &Value) -> FieldResult<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| format!("epoch seconds must be an integer, got {n}"))?;
            Utc.timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| format!("epoch seconds out of range: {secs}"))
        }
        Value::String(s) => parse_timestamp_str(s.trim()),
        other => Err(format!("expected timestamp, got {}", kind(other))),
    }
}

fn parse_timestamp_str(s: &str) -> FieldResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return day
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .ok_or_else(|| format!("invalid date {s:?}"));
    }
    if let Ok(secs) = s.parse::<i64>() {
        return timestamp(&Value::from(secs));
    }
    Err(format!("unrecognized timestamp {s:?}"))
}

pub fn date(value: &Value) -> FieldResult<NaiveDate> {
    if let Value::String(s) = value {
        if let Ok(day) = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            return Ok(day);
        }
    }
    timestamp(value).map(|ts| ts.date_naive())
}

/// Major-unit amount (number or numeric string) to integer cents.
pub fn cents(value: &Value) -> FieldResult<i64> {
    let units = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("expected amount, got {value}"))?;
    if !units.is_finite() || units.abs() > 1e13 {
        return Err(format!("amount out of range: {units}"));
    }
    Ok((units * 100.0).round() as i64)
}

pub fn count(value: &Value) -> FieldResult<u32> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("expected quantity, got {value}"))?;
    if n.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&n) {
        return Err(format!("quantity must be a non-negative integer, got {n}"));
    }
    Ok(n as u32)
}

pub fn flag(value: &Value) -> FieldResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" | "" => Ok(false),
            other => Err(format!("expected boolean, got {other:?}")),
        },
        other => Err(format!("expected boolean, got {}", kind(other))),
    }
}

/// JSON array or a `,` / `|` / `;` separated string. Lower-cased, trimmed,
/// de-duplicated, first occurrence order kept.
pub fn tags(value: &Value) -> FieldResult<Vec<String>> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(format!("tag must be text, got {}", kind(other))),
            })
            .collect::<FieldResult<_>>()?,
        Value::String(s) => s.split([',', '|', ';']).map(str::to_string).collect(),
        other => return Err(format!("expected tags, got {}", kind(other))),
    };

    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for tag in raw {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    Ok(out)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_encodings() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(timestamp(&json!("2024-03-05T14:30:00Z")).unwrap(), expected);
        assert_eq!(timestamp(&json!("2024-03-05 14:30:00")).unwrap(), expected);
        assert_eq!(timestamp(&json!(expected.timestamp())).unwrap(), expected);
        assert_eq!(
            timestamp(&json!("2024-03-05")).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
        );
        assert!(timestamp(&json!("last tuesday")).is_err());
        assert!(timestamp(&json!(true)).is_err());
    }

    #[test]
    fn test_cents_rounding() {
        assert_eq!(cents(&json!(19.99)).unwrap(), 1999);
        assert_eq!(cents(&json!("1,234.50")).unwrap(), 123450);
        assert_eq!(cents(&json!("$0.10")).unwrap(), 10);
        assert!(cents(&json!("twelve")).is_err());
    }

    #[test]
    fn test_tags_split_and_dedupe() {
        assert_eq!(
            tags(&json!(" Red|blue; RED ,green,,")).unwrap(),
            vec!["red", "blue", "green"]
        );
        assert_eq!(tags(&json!(["Navy", "navy"])).unwrap(), vec!["navy"]);
        assert!(tags(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_flag_and_count() {
        assert!(flag(&json!("Y")).unwrap());
        assert!(!flag(&json!(0)).unwrap());
        assert_eq!(count(&json!("3")).unwrap(), 3);
        assert!(count(&json!(1.5)).is_err());
        assert!(count(&json!(-1)).is_err());
    }
}
