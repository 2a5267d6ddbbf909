//! Engine-neutral cell values produced by the database adapter and consumed by the
//! result marshaler and the spreadsheet export.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision decimal kept in its exact textual form.
    Numeric(String),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Json(Value),
    Uuid(Uuid),
    Bytes(Vec<u8>),
}

impl CellValue {
    /// String form used for opaque values (uuids, binary) in non-native serializations.
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Numeric(s) | CellValue::Text(s) => s.clone(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            CellValue::Timestamp(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            CellValue::TimestampTz(ts) => ts.to_rfc3339(),
            CellValue::Json(v) => v.to_string(),
            CellValue::Uuid(u) => u.to_string(),
            CellValue::Bytes(b) => bytes_to_hex(b),
        }
    }
}

/// PostgreSQL-style bytea hex text: `\x0a1b...`.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes { let _ = write!(&mut out, "{:02x}", b); }
    out
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_none(),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::Int(i) => serializer.serialize_i64(*i),
            CellValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            CellValue::Float(f) => serializer.serialize_str(&f.to_string()),
            // JSON clients get decimals as numbers; scale-free ones stay integers.
            CellValue::Numeric(s) => match (s.contains('.'), s.parse::<i64>(), s.parse::<f64>()) {
                (false, Ok(i), _) => serializer.serialize_i64(i),
                (_, _, Ok(f)) if f.is_finite() => serializer.serialize_f64(f),
                _ => serializer.serialize_str(s),
            },
            CellValue::Json(v) => v.serialize(serializer),
            other => serializer.serialize_str(&other.display_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_to_plain_json() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let ts = d.and_hms_opt(13, 5, 0).unwrap();
        let cells = vec![
            CellValue::Null,
            CellValue::Int(1),
            CellValue::Numeric("12.50".into()),
            CellValue::Date(d),
            CellValue::Timestamp(ts),
            CellValue::Json(json!({"a": [1, 2]})),
            CellValue::Bytes(vec![0xde, 0xad]),
        ];
        let v = serde_json::to_value(&cells).unwrap();
        assert_eq!(v, json!([null, 1, 12.5, "2024-02-29", "2024-02-29T13:05:00", {"a": [1, 2]}, "\\xdead"]));
    }

    #[test]
    fn integral_numerics_serialize_as_integers() {
        assert_eq!(serde_json::to_string(&CellValue::Numeric("100".into())).unwrap(), "100");
        assert_eq!(serde_json::to_string(&CellValue::Numeric("-42".into())).unwrap(), "-42");
        assert_eq!(serde_json::to_string(&CellValue::Numeric("100.00".into())).unwrap(), "100.0");
        // Beyond i64 the value degrades to a float rather than failing.
        assert!(serde_json::to_value(CellValue::Numeric("100000000000000000000".into())).unwrap().is_f64());
    }

    #[test]
    fn non_finite_floats_become_text() {
        let v = serde_json::to_value(CellValue::Float(f64::NAN)).unwrap();
        assert_eq!(v, json!("NaN"));
        let v = serde_json::to_value(CellValue::Numeric("NaN".into())).unwrap();
        assert_eq!(v, json!("NaN"));
    }
}
