//! Result-row decoding into `CellValue`s, driven by each column's reported type.

use std::error::Error;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::value::CellValue;

type BoxError = Box<dyn Error + Sync + Send>;

/// Exact decimal text of a binary NUMERIC.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> { numeric_to_string(raw).map(PgNumeric) }

    fn accepts(ty: &Type) -> bool { *ty == Type::NUMERIC }
}

/// Any other type: UTF-8 text when it is text, hex bytes otherwise.
struct Lossy(CellValue);

impl<'a> FromSql<'a> for Lossy {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Lossy(match std::str::from_utf8(raw) {
            Ok(s) => CellValue::Text(s.to_string()),
            Err(_) => CellValue::Bytes(raw.to_vec()),
        }))
    }

    fn accepts(_ty: &Type) -> bool { true }
}

fn read_u16(raw: &[u8], at: usize) -> Result<u16, BoxError> {
    raw.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated numeric value".into())
}

pub(crate) fn numeric_to_string(raw: &[u8]) -> Result<String, BoxError> {
    let ndigits = read_u16(raw, 0)? as i16;
    let weight = read_u16(raw, 2)? as i16;
    let sign = read_u16(raw, 4)?;
    let dscale = usize::from(read_u16(raw, 6)?);
    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let digits = (0..ndigits.max(0) as usize)
        .map(|i| read_u16(raw, 8 + i * 2).map(|d| d as i16))
        .collect::<Result<Vec<i16>, _>>()?;
    let digit_at = |j: i32| -> i16 {
        if j >= 0 { digits.get(j as usize).copied().unwrap_or(0) } else { 0 }
    };

    let mut out = String::new();
    if sign == 0x4000 && !digits.is_empty() {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for j in 0..=i32::from(weight) {
            if j == 0 {
                out.push_str(&digit_at(j).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(j)));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut j = i32::from(weight) + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(j)));
            j += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>, tokio_postgres::Error> {
    row.try_get::<_, Option<T>>(idx)
}

fn cell<T>(v: Option<T>, f: impl FnOnce(T) -> CellValue) -> CellValue {
    v.map(f).unwrap_or(CellValue::Null)
}

fn json_array<T: Into<Value>>(items: Option<Vec<Option<T>>>) -> CellValue {
    cell(items, |xs| CellValue::Json(Value::Array(xs.into_iter().map(|x| x.map(Into::into).unwrap_or(Value::Null)).collect())))
}

pub(crate) fn decode_cell(row: &Row, idx: usize, ty: &Type) -> Result<CellValue, tokio_postgres::Error> {
    let v = match *ty {
        Type::BOOL => cell(get::<bool>(row, idx)?, CellValue::Bool),
        Type::INT2 => cell(get::<i16>(row, idx)?, |v| CellValue::Int(v.into())),
        Type::INT4 => cell(get::<i32>(row, idx)?, |v| CellValue::Int(v.into())),
        Type::INT8 => cell(get::<i64>(row, idx)?, CellValue::Int),
        Type::OID => cell(get::<u32>(row, idx)?, |v| CellValue::Int(v.into())),
        Type::FLOAT4 => cell(get::<f32>(row, idx)?, |v| CellValue::Float(v.into())),
        Type::FLOAT8 => cell(get::<f64>(row, idx)?, CellValue::Float),
        Type::NUMERIC => cell(get::<PgNumeric>(row, idx)?, |n| CellValue::Numeric(n.0)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => cell(get::<String>(row, idx)?, CellValue::Text),
        Type::JSON | Type::JSONB => cell(get::<Value>(row, idx)?, CellValue::Json),
        Type::DATE => cell(get::<NaiveDate>(row, idx)?, CellValue::Date),
        Type::TIME => cell(get::<NaiveTime>(row, idx)?, CellValue::Time),
        Type::TIMESTAMP => cell(get::<NaiveDateTime>(row, idx)?, CellValue::Timestamp),
        Type::TIMESTAMPTZ => cell(get::<DateTime<FixedOffset>>(row, idx)?, CellValue::TimestampTz),
        Type::UUID => cell(get::<Uuid>(row, idx)?, CellValue::Uuid),
        Type::BYTEA => cell(get::<Vec<u8>>(row, idx)?, CellValue::Bytes),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => json_array(get::<Vec<Option<String>>>(row, idx)?),
        Type::INT2_ARRAY => json_array(get::<Vec<Option<i16>>>(row, idx)?),
        Type::INT4_ARRAY => json_array(get::<Vec<Option<i32>>>(row, idx)?),
        Type::INT8_ARRAY => json_array(get::<Vec<Option<i64>>>(row, idx)?),
        Type::FLOAT8_ARRAY => json_array(get::<Vec<Option<f64>>>(row, idx)?),
        Type::BOOL_ARRAY => json_array(get::<Vec<Option<bool>>>(row, idx)?),
        _ => cell(get::<Lossy>(row, idx)?, |l| l.0),
    };
    Ok(v)
}

pub(crate) fn decode_row(row: &Row) -> Result<Vec<CellValue>, tokio_postgres::Error> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| decode_cell(row, idx, col.type_()))
        .collect()
}
