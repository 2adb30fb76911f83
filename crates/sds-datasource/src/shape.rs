//! Turning SDS responses into Grafana [`Frame`]s.
//!
//! Two paths exist. Edge Data Store responses carry no schema, so the column
//! types are inferred from the first row ([`frame_from_rows`]). AVEVA Data Hub
//! exposes the stream's SDS type, so its columns are typed from the type's
//! properties ([`frame_from_typed_rows`]).
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use grafana_plugin_sdk::{
    data::{Field, Frame},
    prelude::*,
};
use serde_json::{Map, Value};

use crate::sds::{SdsType, SdsTypeCode as C};

/// A single row of stream data.
pub type Row = Map<String, Value>;

static NULL: Value = Value::Null;

/// The type of a column, as inferred from a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Time,
    Number,
    String,
}

/// Parse a string as a timestamp.
///
/// RFC 3339 strings keep their offset; date-times without an offset and bare
/// dates are taken to be UTC.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Infer the column type of a value.
///
/// Dates take precedence over booleans, which take precedence over numbers.
/// Booleans become numeric columns holding 1 and 0.
pub fn infer_kind(value: &Value) -> FieldKind {
    match value {
        Value::String(s) if parse_time(s).is_some() => FieldKind::Time,
        Value::Bool(_) | Value::Number(_) => FieldKind::Number,
        Value::String(s) if parse_bool(s).is_some() || parse_number(s).is_some() => {
            FieldKind::Number
        }
        _ => FieldKind::String,
    }
}

fn time_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_time(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            parse_bool(s).map_or_else(|| parse_number(s), |b| Some(if b { 1.0 } else { 0.0 }))
        }
        _ => None,
    }
}

fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Build a frame from untyped rows.
///
/// The fields are the keys of the first row, in order, and each field's type
/// is inferred once from the first row's value. Later rows are projected
/// through that type; values that do not fit become null. An empty slice
/// produces a frame with no fields.
pub fn frame_from_rows(name: impl Into<String>, rows: &[Row]) -> Frame {
    let mut frame = Frame::new(name);
    let Some(first) = rows.first() else {
        return frame;
    };
    for (key, sample) in first {
        let cells = rows.iter().map(|row| row.get(key).unwrap_or(&NULL));
        let field = match infer_kind(sample) {
            FieldKind::Time => cells
                .map(time_value)
                .collect::<Vec<_>>()
                .into_opt_field(key.as_str()),
            FieldKind::Number => cells
                .map(number_value)
                .collect::<Vec<_>>()
                .into_opt_field(key.as_str()),
            FieldKind::String => cells
                .map(string_value)
                .collect::<Vec<_>>()
                .into_opt_field(key.as_str()),
        };
        frame.add_field(field);
    }
    frame
}

// Non-nullable SDS types replace missing values with the type's zero value.
macro_rules! typed_field {
    ($name:expr, $nullable:expr, $values:expr) => {{
        let values: Vec<Option<_>> = $values.collect();
        if $nullable {
            values.into_opt_field($name)
        } else {
            values
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect::<Vec<_>>()
                .into_field($name)
        }
    }};
}

fn typed_column(name: &str, code: &C, rows: &[Row]) -> Field {
    let cells = rows.iter().map(|row| row.get(name).unwrap_or(&NULL));
    let nullable = code.name().starts_with("Nullable");
    match code {
        C::DateTime | C::NullableDateTime | C::DateTimeOffset | C::NullableDateTimeOffset => {
            typed_field!(name, nullable, cells.map(time_value))
        }
        C::Boolean | C::NullableBoolean => typed_field!(
            name,
            nullable,
            cells.map(|v| v.as_bool().or_else(|| v.as_str().and_then(parse_bool)))
        ),
        C::Int16 | C::NullableInt16 => {
            typed_field!(name, nullable, cells.map(|v| v.as_f64().map(|n| n as i16)))
        }
        C::UInt16 | C::NullableUInt16 => {
            typed_field!(name, nullable, cells.map(|v| v.as_f64().map(|n| n as u16)))
        }
        C::Int32 | C::NullableInt32 => {
            typed_field!(name, nullable, cells.map(|v| v.as_f64().map(|n| n as i32)))
        }
        C::UInt32 | C::NullableUInt32 => {
            typed_field!(name, nullable, cells.map(|v| v.as_f64().map(|n| n as u32)))
        }
        C::Int64 | C::NullableInt64 => typed_field!(
            name,
            nullable,
            cells.map(|v| v.as_i64().or_else(|| v.as_f64().map(|n| n as i64)))
        ),
        C::UInt64 | C::NullableUInt64 => typed_field!(
            name,
            nullable,
            cells.map(|v| v.as_u64().or_else(|| v.as_f64().map(|n| n as u64)))
        ),
        C::Single | C::NullableSingle => {
            typed_field!(name, nullable, cells.map(|v| v.as_f64().map(|n| n as f32)))
        }
        C::Double | C::NullableDouble => typed_field!(name, nullable, cells.map(Value::as_f64)),
        _ => cells.map(string_value).collect::<Vec<_>>().into_opt_field(name),
    }
}

/// Build a frame from rows whose shape is described by an SDS type.
///
/// Each property of the type becomes one field, in property order.
pub fn frame_from_typed_rows(name: impl Into<String>, sds_type: &SdsType, rows: &[Row]) -> Frame {
    Frame::new(name).with_fields(
        sds_type
            .properties
            .iter()
            .map(|property| typed_column(&property.id, &property.sds_type.sds_type_code, rows)),
    )
}

/// Build the stream listing frame: an `Id` and a `Name` field.
pub fn frame_from_streams<I, S>(streams: I) -> Frame
where
    I: IntoIterator<Item = (S, S)>,
    S: Into<String>,
{
    let (ids, names): (Vec<String>, Vec<String>) = streams
        .into_iter()
        .map(|(id, name)| (id.into(), name.into()))
        .unzip();
    Frame::new("response")
        .with_field(ids.into_field("Id"))
        .with_field(names.into_field("Name"))
}
