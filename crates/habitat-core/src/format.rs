//! One-line human rendering of a reading, used in trace logs.

use std::fmt::Write as _;

use chrono::NaiveDateTime;
use serde_json::Value;

use habitat_types::{Reading, SensorDescriptor};

/// Render a reading as `name|HH:MM:SS|n    label: value unit; ...`.
///
/// With a descriptor, fields are labeled and ordered by its schema and
/// any extra fields follow in name order. Without one the raw field
/// names are used and the name column shows `-`. Floats are shown with
/// two decimals.
pub fn format_reading(reading: &Reading, descriptor: Option<&SensorDescriptor>) -> String {
    let time = NaiveDateTime::parse_from_str(&reading.timestamp, "%Y-%m-%d %H:%M:%S%.f")
        .map_or_else(|_| reading.timestamp.clone(), |dt| dt.format("%H:%M:%S").to_string());
    let name = descriptor
        .and_then(|d| d.sensor_name.as_deref())
        .or_else(|| descriptor.map(|d| d.sensor_id.as_str()))
        .unwrap_or("-");

    let mut parts: Vec<String> = Vec::with_capacity(reading.fields.len());
    if let Some(desc) = descriptor {
        for (field, info) in desc.reading_schema.iter() {
            if let Some(value) = reading.fields.get(field) {
                parts.push(labeled(&info.label, value, &info.unit));
            }
        }
        for (field, value) in &reading.fields {
            if !desc.reading_schema.contains(field) {
                parts.push(labeled(field, value, ""));
            }
        }
    } else {
        for (field, value) in &reading.fields {
            parts.push(labeled(field, value, ""));
        }
    }

    let mut line = format!("{name}|{time}|{:<3}  ", reading.n);
    line.push_str(&parts.join("; "));
    line
}

fn labeled(label: &str, value: &Value, unit: &str) -> String {
    let mut out = format!("{label}: ");
    match value {
        Value::Number(num) if num.is_f64() => {
            let _ = write!(out, "{:.2}", num.as_f64().unwrap_or_default());
        }
        Value::String(s) => out.push_str(s),
        other => {
            let _ = write!(out, "{other}");
        }
    }
    if !unit.is_empty() {
        out.push(' ');
        out.push_str(unit);
    }
    out
}
