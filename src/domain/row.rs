//! Raw rows returned by the query layer.
//!
//! Column values are either text or numbers. SQL `NULL` is represented by the
//! column being absent from the row.

use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RowValue {
    Text(String),
    Number(f64),
}

pub type RawRow = HashMap<String, RowValue>;

impl RowValue {
    /// Numeric view. Text is trimmed and parsed; non-finite results are rejected.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            RowValue::Number(n) => *n,
            RowValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }

    pub fn as_text(&self) -> String {
        match self {
            RowValue::Text(s) => s.clone(),
            RowValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            RowValue::Number(n) => n.to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RowValue::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
            RowValue::Number(_) => None,
            RowValue::Text(s) => s.trim().parse::<i64>().ok(),
        }
    }

    /// Boolean view: `true/false`, `yes/no`, and numeric zero/non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RowValue::Number(n) => Some(*n != 0.0),
            RowValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "t" | "1" => Some(true),
                "false" | "no" | "f" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

impl From<&str> for RowValue {
    fn from(value: &str) -> Self {
        RowValue::Text(value.to_string())
    }
}

impl From<String> for RowValue {
    fn from(value: String) -> Self {
        RowValue::Text(value)
    }
}

impl From<f64> for RowValue {
    fn from(value: f64) -> Self {
        RowValue::Number(value)
    }
}

impl From<i64> for RowValue {
    fn from(value: i64) -> Self {
        RowValue::Number(value as f64)
    }
}

pub fn get_f64(row: &RawRow, key: &str) -> Option<f64> {
    row.get(key).and_then(RowValue::as_f64)
}

pub fn get_text(row: &RawRow, key: &str) -> Option<String> {
    row.get(key)
        .map(RowValue::as_text)
        .filter(|s| !s.trim().is_empty())
}

pub fn get_bool(row: &RawRow, key: &str) -> Option<bool> {
    row.get(key).and_then(RowValue::as_bool)
}
