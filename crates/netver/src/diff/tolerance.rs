//! Per-column equality rules.

use crate::model::Value;

/// How a column is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMode {
    /// Every value on both sides coerces to a number.
    Numeric,
    /// Exact comparison of tagged values.
    Exact,
}

/// Picks the comparison mode for a column from all of its values.
pub fn column_mode<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnMode {
    if values.into_iter().all(|v| v.as_number().is_some()) {
        ColumnMode::Numeric
    } else {
        ColumnMode::Exact
    }
}

/// True if some value is a number even though the column is not numeric.
pub fn looks_numeric<'a>(values: impl IntoIterator<Item = &'a Value>) -> bool {
    values
        .into_iter()
        .any(|v| matches!(v, Value::Int(_) | Value::Float(_)))
}

/// Combined tolerance test `|a - b| <= atol + rtol * |b|`.
///
/// NaN equals NaN; infinities are equal only to the same infinity.
pub fn is_close(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    (a - b).abs() <= atol + rtol * b.abs()
}

/// Exact equality with missing values normalized to one sentinel.
///
/// Integers and floats with the same numeric value are equal.
pub fn exact_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => a == b,
    }
}

/// Compares two cells under `mode`. The relative tolerance scales by `b`.
pub fn cells_equal(mode: ColumnMode, a: &Value, b: &Value, rtol: f64, atol: f64) -> bool {
    match mode {
        ColumnMode::Numeric => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => is_close(x, y, rtol, atol),
            _ => exact_equal(a, b),
        },
        ColumnMode::Exact => exact_equal(a, b),
    }
}
