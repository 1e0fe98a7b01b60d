//! Untyped document bodies.

use serde_json::Value;
use std::cmp::Ordering;

/// A document body: an untyped key-value record.
pub type Document = serde_json::Map<String, Value>;

/// Compares two property values the way queries order them.
///
/// Values of the same type compare naturally. Values of different types
/// order by type rank: null, booleans, numbers, strings. Arrays and
/// objects are only comparable for equality and return `None` otherwise.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => Some(compare_numbers(x, y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            (a == b).then_some(Ordering::Equal)
        }
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => None,
        _ => Some(type_rank(a).cmp(&type_rank(b))),
    }
}

/// Orders two property values for sorting.
///
/// Unlike [`compare_values`] this is a total order: arrays rank after
/// strings and objects after arrays. Arrays compare element by element,
/// objects entry by entry in key order, and a shorter prefix sorts first.
/// Integers compare exactly, including across `i64` and `u64`.
#[must_use]
pub fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y) {
                let ord = sort_order(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| sort_order(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_numbers(x: &serde_json::Number, y: &serde_json::Number) -> Ordering {
    match (integer(x), integer(y)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(a), None) => integer_to_float(a, float(y)),
        (None, Some(b)) => integer_to_float(b, float(x)).reverse(),
        // serde_json numbers are always finite
        (None, None) => float(x).partial_cmp(&float(y)).unwrap_or(Ordering::Equal),
    }
}

fn integer(n: &serde_json::Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn float(n: &serde_json::Number) -> f64 {
    n.as_f64().unwrap_or_default()
}

/// Compares an integer against a finite float without rounding the integer.
#[allow(clippy::cast_possible_truncation)]
fn integer_to_float(int: i128, value: f64) -> Ordering {
    const LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0; // 2^127
    if value >= LIMIT {
        return Ordering::Less;
    }
    if value < -LIMIT {
        return Ordering::Greater;
    }
    int.cmp(&(value.trunc() as i128))
        .then_with(|| 0.0_f64.partial_cmp(&value.fract()).unwrap_or(Ordering::Equal))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Returns a copy of `document` restricted to `fields`.
///
/// An empty field list keeps every property.
#[must_use]
pub fn project(document: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return document.clone();
    }
    fields
        .iter()
        .filter_map(|field| document.get(field).map(|v| (field.clone(), v.clone())))
        .collect()
}
