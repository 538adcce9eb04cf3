//! In-document array and counter mutations shared by the adapters.
//!
//! Each function edits a document in place and reports malformed targets as
//! `BadRequest`. A missing target array or counter is created; a target of any other type
//! is never coerced.

use serde_json::{Number, Value};

use crate::{
    document::{Document, json_type_name},
    error::{DatabaseError, DatabaseResult},
    path::AttributePath,
    primitive::Primitive,
};

fn not_an_array(attribute: &AttributePath, value: &Value) -> DatabaseError {
    DatabaseError::BadRequest(format!(
        "attribute {attribute} is a {}, not an array",
        json_type_name(value)
    ))
}

/// Appends `elements` to the array at `attribute`, creating the array and any missing
/// parent objects when absent.
pub fn append_elements(
    document: &mut Document,
    attribute: &AttributePath,
    elements: &[Primitive],
) -> DatabaseResult<()> {
    let container = attribute.container_mut(document)?;
    let appended = elements.iter().map(Primitive::to_json_value);

    match container.get_mut(attribute.leaf()) {
        None => {
            container.insert(attribute.leaf().to_string(), Value::Array(appended.collect()));
        }
        Some(Value::Array(items)) => items.extend(appended),
        Some(other) => return Err(not_an_array(attribute, other)),
    }
    Ok(())
}

/// Removes every occurrence of every element from the array at `attribute`.
///
/// Returns whether the document changed. A missing array is left missing.
pub fn remove_elements(
    document: &mut Document,
    attribute: &AttributePath,
    elements: &[Primitive],
) -> DatabaseResult<bool> {
    let Some(target) = attribute.get_mut(document) else {
        return Ok(false);
    };

    match target {
        Value::Array(items) => {
            let before = items.len();
            items.retain(|item| !elements.iter().any(|element| element.matches_json(item)));
            Ok(items.len() != before)
        }
        other => Err(not_an_array(attribute, other)),
    }
}

/// Adds `delta` to the number at `attribute` and returns the new value.
///
/// A missing counter starts at zero. Integer counters stay integers while the delta is
/// integral and the sum fits in an `i64`; anything else is stored as a double.
pub fn increment_number(
    document: &mut Document,
    attribute: &AttributePath,
    delta: f64,
) -> DatabaseResult<f64> {
    let container = attribute.container_mut(document)?;
    let current = match container.get(attribute.leaf()) {
        None => Number::from(0),
        Some(Value::Number(number)) => number.clone(),
        Some(other) => {
            return Err(DatabaseError::BadRequest(format!(
                "attribute {attribute} is a {}, not a number",
                json_type_name(other)
            )));
        }
    };

    let integer_sum = current
        .as_i64()
        .zip(integral_delta(delta))
        .and_then(|(current, delta)| current.checked_add(delta));
    let (number, result) = match integer_sum {
        Some(sum) => (Number::from(sum), sum as f64),
        None => {
            let result = current.as_f64().unwrap_or_default() + delta;
            let number = Number::from_f64(result).ok_or_else(|| {
                DatabaseError::BadRequest(format!("incrementing {attribute} by {delta} overflows"))
            })?;
            (number, result)
        }
    };
    container.insert(attribute.leaf().to_string(), Value::Number(number));
    Ok(result)
}

/// The delta as an integer when it has no fractional part and fits in an `i64`.
pub fn integral_delta(delta: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (delta.is_finite() && delta.fract() == 0.0 && (-LIMIT..LIMIT).contains(&delta))
        .then_some(delta as i64)
}
