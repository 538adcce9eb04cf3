//! In-process condition evaluation against materialized documents.
//!
//! Backends without expression pushdown (and scan post-filters) evaluate condition trees
//! here. A comparison against a missing attribute is `false`, never an error.

use serde_json::Value;
use std::cmp::Ordering;

use crate::{
    condition::{ComparisonOp, ConditionCoupling, ConditionVisitor},
    document::Document,
    error::{DatabaseError, DatabaseResult},
    key::ItemKey,
    path::{AttributePath, AttributeRef},
    primitive::{Primitive, doubles_equal},
};

/// Orders a document value against a primitive operand.
///
/// Numbers compare across integer/float kinds, strings compare ordinally and byte arrays
/// compare through their base64 form. Booleans and mixed kinds have no ordering.
fn order(left: &Value, right: &Primitive) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(left), Primitive::Integer(right)) => match left.as_i64() {
            Some(left) => Some(left.cmp(right)),
            None => order_doubles(left.as_f64()?, *right as f64),
        },
        (Value::Number(left), Primitive::Double(right)) => order_doubles(left.as_f64()?, *right),
        (Value::String(left), Primitive::String(right)) => Some(left.as_str().cmp(right.as_str())),
        (Value::String(left), Primitive::ByteArray(_)) => {
            Some(left.as_str().cmp(right.to_string().as_str()))
        }
        _ => None,
    }
}

fn order_doubles(left: f64, right: f64) -> Option<Ordering> {
    if doubles_equal(left, right) {
        Some(Ordering::Equal)
    } else {
        left.partial_cmp(&right)
    }
}

fn compare(left: &Value, op: ComparisonOp, right: &Primitive) -> bool {
    match op {
        ComparisonOp::Equals => right.matches_json(left),
        ComparisonOp::NotEquals => !right.matches_json(left),
        ComparisonOp::Greater => order(left, right) == Some(Ordering::Greater),
        ComparisonOp::GreaterOrEqual => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
        ComparisonOp::Less => order(left, right) == Some(Ordering::Less),
        ComparisonOp::LessOrEqual => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
    }
}

/// Evaluates condition trees against one document.
pub struct ConditionEvaluator<'a> {
    document: &'a Document,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, conditions: &ConditionCoupling) -> DatabaseResult<bool> {
        self.visit_coupling(conditions)
    }

    /// Shorthand for evaluating `conditions` against `document`.
    pub fn matches(document: &Document, conditions: &ConditionCoupling) -> DatabaseResult<bool> {
        ConditionEvaluator::new(document).evaluate(conditions)
    }

    /// Keeps the documents satisfying `conditions`, preserving their order.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = Document>,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Vec<Document>> {
        if conditions.is_empty() {
            return Ok(documents.into_iter().collect());
        }
        conditions.validate()?;

        let mut kept = Vec::new();
        for document in documents {
            if ConditionEvaluator::matches(&document, conditions)? {
                kept.push(document);
            }
        }
        Ok(kept)
    }
}

/// Fails with `PreconditionFailed` unless `conditions` hold against the current item.
///
/// An absent item is evaluated as an empty document.
pub fn check_conditions(
    table: &str,
    key: &ItemKey,
    current: Option<&Document>,
    conditions: &ConditionCoupling,
) -> DatabaseResult<()> {
    if conditions.is_empty() {
        return Ok(());
    }
    let empty = Document::new();
    if ConditionEvaluator::matches(current.unwrap_or(&empty), conditions)? {
        Ok(())
    } else {
        Err(DatabaseError::precondition_failed(table, key))
    }
}

impl ConditionVisitor for ConditionEvaluator<'_> {
    type Output = bool;
    type Error = DatabaseError;

    fn visit_empty(&mut self) -> Result<Self::Output, Self::Error> {
        Ok(true)
    }

    fn visit_and(
        &mut self,
        left: &ConditionCoupling,
        right: &ConditionCoupling,
    ) -> Result<Self::Output, Self::Error> {
        Ok(self.visit_coupling(left)? && self.visit_coupling(right)?)
    }

    fn visit_or(
        &mut self,
        left: &ConditionCoupling,
        right: &ConditionCoupling,
    ) -> Result<Self::Output, Self::Error> {
        Ok(self.visit_coupling(left)? || self.visit_coupling(right)?)
    }

    fn visit_existence(
        &mut self,
        attribute: &AttributePath,
        exists: bool,
    ) -> Result<Self::Output, Self::Error> {
        let present = attribute
            .container(self.document)
            .is_some_and(|container| container.contains_key(attribute.leaf()));
        Ok(present == exists)
    }

    fn visit_value(
        &mut self,
        attribute: &AttributeRef,
        op: ComparisonOp,
        value: &Primitive,
    ) -> Result<Self::Output, Self::Error> {
        let result = match attribute {
            AttributeRef::Path(path) => path
                .get(self.document)
                .is_some_and(|current| compare(current, op, value)),
            AttributeRef::Size(path) => match path.get(self.document) {
                Some(Value::Array(items)) => compare(&Value::from(items.len() as i64), op, value),
                _ => false,
            },
        };
        Ok(result)
    }

    fn visit_array_element(
        &mut self,
        attribute: &AttributePath,
        element: &Primitive,
        exists: bool,
    ) -> Result<Self::Output, Self::Error> {
        let contains = match attribute.get(self.document) {
            Some(Value::Array(items)) => items.iter().any(|item| element.matches_json(item)),
            _ => false,
        };
        Ok(contains == exists)
    }
}
