//! Compilation of condition trees into DynamoDB expressions.
//!
//! Attribute names are always bound through `#n<i>` placeholders and values through
//! `:v<i>` placeholders, so reserved words and special characters never reach the
//! expression text. One [`ExpressionBuilder`] is shared by every expression of a request
//! (condition, update, projection, filter) so placeholders never collide.

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

use dblayer_core::{
    condition::{ComparisonOp, ConditionCoupling, ConditionVisitor},
    error::{DatabaseError, DatabaseResult},
    path::{AttributePath, AttributeRef},
    primitive::Primitive,
};

use crate::convert::primitive_to_attribute_value;

/// Joins two sub-expressions, dropping empty sides.
fn join(left: String, operator: &str, right: String) -> String {
    if left.is_empty() {
        right
    } else if right.is_empty() {
        left
    } else {
        format!("({left}){operator}({right})")
    }
}

fn comparison_operator(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Equals => "=",
        ComparisonOp::NotEquals => "<>",
        ComparisonOp::Greater => ">",
        ComparisonOp::GreaterOrEqual => ">=",
        ComparisonOp::Less => "<",
        ComparisonOp::LessOrEqual => "<=",
    }
}

/// The placeholder tables of a request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpressionInput {
    pub expression_attribute_names: HashMap<String, String>,
    pub expression_attribute_values: HashMap<String, AttributeValue>,
}

impl ExpressionInput {
    /// The name table, or `None` when empty (the service rejects empty maps).
    pub fn names(&self) -> Option<HashMap<String, String>> {
        (!self.expression_attribute_names.is_empty()).then(|| self.expression_attribute_names.clone())
    }

    /// The value table, or `None` when empty.
    pub fn values(&self) -> Option<HashMap<String, AttributeValue>> {
        (!self.expression_attribute_values.is_empty())
            .then(|| self.expression_attribute_values.clone())
    }
}

/// Allocates placeholders and compiles conditions.
#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    input: ExpressionInput,
    name_placeholders: HashMap<String, String>,
    next_value: usize,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The placeholder for one attribute name. Repeated names share a placeholder.
    pub fn name(&mut self, name: &str) -> String {
        if let Some(placeholder) = self.name_placeholders.get(name) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.name_placeholders.len());
        self.name_placeholders
            .insert(name.to_string(), placeholder.clone());
        self.input
            .expression_attribute_names
            .insert(placeholder.clone(), name.to_string());
        placeholder
    }

    /// The document path expression for a sequence of segments.
    pub fn segments(&mut self, segments: &[String]) -> String {
        segments
            .iter()
            .map(|segment| self.name(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn path(&mut self, path: &AttributePath) -> String {
        self.segments(path.segments())
    }

    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.next_value);
        self.next_value += 1;
        self.input
            .expression_attribute_values
            .insert(placeholder.clone(), value);
        placeholder
    }

    pub fn primitive(&mut self, value: &Primitive) -> DatabaseResult<String> {
        Ok(self.value(primitive_to_attribute_value(value)?))
    }

    /// Compiles a condition tree. An empty tree compiles to `None`.
    pub fn condition(&mut self, conditions: &ConditionCoupling) -> DatabaseResult<Option<String>> {
        if conditions.is_empty() {
            return Ok(None);
        }
        conditions.validate()?;
        let expression = self.visit_coupling(conditions)?;
        Ok((!expression.is_empty()).then_some(expression))
    }

    /// A projection expression over top-level attributes.
    pub fn projection<'a>(&mut self, attributes: impl IntoIterator<Item = &'a str>) -> String {
        attributes
            .into_iter()
            .map(|attribute| self.name(attribute))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn finish(self) -> ExpressionInput {
        self.input
    }
}

impl ConditionVisitor for ExpressionBuilder {
    type Output = String;
    type Error = DatabaseError;

    fn visit_empty(&mut self) -> DatabaseResult<String> {
        Ok(String::new())
    }

    fn visit_and(&mut self, left: &ConditionCoupling, right: &ConditionCoupling) -> DatabaseResult<String> {
        let left = self.visit_coupling(left)?;
        let right = self.visit_coupling(right)?;
        Ok(join(left, " AND ", right))
    }

    fn visit_or(&mut self, left: &ConditionCoupling, right: &ConditionCoupling) -> DatabaseResult<String> {
        // An always-true side makes the whole OR unconditional. The other side is not
        // visited so no placeholders are left unused.
        if left.is_always_true() || right.is_always_true() {
            return Ok(String::new());
        }
        let left = self.visit_coupling(left)?;
        let right = self.visit_coupling(right)?;
        Ok(join(left, " OR ", right))
    }

    fn visit_existence(&mut self, attribute: &AttributePath, exists: bool) -> DatabaseResult<String> {
        let path = self.path(attribute);
        Ok(if exists {
            format!("attribute_exists({path})")
        } else {
            format!("attribute_not_exists({path})")
        })
    }

    fn visit_value(
        &mut self,
        attribute: &AttributeRef,
        op: ComparisonOp,
        value: &Primitive,
    ) -> DatabaseResult<String> {
        let path = self.path(attribute.path());
        let operand = match attribute {
            AttributeRef::Path(_) => path.clone(),
            AttributeRef::Size(_) => format!("size({path})"),
        };

        // Booleans have no ordering: an ordering comparison never holds.
        if matches!(value, Primitive::Boolean(_))
            && !matches!(op, ComparisonOp::Equals | ComparisonOp::NotEquals)
        {
            return Ok(format!("(attribute_exists({path}) AND attribute_not_exists({path}))"));
        }

        let placeholder = self.primitive(value)?;
        let comparison = format!("{operand} {} {placeholder}", comparison_operator(op));
        Ok(match op {
            // A missing attribute is never "not equal" to anything.
            ComparisonOp::NotEquals => format!("(attribute_exists({path}) AND {comparison})"),
            _ => comparison,
        })
    }

    fn visit_array_element(
        &mut self,
        attribute: &AttributePath,
        element: &Primitive,
        exists: bool,
    ) -> DatabaseResult<String> {
        let path = self.path(attribute);
        let placeholder = self.primitive(element)?;
        Ok(if exists {
            format!("contains({path}, {placeholder})")
        } else {
            format!("(attribute_not_exists({path}) OR NOT contains({path}, {placeholder}))")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dblayer_core::condition::Condition;
    use rstest::rstest;

    #[rstest]
    #[case::exists(Condition::attribute_exists("a.b"), "attribute_exists(#n0.#n1)")]
    #[case::not_exists(Condition::attribute_not_exists("a"), "attribute_not_exists(#n0)")]
    #[case::equals(Condition::attribute_equals("a", 1i64), "#n0 = :v0")]
    #[case::not_equals(
        Condition::attribute_not_equals("a", "x"),
        "(attribute_exists(#n0) AND #n0 <> :v0)"
    )]
    #[case::greater(Condition::attribute_is_greater_than("a", 1.5), "#n0 > :v0")]
    #[case::less_or_equal(Condition::attribute_is_less_or_equal("a", 2i64), "#n0 <= :v0")]
    #[case::size(Condition::attribute_is_greater_or_equal("size(tags)", 2i64), "size(#n0) >= :v0")]
    #[case::contains(Condition::array_element_exists("tags", "x"), "contains(#n0, :v0)")]
    #[case::not_contains(
        Condition::array_element_not_exists("tags", "x"),
        "(attribute_not_exists(#n0) OR NOT contains(#n0, :v0))"
    )]
    #[case::bool_ordering(
        Condition::attribute_is_less_than("flag", true),
        "(attribute_exists(#n0) AND attribute_not_exists(#n0))"
    )]
    fn compiles_single_conditions(#[case] condition: Condition, #[case] expected: &str) {
        let mut builder = ExpressionBuilder::new();
        let expression = builder.condition(&condition.into()).unwrap();
        assert_eq!(expression.as_deref(), Some(expected));
    }

    #[test]
    fn trees_share_placeholders() {
        let tree = (Condition::attribute_equals("status", "open")
            & Condition::attribute_exists("owner"))
            | Condition::attribute_equals("status", "new");

        let mut builder = ExpressionBuilder::new();
        let expression = builder.condition(&tree).unwrap().unwrap();
        let input = builder.finish();

        assert_eq!(expression, "((#n0 = :v0) AND (attribute_exists(#n1))) OR (#n0 = :v1)");
        assert_eq!(input.expression_attribute_names.len(), 2);
        assert_eq!(input.expression_attribute_names["#n0"], "status");
        assert_eq!(
            input.expression_attribute_values[":v1"],
            AttributeValue::S("new".to_string())
        );
    }

    #[test]
    fn empty_trees_compile_to_nothing() {
        let mut builder = ExpressionBuilder::new();
        assert_eq!(builder.condition(&ConditionCoupling::Empty).unwrap(), None);
        let input = builder.finish();
        assert_eq!(input.names(), None);
        assert_eq!(input.values(), None);
    }

    #[test]
    fn or_with_an_empty_side_is_unconditional() {
        let exists = ConditionCoupling::from(Condition::attribute_exists("a"));
        let either = ConditionCoupling::Or(Box::new(ConditionCoupling::Empty), Box::new(exists.clone()));
        let both = ConditionCoupling::And(Box::new(either.clone()), Box::new(exists));

        let mut builder = ExpressionBuilder::new();
        assert_eq!(builder.condition(&either).unwrap(), None);
        assert_eq!(builder.finish().values(), None);

        let mut builder = ExpressionBuilder::new();
        assert_eq!(builder.condition(&both).unwrap().as_deref(), Some("attribute_exists(#n0)"));
        assert_eq!(builder.finish().expression_attribute_names.len(), 1);
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let mut builder = ExpressionBuilder::new();
        let err = builder
            .condition(&Condition::attribute_exists("a[0]").into())
            .unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
    }

    #[test]
    fn projections_reuse_names() {
        let mut builder = ExpressionBuilder::new();
        builder.name("id");
        assert_eq!(builder.projection(["id", "total"]), "#n0, #n1");
    }
}
