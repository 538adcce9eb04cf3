//! Attribute conditions and their boolean composition.
//!
//! A [`Condition`] is a predicate over one attribute of an item. A [`ConditionCoupling`]
//! combines conditions into a tree with AND/OR. Backends consume the tree through the
//! [`ConditionVisitor`] trait: the in-process evaluator turns it into a boolean for a
//! materialized document, the expression backends compile it into native filter syntax.
//!
//! # Example
//!
//! ```ignore
//! use dblayer::condition::{Condition, ConditionCoupling};
//!
//! let gate: ConditionCoupling = Condition::attribute_equals("status", "open")
//!     & (Condition::attribute_is_greater_than("size(items)", 0i64)
//!         | Condition::array_element_exists("tags", "urgent"));
//! ```

use std::ops::{BitAnd, BitOr};

use crate::{
    error::{DatabaseError, DatabaseResult},
    path::{AttributePath, AttributeRef},
    primitive::{Primitive, PrimitiveKind},
};

/// Comparison operators for value conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

/// A single predicate over one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The attribute is present (`exists == true`) or absent.
    Existence { attribute: String, exists: bool },
    /// The attribute compares to `value` with `op`. `size(path)` is allowed here.
    Value {
        attribute: String,
        op: ComparisonOp,
        value: Primitive,
    },
    /// The array attribute contains (`exists == true`) or does not contain `element`.
    ArrayElement {
        attribute: String,
        element: Primitive,
        exists: bool,
    },
}

impl Condition {
    pub fn attribute_exists(attribute: impl Into<String>) -> Self {
        Condition::Existence { attribute: attribute.into(), exists: true }
    }

    pub fn attribute_not_exists(attribute: impl Into<String>) -> Self {
        Condition::Existence { attribute: attribute.into(), exists: false }
    }

    pub fn attribute_equals(attribute: impl Into<String>, value: impl Into<Primitive>) -> Self {
        Self::compare(attribute, ComparisonOp::Equals, value)
    }

    pub fn attribute_not_equals(attribute: impl Into<String>, value: impl Into<Primitive>) -> Self {
        Self::compare(attribute, ComparisonOp::NotEquals, value)
    }

    pub fn attribute_is_greater_than(attribute: impl Into<String>, value: impl Into<Primitive>) -> Self {
        Self::compare(attribute, ComparisonOp::Greater, value)
    }

    pub fn attribute_is_greater_or_equal(attribute: impl Into<String>, value: impl Into<Primitive>) -> Self {
        Self::compare(attribute, ComparisonOp::GreaterOrEqual, value)
    }

    pub fn attribute_is_less_than(attribute: impl Into<String>, value: impl Into<Primitive>) -> Self {
        Self::compare(attribute, ComparisonOp::Less, value)
    }

    pub fn attribute_is_less_or_equal(attribute: impl Into<String>, value: impl Into<Primitive>) -> Self {
        Self::compare(attribute, ComparisonOp::LessOrEqual, value)
    }

    pub fn array_element_exists(attribute: impl Into<String>, element: impl Into<Primitive>) -> Self {
        Condition::ArrayElement {
            attribute: attribute.into(),
            element: element.into(),
            exists: true,
        }
    }

    pub fn array_element_not_exists(attribute: impl Into<String>, element: impl Into<Primitive>) -> Self {
        Condition::ArrayElement {
            attribute: attribute.into(),
            element: element.into(),
            exists: false,
        }
    }

    fn compare(attribute: impl Into<String>, op: ComparisonOp, value: impl Into<Primitive>) -> Self {
        Condition::Value {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    /// The raw attribute name this condition refers to.
    pub fn attribute(&self) -> &str {
        match self {
            Condition::Existence { attribute, .. }
            | Condition::Value { attribute, .. }
            | Condition::ArrayElement { attribute, .. } => attribute,
        }
    }

    /// Parses the attribute reference, enforcing that `size(...)` only appears in value
    /// conditions compared against an integer.
    pub fn attribute_ref(&self) -> DatabaseResult<AttributeRef> {
        let reference = AttributeRef::parse(self.attribute())?;
        match (self, &reference) {
            (_, AttributeRef::Path(_)) => Ok(reference),
            (Condition::Value { value, .. }, AttributeRef::Size(_)) => {
                if value.kind() == PrimitiveKind::Integer {
                    Ok(reference)
                } else {
                    Err(DatabaseError::BadRequest(format!(
                        "{} can only be compared against an integer, got {}",
                        self.attribute(),
                        value.kind()
                    )))
                }
            }
            (_, AttributeRef::Size(_)) => Err(DatabaseError::BadRequest(format!(
                "{} is only usable in comparison conditions",
                self.attribute()
            ))),
        }
    }

    fn plain_path(&self) -> DatabaseResult<AttributePath> {
        match self.attribute_ref()? {
            AttributeRef::Path(path) => Ok(path),
            AttributeRef::Size(_) => Err(DatabaseError::BadRequest(format!(
                "{} is only usable in comparison conditions",
                self.attribute()
            ))),
        }
    }
}

/// A boolean tree of conditions. `Empty` is always true.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConditionCoupling {
    #[default]
    Empty,
    Single(Condition),
    And(Box<ConditionCoupling>, Box<ConditionCoupling>),
    Or(Box<ConditionCoupling>, Box<ConditionCoupling>),
}

impl ConditionCoupling {
    pub fn is_empty(&self) -> bool {
        matches!(self, ConditionCoupling::Empty)
    }

    /// Whether the tree holds for every document, like an empty tree or an OR with an
    /// empty side.
    pub fn is_always_true(&self) -> bool {
        match self {
            ConditionCoupling::Empty => true,
            ConditionCoupling::Single(_) => false,
            ConditionCoupling::And(left, right) => left.is_always_true() && right.is_always_true(),
            ConditionCoupling::Or(left, right) => left.is_always_true() || right.is_always_true(),
        }
    }

    /// Combines with another tree using AND. Empty operands are dropped.
    pub fn and(self, other: impl Into<ConditionCoupling>) -> Self {
        match (self, other.into()) {
            (ConditionCoupling::Empty, other) => other,
            (this, ConditionCoupling::Empty) => this,
            (this, other) => ConditionCoupling::And(Box::new(this), Box::new(other)),
        }
    }

    /// Combines with another tree using OR. Empty operands are dropped.
    pub fn or(self, other: impl Into<ConditionCoupling>) -> Self {
        match (self, other.into()) {
            (ConditionCoupling::Empty, other) => other,
            (this, ConditionCoupling::Empty) => this,
            (this, other) => ConditionCoupling::Or(Box::new(this), Box::new(other)),
        }
    }

    /// AND-folds a list of conditions.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        conditions
            .into_iter()
            .fold(ConditionCoupling::Empty, |tree, condition| tree.and(condition))
    }

    /// OR-folds a list of conditions.
    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        conditions
            .into_iter()
            .fold(ConditionCoupling::Empty, |tree, condition| tree.or(condition))
    }

    /// Checks every attribute reference in the tree.
    pub fn validate(&self) -> DatabaseResult<()> {
        match self {
            ConditionCoupling::Empty => Ok(()),
            ConditionCoupling::Single(condition) => condition.attribute_ref().map(|_| ()),
            ConditionCoupling::And(left, right) | ConditionCoupling::Or(left, right) => {
                left.validate()?;
                right.validate()
            }
        }
    }
}

impl From<Condition> for ConditionCoupling {
    fn from(condition: Condition) -> Self {
        ConditionCoupling::Single(condition)
    }
}

impl From<Option<ConditionCoupling>> for ConditionCoupling {
    fn from(coupling: Option<ConditionCoupling>) -> Self {
        coupling.unwrap_or_default()
    }
}

impl<T: Into<ConditionCoupling>> BitAnd<T> for ConditionCoupling {
    type Output = ConditionCoupling;

    fn bitand(self, rhs: T) -> Self::Output {
        self.and(rhs)
    }
}

impl<T: Into<ConditionCoupling>> BitOr<T> for ConditionCoupling {
    type Output = ConditionCoupling;

    fn bitor(self, rhs: T) -> Self::Output {
        self.or(rhs)
    }
}

impl<T: Into<ConditionCoupling>> BitAnd<T> for Condition {
    type Output = ConditionCoupling;

    fn bitand(self, rhs: T) -> Self::Output {
        ConditionCoupling::from(self).and(rhs)
    }
}

impl<T: Into<ConditionCoupling>> BitOr<T> for Condition {
    type Output = ConditionCoupling;

    fn bitor(self, rhs: T) -> Self::Output {
        ConditionCoupling::from(self).or(rhs)
    }
}

/// Walks a condition tree. Implemented by the in-process evaluator and by native
/// expression compilers.
pub trait ConditionVisitor {
    type Output;
    type Error: From<DatabaseError>;

    fn visit_empty(&mut self) -> Result<Self::Output, Self::Error>;
    fn visit_and(
        &mut self,
        left: &ConditionCoupling,
        right: &ConditionCoupling,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_or(
        &mut self,
        left: &ConditionCoupling,
        right: &ConditionCoupling,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_existence(
        &mut self,
        attribute: &AttributePath,
        exists: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_value(
        &mut self,
        attribute: &AttributeRef,
        op: ComparisonOp,
        value: &Primitive,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_array_element(
        &mut self,
        attribute: &AttributePath,
        element: &Primitive,
        exists: bool,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_condition(&mut self, condition: &Condition) -> Result<Self::Output, Self::Error> {
        match condition {
            Condition::Existence { exists, .. } => {
                self.visit_existence(&condition.plain_path()?, *exists)
            }
            Condition::Value { op, value, .. } => {
                self.visit_value(&condition.attribute_ref()?, *op, value)
            }
            Condition::ArrayElement { element, exists, .. } => {
                self.visit_array_element(&condition.plain_path()?, element, *exists)
            }
        }
    }

    fn visit_coupling(&mut self, coupling: &ConditionCoupling) -> Result<Self::Output, Self::Error> {
        match coupling {
            ConditionCoupling::Empty => self.visit_empty(),
            ConditionCoupling::Single(condition) => self.visit_condition(condition),
            ConditionCoupling::And(left, right) => self.visit_and(left, right),
            ConditionCoupling::Or(left, right) => self.visit_or(left, right),
        }
    }
}
