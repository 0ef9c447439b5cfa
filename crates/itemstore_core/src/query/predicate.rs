//! Predicate AST and its evaluation against one item.

use crate::model::item::Item;
use crate::model::value::Value;
use crate::query::QueryError;
use crate::schema::{Cardinality, Kind, SchemaResult};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub(crate) fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }

    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Ne, ordering) => ordering != Some(Ordering::Equal),
            (_, None) => false,
            (Self::Eq, Some(ordering)) => ordering == Ordering::Equal,
            (Self::Lt, Some(ordering)) => ordering == Ordering::Less,
            (Self::Le, Some(ordering)) => ordering != Ordering::Greater,
            (Self::Gt, Some(ordering)) => ordering == Ordering::Greater,
            (Self::Ge, Some(ordering)) => ordering != Ordering::Less,
        }
    }
}

/// A value read while evaluating a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `i.attr`: stored value or default; references read as uuids.
    Attr(String),
    /// `i.itsName`.
    ItsName,
    Literal(Value),
    /// `$n`, 1-based.
    Param(usize),
    /// `len(x)`: characters of a string, elements of a list or dict.
    Len(Box<Operand>),
}

impl Operand {
    pub fn attr(name: impl Into<String>) -> Self {
        Self::Attr(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn len(operand: Operand) -> Self {
        Self::Len(Box::new(operand))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    Compare {
        op: CompareOp,
        left: Operand,
        right: Operand,
    },
    /// Substring, list/ref membership or dict key test.
    Contains(Operand, Operand),
    Matches(Operand, String),
    /// A value is stored, or a reference collection is non-empty.
    Has(String),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(op: CompareOp, left: Operand, right: Operand) -> Self {
        Self::Compare { op, left, right }
    }

    /// `i.attr == value`.
    pub fn attr_eq(attr: &str, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Eq, Operand::attr(attr), Operand::literal(value))
    }

    pub fn contains(haystack: Operand, needle: Operand) -> Self {
        Self::Contains(haystack, needle)
    }

    pub fn negate(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    /// Attribute names read anywhere in this predicate.
    pub fn attributes(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.visit(&mut |predicate| match predicate {
            Self::Compare { left, right, .. } | Self::Contains(left, right) => {
                collect_operand_attrs(left, &mut names);
                collect_operand_attrs(right, &mut names);
            }
            Self::Matches(operand, _) => collect_operand_attrs(operand, &mut names),
            Self::Has(name) => names.push(name.as_str()),
            _ => {}
        });
        names
    }

    /// Validates every attribute read against `kind`.
    pub fn validate_for(&self, kind: &Kind) -> SchemaResult<()> {
        for name in self.attributes() {
            kind.get_attr_def(name)?;
        }
        Ok(())
    }

    fn visit<'p>(&'p self, f: &mut impl FnMut(&'p Predicate)) {
        f(self);
        match self {
            Self::Not(inner) => inner.visit(f),
            Self::And(all) | Self::Or(all) => all.iter().for_each(|inner| inner.visit(f)),
            _ => {}
        }
    }
}

fn collect_operand_attrs<'p>(operand: &'p Operand, names: &mut Vec<&'p str>) {
    match operand {
        Operand::Attr(name) => names.push(name.as_str()),
        Operand::Len(inner) => collect_operand_attrs(inner, names),
        _ => {}
    }
}

/// Bound parameters and compiled patterns for one predicate.
pub(crate) struct Evaluator<'a> {
    params: &'a [Value],
    patterns: HashMap<String, Regex>,
}

impl<'a> Evaluator<'a> {
    /// Checks parameters and compiles patterns before any item is read.
    pub(crate) fn prepare(predicate: &Predicate, params: &'a [Value]) -> Result<Self, QueryError> {
        let mut evaluator = Self {
            params,
            patterns: HashMap::new(),
        };
        let mut failure = None;
        predicate.visit(&mut |node| {
            if failure.is_some() {
                return;
            }
            if let Err(err) = evaluator.prepare_node(node) {
                failure = Some(err);
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(evaluator),
        }
    }

    fn prepare_node(&mut self, node: &Predicate) -> Result<(), QueryError> {
        match node {
            Predicate::Compare { left, right, .. } | Predicate::Contains(left, right) => {
                self.check_param(left)?;
                self.check_param(right)
            }
            Predicate::Matches(operand, pattern) => {
                self.check_param(operand)?;
                if !self.patterns.contains_key(pattern) {
                    let regex = Regex::new(pattern).map_err(|err| QueryError::InvalidRegex {
                        pattern: pattern.clone(),
                        message: err.to_string(),
                    })?;
                    self.patterns.insert(pattern.clone(), regex);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_param(&self, operand: &Operand) -> Result<(), QueryError> {
        match operand {
            Operand::Param(0) => Err(QueryError::InvalidParameter {
                index: 0,
                message: "parameters are numbered from $1".to_string(),
            }),
            Operand::Param(index) if *index > self.params.len() => {
                Err(QueryError::UnboundParameter(*index))
            }
            Operand::Len(inner) => self.check_param(inner),
            _ => Ok(()),
        }
    }

    pub(crate) fn matches(&self, predicate: &Predicate, item: &Item, kind: &Kind) -> bool {
        match predicate {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Compare { op, left, right } => {
                match (self.resolve(left, item, kind), self.resolve(right, item, kind)) {
                    (Some(left), Some(right)) => op.holds(left.compare(&right)),
                    _ => false,
                }
            }
            Predicate::Contains(haystack, needle) => {
                match (
                    self.resolve(haystack, item, kind),
                    self.resolve(needle, item, kind),
                ) {
                    (Some(haystack), Some(needle)) => contains(&haystack, &needle),
                    _ => false,
                }
            }
            Predicate::Matches(operand, pattern) => {
                let value = self.resolve(operand, item, kind);
                match (value.as_ref().and_then(Value::as_str), self.patterns.get(pattern)) {
                    (Some(text), Some(regex)) => regex.is_match(text),
                    _ => false,
                }
            }
            Predicate::Has(name) => match kind.attr_defs().get(name) {
                Some(def) if def.is_reference() => {
                    item.refs(name).is_some_and(|dict| !dict.is_empty())
                }
                _ => item.value(name).is_some(),
            },
            Predicate::Not(inner) => !self.matches(inner, item, kind),
            Predicate::And(all) => all.iter().all(|inner| self.matches(inner, item, kind)),
            Predicate::Or(any) => any.iter().any(|inner| self.matches(inner, item, kind)),
        }
    }

    fn resolve(&self, operand: &Operand, item: &Item, kind: &Kind) -> Option<Value> {
        match operand {
            Operand::Attr(name) => match kind.attr_defs().get(name) {
                Some(def) if def.is_reference() => {
                    let members = item.refs(name).map(|dict| dict.to_vec()).unwrap_or_default();
                    if def.cardinality == Cardinality::Single {
                        members.first().copied().map(Value::Uuid)
                    } else {
                        Some(Value::List(members.into_iter().map(Value::Uuid).collect()))
                    }
                }
                Some(def) => item.value(name).cloned().or_else(|| def.default.clone()),
                None => item.value(name).cloned(),
            },
            Operand::ItsName => Some(Value::String(item.name().to_string())),
            Operand::Literal(value) => Some(value.clone()),
            Operand::Param(index) => index
                .checked_sub(1)
                .and_then(|position| self.params.get(position))
                .cloned(),
            Operand::Len(inner) => self
                .resolve(inner, item, kind)
                .and_then(|value| value.len())
                .map(|len| Value::Integer(i64::try_from(len).unwrap_or(i64::MAX))),
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(text), Value::String(part)) => text.contains(part.as_str()),
        (Value::List(values), needle) => values
            .iter()
            .any(|value| value.compare(needle) == Some(Ordering::Equal)),
        (Value::Dict(values), Value::String(key)) => values.contains_key(key),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{CompareOp, Evaluator, Operand, Predicate};
    use crate::model::item::Item;
    use crate::model::value::Value;
    use crate::query::QueryError;
    use crate::schema::pim::{pim_schema, NOTE};
    use uuid::Uuid;

    fn note(title: &str, tags: &[&str]) -> Item {
        let schema = pim_schema().unwrap();
        let mut item = Item::new(
            Uuid::new_v4(),
            schema.kind_id(NOTE).unwrap(),
            None,
            "note".to_string(),
        );
        item.set_value("title", Value::from(title));
        item.set_value(
            "tags",
            Value::List(tags.iter().map(|tag| Value::from(*tag)).collect()),
        );
        item
    }

    #[test]
    fn comparisons_and_membership() {
        let schema = pim_schema().unwrap();
        let kind = schema.kind_by_path(NOTE).unwrap();
        let item = note("Groceries", &["home", "errands"]);
        let evaluator = Evaluator::prepare(&Predicate::True, &[]).unwrap();

        assert!(evaluator.matches(&Predicate::attr_eq("title", "Groceries"), &item, kind));
        assert!(evaluator.matches(
            &Predicate::contains(Operand::attr("tags"), Operand::literal("home")),
            &item,
            kind
        ));
        assert!(evaluator.matches(
            &Predicate::compare(
                CompareOp::Eq,
                Operand::len(Operand::attr("tags")),
                Operand::literal(2_i64)
            ),
            &item,
            kind
        ));
        assert!(!evaluator.matches(&Predicate::Has("body".to_string()), &item, kind));
        assert!(!evaluator.matches(
            &Predicate::compare(CompareOp::Lt, Operand::attr("body"), Operand::literal("z")),
            &item,
            kind
        ));
    }

    #[test]
    fn parameters_and_patterns_are_checked_up_front() {
        let unbound = Predicate::compare(CompareOp::Eq, Operand::ItsName, Operand::Param(2));
        assert_eq!(
            Evaluator::prepare(&unbound, &[Value::from("x")]).err(),
            Some(QueryError::UnboundParameter(2))
        );

        let bad_pattern = Predicate::Matches(Operand::ItsName, "(".to_string());
        assert!(matches!(
            Evaluator::prepare(&bad_pattern, &[]).err(),
            Some(QueryError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn attributes_walk_nested_predicates() {
        let predicate = Predicate::And(vec![
            Predicate::attr_eq("title", "x"),
            Predicate::negate(Predicate::Has("body".to_string())),
            Predicate::Or(vec![Predicate::contains(
                Operand::len(Operand::attr("tags")),
                Operand::literal(1_i64),
            )]),
        ]);
        assert_eq!(predicate.attributes(), vec!["title", "body", "tags"]);
    }
}
