//! Predicate nodes and their boolean composition.

use std::fmt;

use crate::value::Value;

use super::QueryOptions;

/// Filter operators accepted by `QueryBuilder::with`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    EqualTo,
    NotEqualTo,
    GreaterThan,
    GreaterThanOrEqual,
    LowerThan,
    LowerThanOrEqual,
    Containing,
    BeginsWith,
    EndsWith,
    Like,
    ContainedIn,
    NotContainedIn,
    ContainingAll,
    ContainingNone,
    ContainingAny,
    Exists,
}

impl Operator {
    /// Name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EqualTo => "equal to",
            Self::NotEqualTo => "not equal to",
            Self::GreaterThan => "greater than",
            Self::GreaterThanOrEqual => "greater than or equal",
            Self::LowerThan => "lower than",
            Self::LowerThanOrEqual => "lower than or equal",
            Self::Containing => "containing",
            Self::BeginsWith => "begins with",
            Self::EndsWith => "ends with",
            Self::Like => "like",
            Self::ContainedIn => "contained in",
            Self::NotContainedIn => "not contained in",
            Self::ContainingAll => "containing all",
            Self::ContainingNone => "containing none",
            Self::ContainingAny => "containing any",
            Self::Exists => "exists",
        }
    }
}

/// Comparison operators (one field against one value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    BeginsWith,
    EndsWith,
    Like,
}

impl CompareOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Contains => "CONTAINS",
            Self::BeginsWith => "BEGINSWITH",
            Self::EndsWith => "ENDSWITH",
            Self::Like => "LIKE",
        }
    }
}

/// Set quantifiers over a collection field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    All,
    Any,
    None,
}

/// One compiled filter.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateNode {
    Comparison {
        field: String,
        op: CompareOp,
        value: Value,
        options: QueryOptions,
    },
    Membership {
        field: String,
        negated: bool,
        values: Vec<Value>,
    },
    SetQuantifier {
        field: String,
        quantifier: Quantifier,
        values: Vec<Value>,
    },
    Existence {
        field: String,
        exists: bool,
    },
}

impl PredicateNode {
    /// Field the node filters on.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Comparison { field, .. }
            | Self::Membership { field, .. }
            | Self::SetQuantifier { field, .. }
            | Self::Existence { field, .. } => field,
        }
    }
}

/// Boolean tree over predicate nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Predicate {
    /// Matches every row.
    #[default]
    True,
    Node(PredicateNode),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Conjunction that collapses empty and single-element lists.
    #[must_use]
    pub fn and(mut parts: Vec<Self>) -> Self {
        parts.retain(|p| *p != Self::True);
        match parts.len() {
            0 => Self::True,
            1 => parts.swap_remove(0),
            _ => Self::And(parts),
        }
    }

    /// Disjunction that collapses single-element lists.
    ///
    /// An empty disjunction matches nothing and is expressed as `Or([])`.
    #[must_use]
    pub fn or(mut parts: Vec<Self>) -> Self {
        if parts.iter().any(|p| *p == Self::True) {
            return Self::True;
        }
        if parts.len() == 1 {
            return parts.swap_remove(0);
        }
        Self::Or(parts)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    write!(f, "{}", Value::List(values.to_vec()))
}

impl fmt::Display for PredicateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comparison {
                field,
                op,
                value,
                options,
            } => write!(f, "{field} {}{options} {value}", op.symbol()),
            Self::Membership {
                field,
                negated,
                values,
            } => {
                if *negated {
                    write!(f, "NOT ({field} IN ")?;
                    write_list(f, values)?;
                    write!(f, ")")
                } else {
                    write!(f, "{field} IN ")?;
                    write_list(f, values)
                }
            }
            Self::SetQuantifier {
                field,
                quantifier,
                values,
            } => {
                let q = match quantifier {
                    Quantifier::All => "ALL",
                    Quantifier::Any => "ANY",
                    Quantifier::None => "NONE",
                };
                write!(f, "{q} {field} IN ")?;
                write_list(f, values)
            }
            Self::Existence { field, exists } => {
                if *exists {
                    write!(f, "{field} != nil")
                } else {
                    write!(f, "{field} == nil")
                }
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "TRUEPREDICATE"),
            Self::Node(node) => write!(f, "{node}"),
            Self::And(parts) | Self::Or(parts) => {
                if parts.is_empty() {
                    return write!(f, "FALSEPREDICATE");
                }
                let joiner = if matches!(self, Self::And(_)) { " AND " } else { " OR " };
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(joiner)?;
                    }
                    match part {
                        Self::And(_) | Self::Or(_) => write!(f, "({part})")?,
                        _ => write!(f, "{part}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(field: &str, value: &str) -> Predicate {
        Predicate::Node(PredicateNode::Comparison {
            field: field.to_string(),
            op: CompareOp::Eq,
            value: value.into(),
            options: QueryOptions::NONE,
        })
    }

    #[test]
    fn test_and_collapses() {
        assert_eq!(Predicate::and(vec![]), Predicate::True);
        assert_eq!(Predicate::and(vec![Predicate::True, eq("id", "u1")]), eq("id", "u1"));
    }

    #[test]
    fn test_or_with_true_is_true() {
        assert_eq!(Predicate::or(vec![Predicate::True, eq("id", "u1")]), Predicate::True);
    }

    #[test]
    fn test_display_parenthesizes_nested_groups() {
        let predicate = Predicate::and(vec![
            eq("kind", "citrus"),
            Predicate::or(vec![eq("id", "u1"), eq("id", "u2")]),
        ]);
        assert_eq!(
            predicate.to_string(),
            r#"kind == "citrus" AND (id == "u1" OR id == "u2")"#
        );
    }

    #[test]
    fn test_display_existence_and_membership() {
        let node = PredicateNode::Existence {
            field: "name".into(),
            exists: false,
        };
        assert_eq!(node.to_string(), "name == nil");

        let node = PredicateNode::Membership {
            field: "id".into(),
            negated: true,
            values: vec!["a".into()],
        };
        assert_eq!(node.to_string(), r#"NOT (id IN {"a"})"#);
    }
}
