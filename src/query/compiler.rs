//! Compiles a builder's accumulated directives into a [`FetchSpec`].
//!
//! Compilation happens on every execution. It resolves every field name
//! against the schema, desugars null equality into existence tests and
//! checks operand shapes, so a typo or a malformed sort fails before any
//! row is read.

use crate::error::{MellonResult, QueryError};
use crate::schema::{EntityDescription, Schema};
use crate::value::Value;

use super::predicate::{CompareOp, Operator, Predicate, PredicateNode, Quantifier};
use super::sort::parse_sort;
use super::{FetchSpec, Projection, QueryOptions, ResultType, SortKey};

/// One `with(field, operator, value)` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    pub options: QueryOptions,
}

/// A filter criterion: a single directive, or a disjunction of directive
/// groups built by `QueryBuilder::or`.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Filter(Directive),
    AnyOf(Vec<Vec<Criterion>>),
}

/// Sort input as given to the builder.
#[derive(Debug, Clone, PartialEq)]
pub enum SortSource {
    Text(String),
    Key(SortKey),
}

/// Everything a builder accumulates between executions.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub entity: String,
    pub criteria: Vec<Criterion>,
    pub sort: Vec<SortSource>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub batch_size: Option<usize>,
    pub projection: Projection,
    pub distinct: bool,
    pub prefetch: Vec<String>,
    pub refresh_refetched: bool,
}

impl QueryState {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            criteria: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: 0,
            batch_size: None,
            projection: Projection::All,
            distinct: false,
            prefetch: Vec::new(),
            refresh_refetched: false,
        }
    }
}

/// Turns directives into predicates for one entity.
pub struct PredicateCompiler<'a> {
    entity: &'a EntityDescription,
}

impl<'a> PredicateCompiler<'a> {
    #[must_use]
    pub const fn new(entity: &'a EntityDescription) -> Self {
        Self { entity }
    }

    /// AND of every criterion.
    pub fn compile_all(&self, criteria: &[Criterion]) -> MellonResult<Predicate> {
        let parts = criteria
            .iter()
            .map(|c| self.compile_criterion(c))
            .collect::<MellonResult<Vec<_>>>()?;
        Ok(Predicate::and(parts))
    }

    fn compile_criterion(&self, criterion: &Criterion) -> MellonResult<Predicate> {
        match criterion {
            Criterion::Filter(directive) => Ok(Predicate::Node(self.compile_directive(directive)?)),
            Criterion::AnyOf(groups) => {
                let parts = groups
                    .iter()
                    .map(|group| self.compile_all(group))
                    .collect::<MellonResult<Vec<_>>>()?;
                Ok(Predicate::or(parts))
            }
        }
    }

    /// Maps one directive to exactly one node kind.
    pub fn compile_directive(&self, directive: &Directive) -> MellonResult<PredicateNode> {
        let Directive {
            field,
            operator,
            value,
            options,
        } = directive;
        self.entity.field(field)?;

        let invalid = |reason: &str| QueryError::InvalidOperand {
            field: field.clone(),
            operator: operator.name(),
            reason: reason.to_string(),
        };
        let comparison = |op: CompareOp| PredicateNode::Comparison {
            field: field.clone(),
            op,
            value: value.clone(),
            options: *options,
        };
        let list = || match value {
            Value::List(values) => Ok(values.clone()),
            _ => Err(invalid("expects a list of values")),
        };

        let node = match operator {
            // Null equality is an existence test, never a value comparison.
            Operator::EqualTo if value.is_null() => PredicateNode::Existence {
                field: field.clone(),
                exists: false,
            },
            Operator::NotEqualTo if value.is_null() => PredicateNode::Existence {
                field: field.clone(),
                exists: true,
            },
            Operator::EqualTo => comparison(CompareOp::Eq),
            Operator::NotEqualTo => comparison(CompareOp::Ne),
            _ if value.is_null() && *operator != Operator::Exists => {
                return Err(invalid("null operand").into());
            }
            Operator::GreaterThan => comparison(CompareOp::Gt),
            Operator::GreaterThanOrEqual => comparison(CompareOp::Ge),
            Operator::LowerThan => comparison(CompareOp::Lt),
            Operator::LowerThanOrEqual => comparison(CompareOp::Le),
            Operator::Containing => comparison(CompareOp::Contains),
            Operator::BeginsWith | Operator::EndsWith | Operator::Like if !value.is_string() => {
                return Err(invalid("expects a string").into());
            }
            Operator::BeginsWith => comparison(CompareOp::BeginsWith),
            Operator::EndsWith => comparison(CompareOp::EndsWith),
            Operator::Like => comparison(CompareOp::Like),
            Operator::ContainedIn | Operator::NotContainedIn => PredicateNode::Membership {
                field: field.clone(),
                negated: *operator == Operator::NotContainedIn,
                values: list()?,
            },
            Operator::ContainingAll | Operator::ContainingNone | Operator::ContainingAny => {
                let quantifier = match operator {
                    Operator::ContainingAll => Quantifier::All,
                    Operator::ContainingNone => Quantifier::None,
                    _ => Quantifier::Any,
                };
                PredicateNode::SetQuantifier {
                    field: field.clone(),
                    quantifier,
                    values: list()?,
                }
            }
            Operator::Exists => PredicateNode::Existence {
                field: field.clone(),
                exists: value.as_bool().ok_or_else(|| invalid("expects a bool"))?,
            },
        };
        Ok(node)
    }
}

/// Compiles builder state into a fresh fetch spec.
pub fn compile(schema: &Schema, state: &QueryState, result_type: ResultType) -> MellonResult<FetchSpec> {
    let entity = schema.entity(&state.entity)?;
    let predicate = PredicateCompiler::new(entity).compile_all(&state.criteria)?;

    let mut sort = Vec::new();
    for source in &state.sort {
        match source {
            SortSource::Text(text) => sort.extend(parse_sort(text)?),
            SortSource::Key(key) => sort.push(key.clone()),
        }
    }
    for key in &sort {
        entity.field(&key.field)?;
    }

    if let Projection::Fields(fields) = &state.projection {
        for field in fields {
            entity.field(field)?;
        }
    }
    for relation in &state.prefetch {
        entity.relation(relation)?;
    }

    Ok(FetchSpec {
        entity: state.entity.clone(),
        predicate,
        sort,
        limit: state.limit,
        offset: state.offset,
        batch_size: state.batch_size,
        projection: state.projection.clone(),
        distinct: state.distinct,
        prefetch: state.prefetch.clone(),
        result_type,
        include_property_values: result_type != ResultType::Ids,
        refresh_refetched: state.refresh_refetched,
    })
}
