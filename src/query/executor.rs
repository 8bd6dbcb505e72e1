//! Evaluates a [`FetchSpec`] over a set of rows.
//!
//! Rows arrive unfiltered (a store scan with pending changes overlaid); the
//! executor filters, orders, de-duplicates and paginates them. Missing or
//! null fields never satisfy a comparison, so testing for null must go
//! through an existence node.

use std::cmp::Ordering;
use std::collections::HashSet;

use regex::Regex;

use crate::entity::Record;
use crate::error::QueryError;
use crate::value::Value;

use super::predicate::{CompareOp, Predicate, PredicateNode, Quantifier};
use super::{FetchSpec, Projection, QueryOptions, SortDirection, SortKey};

enum Compiled<'a> {
    True,
    Node(&'a PredicateNode),
    Like(&'a PredicateNode, Regex),
    And(Vec<Compiled<'a>>),
    Or(Vec<Compiled<'a>>),
}

/// A predicate prepared for evaluation. LIKE patterns are compiled once.
pub struct Matcher<'a> {
    root: Compiled<'a>,
}

impl<'a> Matcher<'a> {
    pub fn new(predicate: &'a Predicate) -> Result<Self, QueryError> {
        Ok(Self {
            root: compile(predicate)?,
        })
    }

    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        eval(&self.root, record)
    }
}

fn compile(predicate: &Predicate) -> Result<Compiled<'_>, QueryError> {
    Ok(match predicate {
        Predicate::True => Compiled::True,
        Predicate::Node(
            node @ PredicateNode::Comparison {
                op: CompareOp::Like,
                value,
                options,
                ..
            },
        ) => {
            let pattern = value.as_string().ok_or_else(|| QueryError::InvalidPattern {
                pattern: value.to_string(),
                reason: "LIKE needs a string pattern".to_string(),
            })?;
            Compiled::Like(node, like_regex(pattern, *options)?)
        }
        Predicate::Node(node) => Compiled::Node(node),
        Predicate::And(parts) => Compiled::And(parts.iter().map(compile).collect::<Result<_, _>>()?),
        Predicate::Or(parts) => Compiled::Or(parts.iter().map(compile).collect::<Result<_, _>>()?),
    })
}

/// Translates a `*`/`?` wildcard pattern into an anchored regex.
fn like_regex(pattern: &str, options: QueryOptions) -> Result<Regex, QueryError> {
    let folded = options.fold(pattern);
    let mut source = String::with_capacity(folded.len() + 8);
    source.push_str("(?s)^");
    for c in folded.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| QueryError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn eval(compiled: &Compiled<'_>, record: &Record) -> bool {
    match compiled {
        Compiled::True => true,
        Compiled::Node(node) => eval_node(node, record),
        Compiled::Like(node, regex) => {
            let PredicateNode::Comparison { field, options, .. } = node else {
                return false;
            };
            record
                .get(field)
                .as_string()
                .is_some_and(|s| regex.is_match(&options.fold(s)))
        }
        Compiled::And(parts) => parts.iter().all(|p| eval(p, record)),
        Compiled::Or(parts) => parts.iter().any(|p| eval(p, record)),
    }
}

fn values_equal(left: &Value, right: &Value, options: QueryOptions) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) if !options.is_empty() => options.fold(a) == options.fold(b),
        _ => left.loosely_equals(right),
    }
}

fn compare_values(left: &Value, right: &Value, options: QueryOptions) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) if !options.is_empty() => {
            Some(options.fold(a).cmp(&options.fold(b)))
        }
        _ => left.compare(right),
    }
}

fn string_test(left: &Value, right: &Value, options: QueryOptions, test: fn(&str, &str) -> bool) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => test(&options.fold(a), &options.fold(b)),
        _ => false,
    }
}

fn eval_node(node: &PredicateNode, record: &Record) -> bool {
    match node {
        PredicateNode::Comparison {
            field,
            op,
            value,
            options,
        } => {
            let actual = record.get(field);
            if actual.is_null() {
                return false;
            }
            let ordering = || compare_values(actual, value, *options);
            match op {
                CompareOp::Eq => values_equal(actual, value, *options),
                CompareOp::Ne => !values_equal(actual, value, *options),
                CompareOp::Gt => ordering() == Some(Ordering::Greater),
                CompareOp::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
                CompareOp::Lt => ordering() == Some(Ordering::Less),
                CompareOp::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
                CompareOp::Contains => match actual {
                    Value::List(items) => items.iter().any(|item| values_equal(item, value, *options)),
                    _ => string_test(actual, value, *options, |a, b| a.contains(b)),
                },
                CompareOp::BeginsWith => string_test(actual, value, *options, |a, b| a.starts_with(b)),
                CompareOp::EndsWith => string_test(actual, value, *options, |a, b| a.ends_with(b)),
                // Compiled separately with its regex.
                CompareOp::Like => false,
            }
        }
        PredicateNode::Membership {
            field,
            negated,
            values,
        } => {
            let actual = record.get(field);
            if actual.is_null() {
                return false;
            }
            let found = values.iter().any(|v| actual.loosely_equals(v));
            found != *negated
        }
        PredicateNode::SetQuantifier {
            field,
            quantifier,
            values,
        } => {
            let actual = record.get(field);
            let items: &[Value] = match actual {
                Value::Null => &[],
                Value::List(items) => items,
                scalar => std::slice::from_ref(scalar),
            };
            let member = |item: &Value| values.iter().any(|v| item.loosely_equals(v));
            match quantifier {
                Quantifier::All => items.iter().all(member),
                Quantifier::Any => items.iter().any(member),
                Quantifier::None => !items.iter().any(member),
            }
        }
        PredicateNode::Existence { field, exists } => record.get(field).is_null() != *exists,
    }
}

fn compare_by_keys(a: &Record, b: &Record, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = a.get(&key.field).sort_cmp(b.get(&key.field));
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn distinct_key(record: &Record, projection: &Projection) -> String {
    let projected = match projection {
        Projection::All => serde_json::to_string(&record.fields),
        Projection::Fields(fields) => serde_json::to_string(&record.project(fields)),
    };
    projected.unwrap_or_default()
}

/// Filters, orders, de-duplicates and paginates `rows`.
///
/// Ordering is by insertion sequence, then by the sort keys (stable).
pub fn execute(rows: Vec<Record>, spec: &FetchSpec) -> Result<Vec<Record>, QueryError> {
    let matcher = Matcher::new(&spec.predicate)?;

    let mut rows: Vec<Record> = rows.into_iter().filter(|r| matcher.matches(r)).collect();
    rows.sort_by_key(|r| r.seq);
    if !spec.sort.is_empty() {
        rows.sort_by(|a, b| compare_by_keys(a, b, &spec.sort));
    }

    if spec.distinct {
        let mut seen = HashSet::with_capacity(rows.len());
        rows.retain(|r| seen.insert(distinct_key(r, &spec.projection)));
    }

    let limit = spec.limit.unwrap_or(usize::MAX);
    let page = rows.into_iter().skip(spec.offset).take(limit);
    if spec.include_property_values {
        return Ok(page.collect());
    }
    // Identity only; callers such as delete never read the fields.
    Ok(page
        .map(|mut row| {
            row.fields.clear();
            row
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    fn fruit(seq: u64, name: &str, weight: f64) -> Record {
        let mut record = Record::new(EntityRef::new(), "Fruit", seq);
        record.set("name", name.into());
        record.set("weight", weight.into());
        record
    }

    fn basket() -> Vec<Record> {
        vec![
            fruit(1, "Banana", 120.0),
            fruit(2, "Crème", 80.0),
            fruit(3, "Apple", 150.0),
            fruit(4, "Banana", 90.0),
        ]
    }

    fn node(field: &str, op: CompareOp, value: Value, options: QueryOptions) -> Predicate {
        Predicate::Node(PredicateNode::Comparison {
            field: field.into(),
            op,
            value,
            options,
        })
    }

    fn names(rows: &[Record]) -> Vec<String> {
        rows.iter()
            .map(|r| r.get("name").as_string().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_null_field_never_matches_comparisons() {
        let mut spec = FetchSpec::all("Fruit");
        spec.predicate = node("color", CompareOp::Ne, "red".into(), QueryOptions::NONE);
        assert!(execute(basket(), &spec).unwrap().is_empty());
    }

    #[test]
    fn test_existence() {
        let mut rows = basket();
        rows[0].set("color", "yellow".into());
        let mut spec = FetchSpec::all("Fruit");
        spec.predicate = Predicate::Node(PredicateNode::Existence {
            field: "color".into(),
            exists: false,
        });
        assert_eq!(execute(rows, &spec).unwrap().len(), 3);
    }

    #[test]
    fn test_like_with_wildcards_and_options() {
        let mut spec = FetchSpec::all("Fruit");
        spec.predicate = node(
            "name",
            CompareOp::Like,
            "cr?me*".into(),
            QueryOptions::CASE_INSENSITIVE | QueryOptions::DIACRITIC_INSENSITIVE,
        );
        assert_eq!(names(&execute(basket(), &spec).unwrap()), vec!["Crème"]);

        spec.predicate = node("name", CompareOp::Like, "B.nana".into(), QueryOptions::NONE);
        assert!(execute(basket(), &spec).unwrap().is_empty());
    }

    #[test]
    fn test_numeric_range_and_sort() {
        let mut spec = FetchSpec::all("Fruit");
        spec.predicate = node("weight", CompareOp::Ge, Value::Int(90), QueryOptions::NONE);
        spec.sort = vec![SortKey::new("weight", SortDirection::Descending)];
        assert_eq!(
            names(&execute(basket(), &spec).unwrap()),
            vec!["Apple", "Banana", "Banana"]
        );
    }

    #[test]
    fn test_identity_only_results_drop_fields() {
        let mut spec = FetchSpec::all("Fruit");
        spec.predicate = node("name", CompareOp::Eq, "Banana".into(), QueryOptions::NONE);
        spec.sort = vec![SortKey::new("weight", SortDirection::Ascending)];
        spec.include_property_values = false;

        let rows = execute(basket(), &spec).unwrap();
        let seqs: Vec<_> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![4, 1]);
        assert!(rows.iter().all(|r| r.fields.is_empty()));
    }

    #[test]
    fn test_equal_sort_keys_keep_insertion_order() {
        let mut spec = FetchSpec::all("Fruit");
        spec.sort = vec![SortKey::new("name", SortDirection::Ascending)];
        let rows = execute(basket(), &spec).unwrap();
        let seqs: Vec<_> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![3, 1, 4, 2]);
    }

    #[test]
    fn test_distinct_on_projection_then_paginate() {
        let mut spec = FetchSpec::all("Fruit");
        spec.distinct = true;
        spec.projection = Projection::Fields(vec!["name".into()]);
        assert_eq!(execute(basket(), &spec).unwrap().len(), 3);

        spec.offset = 1;
        spec.limit = Some(1);
        assert_eq!(names(&execute(basket(), &spec).unwrap()), vec!["Crème"]);
    }

    #[test]
    fn test_set_quantifiers() {
        let mut rows = basket();
        rows[0].set("tags", Value::from(vec!["sweet", "tropical"]));
        rows[1].set("tags", Value::from(vec!["sweet"]));

        let quantified = |quantifier| {
            let mut spec = FetchSpec::all("Fruit");
            spec.predicate = Predicate::Node(PredicateNode::SetQuantifier {
                field: "tags".into(),
                quantifier,
                values: vec!["sweet".into()],
            });
            execute(rows.clone(), &spec).unwrap().len()
        };

        // Rows without tags count as empty collections.
        assert_eq!(quantified(Quantifier::All), 3);
        assert_eq!(quantified(Quantifier::Any), 2);
        assert_eq!(quantified(Quantifier::None), 2);
    }

    #[test]
    fn test_membership_and_or() {
        let mut spec = FetchSpec::all("Fruit");
        spec.predicate = Predicate::or(vec![
            Predicate::Node(PredicateNode::Membership {
                field: "name".into(),
                negated: false,
                values: vec!["Apple".into()],
            }),
            node("name", CompareOp::BeginsWith, "cr".into(), QueryOptions::CASE_INSENSITIVE),
        ]);
        assert_eq!(names(&execute(basket(), &spec).unwrap()), vec!["Crème", "Apple"]);
    }
}
