//! Compiled, immutable description of one query.

use std::fmt;

use super::{Predicate, SortKey};

/// Which fields a fetch returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    Fields(Vec<String>),
}

/// Result shape requested from the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultType {
    #[default]
    Objects,
    Ids,
    Dictionaries,
    Count,
}

/// A fully compiled query.
///
/// A fresh `FetchSpec` is compiled for every execution; nothing mutates one
/// after compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSpec {
    pub entity: String,
    pub predicate: Predicate,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub batch_size: Option<usize>,
    pub projection: Projection,
    pub distinct: bool,
    pub prefetch: Vec<String>,
    pub result_type: ResultType,
    pub include_property_values: bool,
    pub refresh_refetched: bool,
}

impl FetchSpec {
    /// Fetch of every row of `entity`, in insertion order.
    #[must_use]
    pub fn all(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::True,
            sort: Vec::new(),
            limit: None,
            offset: 0,
            batch_size: None,
            projection: Projection::All,
            distinct: false,
            prefetch: Vec::new(),
            result_type: ResultType::Objects,
            include_property_values: true,
            refresh_refetched: false,
        }
    }
}

impl fmt::Display for FetchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        if let Projection::Fields(fields) = &self.projection {
            write!(f, "{} FROM ", fields.join(", "))?;
        }
        write!(f, "{} WHERE {}", self.entity, self.predicate)?;
        if !self.sort.is_empty() {
            write!(f, " SORT ")?;
            for (idx, key) in self.sort.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}")?;
            }
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if self.offset > 0 {
            write!(f, " OFFSET {}", self.offset)?;
        }
        if !self.prefetch.is_empty() {
            write!(f, " PREFETCH {}", self.prefetch.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CompareOp, PredicateNode, QueryOptions, SortDirection};

    #[test]
    fn test_display_reads_like_a_statement() {
        let mut spec = FetchSpec::all("Fruit");
        spec.predicate = Predicate::Node(PredicateNode::Comparison {
            field: "name".into(),
            op: CompareOp::BeginsWith,
            value: "B".into(),
            options: QueryOptions::CASE_INSENSITIVE,
        });
        spec.sort = vec![SortKey::new("name", SortDirection::Descending)];
        spec.limit = Some(10);

        assert_eq!(
            spec.to_string(),
            r#"SELECT Fruit WHERE name BEGINSWITH[c] "B" SORT name DESC LIMIT 10"#
        );
    }

    #[test]
    fn test_display_of_unfiltered_fetch() {
        assert_eq!(FetchSpec::all("Fruit").to_string(), "SELECT Fruit WHERE TRUEPREDICATE");
    }
}
