//! Sort keys and the `"field [ASC|DESC], ..."` parser.

use std::fmt;

use crate::error::QueryError;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    #[must_use]
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Ascending => write!(f, "{} ASC", self.field),
            SortDirection::Descending => write!(f, "{} DESC", self.field),
        }
    }
}

/// Parses `"name ASC, weight DESC"` into sort keys.
///
/// A bare field sorts ascending. An empty clause, a clause with more than two
/// tokens or an unknown direction is a hard error.
pub fn parse_sort(spec: &str) -> Result<Vec<SortKey>, QueryError> {
    let malformed = |clause: &str| QueryError::MalformedSort {
        spec: spec.to_string(),
        clause: clause.to_string(),
    };

    spec.split(',')
        .map(|clause| {
            let tokens: Vec<&str> = clause.split_whitespace().collect();
            match tokens.as_slice() {
                [field] => Ok(SortKey::new(*field, SortDirection::Ascending)),
                [field, direction] => {
                    let direction = if direction.eq_ignore_ascii_case("asc") {
                        SortDirection::Ascending
                    } else if direction.eq_ignore_ascii_case("desc") {
                        SortDirection::Descending
                    } else {
                        return Err(malformed(clause.trim()));
                    };
                    Ok(SortKey::new(*field, direction))
                }
                _ => Err(malformed(clause.trim())),
            }
        })
        .collect()
}
