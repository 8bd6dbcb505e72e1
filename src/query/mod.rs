//! Query layer: fluent builder, predicate compiler, in-process executor and
//! elastic pager.
//!
//! A [`QueryBuilder`] accumulates directives against a context. Each execute
//! call compiles them into a fresh, immutable [`FetchSpec`] whose
//! [`Predicate`] is a tree of [`PredicateNode`]s.

mod builder;
mod compiler;
mod elastic;
pub mod executor;
mod fetch;
mod options;
mod predicate;
mod sort;

pub use builder::QueryBuilder;
pub use compiler::PredicateCompiler;
pub use elastic::ElasticPager;
pub use fetch::{FetchSpec, Projection, ResultType};
pub use options::QueryOptions;
pub use predicate::{CompareOp, Operator, Predicate, PredicateNode, Quantifier};
pub use sort::{parse_sort, SortDirection, SortKey};
