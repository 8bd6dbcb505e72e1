//! # Mellon - transactional contexts over an embedded object store
//!
//! Mellon layers a tree of confined, transactional contexts and a fluent
//! query builder over one backing store.
//!
//! ## Core Concepts
//!
//! - **Store**: one backing container, durable (three-file set) or in-memory
//! - **Context**: a confined view with its own pending change set
//! - **ContextHierarchy**: root (writes to disk), main, and short-lived
//!   background contexts; commits propagate upward until root persists them
//! - **QueryBuilder**: chainable filters compiled at execution into an
//!   immutable `FetchSpec`
//! - **ElasticPager**: cursor-tracked incremental loading of a query
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mellon::{ContextHierarchy, EntityDescription, FieldKind, MellonConfig, Schema, StoreMode};
//!
//! let schema = Schema::new().with_entity(
//!     EntityDescription::new("Fruit")
//!         .required("id", FieldKind::String)
//!         .optional("name", FieldKind::String),
//! );
//! let stores = ContextHierarchy::open("fruits", StoreMode::Durable, MellonConfig::default(), schema)?;
//!
//! stores.transaction(|ctx| {
//!     let fruit = ctx.insert("Fruit")?;
//!     fruit.set("id", "u1")?;
//!     fruit.set("name", "Banana")
//! })??;
//!
//! let main = stores.main_context()?;
//! let bananas = main.query("Fruit").equal_to("id", "u1").execute()?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod query;
pub mod schema;
pub mod store;
pub mod value;

pub use config::{MellonConfig, StoreMode};
pub use context::{
    ChangeNotifier, ChangeSet, CommitOutcome, Context, ContextHierarchy, ContextKind, FieldPatch,
    HierarchyState, MergePolicy,
};
pub use entity::{Entity, EntityRef, ManagedObject, Record};
pub use error::{
    ContextError, CopyError, DeleteError, MellonError, MellonResult, QueryError, StoreError,
    ValidationError,
};
pub use query::{
    ElasticPager, FetchSpec, Operator, Predicate, PredicateNode, Projection, QueryBuilder,
    QueryOptions, ResultType, SortDirection, SortKey,
};
pub use schema::{EntityDescription, FieldDescription, FieldKind, Schema};
pub use store::{StorageError, Store, StoreFiles, StoreStats};
pub use value::Value;
