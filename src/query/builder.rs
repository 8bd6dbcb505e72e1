//! Fluent query builder.
//!
//! Every filter call appends one directive and hands the builder back, so
//! queries read as one chain. Nothing is validated until an execute variant
//! runs; each execution compiles a fresh [`FetchSpec`] and runs it on the
//! owning context's lane.
//!
//! ```ignore
//! let bananas = context
//!     .query("Fruit")
//!     .equal_to("name", "Banana")
//!     .greater_than("weight", 100)
//!     .sort("weight DESC")
//!     .limit(10)
//!     .execute()?;
//! ```

use std::fmt;

use tracing::debug;

use crate::context::Context;
use crate::entity::{Entity, EntityRef, ManagedObject};
use crate::error::{MellonResult, QueryError};
use crate::value::Value;

use super::compiler::{self, Criterion, Directive, QueryState, SortSource};
use super::predicate::Operator;
use super::{ElasticPager, FetchSpec, Projection, QueryOptions, ResultType, SortDirection, SortKey};

/// Fluent accumulator of filter, sort, pagination and projection directives.
#[derive(Clone)]
#[must_use]
pub struct QueryBuilder {
    context: Context,
    state: QueryState,
}

impl QueryBuilder {
    /// Starts a query over `entity` in `context`.
    pub fn new(context: &Context, entity: impl Into<String>) -> Self {
        Self {
            context: context.clone(),
            state: QueryState::new(entity),
        }
    }

    /// Starts a typed query.
    pub fn of<T: Entity>(context: &Context) -> Self {
        Self::new(context, T::ENTITY_NAME)
    }

    /// ORs the accumulated filters of several builders into one new builder.
    ///
    /// The entity and context come from the first builder; every builder must
    /// target the same entity.
    pub fn or(queries: Vec<Self>) -> MellonResult<Self> {
        let first = queries.first().ok_or_else(|| QueryError::InvalidCombination {
            reason: "OR needs at least one query".to_string(),
        })?;
        if let Some(other) = queries.iter().find(|q| q.state.entity != first.state.entity) {
            return Err(QueryError::InvalidCombination {
                reason: format!(
                    "cannot OR queries over '{}' and '{}'",
                    first.state.entity, other.state.entity
                ),
            }
            .into());
        }

        let mut combined = Self::new(&first.context, first.state.entity.clone());
        let groups = queries.into_iter().map(|q| q.state.criteria).collect();
        combined.state.criteria.push(Criterion::AnyOf(groups));
        Ok(combined)
    }

    /// Entity this builder targets.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.state.entity
    }

    /// Context this builder executes in.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    // Filters

    /// Appends one filter with explicit string comparison options.
    pub fn with_options(
        mut self,
        field: &str,
        operator: Operator,
        value: impl Into<Value>,
        options: QueryOptions,
    ) -> Self {
        self.state.criteria.push(Criterion::Filter(Directive {
            field: field.to_string(),
            operator,
            value: value.into(),
            options,
        }));
        self
    }

    /// Appends one filter. All filters on one builder are ANDed.
    pub fn with(self, field: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.with_options(field, operator, value, QueryOptions::NONE)
    }

    /// `field == value`; a null value tests that the field is absent.
    pub fn equal_to(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Operator::EqualTo, value)
    }

    /// `field != value`; a null value tests that the field is present.
    pub fn not_equal_to(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Operator::NotEqualTo, value)
    }

    pub fn greater_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Operator::GreaterThan, value)
    }

    pub fn greater_than_or_equal(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Operator::GreaterThanOrEqual, value)
    }

    pub fn lower_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Operator::LowerThan, value)
    }

    pub fn lower_than_or_equal(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Operator::LowerThanOrEqual, value)
    }

    /// Substring test on strings, element test on lists.
    pub fn containing(self, field: &str, value: impl Into<Value>, options: QueryOptions) -> Self {
        self.with_options(field, Operator::Containing, value, options)
    }

    pub fn starting_with(self, field: &str, prefix: &str, options: QueryOptions) -> Self {
        self.with_options(field, Operator::BeginsWith, prefix, options)
    }

    pub fn ending_with(self, field: &str, suffix: &str, options: QueryOptions) -> Self {
        self.with_options(field, Operator::EndsWith, suffix, options)
    }

    /// Wildcard match: `*` matches any run of characters, `?` exactly one.
    pub fn like(self, field: &str, pattern: &str, options: QueryOptions) -> Self {
        self.with_options(field, Operator::Like, pattern, options)
    }

    pub fn contained_in<V: Into<Value>>(self, field: &str, values: Vec<V>) -> Self {
        self.with(field, Operator::ContainedIn, values)
    }

    pub fn not_contained_in<V: Into<Value>>(self, field: &str, values: Vec<V>) -> Self {
        self.with(field, Operator::NotContainedIn, values)
    }

    /// Every element of the collection `field` is one of `values`.
    pub fn containing_all<V: Into<Value>>(self, field: &str, values: Vec<V>) -> Self {
        self.with(field, Operator::ContainingAll, values)
    }

    /// No element of the collection `field` is one of `values`.
    pub fn containing_none<V: Into<Value>>(self, field: &str, values: Vec<V>) -> Self {
        self.with(field, Operator::ContainingNone, values)
    }

    /// Some element of the collection `field` is one of `values`.
    pub fn containing_any<V: Into<Value>>(self, field: &str, values: Vec<V>) -> Self {
        self.with(field, Operator::ContainingAny, values)
    }

    pub fn existing(self, field: &str, exists: bool) -> Self {
        self.with(field, Operator::Exists, exists)
    }

    // Shape

    /// Adds sort keys from `"field [ASC|DESC], ..."`. Parsed at execution.
    pub fn sort(mut self, spec: &str) -> Self {
        self.state.sort.push(SortSource::Text(spec.to_string()));
        self
    }

    /// Adds one typed sort key.
    pub fn sort_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.state.sort.push(SortSource::Key(SortKey::new(field, direction)));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.state.offset = offset;
        self
    }

    /// Batch size hint; rows are still returned in one result.
    pub fn fetch_batch_size(mut self, size: usize) -> Self {
        self.state.batch_size = Some(size);
        self
    }

    /// Returns distinct rows; with a field, distinct values of that field.
    pub fn distinct(mut self, on: Option<&str>) -> Self {
        self.state.distinct = true;
        if let Some(field) = on {
            self.state.projection = Projection::Fields(vec![field.to_string()]);
        }
        self
    }

    pub fn prefetch(mut self, relations: &[&str]) -> Self {
        self.state.prefetch = relations.iter().map(ToString::to_string).collect();
        self
    }

    /// Restricts dictionary results to `fields`.
    pub fn projection(mut self, fields: &[&str]) -> Self {
        self.state.projection = Projection::Fields(fields.iter().map(ToString::to_string).collect());
        self
    }

    /// Re-targets the builder to another context.
    pub fn in_context(mut self, context: &Context) -> Self {
        self.context = context.clone();
        self
    }

    /// Overwrite already-materialized copies with fetched values.
    pub fn refresh_refetched_objects(mut self, refresh: bool) -> Self {
        self.state.refresh_refetched = refresh;
        self
    }

    // Execution

    /// Compiles the current state without executing it.
    pub fn compile(&self, result_type: ResultType) -> MellonResult<FetchSpec> {
        let spec = compiler::compile(self.context.schema(), &self.state, result_type)?;
        debug!(context = %self.context.name(), "{spec}");
        Ok(spec)
    }

    /// Matching objects, materialized in the builder's context.
    pub fn execute(&self) -> MellonResult<Vec<ManagedObject>> {
        let spec = self.compile(ResultType::Objects)?;
        self.context.fetch_objects(spec)
    }

    /// Shorthand for [`execute`](Self::execute).
    pub fn all(&self) -> MellonResult<Vec<ManagedObject>> {
        self.execute()
    }

    /// First match (`limit(1)` + execute).
    pub fn first(&self) -> MellonResult<Option<ManagedObject>> {
        Ok(self.clone().limit(1).execute()?.into_iter().next())
    }

    /// `limit(1)` + execute, like [`first`](Self::first).
    ///
    /// No reverse sort is applied: callers supply a sort order under which
    /// the wanted row comes first.
    pub fn last(&self) -> MellonResult<Option<ManagedObject>> {
        self.first()
    }

    /// Identities of matching objects.
    pub fn ids(&self) -> MellonResult<Vec<EntityRef>> {
        let spec = self.compile(ResultType::Ids)?;
        Ok(self.context.fetch_records(spec)?.into_iter().map(|r| r.entity_ref).collect())
    }

    /// Matching rows as field maps, restricted to the projection.
    pub fn dictionaries(&self) -> MellonResult<Vec<std::collections::BTreeMap<String, Value>>> {
        let spec = self.compile(ResultType::Dictionaries)?;
        let projection = spec.projection.clone();
        let rows = self.context.fetch_records(spec)?;
        Ok(rows
            .into_iter()
            .map(|r| match &projection {
                Projection::All => r.fields,
                Projection::Fields(fields) => r.project(fields),
            })
            .collect())
    }

    /// Number of rows `execute` would return.
    pub fn count(&self) -> MellonResult<usize> {
        let spec = self.compile(ResultType::Count)?;
        Ok(self.context.fetch_records(spec)?.len())
    }

    /// Deletes every match through the context, so the deletions commit and
    /// merge like any other change. Returns how many were deleted.
    pub fn delete(&self) -> MellonResult<usize> {
        let mut spec = self.compile(ResultType::Ids)?;
        spec.include_property_values = false;
        self.context.delete_matching(spec)
    }

    /// Deletes persisted matches directly in the store.
    ///
    /// Bypasses change tracking: copies already materialized in open
    /// contexts are not updated and must be treated as stale. Rows that
    /// exist only as uncommitted inserts are not affected.
    pub fn batch_delete(&self) -> MellonResult<usize> {
        let spec = self.compile(ResultType::Ids)?;
        self.context.batch_delete_matching(spec)
    }

    /// Matches decoded as a typed entity.
    pub fn execute_as<T: Entity>(&self) -> MellonResult<Vec<T>> {
        self.execute()?.iter().map(T::from_object).collect()
    }

    /// Incremental pager over this query using the configured page size.
    pub fn elastic(&self) -> ElasticPager {
        ElasticPager::new(self.clone(), self.context.default_page_size())
    }

    pub(crate) fn state(&self) -> &QueryState {
        &self.state
    }
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("context", &self.context.name())
            .field("state", &self.state)
            .finish()
    }
}
