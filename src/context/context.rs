//! Confined transactional views over the active store.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, warn};

use crate::entity::{EntityRef, ManagedObject, Record};
use crate::error::{ContextError, MellonError, MellonResult, QueryError, ValidationError};
use crate::query::{executor, FetchSpec, QueryBuilder};
use crate::schema::Schema;
use crate::store::Store;
use crate::value::Value;

use super::lane::Lane;
use super::notifier::ChangeNotifier;
use super::{ChangeSet, CommitOutcome, MergePolicy};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

fn lock_err(context: &'static str) -> MellonError {
    MellonError::internal(format!("poisoned lock: {context}"))
}

/// Role of a context in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Writes to the backing store. Has no parent.
    Root,
    /// Long-lived context for the caller's foreground work. Parent is root.
    Main,
    /// Short-lived context for one logical transaction. Parent is main.
    Background,
}

/// A confined, transactional view over the store.
///
/// Handles are cheap to clone; every clone refers to the same context. All
/// work on a context runs on its lane, so calls from any thread are safe and
/// execute in submission order.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: u64,
    name: String,
    kind: ContextKind,
    parent: Option<Context>,
    lane: Arc<Lane>,
    store: Arc<Store>,
    generation: u64,
    active_generation: Arc<AtomicU64>,
    merge_policy: MergePolicy,
    notifier: Arc<ChangeNotifier>,
    default_page_size: usize,
    state: Mutex<ContextState>,
}

#[derive(Default)]
struct ContextState {
    /// Materialized copies, with this context's pending changes applied.
    registered: HashMap<EntityRef, Record>,
    pending: ChangeSet,
}

impl Context {
    pub(crate) fn root(
        lane: Arc<Lane>,
        store: Arc<Store>,
        active_generation: Arc<AtomicU64>,
        notifier: Arc<ChangeNotifier>,
        default_page_size: usize,
    ) -> Self {
        let generation = active_generation.load(Ordering::Acquire);
        Self::build(ContextInner {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: "root".to_string(),
            kind: ContextKind::Root,
            parent: None,
            lane,
            store,
            generation,
            active_generation,
            merge_policy: MergePolicy::default(),
            notifier,
            default_page_size,
            state: Mutex::new(ContextState::default()),
        })
    }

    pub(crate) fn child(&self, kind: ContextKind, lane: Arc<Lane>, merge_policy: MergePolicy) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let name = match kind {
            ContextKind::Root => "root".to_string(),
            ContextKind::Main => "main".to_string(),
            ContextKind::Background => format!("background-{id}"),
        };
        Self::build(ContextInner {
            id,
            name,
            kind,
            parent: Some(self.clone()),
            lane,
            store: Arc::clone(&self.inner.store),
            generation: self.inner.generation,
            active_generation: Arc::clone(&self.inner.active_generation),
            merge_policy,
            notifier: Arc::clone(&self.inner.notifier),
            default_page_size: self.inner.default_page_size,
            state: Mutex::new(ContextState::default()),
        })
    }

    fn build(inner: ContextInner) -> Self {
        debug!(context = %inner.name, lane = %inner.lane.name(), "context created");
        Self { inner: Arc::new(inner) }
    }

    /// Process-unique context id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    /// Policy applied when this context's commit lands on its parent.
    #[must_use]
    pub fn merge_policy(&self) -> MergePolicy {
        self.inner.merge_policy
    }

    /// Returns false once the store this context was built for has been
    /// switched away. Invalid contexts still serve cached copies but reject
    /// writes and queries.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.generation == self.inner.active_generation.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.inner.store.schema()
    }

    pub(crate) fn lane(&self) -> &Arc<Lane> {
        &self.inner.lane
    }

    pub(crate) fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    pub(crate) fn default_page_size(&self) -> usize {
        self.inner.default_page_size
    }

    /// Queues `f` on this context's lane and returns immediately.
    pub fn perform<F>(&self, f: F) -> MellonResult<()>
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        let ctx = self.clone();
        self.inner.lane.perform(move || f(&ctx))
    }

    /// Runs `f` on this context's lane and waits for its result.
    ///
    /// Runs inline when already on the lane.
    pub fn perform_and_wait<R, F>(&self, f: F) -> MellonResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Context) -> R + Send + 'static,
    {
        let ctx = self.clone();
        self.inner.lane.perform_and_wait(move || f(&ctx))
    }

    fn run<R, F>(&self, f: F) -> MellonResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Context) -> MellonResult<R> + Send + 'static,
    {
        self.perform_and_wait(f)?
    }

    /// Inserts a new object and assigns its permanent identity.
    pub fn insert(&self, entity: &str) -> MellonResult<ManagedObject> {
        let entity = entity.to_string();
        self.run(move |ctx| ctx.insert_local(&entity))
    }

    /// Materializes the object identified by `entity_ref` in this context.
    pub fn object(&self, entity_ref: EntityRef) -> MellonResult<ManagedObject> {
        self.run(move |ctx| {
            let record = ctx.lookup_required(entity_ref)?;
            Ok(ManagedObject::new(ctx.clone(), entity_ref, record.entity))
        })
    }

    /// Materializes an object handle from another context in this one.
    pub fn fetch_object(&self, object: &ManagedObject) -> MellonResult<ManagedObject> {
        self.object(object.entity_ref())
    }

    /// Commits pending changes, waiting until they reach the parent (or the
    /// store, for the root).
    pub fn commit(&self) -> MellonResult<CommitOutcome> {
        self.run(Context::commit_local)
    }

    /// Schedules a commit and returns immediately. Failures are logged.
    pub fn commit_async(&self) -> MellonResult<()> {
        self.perform(|ctx| {
            if let Err(e) = ctx.commit_local() {
                warn!(context = %ctx.name(), error = %e, "commit failed; changes stay pending");
            }
        })
    }

    /// Discards pending changes and every materialized copy.
    pub fn rollback(&self) -> MellonResult<()> {
        self.run(|ctx| {
            let mut state = ctx.state()?;
            state.pending = ChangeSet::default();
            state.registered.clear();
            Ok(())
        })
    }

    /// Drops materialized copies so the next read re-resolves them.
    /// Pending changes are kept.
    pub fn refresh_all_objects(&self) -> MellonResult<()> {
        self.run(|ctx| {
            ctx.state()?.registered.clear();
            Ok(())
        })
    }

    /// Returns true if this context holds uncommitted changes.
    pub fn has_changes(&self) -> MellonResult<bool> {
        self.run(|ctx| Ok(!ctx.state()?.pending.is_empty()))
    }

    /// Pending changes, as a copy.
    pub fn pending_changes(&self) -> MellonResult<ChangeSet> {
        self.run(|ctx| Ok(ctx.state()?.pending.clone()))
    }

    /// Starts a query over `entity` in this context.
    pub fn query(&self, entity: &str) -> QueryBuilder {
        QueryBuilder::new(self, entity)
    }

    // Object access used by ManagedObject.

    pub(crate) fn read_field(&self, entity_ref: EntityRef, field: &str) -> MellonResult<Value> {
        let field = field.to_string();
        self.run(move |ctx| {
            let record = ctx.lookup_required(entity_ref)?;
            ctx.schema().entity(&record.entity)?.field(&field)?;
            Ok(record.get(&field).clone())
        })
    }

    pub(crate) fn write_field(&self, entity_ref: EntityRef, field: &str, value: Value) -> MellonResult<()> {
        let field = field.to_string();
        self.run(move |ctx| ctx.write_field_local(entity_ref, &field, value))
    }

    pub(crate) fn snapshot(&self, entity_ref: EntityRef) -> MellonResult<Record> {
        self.run(move |ctx| ctx.lookup_required(entity_ref))
    }

    pub(crate) fn remove(&self, entity_ref: EntityRef) -> MellonResult<()> {
        self.run(move |ctx| ctx.remove_local(entity_ref))
    }

    pub(crate) fn remove_async(&self, entity_ref: EntityRef) -> MellonResult<()> {
        self.perform(move |ctx| {
            if let Err(e) = ctx.remove_local(entity_ref) {
                warn!(context = %ctx.name(), %entity_ref, error = %e, "delete failed");
            }
        })
    }

    // Query execution used by QueryBuilder.

    pub(crate) fn fetch_records(&self, spec: FetchSpec) -> MellonResult<Vec<Record>> {
        self.run(move |ctx| ctx.fetch_records_local(&spec))
    }

    pub(crate) fn fetch_objects(&self, spec: FetchSpec) -> MellonResult<Vec<ManagedObject>> {
        self.run(move |ctx| {
            let rows = ctx.fetch_records_local(&spec)?;
            let mut state = ctx.state()?;
            let objects = rows
                .into_iter()
                .map(|row| {
                    let object = ManagedObject::new(ctx.clone(), row.entity_ref, row.entity.clone());
                    if spec.refresh_refetched || !state.registered.contains_key(&row.entity_ref) {
                        state.registered.insert(row.entity_ref, row);
                    }
                    object
                })
                .collect();
            Ok(objects)
        })
    }

    pub(crate) fn delete_matching(&self, spec: FetchSpec) -> MellonResult<usize> {
        self.run(move |ctx| {
            let rows = ctx.fetch_records_local(&spec)?;
            for row in &rows {
                ctx.remove_local(row.entity_ref)?;
            }
            Ok(rows.len())
        })
    }

    pub(crate) fn batch_delete_matching(&self, spec: FetchSpec) -> MellonResult<usize> {
        self.ensure_writable()?;
        let root = self.root_context();
        root.run(move |root| {
            let store = root.store();
            let refs: Vec<EntityRef> = store.fetch(&spec)?.into_iter().map(|r| r.entity_ref).collect();
            let deleted = store.batch_delete(&refs)?;
            debug!(entity = %spec.entity, deleted, "batch delete");
            Ok(deleted)
        })
    }

    // Lane-local operations. Callers must already be on this context's lane.

    fn state(&self) -> MellonResult<MutexGuard<'_, ContextState>> {
        self.inner.state.lock().map_err(|_| lock_err("context state"))
    }

    fn root_context(&self) -> Context {
        let mut ctx = self.clone();
        while let Some(parent) = ctx.parent().cloned() {
            ctx = parent;
        }
        ctx
    }

    fn ensure_writable(&self) -> MellonResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ContextError::Invalidated {
                context: self.inner.name.clone(),
            }
            .into())
        }
    }

    fn insert_local(&self, entity: &str) -> MellonResult<ManagedObject> {
        self.ensure_writable()?;
        self.schema().entity(entity)?;
        let record = Record::new(EntityRef::new(), entity, self.inner.store.next_seq());
        let entity_ref = record.entity_ref;

        let mut state = self.state()?;
        state.pending.record_insert(record.clone());
        state.registered.insert(entity_ref, record);
        Ok(ManagedObject::new(self.clone(), entity_ref, entity))
    }

    fn write_field_local(&self, entity_ref: EntityRef, field: &str, value: Value) -> MellonResult<()> {
        self.ensure_writable()?;
        let record = self.lookup_required(entity_ref)?;
        self.schema().entity(&record.entity)?.check_value(field, &value)?;

        let mut state = self.state()?;
        if let Some(copy) = state.registered.get_mut(&entity_ref) {
            copy.set(field, value.clone());
        }
        state.pending.record_update(entity_ref, &record.entity, field, value);
        Ok(())
    }

    fn remove_local(&self, entity_ref: EntityRef) -> MellonResult<()> {
        self.ensure_writable()?;
        let record = self.lookup_required(entity_ref)?;
        let mut state = self.state()?;
        state.pending.record_delete(entity_ref, &record.entity);
        state.registered.remove(&entity_ref);
        Ok(())
    }

    /// Resolves one object: cached copy first, then the parent's view with
    /// local pending changes applied. The result is cached.
    fn lookup_local(&self, entity_ref: EntityRef) -> MellonResult<Option<Record>> {
        {
            let state = self.state()?;
            if state.pending.is_deleted(entity_ref) {
                return Ok(None);
            }
            if let Some(record) = state.registered.get(&entity_ref) {
                return Ok(Some(record.clone()));
            }
        }

        let base = match &self.inner.parent {
            None => self.inner.store.get(entity_ref)?,
            Some(parent) => parent.run(move |p| p.lookup_local(entity_ref))?,
        };

        let mut state = self.state()?;
        let resolved = state.pending.overlay_one(entity_ref, base);
        if let Some(record) = &resolved {
            state.registered.insert(entity_ref, record.clone());
        }
        Ok(resolved)
    }

    fn lookup_required(&self, entity_ref: EntityRef) -> MellonResult<Record> {
        if let Some(record) = self.lookup_local(entity_ref)? {
            return Ok(record);
        }
        if self.state()?.pending.is_deleted(entity_ref) {
            Err(ContextError::ObjectDeleted(entity_ref).into())
        } else {
            Err(ContextError::ObjectNotFound(entity_ref).into())
        }
    }

    /// Every row of `entity` as seen from this context, unfiltered.
    fn scan_local(&self, entity: &str) -> MellonResult<Vec<Record>> {
        let base = match &self.inner.parent {
            None => self.inner.store.scan(entity)?,
            Some(parent) => {
                let entity = entity.to_string();
                parent.run(move |p| p.scan_local(&entity))?
            }
        };
        Ok(self.state()?.pending.overlay(entity, base))
    }

    fn fetch_records_local(&self, spec: &FetchSpec) -> MellonResult<Vec<Record>> {
        self.ensure_writable()?;
        let rows = self.scan_local(&spec.entity).map_err(|e| match e {
            MellonError::Store(source) => {
                error!(context = %self.inner.name, entity = %spec.entity, error = %source, "fetch failed");
                MellonError::from(QueryError::Execution {
                    message: source.to_string(),
                })
            }
            other => other,
        })?;
        let rows = executor::execute(rows, spec)?;
        debug!(context = %self.inner.name, rows = rows.len(), "{spec}");
        Ok(rows)
    }

    fn validate(&self, changes: &ChangeSet) -> MellonResult<()> {
        let schema = self.schema();
        for record in changes.inserted.values() {
            schema.entity(&record.entity)?.check_required(record)?;
        }
        for patch in changes.updated.values() {
            let entity = schema.entity(&patch.entity)?;
            for (field, value) in &patch.fields {
                if value.is_null() && !entity.field(field)?.optional {
                    return Err(ValidationError::MissingField {
                        entity: patch.entity.clone(),
                        field: field.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Commits on this context's lane.
    ///
    /// The root writes to the store. Any other context merges into its
    /// parent on the parent's lane, then notifies the parent, which commits
    /// in turn. On failure the change set stays pending.
    pub(crate) fn commit_local(&self) -> MellonResult<CommitOutcome> {
        self.ensure_writable()?;
        let changes = mem::take(&mut self.state()?.pending);
        if changes.is_empty() {
            return Ok(CommitOutcome::NoChanges);
        }
        let count = changes.len();

        if let Err(e) = self.validate(&changes) {
            self.restore(changes)?;
            return Err(e);
        }

        let Some(parent) = self.inner.parent.clone() else {
            if let Err(e) = self.inner.store.apply(&changes) {
                error!(context = %self.inner.name, error = %e, "persisting commit failed");
                self.restore(changes)?;
                return Err(e.into());
            }
            self.state()?.registered.clear();
            debug!(context = %self.inner.name, changes = count, "commit persisted");
            return Ok(CommitOutcome::Persisted { changes: count });
        };

        let backup = changes.clone();
        let policy = self.inner.merge_policy;
        let merged = parent.run(move |p| p.absorb_local(changes, policy));
        if let Err(e) = merged {
            warn!(context = %self.inner.name, error = %e, "merging commit into parent failed");
            self.restore(backup)?;
            return Err(e);
        }
        self.state()?.registered.clear();
        self.inner.notifier.did_commit(self, &parent, count);
        Ok(CommitOutcome::Propagated { changes: count })
    }

    fn restore(&self, changes: ChangeSet) -> MellonResult<()> {
        let mut state = self.state()?;
        // Anything recorded since the take is newer and wins.
        let newer = mem::replace(&mut state.pending, changes);
        state.pending.merge(newer, MergePolicy::PropertyLevelMergeWinner);
        Ok(())
    }

    /// Merges a child's committed changes on this context's lane, under the
    /// child's policy, and refreshes the materialized copies they touch.
    fn absorb_local(&self, changes: ChangeSet, policy: MergePolicy) -> MellonResult<()> {
        let refs = changes.changed_refs();
        let stale: Vec<EntityRef> = {
            let mut state = self.state()?;
            state.pending.merge(changes, policy);
            refs.into_iter()
                .filter(|r| state.registered.remove(r).is_some())
                .collect()
        };
        for entity_ref in stale {
            self.lookup_local(entity_ref)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("generation", &self.inner.generation)
            .finish_non_exhaustive()
    }
}
