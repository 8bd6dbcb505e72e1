//! The context tree bound to the active store.
//!
//! ```text
//!   root (lane "root")         writes to the store
//!    └─ main (lane "main")     foreground work
//!        ├─ background-N       one per transaction, each on its own lane
//!        └─ background-M
//! ```
//!
//! Children hold their parent; parents never hold children. Switching the
//! store drains every lane, swaps the store and rebuilds the tree.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{error, info, warn};

use crate::config::{MellonConfig, StoreMode};
use crate::error::{ContextError, CopyError, DeleteError, MellonError, MellonResult};
use crate::schema::Schema;
use crate::store::{files, Store, StoreFiles, StoreStats};

use super::lane::Lane;
use super::notifier::ChangeNotifier;
use super::{Context, ContextKind, MergePolicy};

fn lock_err(context: &'static str) -> MellonError {
    MellonError::internal(format!("poisoned lock: {context}"))
}

/// Lifecycle state of a [`ContextHierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HierarchyState {
    Uninitialized,
    Ready,
    SwitchingStore,
    Closed,
}

struct Active {
    store: Arc<Store>,
    root: Context,
    main: Context,
    /// Lanes of live background contexts. A lane retires when its last
    /// context drops.
    background: Mutex<Vec<Weak<Lane>>>,
}

impl Active {
    /// Barrier over every lane, leaves first, so work that a lane forwards
    /// upward is drained too.
    fn drain(&self) -> MellonResult<()> {
        for lane in self.lanes()? {
            lane.drain()?;
        }
        Ok(())
    }

    /// Live background lanes, then main, then root.
    fn lanes(&self) -> MellonResult<Vec<Arc<Lane>>> {
        let mut background = self.background.lock().map_err(|_| lock_err("background lanes"))?;
        background.retain(|lane| lane.strong_count() > 0);
        let mut lanes: Vec<Arc<Lane>> = background.iter().filter_map(Weak::upgrade).collect();
        lanes.push(Arc::clone(self.main.lane()));
        lanes.push(Arc::clone(self.root.lane()));
        Ok(lanes)
    }

    fn close(self) {
        if let Err(e) = self.drain() {
            warn!(store = %self.store.name(), error = %e, "draining lanes before close failed");
        }
        if let Err(e) = self.store.close() {
            error!(store = %self.store.name(), error = %e, "closing store failed");
        }
    }
}

struct HierarchyInner {
    state: HierarchyState,
    active: Option<Active>,
}

/// Owns the root, main and background contexts of the active store.
///
/// Constructed once and passed to whatever needs it; there is no global
/// default store.
pub struct ContextHierarchy {
    config: MellonConfig,
    schema: Arc<Schema>,
    mode: StoreMode,
    notifier: Arc<ChangeNotifier>,
    generation: Arc<AtomicU64>,
    next_lane: AtomicUsize,
    switch_lock: Mutex<()>,
    inner: RwLock<HierarchyInner>,
}

impl ContextHierarchy {
    /// Creates an uninitialized hierarchy. Call [`switch_to`](Self::switch_to)
    /// to open a store.
    pub fn new(config: MellonConfig, schema: Schema, mode: StoreMode) -> MellonResult<Self> {
        Ok(Self {
            config: config.validate()?,
            schema: Arc::new(schema),
            mode,
            notifier: Arc::new(ChangeNotifier::new()),
            generation: Arc::new(AtomicU64::new(0)),
            next_lane: AtomicUsize::new(0),
            switch_lock: Mutex::new(()),
            inner: RwLock::new(HierarchyInner {
                state: HierarchyState::Uninitialized,
                active: None,
            }),
        })
    }

    /// Creates a hierarchy and opens store `name`.
    ///
    /// This is the mandatory startup open: callers should treat an error as
    /// fatal.
    pub fn open(name: &str, mode: StoreMode, config: MellonConfig, schema: Schema) -> MellonResult<Self> {
        let hierarchy = Self::new(config, schema, mode)?;
        hierarchy.switch_to(name)?;
        Ok(hierarchy)
    }

    #[must_use]
    pub fn config(&self) -> &MellonConfig {
        &self.config
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub const fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn state(&self) -> MellonResult<HierarchyState> {
        Ok(self.inner.read().map_err(|_| lock_err("hierarchy"))?.state)
    }

    /// Name of the active store.
    pub fn active_store_name(&self) -> MellonResult<String> {
        self.with_active(|active| active.store.name().to_string())
    }

    fn with_active<R>(&self, f: impl FnOnce(&Active) -> R) -> MellonResult<R> {
        let inner = self.inner.read().map_err(|_| lock_err("hierarchy"))?;
        match (inner.state, inner.active.as_ref()) {
            (HierarchyState::Ready, Some(active)) => Ok(f(active)),
            (HierarchyState::SwitchingStore, _) => Err(ContextError::Switching.into()),
            (HierarchyState::Closed, _) => Err(ContextError::HierarchyClosed.into()),
            _ => Err(ContextError::Uninitialized.into()),
        }
    }

    /// The context that writes to the store.
    pub fn root_context(&self) -> MellonResult<Context> {
        self.with_active(|active| active.root.clone())
    }

    /// The foreground context; its parent is the root.
    pub fn main_context(&self) -> MellonResult<Context> {
        self.with_active(|active| active.main.clone())
    }

    /// A fresh context whose parent is main, on a lane of its own.
    ///
    /// Use one per logical transaction and drop it afterwards; the lane
    /// stops with the last handle.
    pub fn new_background_context(&self) -> MellonResult<Context> {
        self.new_background_context_with(MergePolicy::default())
    }

    pub fn new_background_context_with(&self, merge_policy: MergePolicy) -> MellonResult<Context> {
        self.with_active(|active| {
            let idx = self.next_lane.fetch_add(1, Ordering::Relaxed);
            let lane = Arc::new(Lane::start(
                format!("background-{idx}"),
                self.config.lane_queue_capacity,
            ));
            active
                .background
                .lock()
                .map_err(|_| lock_err("background lanes"))?
                .push(Arc::downgrade(&lane));
            Ok(active.main.child(ContextKind::Background, lane, merge_policy))
        })?
    }

    /// Runs `block` on a fresh background context, then commits it.
    ///
    /// Blocks until the block and the commit have run. The commit always
    /// executes exactly once; its failure is logged, not returned. If the
    /// block panics its changes are discarded before that commit and the
    /// call returns [`ContextError::TransactionPanicked`].
    ///
    /// Must not be called from the main or root lane: the background lane
    /// waits on main while main would wait on it.
    pub fn transaction<R, F>(&self, block: F) -> MellonResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Context) -> R + Send + 'static,
    {
        let context = self.new_background_context()?;
        context.perform_and_wait(|ctx| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| block(ctx)));
            if result.is_err() {
                error!(context = %ctx.name(), "transaction block panicked; discarding its changes");
                if let Err(e) = ctx.rollback() {
                    warn!(context = %ctx.name(), error = %e, "rollback after panic failed");
                }
            }
            if let Err(e) = ctx.commit_local() {
                warn!(context = %ctx.name(), error = %e, "transaction commit failed");
            }
            result.map_err(|_| {
                MellonError::from(ContextError::TransactionPanicked {
                    lane: ctx.lane().name().to_string(),
                })
            })
        })?
    }

    /// Commits main, then root.
    pub fn save_changes(&self) -> MellonResult<()> {
        let (main, root) = self.with_active(|active| (active.main.clone(), active.root.clone()))?;
        main.commit()?;
        root.commit()?;
        Ok(())
    }

    /// Waits until all work queued on every lane, including propagated
    /// commits, has run. Must not be called from a lane.
    pub fn drain(&self) -> MellonResult<()> {
        let lanes = self.with_active(Active::lanes)??;
        for lane in lanes {
            lane.drain()?;
        }
        Ok(())
    }

    /// Commit events delivered since the hierarchy was created.
    #[must_use]
    pub fn notifications(&self) -> u64 {
        self.notifier.notifications()
    }

    /// Counters of the active store.
    pub fn stats(&self) -> MellonResult<StoreStats> {
        self.with_active(|active| active.store.stats())
    }

    /// Replaces the active store with store `name` and rebuilds the tree.
    ///
    /// Every lane is drained first. Contexts issued before the switch become
    /// invalid for writes and queries. If the new store fails to open, the
    /// previous one stays active.
    pub fn switch_to(&self, name: &str) -> MellonResult<()> {
        let _switching = self.switch_lock.lock().map_err(|_| lock_err("switch"))?;

        let previous = {
            let mut inner = self.inner.write().map_err(|_| lock_err("hierarchy"))?;
            if inner.state == HierarchyState::Closed {
                return Err(ContextError::HierarchyClosed.into());
            }
            inner.state = HierarchyState::SwitchingStore;
            inner.active.take()
        };

        if let Some(old) = &previous {
            if let Err(e) = old.drain() {
                warn!(store = %old.store.name(), error = %e, "draining lanes before switch failed");
            }
        }

        let reopening = previous.as_ref().is_some_and(|old| old.store.name() == name);
        if reopening {
            // The file lock must be released before the same files reopen.
            if let Some(old) = previous {
                old.close();
            }
            return self.install(name, None);
        }

        self.install(name, previous)
    }

    fn install(&self, name: &str, previous: Option<Active>) -> MellonResult<()> {
        let store = match Store::open(name, self.mode, &self.config, Arc::clone(&self.schema)) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(store = name, error = %e, "opening store failed");
                let mut inner = self.inner.write().map_err(|_| lock_err("hierarchy"))?;
                inner.state = if previous.is_some() {
                    HierarchyState::Ready
                } else {
                    HierarchyState::Uninitialized
                };
                inner.active = previous;
                return Err(e);
            }
        };

        if let Some(old) = previous {
            info!(from = %old.store.name(), to = name, "switching store");
            old.close();
        }

        self.generation.fetch_add(1, Ordering::AcqRel);
        let active = self.build(store);

        let mut inner = self.inner.write().map_err(|_| lock_err("hierarchy"))?;
        inner.active = Some(active);
        inner.state = HierarchyState::Ready;
        info!(store = name, mode = ?self.mode, "store active");
        Ok(())
    }

    fn build(&self, store: Arc<Store>) -> Active {
        let capacity = self.config.lane_queue_capacity;
        let root = Context::root(
            Arc::new(Lane::start("root", capacity)),
            Arc::clone(&store),
            Arc::clone(&self.generation),
            Arc::clone(&self.notifier),
            self.config.default_page_size,
        );
        let main = root.child(
            ContextKind::Main,
            Arc::new(Lane::start("main", capacity)),
            MergePolicy::default(),
        );
        Active {
            store,
            root,
            main,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Copies the active store's file set to store `to`.
    ///
    /// Lanes are drained first and the copy runs on the root lane, so no
    /// commit lands half-way through.
    pub fn copy_active_store(&self, to: &str) -> MellonResult<()> {
        self.drain()?;
        let (root, files) = self.with_active(|active| (active.root.clone(), active.store.files().cloned()))?;
        let Some(from) = files else {
            return Err(CopyError::SourceMissing {
                path: self.config.base_dir.join(self.active_store_name()?),
            }
            .into());
        };
        let to = StoreFiles::new(&self.config.base_dir, to);
        root.perform_and_wait(move |_| files::copy(&from, &to))??;
        Ok(())
    }

    /// Removes the file set of store `name`, which must not be active.
    pub fn delete_store(&self, name: &str) -> MellonResult<()> {
        if self.active_store_name().ok().as_deref() == Some(name) {
            return Err(DeleteError::InUse { name: name.to_string() }.into());
        }
        Store::delete(&self.config, name)
    }

    /// Drains every lane and closes the active store.
    pub fn close(&self) -> MellonResult<()> {
        let _switching = self.switch_lock.lock().map_err(|_| lock_err("switch"))?;
        let active = {
            let mut inner = self.inner.write().map_err(|_| lock_err("hierarchy"))?;
            if inner.state == HierarchyState::Closed {
                return Ok(());
            }
            inner.state = HierarchyState::Closed;
            inner.active.take()
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(active) = active {
            active.close();
        }
        info!("context hierarchy closed");
        Ok(())
    }
}

impl Drop for ContextHierarchy {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing context hierarchy on drop");
        }
    }
}

impl std::fmt::Debug for ContextHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHierarchy")
            .field("mode", &self.mode)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
