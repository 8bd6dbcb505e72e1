//! Commit propagation.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use super::{CommitOutcome, Context};

/// Carries "context committed" events from a context to its parent.
///
/// There is one notifier per hierarchy. Each event re-dispatches a commit
/// onto the parent's lane, so a change set walks up one level at a time
/// until the root persists it.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    notifications: AtomicU64,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commit events delivered so far. Commits with nothing
    /// pending never produce one.
    #[must_use]
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Acquire)
    }

    /// `source` has merged `changes` objects into `target`; schedule
    /// `target`'s own commit.
    pub(crate) fn did_commit(&self, source: &Context, target: &Context, changes: usize) {
        self.notifications.fetch_add(1, Ordering::AcqRel);
        debug!(source = %source.name(), target = %target.name(), changes, "context did commit");

        let scheduled = target.perform(|ctx| match ctx.commit_local() {
            Ok(CommitOutcome::NoChanges) => {}
            Ok(outcome) => {
                debug!(context = %ctx.name(), changes = outcome.changes(), "propagated commit");
            }
            Err(e) => {
                warn!(context = %ctx.name(), error = %e, "propagated commit failed; changes stay pending");
            }
        });
        if let Err(e) = scheduled {
            warn!(target = %target.name(), error = %e, "could not schedule propagated commit");
        }
    }
}
