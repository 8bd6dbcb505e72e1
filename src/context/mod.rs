//! Context hierarchy, confinement lanes and commit propagation.
//!
//! Every [`Context`] is confined to one lane and keeps its own pending
//! [`ChangeSet`]. Reads merge the change set over the parent's view; a
//! commit merges it into the parent, and the [`ChangeNotifier`] keeps
//! re-dispatching commits upward until the root persists them.

mod change;
#[allow(clippy::module_inception)]
mod context;
mod hierarchy;
mod lane;
mod notifier;

pub use change::{ChangeSet, CommitOutcome, FieldPatch, MergePolicy};
pub use context::{Context, ContextKind};
pub use hierarchy::{ContextHierarchy, HierarchyState};
pub use notifier::ChangeNotifier;
