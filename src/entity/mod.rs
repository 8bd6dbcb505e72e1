//! Object identity and the handles callers hold.
//!
//! - [`EntityRef`]: store-wide identity of one logical row
//! - [`Record`]: a materialized copy of that row
//! - [`ManagedObject`]: a context-bound handle to a row
//! - [`Entity`]: typed wrapper contract for modelled entities

mod entity_ref;
mod managed;
mod record;

pub use entity_ref::EntityRef;
pub use managed::{Entity, ManagedObject};
pub use record::Record;
