//! Context-bound object handles and the typed entity contract.

use std::fmt;

use crate::context::Context;
use crate::error::MellonResult;
use crate::query::QueryBuilder;
use crate::value::Value;

use super::{EntityRef, Record};

/// A handle to one object as seen through one context.
///
/// The handle itself is cheap to clone and holds no field values: every read
/// and write is confined to the owning context's lane and served from that
/// context's materialized copy. Two handles for the same [`EntityRef`] in two
/// contexts observe two independent copies until a commit merges them.
#[derive(Clone)]
pub struct ManagedObject {
    context: Context,
    entity_ref: EntityRef,
    entity: String,
}

impl ManagedObject {
    pub(crate) fn new(context: Context, entity_ref: EntityRef, entity: impl Into<String>) -> Self {
        Self {
            context,
            entity_ref,
            entity: entity.into(),
        }
    }

    /// Returns the stable identity of this object.
    #[must_use]
    pub const fn entity_ref(&self) -> EntityRef {
        self.entity_ref
    }

    /// Returns the entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Returns the context this handle is bound to.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Reads a field from this context's copy.
    pub fn get(&self, field: &str) -> MellonResult<Value> {
        self.context.read_field(self.entity_ref, field)
    }

    /// Writes a field on this context's copy and records the change.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> MellonResult<()> {
        self.context.write_field(self.entity_ref, field, value.into())
    }

    /// Returns a snapshot of this context's copy.
    pub fn values(&self) -> MellonResult<Record> {
        self.context.snapshot(self.entity_ref)
    }

    /// Schedules removal of this object on the owning context's lane and
    /// returns immediately.
    pub fn delete(&self) -> MellonResult<()> {
        self.context.remove_async(self.entity_ref)
    }

    /// Removes this object, waiting until the owning context has recorded
    /// the deletion.
    pub fn delete_sync(&self) -> MellonResult<()> {
        self.context.remove(self.entity_ref)
    }

    /// Materializes this object in another context.
    pub fn in_context(&self, context: &Context) -> MellonResult<Self> {
        context.fetch_object(self)
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("entity", &self.entity)
            .field("entity_ref", &self.entity_ref)
            .field("context", &self.context.name())
            .finish()
    }
}

impl PartialEq for ManagedObject {
    fn eq(&self, other: &Self) -> bool {
        self.entity_ref == other.entity_ref && self.context.id() == other.context.id()
    }
}

/// Typed wrapper over a modelled entity.
///
/// Implementors name their entity and decode themselves from a handle; the
/// create and query entry points are provided.
///
/// ```ignore
/// struct Fruit { id: String, name: Option<String> }
///
/// impl Entity for Fruit {
///     const ENTITY_NAME: &'static str = "Fruit";
///
///     fn from_object(object: &ManagedObject) -> MellonResult<Self> {
///         let record = object.values()?;
///         Ok(Self {
///             id: record.get("id").as_string().unwrap_or_default().to_string(),
///             name: record.get("name").as_string().map(str::to_string),
///         })
///     }
/// }
/// ```
pub trait Entity: Sized {
    /// Entity name as declared in the schema.
    const ENTITY_NAME: &'static str;

    /// Decodes a typed value from a handle.
    fn from_object(object: &ManagedObject) -> MellonResult<Self>;

    /// Inserts a new object of this entity and assigns its permanent identity.
    fn create(context: &Context) -> MellonResult<ManagedObject> {
        context.insert(Self::ENTITY_NAME)
    }

    /// Starts a query over this entity.
    fn query(context: &Context) -> QueryBuilder {
        context.query(Self::ENTITY_NAME)
    }
}
