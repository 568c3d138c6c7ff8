//! Model layer at the presenter's interface boundary
//!
//! Presenters do not own a storage engine. They work against:
//! - [`ModelClass`] - table metadata and association reflections
//! - [`Record`] - one decoded row plus any preloaded associations
//! - [`Scope`] - a query description the [`DataSource`] executes
//!
//! Re-exports are provided for convenience.

pub mod preload;
pub mod scope;
pub mod source;
pub mod sql;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

pub use preload::preload;
pub use scope::{Condition, Direction, Operator, Ordering, Scope};
pub use source::DataSource;
#[cfg(feature = "sqlite")]
pub use source::SqliteSource;
#[cfg(feature = "mysql")]
pub use source::MySqlSource;
pub use sql::{Dialect, Select, SqlQuery};

// ============================================================================
// Model classes
// ============================================================================

/// How an association is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionKind {
    /// `foreign_key` on this table points at `target`
    BelongsTo { foreign_key: String, target: String },
    /// `foreign_key` + `type_column` on this table point at any class
    PolymorphicBelongsTo {
        foreign_key: String,
        type_column: String,
    },
    /// `foreign_key` on the `target` table points back at this record
    HasMany { foreign_key: String, target: String },
    /// Like `HasMany`, but at most one record
    HasOne { foreign_key: String, target: String },
}

/// Association metadata for one relation of a model class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    pub name: String,
    pub kind: ReflectionKind,
}

impl Reflection {
    pub fn is_multiple(&self) -> bool {
        matches!(self.kind, ReflectionKind::HasMany { .. })
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(self.kind, ReflectionKind::PolymorphicBelongsTo { .. })
    }
}

/// Metadata about a table-backed model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelClass {
    /// Class name (e.g. "Workspace")
    pub name: String,
    /// SQL table name (e.g. "workspaces")
    pub table: String,
    /// Primary key column
    pub primary_key: String,
    /// Base class for single-table inheritance
    pub sti_base: Option<String>,
    reflections: Vec<Reflection>,
}

impl ModelClass {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            sti_base: None,
            reflections: Vec::new(),
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn sti_base(mut self, class: impl Into<String>) -> Self {
        self.sti_base = Some(class.into());
        self
    }

    pub fn belongs_to(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.reflections.push(Reflection {
            name: name.into(),
            kind: ReflectionKind::BelongsTo {
                foreign_key: foreign_key.into(),
                target: target.into(),
            },
        });
        self
    }

    /// Polymorphic belongs-to using `<name>_id` and `<name>_type` columns.
    pub fn belongs_to_polymorphic(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.reflections.push(Reflection {
            kind: ReflectionKind::PolymorphicBelongsTo {
                foreign_key: format!("{}_id", name),
                type_column: format!("{}_type", name),
            },
            name,
        });
        self
    }

    pub fn has_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.reflections.push(Reflection {
            name: name.into(),
            kind: ReflectionKind::HasMany {
                foreign_key: foreign_key.into(),
                target: target.into(),
            },
        });
        self
    }

    pub fn has_one(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.reflections.push(Reflection {
            name: name.into(),
            kind: ReflectionKind::HasOne {
                foreign_key: foreign_key.into(),
                target: target.into(),
            },
        });
        self
    }

    pub fn reflection(&self, name: &str) -> Option<&Reflection> {
        self.reflections.iter().find(|r| r.name == name)
    }

    pub fn reflections(&self) -> &[Reflection] {
        &self.reflections
    }
}

/// Registry of model classes, looked up by class name or table name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    classes: HashMap<String, Arc<ModelClass>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: ModelClass) -> Arc<ModelClass> {
        let class = Arc::new(class);
        self.classes.insert(class.name.clone(), Arc::clone(&class));
        class
    }

    pub fn with(mut self, class: ModelClass) -> Self {
        self.register(class);
        self
    }

    /// Look up a class by its class name.
    pub fn class(&self, name: &str) -> Option<Arc<ModelClass>> {
        self.classes.get(name).cloned()
    }

    /// Look up a class by its class name, failing loudly.
    pub fn class_named(&self, name: &str) -> Result<Arc<ModelClass>> {
        self.class(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    /// Resolve a resource name such as `workspaces` or `Workspace`.
    pub fn resolve(&self, resource: &str) -> Result<Arc<ModelClass>> {
        if let Some(class) = self.class(resource) {
            return Ok(class);
        }

        self.classes
            .values()
            .find(|class| class.table == resource)
            .cloned()
            .ok_or_else(|| Error::UnknownModel(resource.to_string()))
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<ModelClass>> {
        self.classes.values()
    }
}

// ============================================================================
// Records
// ============================================================================

/// Loaded association target(s).
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Arc<Record>>),
    Many(Vec<Arc<Record>>),
}

impl Related {
    pub fn records(&self) -> Vec<Arc<Record>> {
        match self {
            Related::One(record) => record.iter().cloned().collect(),
            Related::Many(records) => records.clone(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Related::One(Some(record)) => Value::Record(Arc::clone(record)),
            Related::One(None) => Value::Null,
            Related::Many(records) => {
                Value::Array(records.iter().cloned().map(Value::Record).collect())
            }
        }
    }
}

impl From<Record> for Related {
    fn from(record: Record) -> Self {
        Related::One(Some(Arc::new(record)))
    }
}

impl From<Option<Arc<Record>>> for Related {
    fn from(record: Option<Arc<Record>>) -> Self {
        Related::One(record)
    }
}

impl From<Vec<Arc<Record>>> for Related {
    fn from(records: Vec<Arc<Record>>) -> Self {
        Related::Many(records)
    }
}

impl From<Vec<Record>> for Related {
    fn from(records: Vec<Record>) -> Self {
        Related::Many(records.into_iter().map(Arc::new).collect())
    }
}

/// Types that can hand their fields to the presenter layer.
///
/// Usually derived with `#[derive(Attributes)]`.
pub trait Attributes {
    fn attributes(&self) -> BTreeMap<String, Value>;
}

/// One model instance.
#[derive(Clone)]
pub struct Record {
    class: Arc<ModelClass>,
    id: i64,
    attributes: BTreeMap<String, Value>,
    associations: HashMap<String, Related>,
}

impl Record {
    /// Build a record from decoded attributes; the id is read from the class's
    /// primary key column.
    pub fn new(class: Arc<ModelClass>, attributes: BTreeMap<String, Value>) -> Self {
        let id = attributes
            .get(&class.primary_key)
            .and_then(Value::as_i64)
            .unwrap_or_default();

        Self {
            class,
            id,
            attributes,
            associations: HashMap::new(),
        }
    }

    pub fn from_model<M: Attributes>(class: &Arc<ModelClass>, model: &M) -> Self {
        Self::new(Arc::clone(class), model.attributes())
    }

    /// Wrap a plain value as a record of `class` so that block sub-fields can
    /// read from it. Maps become attributes; anything else is stored under
    /// `value`.
    pub fn detached(class: &Arc<ModelClass>, value: Value, fallback_id: i64) -> Self {
        let attributes = match value {
            Value::Map(map) => map,
            other => BTreeMap::from([("value".to_string(), other)]),
        };
        let mut record = Self::new(Arc::clone(class), attributes);
        if !record.attributes.contains_key(&class.primary_key) {
            record.id = fallback_id;
        }
        record
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn class(&self) -> &Arc<ModelClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn association(&self, name: &str) -> Option<&Related> {
        self.associations.get(name)
    }

    pub fn set_association(&mut self, name: impl Into<String>, related: Related) {
        self.associations.insert(name.into(), related);
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.associations.contains_key(name)
    }

    /// Whether `name` is an attribute, a loaded association, or an
    /// association the class declares.
    pub fn responds_to(&self, name: &str) -> bool {
        self.has_attribute(name) || self.is_loaded(name) || self.class.reflection(name).is_some()
    }

    /// Read `name` as a value: an attribute, or a loaded association.
    pub fn read(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attributes.get(name) {
            return Some(value.clone());
        }
        self.associations.get(name).map(Related::to_value)
    }

    /// Read a declared association, which must have been preloaded.
    ///
    /// Classes that do not declare `name` yield `None` so that mixed
    /// (STI/polymorphic) collections render without error.
    pub fn related(&self, name: &str) -> Result<Option<Related>> {
        if let Some(related) = self.associations.get(name) {
            return Ok(Some(related.clone()));
        }

        match self.class.reflection(name) {
            Some(_) => Err(Error::AssociationNotLoaded {
                class: self.class.name.clone(),
                association: name.to_string(),
            }),
            None => Ok(None),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.class.name == other.class.name && self.id == other.id
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("class", &self.class.name)
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("associations", &self.associations.keys().collect::<Vec<_>>())
            .finish()
    }
}
