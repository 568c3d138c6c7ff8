//! Rendering engine
//!
//! A render pass turns each record into the [`Presented`] structure its
//! presenter declares, then post-processes it:
//! 1. associations collapse to id references (or are dropped)
//! 2. fields are gated by `optional` and conditionals, then evaluated
//! 3. the result is converted to JSON, normalising dates and times
//!
//! [`RenderContext`] carries the per-pass caches. It is built fresh for every
//! group of records; within a request, bucket gathering and the primary
//! render share the primary group's context.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::Presenter;
use crate::db::{Record, ReflectionKind, Related};
use crate::dsl::{Association, Configuration, Field, Helpers};
use crate::error::{Error, Result};
use crate::inflect;
use crate::value::Value;

/// One node of a record's raw presented structure.
#[derive(Debug, Clone)]
pub enum Presented {
    Value(Value),
    /// Evaluated (or dropped) during post-processing
    Field(Arc<Field>),
    /// Collapsed to `<name>_id` / `<name>_ids` (or dropped) during
    /// post-processing
    Association(Arc<Association>),
    Map(BTreeMap<String, Presented>),
    List(Vec<Presented>),
}

impl Presented {
    pub fn map() -> Self {
        Presented::Map(BTreeMap::new())
    }

    /// Insert into a `Map` node; other nodes are left untouched.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Presented>) {
        if let Presented::Map(map) = self {
            map.insert(key.into(), value.into());
        }
    }
}

impl From<Value> for Presented {
    fn from(value: Value) -> Self {
        Presented::Value(value)
    }
}

impl From<&str> for Presented {
    fn from(value: &str) -> Self {
        Presented::Value(value.into())
    }
}

impl From<String> for Presented {
    fn from(value: String) -> Self {
        Presented::Value(value.into())
    }
}

impl From<i64> for Presented {
    fn from(value: i64) -> Self {
        Presented::Value(value.into())
    }
}

impl From<bool> for Presented {
    fn from(value: bool) -> Self {
        Presented::Value(value.into())
    }
}

impl From<Arc<Field>> for Presented {
    fn from(field: Arc<Field>) -> Self {
        Presented::Field(field)
    }
}

impl From<Arc<Association>> for Presented {
    fn from(association: Arc<Association>) -> Self {
        Presented::Association(association)
    }
}

impl From<Vec<Presented>> for Presented {
    fn from(items: Vec<Presented>) -> Self {
        Presented::List(items)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConditionalKey {
    Request(String),
    Model { name: String, class: String, id: i64 },
}

/// Per-pass state threaded through every field and association evaluation.
pub struct RenderContext {
    models: Vec<Arc<Record>>,
    helpers: Helpers,
    conditionals: Configuration,
    optional_fields: BTreeSet<String>,
    requested_associations: BTreeSet<String>,
    conditional_cache: RefCell<HashMap<ConditionalKey, bool>>,
    lookup_cache: RefCell<HashMap<String, Arc<Value>>>,
    association_cache: RefCell<HashMap<String, Arc<HashMap<i64, Related>>>>,
}

impl RenderContext {
    /// `models` is the whole group being rendered; lookups receive all of it.
    pub fn new(models: Vec<Arc<Record>>, helpers: Helpers, conditionals: Configuration) -> Self {
        Self {
            models,
            helpers,
            conditionals,
            optional_fields: BTreeSet::new(),
            requested_associations: BTreeSet::new(),
            conditional_cache: RefCell::new(HashMap::new()),
            lookup_cache: RefCell::new(HashMap::new()),
            association_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_optional_fields(mut self, fields: Vec<String>) -> Self {
        self.optional_fields = fields.into_iter().collect();
        self
    }

    pub fn with_requested_associations(mut self, associations: Vec<String>) -> Self {
        self.requested_associations = associations.into_iter().collect();
        self
    }

    pub fn helpers(&self) -> &Helpers {
        &self.helpers
    }

    pub fn models(&self) -> &[Arc<Record>] {
        &self.models
    }

    pub fn is_field_requested(&self, name: &str) -> bool {
        self.optional_fields.contains(name)
    }

    pub fn is_association_requested(&self, name: &str) -> bool {
        self.requested_associations.contains(name)
    }

    /// Evaluate a named conditional, at most once per pass for request
    /// conditionals and once per record for model conditionals.
    pub fn conditional_matches(&self, name: &str, model: &Record) -> Result<bool> {
        let conditional = self
            .conditionals
            .get(name)
            .and_then(|value| value.as_conditional().cloned())
            .ok_or_else(|| Error::UnknownConditional(name.to_string()))?;

        let key = if conditional.is_model() {
            ConditionalKey::Model {
                name: name.to_string(),
                class: model.class_name().to_string(),
                id: model.id(),
            }
        } else {
            ConditionalKey::Request(name.to_string())
        };

        let cached = self.conditional_cache.borrow().get(&key).copied();
        if let Some(result) = cached {
            return Ok(result);
        }

        let result = conditional.evaluate(model, &self.helpers);
        self.conditional_cache.borrow_mut().insert(key, result);
        Ok(result)
    }

    /// The cached lookup table for a field path, computing it on first use.
    pub fn lookup_value<F>(&self, key: &str, compute: F) -> Arc<Value>
    where
        F: FnOnce() -> Value,
    {
        let cached = self.lookup_cache.borrow().get(key).cloned();
        if let Some(table) = cached {
            return table;
        }

        let table = Arc::new(compute());
        self.lookup_cache
            .borrow_mut()
            .insert(key.to_string(), Arc::clone(&table));
        table
    }

    /// The cached lookup table for an association, computing it on first use.
    pub fn association_lookup<F>(&self, key: &str, compute: F) -> Arc<HashMap<i64, Related>>
    where
        F: FnOnce() -> HashMap<i64, Related>,
    {
        let cached = self.association_cache.borrow().get(key).cloned();
        if let Some(table) = cached {
            return table;
        }

        let table = Arc::new(compute());
        self.association_cache
            .borrow_mut()
            .insert(key.to_string(), Arc::clone(&table));
        table
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("models", &self.models.len())
            .field("optional_fields", &self.optional_fields)
            .field("requested_associations", &self.requested_associations)
            .finish()
    }
}

/// Present `model` through `presenter` and post-process the result to JSON.
pub(crate) fn present_and_post_process(
    presenter: &Presenter,
    model: &Record,
    ctx: &RenderContext,
) -> Result<JsonValue> {
    let presented = presenter.present(model);
    Ok(post_process(presented, model, ctx)?.to_json())
}

fn post_process(presented: Presented, model: &Record, ctx: &RenderContext) -> Result<Value> {
    match presented {
        Presented::Value(value) => Ok(value),
        Presented::Field(field) => field.evaluate(model, ctx),
        // Associations only render under a key; a bare one has nowhere to go.
        Presented::Association(_) => Ok(Value::Null),
        Presented::List(items) => {
            let mut result = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Presented::Association(_) => {}
                    Presented::Field(field) => {
                        if field.presentable(model, ctx)? {
                            result.push(field.evaluate(model, ctx)?);
                        }
                    }
                    other => result.push(post_process(other, model, ctx)?),
                }
            }
            Ok(Value::Array(result))
        }
        Presented::Map(entries) => {
            let mut result = BTreeMap::new();
            for (key, entry) in entries {
                match entry {
                    Presented::Association(association) => {
                        collapse_association(&key, &association, model, ctx, &mut result)?;
                    }
                    Presented::Field(field) => {
                        if field.presentable(model, ctx)? {
                            result.insert(key, field.evaluate(model, ctx)?);
                        }
                    }
                    other => {
                        result.insert(key, post_process(other, model, ctx)?);
                    }
                }
            }
            Ok(Value::Map(result))
        }
    }
}

fn id_value(record: &Record) -> Value {
    Value::String(record.id().to_string())
}

/// Replace an association marker with id references.
///
/// A belongs-to backed by a foreign key column renders from the column with
/// no extra work. Anything else renders only when requested as an include.
fn collapse_association(
    key: &str,
    association: &Association,
    model: &Record,
    ctx: &RenderContext,
    out: &mut BTreeMap<String, Value>,
) -> Result<()> {
    if !association.presentable(model, ctx)? {
        return Ok(());
    }

    let reflection = association
        .method_name()
        .and_then(|method| model.class().reflection(method));
    match reflection.map(|reflection| &reflection.kind) {
        Some(ReflectionKind::BelongsTo { foreign_key, .. }) if model.has_attribute(foreign_key) => {
            out.insert(format!("{}_id", key), column_id(model, foreign_key));
            return Ok(());
        }
        Some(ReflectionKind::PolymorphicBelongsTo {
            foreign_key,
            type_column,
        }) if model.has_attribute(foreign_key) => {
            out.insert(format!("{}_id", key), column_id(model, foreign_key));
            out.insert(
                format!("{}_type", key),
                model.attribute(type_column).cloned().unwrap_or_default(),
            );
            return Ok(());
        }
        _ => {}
    }

    if !ctx.is_association_requested(association.name()) {
        return Ok(());
    }

    match association.run_on(model, ctx)? {
        Related::Many(records) => {
            out.insert(
                format!("{}_ids", inflect::singularize(key)),
                Value::Array(records.iter().map(|record| id_value(record)).collect()),
            );
        }
        Related::One(record) => {
            out.insert(
                format!("{}_id", key),
                record.as_deref().map(id_value).unwrap_or_default(),
            );
            if association.is_polymorphic() {
                out.insert(
                    format!("{}_type", key),
                    record
                        .map(|record| Value::from(record.class_name()))
                        .unwrap_or_default(),
                );
            }
        }
    }
    Ok(())
}

fn column_id(model: &Record, column: &str) -> Value {
    match model.attribute(column) {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(other) => other
            .as_i64()
            .map(|id| Value::String(id.to_string()))
            .unwrap_or_else(|| other.clone()),
    }
}
