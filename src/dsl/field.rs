//! Presentable fields
//!
//! A [`Field`] knows how to compute one output key for a record. Leaf fields
//! resolve their value through a [`ValueSource`]; block fields (`Hash`,
//! `Array`, `NestedArray`) own a configuration of sub-fields and render a
//! nested structure from an intermediate "evaluated" value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::configuration::Configuration;
use super::helpers::Helpers;
use crate::db::Record;
use crate::error::{Error, Result};
use crate::presenter::RenderContext;
use crate::value::Value;

/// Computes a value from the record being rendered.
pub type DynamicFn = Arc<dyn Fn(&Record, &Helpers) -> Value + Send + Sync>;
/// Computes a value from request state alone.
pub type AmbientFn = Arc<dyn Fn(&Helpers) -> Value + Send + Sync>;
/// Computes values for a whole collection at once.
pub type LookupFn = Arc<dyn Fn(&[Arc<Record>], &Helpers) -> Value + Send + Sync>;
/// Extracts one record's value from a lookup result.
pub type LookupFetchFn = Arc<dyn Fn(&Value, &Record, &Helpers) -> Value + Send + Sync>;

/// Where a field's value comes from.
#[derive(Clone)]
pub enum ValueSource {
    /// Same-named attribute or association on the record
    Accessor,
    /// Differently-named attribute or association
    Via(String),
    Dynamic(DynamicFn),
    Ambient(AmbientFn),
    /// Computed once per render pass for every record, then fetched per record
    Lookup {
        lookup: LookupFn,
        fetch: Option<LookupFetchFn>,
    },
}

impl ValueSource {
    pub fn is_accessor(&self) -> bool {
        matches!(self, ValueSource::Accessor)
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, ValueSource::Lookup { .. })
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Accessor => f.write_str("Accessor"),
            ValueSource::Via(name) => write!(f, "Via({:?})", name),
            ValueSource::Dynamic(_) => f.write_str("Dynamic"),
            ValueSource::Ambient(_) => f.write_str("Ambient"),
            ValueSource::Lookup { fetch, .. } => write!(f, "Lookup {{ custom_fetch: {} }}", fetch.is_some()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Boolean,
    Integer,
    Decimal,
    Date,
    DateTime,
    Id,
    Hash,
    Array,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Id => "id",
            FieldType::Hash => "hash",
            FieldType::Array => "array",
        }
    }
}

/// Shape of a block field's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// One object built from a single evaluated value
    Hash,
    /// One object per element of the evaluated sequence
    Array,
    /// Like `Array`, but elements may themselves be sequences
    NestedArray,
}

/// Options accepted when declaring a field.
#[derive(Clone, Default)]
pub struct FieldOptions {
    via: Option<String>,
    dynamic: Option<DynamicFn>,
    ambient: Option<AmbientFn>,
    lookup: Option<LookupFn>,
    lookup_fetch: Option<LookupFetchFn>,
    optional: bool,
    conditions: Vec<String>,
    item_type: Option<FieldType>,
    use_parent_value: Option<bool>,
    nodoc: bool,
    info: Option<String>,
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn via(mut self, name: impl Into<String>) -> Self {
        self.via = Some(name.into());
        self
    }

    pub fn dynamic<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record, &Helpers) -> Value + Send + Sync + 'static,
    {
        self.dynamic = Some(Arc::new(f));
        self
    }

    /// A dynamic value that does not depend on the record.
    pub fn ambient<F>(mut self, f: F) -> Self
    where
        F: Fn(&Helpers) -> Value + Send + Sync + 'static,
    {
        self.ambient = Some(Arc::new(f));
        self
    }

    /// Batch computation over every record in the render pass. The default
    /// fetch indexes the returned map by the record id.
    pub fn lookup<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Arc<Record>], &Helpers) -> Value + Send + Sync + 'static,
    {
        self.lookup = Some(Arc::new(f));
        self
    }

    pub fn lookup_fetch<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Record, &Helpers) -> Value + Send + Sync + 'static,
    {
        self.lookup_fetch = Some(Arc::new(f));
        self
    }

    /// Only rendered when requested through `fields`.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Only rendered when the named conditional matches. May be repeated;
    /// all conditionals must match.
    pub fn when(mut self, conditional: impl Into<String>) -> Self {
        self.conditions.push(conditional.into());
        self
    }

    pub fn item_type(mut self, item_type: FieldType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    /// Inside a block: read from the block's evaluated value (`true`, the
    /// default) or from the outer record (`false`).
    pub fn use_parent_value(mut self, enabled: bool) -> Self {
        self.use_parent_value = Some(enabled);
        self
    }

    pub fn nodoc(mut self) -> Self {
        self.nodoc = true;
        self
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    fn into_source(self, name: &str) -> Result<(ValueSource, FieldOptions)> {
        let declared = [
            self.via.is_some(),
            self.dynamic.is_some(),
            self.ambient.is_some(),
            self.lookup.is_some(),
        ]
        .iter()
        .filter(|d| **d)
        .count();

        if declared > 1 {
            return Err(Error::invalid_declaration(
                name,
                "only one of via, dynamic or lookup may be given",
            ));
        }
        if self.lookup_fetch.is_some() && self.lookup.is_none() {
            return Err(Error::invalid_declaration(name, "lookup_fetch requires a lookup"));
        }

        let source = if let Some(lookup) = &self.lookup {
            ValueSource::Lookup {
                lookup: Arc::clone(lookup),
                fetch: self.lookup_fetch.clone(),
            }
        } else if let Some(dynamic) = &self.dynamic {
            ValueSource::Dynamic(Arc::clone(dynamic))
        } else if let Some(ambient) = &self.ambient {
            ValueSource::Ambient(Arc::clone(ambient))
        } else if let Some(via) = &self.via {
            ValueSource::Via(via.clone())
        } else {
            ValueSource::Accessor
        };

        Ok((source, self))
    }
}

/// One presentable output key.
pub struct Field {
    name: String,
    path: String,
    field_type: FieldType,
    source: ValueSource,
    optional: bool,
    conditions: Vec<String>,
    item_type: Option<FieldType>,
    use_parent_value: bool,
    nodoc: bool,
    info: Option<String>,
    block: Option<(BlockKind, Configuration)>,
}

impl Field {
    /// Declare a leaf field. `path` identifies the field within its presenter
    /// (e.g. `stats.open`) and keys its lookup cache.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        field_type: FieldType,
        options: FieldOptions,
    ) -> Result<Self> {
        let name = name.into();
        let (source, options) = options.into_source(&name)?;

        Ok(Self {
            path: path.into(),
            field_type,
            source,
            optional: options.optional,
            conditions: options.conditions,
            item_type: options.item_type,
            use_parent_value: options.use_parent_value.unwrap_or(true),
            nodoc: options.nodoc,
            info: options.info,
            block: None,
            name,
        })
    }

    /// Declare a block field rendering the sub-fields held by `configuration`.
    pub fn block(
        name: impl Into<String>,
        path: impl Into<String>,
        kind: BlockKind,
        options: FieldOptions,
        configuration: Configuration,
    ) -> Result<Self> {
        let field_type = match kind {
            BlockKind::Hash => FieldType::Hash,
            BlockKind::Array | BlockKind::NestedArray => FieldType::Array,
        };
        let mut field = Self::new(name, path, field_type, options)?;
        field.block = Some((kind, configuration));
        Ok(field)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn source(&self) -> &ValueSource {
        &self.source
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    pub fn item_type(&self) -> Option<FieldType> {
        self.item_type
    }

    pub fn use_parent_value(&self) -> bool {
        self.use_parent_value
    }

    pub fn nodoc(&self) -> bool {
        self.nodoc
    }

    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    pub fn block_kind(&self) -> Option<BlockKind> {
        self.block.as_ref().map(|(kind, _)| *kind)
    }

    /// Sub-field configuration of a block field.
    pub fn configuration(&self) -> Option<&Configuration> {
        self.block.as_ref().map(|(_, config)| config)
    }

    /// Rendered at all for `model`: not optional (or requested), and every
    /// conditional matches.
    pub fn presentable(&self, model: &Record, ctx: &RenderContext) -> Result<bool> {
        if self.optional && !ctx.is_field_requested(&self.name) {
            return Ok(false);
        }
        for conditional in &self.conditions {
            if !ctx.conditional_matches(conditional, model)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Resolve the raw value: lookup, then dynamic, then via/accessor.
    pub fn run_on(&self, model: &Record, ctx: &RenderContext) -> Result<Value> {
        let helpers = ctx.helpers();
        match &self.source {
            ValueSource::Lookup { lookup, fetch } => {
                let table = ctx.lookup_value(&self.path, || lookup(ctx.models(), helpers));
                match fetch {
                    Some(fetch) => Ok(fetch(table.as_ref(), model, helpers)),
                    None => match table.as_ref() {
                        Value::Map(map) => Ok(map.get(&model.id().to_string()).cloned().unwrap_or_default()),
                        _ => Err(Error::LookupNotIndexable(self.path.clone())),
                    },
                }
            }
            ValueSource::Dynamic(dynamic) => Ok(dynamic(model, helpers)),
            ValueSource::Ambient(ambient) => Ok(ambient(helpers)),
            ValueSource::Via(via) => Ok(model.read(via).unwrap_or_default()),
            ValueSource::Accessor => Ok(model.read(&self.name).unwrap_or_default()),
        }
    }

    /// The rendered value: a leaf's raw value, or a block's nested structure.
    pub fn evaluate(&self, model: &Record, ctx: &RenderContext) -> Result<Value> {
        match &self.block {
            None => self.run_on(model, ctx),
            Some((BlockKind::Hash, config)) => self.render_hash(model, config, ctx),
            Some((kind, config)) => self.render_array(model, *kind, config, ctx),
        }
    }

    /// Whether a hash block evaluates its own value, or just groups fields of
    /// the outer record.
    fn is_executable(&self, model: &Record) -> bool {
        !self.source.is_accessor() || model.responds_to(&self.name)
    }

    fn render_hash(&self, model: &Record, config: &Configuration, ctx: &RenderContext) -> Result<Value> {
        if !self.is_executable(model) {
            return render_sub_fields(config, model, model, ctx);
        }

        match to_record(self.run_on(model, ctx)?, model) {
            Some(evaluated) => render_sub_fields(config, model, &evaluated, ctx),
            None => Ok(Value::Null),
        }
    }

    fn render_array(
        &self,
        model: &Record,
        kind: BlockKind,
        config: &Configuration,
        ctx: &RenderContext,
    ) -> Result<Value> {
        if self.source.is_accessor() && !model.responds_to(&self.name) {
            return Err(Error::BlockFieldWithoutSource(self.path.clone()));
        }

        match self.run_on(model, ctx)? {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => items
                .into_iter()
                .map(|item| render_element(item, kind, config, model, ctx))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            single => Ok(Value::Array(vec![render_element(single, kind, config, model, ctx)?])),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("path", &self.path)
            .field("type", &self.field_type)
            .field("source", &self.source)
            .field("optional", &self.optional)
            .field("conditions", &self.conditions)
            .field("block", &self.block_kind())
            .finish()
    }
}

fn render_element(
    item: Value,
    kind: BlockKind,
    config: &Configuration,
    model: &Record,
    ctx: &RenderContext,
) -> Result<Value> {
    if kind == BlockKind::NestedArray {
        if let Value::Array(inner) = item {
            return inner
                .into_iter()
                .map(|item| render_element(item, kind, config, model, ctx))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array);
        }
    }

    match to_record(item, model) {
        Some(evaluated) => render_sub_fields(config, model, &evaluated, ctx),
        None => Ok(Value::Null),
    }
}

/// Render each presentable sub-field, reading from `evaluated` or from the
/// outer `model` per the sub-field's `use_parent_value`.
fn render_sub_fields(
    config: &Configuration,
    model: &Record,
    evaluated: &Record,
    ctx: &RenderContext,
) -> Result<Value> {
    let mut result = BTreeMap::new();
    for field in config.fields() {
        if !field.presentable(model, ctx)? {
            continue;
        }
        let source = if field.use_parent_value() { evaluated } else { model };
        result.insert(field.name().to_string(), field.evaluate(source, ctx)?);
    }
    Ok(Value::Map(result))
}

/// Treat an evaluated value as a record: records as-is, maps (and scalars,
/// under `value`) as detached records of the outer record's class.
fn to_record(value: Value, model: &Record) -> Option<Record> {
    match value {
        Value::Null => None,
        Value::Record(record) => Some(Record::clone(&record)),
        other => Some(Record::detached(model.class(), other, model.id())),
    }
}
