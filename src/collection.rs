//! Presenter collections and the `presenting` pipeline
//!
//! A [`PresenterCollection`] holds one namespace's presenters, keyed by the
//! class they present. [`PresenterCollection::presenting`] drives a whole
//! request:
//! 1. resolve the class and its presenter
//! 2. run the presenter's query strategy for a page of records and a count
//! 3. keep only declared includes, preload them in bulk
//! 4. gather included records into per-key buckets, deduplicated
//! 5. render the primary records and every bucket through their presenters

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value as JsonValue};

use crate::config::BrainstemConfig;
use crate::db::{self, DataSource, ModelClass, Record, Schema, Scope};
use crate::dsl::{Association, AssociationTarget, Helpers};
use crate::error::{Error, Result};
use crate::params::{IncludeRequest, RequestParams};
use crate::presenter::{validator, PresentOptions, Presenter, RenderContext};
use crate::query_strategies::StrategyOptions;

/// Per-request options for [`PresenterCollection::presenting`].
#[derive(Debug, Clone, Default)]
pub struct PresentingOptions {
    pub params: RequestParams,
    /// Base scope; defaults to every row of the presented class.
    pub scope: Option<Scope>,
    /// Caller context (e.g. the current user) for presenter blocks.
    pub helpers: Helpers,
    /// Lower the maximum page size for this request.
    pub max_per_page: Option<u64>,
    /// Key for the primary records instead of the presenter's brainstem key.
    pub as_key: Option<String>,
    /// Use this presenter instead of the registered one.
    pub primary_presenter: Option<Arc<Presenter>>,
}

impl PresentingOptions {
    pub fn new(params: RequestParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn helpers(mut self, helpers: Helpers) -> Self {
        self.helpers = helpers;
        self
    }

    pub fn max_per_page(mut self, max_per_page: u64) -> Self {
        self.max_per_page = Some(max_per_page);
        self
    }

    pub fn as_key(mut self, key: impl Into<String>) -> Self {
        self.as_key = Some(key.into());
        self
    }

    pub fn primary_presenter(mut self, presenter: Arc<Presenter>) -> Self {
        self.primary_presenter = Some(presenter);
        self
    }
}

/// An include that survived allowlisting.
struct AllowedInclude {
    request: IncludeRequest,
    association: Arc<Association>,
}

/// Records gathered for one output key.
#[derive(Default)]
struct Bucket {
    records: Vec<Arc<Record>>,
    seen: HashSet<(String, i64)>,
    fields: Vec<String>,
}

impl Bucket {
    fn push(&mut self, record: Arc<Record>) {
        if self.seen.insert((record.class_name().to_string(), record.id())) {
            self.records.push(record);
        }
    }
}

/// One namespace's presenters.
#[derive(Debug)]
pub struct PresenterCollection {
    namespace: String,
    schema: Arc<Schema>,
    config: BrainstemConfig,
    presenters: BTreeMap<String, Arc<Presenter>>,
}

impl PresenterCollection {
    pub fn new(namespace: impl Into<String>, schema: Schema) -> Self {
        Self {
            namespace: namespace.into(),
            schema: Arc::new(schema),
            config: BrainstemConfig::default(),
            presenters: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, config: BrainstemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &BrainstemConfig {
        &self.config
    }

    /// Register `presenter` for every class it presents.
    pub fn add(&mut self, presenter: Presenter) -> Result<Arc<Presenter>> {
        let classes = presenter.presents();
        if classes.is_empty() {
            return Err(Error::invalid_declaration("presents", "a presenter must present at least one class"));
        }

        for class in &classes {
            self.schema.class_named(class)?;
        }

        let presenter = Arc::new(presenter);
        for class in classes {
            self.presenters.insert(class, Arc::clone(&presenter));
        }
        Ok(presenter)
    }

    pub fn with(mut self, presenter: Presenter) -> Result<Self> {
        self.add(presenter)?;
        Ok(self)
    }

    /// The presenter for `class_name`, falling back through STI base classes.
    pub fn for_class(&self, class_name: &str) -> Result<Arc<Presenter>> {
        let mut current = Some(class_name.to_string());
        let mut visited = HashSet::new();

        while let Some(name) = current {
            if let Some(presenter) = self.presenters.get(&name) {
                return Ok(Arc::clone(presenter));
            }
            if !visited.insert(name.clone()) {
                break;
            }
            current = self.schema.class(&name).and_then(|class| class.sti_base.clone());
        }

        Err(Error::PresenterNotFound {
            class: class_name.to_string(),
            namespace: self.namespace.clone(),
        })
    }

    pub fn presenters(&self) -> impl Iterator<Item = (&String, &Arc<Presenter>)> {
        self.presenters.iter()
    }

    /// Output key for records of `class_name`: the presenter's brainstem key,
    /// else the class's table name.
    pub fn brainstem_key_for(&self, class_name: &str) -> Result<String> {
        let presenter = self.for_class(class_name)?;
        if let Some(key) = presenter.brainstem_key() {
            return Ok(key);
        }
        Ok(self.schema.class_named(class_name)?.table.clone())
    }

    /// Validate every registered presenter and check brainstem keys are
    /// unique across presenters.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut keys: BTreeMap<String, String> = BTreeMap::new();
        let mut checked: Vec<&Arc<Presenter>> = Vec::new();

        for (class, presenter) in &self.presenters {
            if !checked.iter().any(|p| Arc::ptr_eq(p, presenter)) {
                checked.push(presenter);
                errors.extend(validator::validate(presenter, self));
            }

            let key = self.brainstem_key_for(class)?;
            let clash = keys
                .get(&key)
                .filter(|other| !Arc::ptr_eq(&self.presenters[other.as_str()], presenter))
                .cloned();
            match clash {
                Some(other) => errors.push(format!(
                    "brainstem key `{}` is used by both `{}` and `{}`",
                    key, other, class
                )),
                None => {
                    keys.insert(key, class.clone());
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    // ========================================================================
    // Presenting
    // ========================================================================

    /// Run the full pipeline for the resource `name` (class or table name)
    /// and return the response envelope.
    pub async fn presenting(
        &self,
        name: &str,
        options: PresentingOptions,
        source: &dyn DataSource,
    ) -> Result<JsonValue> {
        let class = self.schema.resolve(name)?;
        let presenter = match &options.primary_presenter {
            Some(presenter) => Arc::clone(presenter),
            None => self.for_class(&class.name)?,
        };
        let params = options.params.clone();
        let helpers = presenter.helpers(options.helpers.clone().with_params(params.clone()));

        let strategy_options =
            StrategyOptions::new(Presenter::clone(&presenter), params.clone(), class.table.clone(), &self.config)
                .with_helpers(helpers.clone())
                .with_max_per_page(options.max_per_page);
        let page_size = strategy_options.calculate_per_page();
        let page_number = strategy_options.calculate_page();

        let scope = options
            .scope
            .clone()
            .unwrap_or_else(|| Scope::new(Arc::clone(&class)));
        let (mut models, count) = strategy_options.strategy().execute(scope, source).await?;
        tracing::debug!(resource = %name, count, returned = models.len(), "query finished");

        let includes = self.allowed_includes(&presenter, &params);
        let preloads = self.preload_names(&presenter, &class, &includes);
        db::preload(source, &self.schema, &mut models, &preloads).await?;
        let models: Vec<Arc<Record>> = models.into_iter().map(Arc::new).collect();

        // One pass serves both bucketing and the primary render, so lookups
        // run once per request.
        let ctx = presenter.render_context(
            &models,
            &PresentOptions {
                optional_fields: params.optional_fields(),
                requested_associations: includes.iter().map(|i| i.request.name.clone()).collect(),
                helpers: helpers.clone(),
            },
        );
        let buckets = self.gather_buckets(&ctx, &includes)?;
        let primary = presenter.group_present_with(&ctx)?;

        let key = match &options.as_key {
            Some(key) => key.clone(),
            None => self.brainstem_key_for(&class.name)?,
        };

        let (page_count, page_number) = if count == 0 {
            (0, 0)
        } else {
            (count.div_ceil(page_size), page_number)
        };
        let mut envelope = Map::new();
        envelope.insert("count".into(), json!(count));
        envelope.insert(
            "meta".into(),
            json!({
                "count": count,
                "page_count": page_count,
                "page_number": page_number,
                "page_size": page_size,
            }),
        );

        let mut primary = primary;
        for (bucket_key, bucket) in buckets {
            let rendered = self.render_bucket(&bucket, &helpers)?;
            if bucket_key == key {
                // Included records sharing the primary key join the primary list.
                for record in rendered {
                    if !primary.iter().any(|p| p.get("id") == record.get("id")) {
                        primary.push(record);
                    }
                }
            } else {
                envelope.insert(bucket_key, JsonValue::Array(rendered));
            }
        }
        envelope.insert(key, JsonValue::Array(primary));

        Ok(JsonValue::Object(envelope))
    }

    /// Requested includes the presenter declares. Anything else is dropped.
    fn allowed_includes(&self, presenter: &Presenter, params: &RequestParams) -> Vec<AllowedInclude> {
        let only_requested = params.only_ids().is_some();
        params
            .includes()
            .into_iter()
            .filter_map(|request| {
                let association = presenter.association(&request.name).filter(|association| {
                    !association.restrict_to_only() || only_requested
                });
                if association.is_none() {
                    tracing::debug!(include = %request.name, "dropping undeclared include");
                }
                association.map(|association| AllowedInclude { request, association })
            })
            .collect()
    }

    /// Model associations to preload: the presenter's declared preloads plus
    /// the associations behind each include.
    fn preload_names(&self, presenter: &Presenter, class: &ModelClass, includes: &[AllowedInclude]) -> Vec<String> {
        let mut names = presenter.preloads();
        names.extend(
            includes
                .iter()
                .filter_map(|include| include.association.method_name().map(str::to_string)),
        );

        let mut seen = HashSet::new();
        names.retain(|name| seen.insert(name.clone()));
        names.retain(|name| {
            let declared = class.reflection(name).is_some();
            if !declared {
                tracing::debug!(association = %name, class = %class.name, "skipping preload the class does not declare");
            }
            declared
        });
        names
    }

    /// Bucket key for a record included through `association`.
    fn bucket_key(&self, association: &Association, record: &Record) -> Result<String> {
        if let Some(json_name) = association.json_name() {
            return Ok(json_name.to_string());
        }
        match association.target() {
            AssociationTarget::Fixed(target) => self.brainstem_key_for(target),
            AssociationTarget::Polymorphic => self.brainstem_key_for(record.class_name()),
        }
    }

    /// Keys that appear even when no record lands in them.
    fn declared_keys(&self, association: &Association) -> Result<Vec<String>> {
        if let Some(json_name) = association.json_name() {
            return Ok(vec![json_name.to_string()]);
        }
        match association.target() {
            AssociationTarget::Fixed(target) => Ok(vec![self.brainstem_key_for(target)?]),
            AssociationTarget::Polymorphic => association
                .polymorphic_classes()
                .iter()
                .map(|class| self.brainstem_key_for(class))
                .collect(),
        }
    }

    fn gather_buckets(&self, ctx: &RenderContext, includes: &[AllowedInclude]) -> Result<BTreeMap<String, Bucket>> {
        let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();

        for include in includes {
            let association = &include.association;
            for key in self.declared_keys(association)? {
                buckets.entry(key).or_default().fields.extend(include.request.fields.iter().cloned());
            }

            for model in ctx.models() {
                if !association.presentable(model, ctx)? {
                    continue;
                }
                for record in association.run_on(model, ctx)?.records() {
                    let key = self.bucket_key(association, &record)?;
                    let bucket = buckets.entry(key).or_default();
                    if bucket.fields.is_empty() {
                        bucket.fields = include.request.fields.clone();
                    }
                    bucket.push(record);
                }
            }
        }

        Ok(buckets)
    }

    /// Render a bucket, each record through the presenter of its own class.
    fn render_bucket(&self, bucket: &Bucket, helpers: &Helpers) -> Result<Vec<JsonValue>> {
        let mut groups: Vec<(String, Vec<Arc<Record>>)> = Vec::new();
        for record in &bucket.records {
            match groups.iter_mut().find(|(class, _)| class == record.class_name()) {
                Some((_, records)) => records.push(Arc::clone(record)),
                None => groups.push((record.class_name().to_string(), vec![Arc::clone(record)])),
            }
        }

        let mut rendered = Vec::with_capacity(bucket.records.len());
        for (class, records) in groups {
            let presenter = self.for_class(&class)?;
            rendered.extend(presenter.group_present(
                &records,
                &PresentOptions {
                    optional_fields: bucket.fields.clone(),
                    requested_associations: Vec::new(),
                    helpers: helpers.clone(),
                },
            )?);
        }
        Ok(rendered)
    }
}
