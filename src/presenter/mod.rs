//! Presenters
//!
//! A [`Presenter`] binds model classes to a declaration tree (see
//! [`crate::dsl`]) and knows how to narrow a scope with its filters, order
//! it with its sort orders, and render records through its fields and
//! associations.

pub mod render;
pub mod validator;

pub use render::{Presented, RenderContext};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::db::{DataSource, Direction, Ordering, Record, Scope};
use crate::dsl::builder::{
    ASSOCIATIONS, BRAINSTEM_KEY, CONDITIONALS, DEFAULT_SORT_ORDER, DESCRIPTION, EVALUATE_COUNT,
    FIELDS, FILTERS, HELPERS, NODOC, PRELOADS, PRESENT, PRESENTS, QUERY_STRATEGY, SEARCH,
    SORT_ORDERS, TITLE,
};
use crate::dsl::{
    Association, Configuration, Field, Filter, HelperFn, Helpers, PresenterBuilder, SortOrder,
};
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::query_strategies::StrategyKind;
use crate::search::Searcher;
use crate::value::Value;

/// Sort order used when a presenter declares none.
pub const DEFAULT_SORT_ORDER_VALUE: &str = "updated_at:desc";

/// Custom structure produced for one record instead of the default one.
pub type PresentFn = Arc<dyn Fn(&Record, &Presenter) -> Presented + Send + Sync>;

/// Lets a presenter compute the total count itself.
#[async_trait]
pub trait CountEvaluator: Send + Sync {
    /// `scope` is the filtered scope without ordering or pagination.
    async fn evaluate_count(&self, scope: &Scope, source: &dyn DataSource) -> Result<u64>;
}

/// Render options for one group of records.
#[derive(Debug, Clone, Default)]
pub struct PresentOptions {
    pub optional_fields: Vec<String>,
    pub requested_associations: Vec<String>,
    pub helpers: Helpers,
}

#[derive(Clone)]
pub struct Presenter {
    configuration: Configuration,
}

impl Presenter {
    pub fn builder() -> PresenterBuilder {
        PresenterBuilder::new(Configuration::new())
    }

    /// Declare a presenter inheriting every heritable declaration of `parent`.
    pub fn inherits(parent: &Presenter) -> PresenterBuilder {
        PresenterBuilder::new(parent.configuration.child())
    }

    pub(crate) fn from_configuration(configuration: Configuration) -> Self {
        Self { configuration }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    fn section(&self, key: &str) -> Configuration {
        self.configuration.get_nested(key).unwrap_or_default()
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Class names this presenter presents.
    pub fn presents(&self) -> Vec<String> {
        self.configuration
            .get_array(PRESENTS)
            .map(|array| array.strings())
            .unwrap_or_default()
    }

    pub fn brainstem_key(&self) -> Option<String> {
        self.configuration.get_str(BRAINSTEM_KEY)
    }

    pub fn title(&self) -> Option<String> {
        self.configuration.get_str(TITLE)
    }

    pub fn description(&self) -> Option<String> {
        self.configuration.get_str(DESCRIPTION)
    }

    pub fn nodoc(&self) -> bool {
        self.configuration.get_bool(NODOC).unwrap_or(false)
    }

    pub fn preloads(&self) -> Vec<String> {
        self.configuration
            .get_array(PRELOADS)
            .map(|array| array.strings())
            .unwrap_or_default()
    }

    pub fn fields(&self) -> Vec<Arc<Field>> {
        self.section(FIELDS).fields()
    }

    pub fn field(&self, name: &str) -> Option<Arc<Field>> {
        self.section(FIELDS).get(name)?.as_field().cloned()
    }

    pub fn associations(&self) -> Vec<Arc<Association>> {
        self.section(ASSOCIATIONS)
            .entries()
            .iter()
            .filter_map(|(_, value)| value.as_association().cloned())
            .collect()
    }

    pub fn association(&self, name: &str) -> Option<Arc<Association>> {
        self.section(ASSOCIATIONS).get(name)?.as_association().cloned()
    }

    /// The `conditionals` node, as consulted by render passes.
    pub fn conditionals(&self) -> Configuration {
        self.section(CONDITIONALS)
    }

    pub fn filters(&self) -> Vec<Arc<Filter>> {
        self.section(FILTERS)
            .entries()
            .iter()
            .filter_map(|(_, value)| value.as_filter().cloned())
            .collect()
    }

    pub fn sort_orders(&self) -> Vec<Arc<SortOrder>> {
        self.section(SORT_ORDERS)
            .entries()
            .iter()
            .filter_map(|(_, value)| value.as_sort_order().cloned())
            .collect()
    }

    pub fn sort_order(&self, name: &str) -> Option<Arc<SortOrder>> {
        self.section(SORT_ORDERS).get(name)?.as_sort_order().cloned()
    }

    /// The declared default sort order, e.g. `updated_at:desc`.
    pub fn default_sort_order(&self) -> Option<String> {
        self.configuration.get_str(DEFAULT_SORT_ORDER)
    }

    pub fn searcher(&self) -> Option<Arc<dyn Searcher>> {
        self.configuration.get(SEARCH)?.as_search().cloned()
    }

    pub fn query_strategy(&self) -> StrategyKind {
        self.configuration
            .get(QUERY_STRATEGY)
            .and_then(|value| value.as_strategy())
            .unwrap_or_default()
    }

    pub fn count_evaluator(&self) -> Option<Arc<dyn CountEvaluator>> {
        self.configuration.get(EVALUATE_COUNT)?.as_count().cloned()
    }

    /// Whether the presenter computes counts itself.
    pub fn evaluates_count(&self) -> bool {
        self.count_evaluator().is_some()
    }

    pub fn helper_functions(&self) -> BTreeMap<String, HelperFn> {
        self.section(HELPERS)
            .entries()
            .into_iter()
            .filter_map(|(name, value)| value.as_helper().cloned().map(|helper| (name, helper)))
            .collect()
    }

    /// `base` with this presenter's helper functions layered on top.
    pub fn helpers(&self, base: Helpers) -> Helpers {
        base.with_functions(&self.helper_functions())
    }

    fn present_hook(&self) -> Option<PresentFn> {
        self.configuration.get(PRESENT)?.as_present().cloned()
    }

    // ========================================================================
    // Filtering and ordering
    // ========================================================================

    /// The argument each applicable filter runs with: the requested value,
    /// else the filter's default. Filters with neither are skipped.
    pub fn extract_filters(&self, params: &RequestParams) -> BTreeMap<String, Value> {
        let requested = params.filters();
        for name in requested.keys() {
            if self.section(FILTERS).get(name).is_none() {
                tracing::debug!(filter = %name, "ignoring undeclared filter");
            }
        }

        self.filters()
            .into_iter()
            .filter_map(|filter| {
                let arg = params
                    .filter_value(filter.name())
                    .or_else(|| filter.default_arg().cloned())?;
                Some((filter.name().to_string(), arg))
            })
            .collect()
    }

    pub fn apply_filters_to_scope(&self, scope: Scope, params: &RequestParams, helpers: &Helpers) -> Scope {
        let args = self.extract_filters(params);
        self.filters().into_iter().fold(scope, |scope, filter| match args.get(filter.name()) {
            Some(arg) => filter.apply(scope, arg, helpers),
            None => scope,
        })
    }

    /// The sort order name and direction to apply. A missing or undeclared
    /// `order` falls back to the default sort order; a missing or invalid
    /// direction falls back to the default direction.
    pub fn calculate_sort_name_and_direction(&self, params: &RequestParams) -> (String, Direction) {
        let default = self
            .default_sort_order()
            .unwrap_or_else(|| DEFAULT_SORT_ORDER_VALUE.to_string());
        let (default_name, default_direction) = match default.split_once(':') {
            Some((name, direction)) => (name.to_string(), Direction::parse(direction).unwrap_or_default()),
            None => (default.clone(), Direction::default()),
        };

        match params.order() {
            Some((name, direction)) if self.sort_order(&name).is_some() => {
                (name, direction.unwrap_or(default_direction))
            }
            _ => (default_name, default_direction),
        }
    }

    /// Order `scope` by the resolved sort order, breaking ties on the primary
    /// key. A sort name without a declaration leaves the scope's ordering.
    pub fn apply_ordering_to_scope(&self, scope: Scope, params: &RequestParams) -> Scope {
        let (name, direction) = self.calculate_sort_name_and_direction(params);
        let Some(sort_order) = self.sort_order(&name) else {
            return scope;
        };

        let primary_key = format!("{}.{}", scope.table(), scope.primary_key());
        let scope = sort_order.apply(scope, direction);
        let already_unique = scope.orderings().iter().any(|ordering| {
            matches!(ordering, Ordering::Column { column, .. }
                if *column == primary_key || column.as_str() == scope.primary_key())
        });

        if already_unique {
            scope
        } else {
            scope.order(primary_key, direction)
        }
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// The raw structure for `model`: the custom hook's, or `id` followed by
    /// every declared field and association.
    pub fn present(&self, model: &Record) -> Presented {
        match self.present_hook() {
            Some(present) => present(model, self),
            None => self.default_present(model),
        }
    }

    pub fn default_present(&self, model: &Record) -> Presented {
        let mut presented = Presented::map();
        presented.insert("id", Value::String(model.id().to_string()));
        for field in self.fields() {
            presented.insert(field.name().to_string(), Presented::Field(field));
        }
        for association in self.associations() {
            presented.insert(association.name().to_string(), Presented::Association(association));
        }
        presented
    }

    /// A fresh render pass over `models`.
    pub fn render_context(&self, models: &[Arc<Record>], options: &PresentOptions) -> RenderContext {
        RenderContext::new(
            models.to_vec(),
            self.helpers(options.helpers.clone()),
            self.conditionals(),
        )
        .with_optional_fields(options.optional_fields.clone())
        .with_requested_associations(options.requested_associations.clone())
    }

    /// Render `models` in one pass: conditionals and lookups are computed at
    /// most once for the whole group.
    pub fn group_present(&self, models: &[Arc<Record>], options: &PresentOptions) -> Result<Vec<JsonValue>> {
        self.group_present_with(&self.render_context(models, options))
    }

    /// Render every model of `ctx`, reusing whatever its caches already hold.
    pub fn group_present_with(&self, ctx: &RenderContext) -> Result<Vec<JsonValue>> {
        if self.present_hook().is_none() && self.fields().is_empty() {
            let class = self.presents().into_iter().next().unwrap_or_default();
            return Err(Error::PresentNotImplemented(class));
        }

        ctx.models()
            .iter()
            .map(|model| render::present_and_post_process(self, model, ctx))
            .collect()
    }
}

impl std::fmt::Debug for Presenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presenter")
            .field("presents", &self.presents())
            .field("brainstem_key", &self.brainstem_key())
            .finish()
    }
}
