//! Presenter declaration builders
//!
//! [`PresenterBuilder`] writes declarations into a presenter's root
//! [`Configuration`]. Nested builders ([`FieldsBuilder`],
//! [`AssociationsBuilder`], [`ConditionalsBuilder`]) populate the `fields`,
//! `associations` and `conditionals` nodes. Declaration errors are collected
//! and the first one is returned by [`PresenterBuilder::build`].

use std::sync::Arc;

use super::association::{Association, AssociationOptions, AssociationTarget};
use super::conditional::Conditional;
use super::configuration::{ConfigValue, Configuration};
use super::field::{BlockKind, Field, FieldOptions, FieldType};
use super::filter::{Filter, SortOrder};
use super::helpers::Helpers;
use crate::db::{Direction, Record, Scope};
use crate::error::{Error, Result};
use crate::presenter::{CountEvaluator, Presented, Presenter};
use crate::query_strategies::StrategyKind;
use crate::search::Searcher;
use crate::value::Value;

// Root configuration keys
pub(crate) const PRESENTS: &str = "presents";
pub(crate) const BRAINSTEM_KEY: &str = "brainstem_key";
pub(crate) const TITLE: &str = "title";
pub(crate) const DESCRIPTION: &str = "description";
pub(crate) const NODOC: &str = "nodoc";
pub(crate) const PRELOADS: &str = "preloads";
pub(crate) const HELPERS: &str = "helpers";
pub(crate) const FIELDS: &str = "fields";
pub(crate) const ASSOCIATIONS: &str = "associations";
pub(crate) const CONDITIONALS: &str = "conditionals";
pub(crate) const FILTERS: &str = "filters";
pub(crate) const SORT_ORDERS: &str = "sort_orders";
pub(crate) const DEFAULT_SORT_ORDER: &str = "default_sort_order";
pub(crate) const SEARCH: &str = "search";
pub(crate) const QUERY_STRATEGY: &str = "query_strategy";
pub(crate) const EVALUATE_COUNT: &str = "evaluate_count";
pub(crate) const PRESENT: &str = "present";

/// Declares a presenter.
pub struct PresenterBuilder {
    configuration: Configuration,
    errors: Vec<Error>,
}

impl PresenterBuilder {
    pub(crate) fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    fn set_nonheritable(mut self, key: &str, value: ConfigValue) -> Self {
        let result = self.configuration.set(key, value);
        self.configuration.mark_nonheritable(key);
        self.record(result);
        self
    }

    fn set_in(mut self, node: &str, name: String, value: ConfigValue) -> Self {
        let result = self
            .configuration
            .nest(node)
            .and_then(|config| config.set(name, value));
        self.record(result);
        self
    }

    /// Bind a model class to this presenter. Presented classes are not
    /// inherited by sub-presenters.
    pub fn presents(mut self, class: impl Into<String>) -> Self {
        let class: String = class.into();
        self.configuration.mark_nonheritable(PRESENTS);
        let result = self
            .configuration
            .array(PRESENTS)
            .map(|array| array.push(class));
        self.record(result);
        self
    }

    /// Bucket name for rendered records (defaults to the table name).
    pub fn brainstem_key(mut self, key: impl Into<String>) -> Self {
        let result = self.configuration.set(BRAINSTEM_KEY, ConfigValue::Str(key.into()));
        self.record(result);
        self
    }

    pub fn title(self, title: impl Into<String>) -> Self {
        self.set_nonheritable(TITLE, ConfigValue::Str(title.into()))
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        self.set_nonheritable(DESCRIPTION, ConfigValue::Str(description.into()))
    }

    pub fn nodoc(self) -> Self {
        self.set_nonheritable(NODOC, ConfigValue::Bool(true))
    }

    /// Model association always preloaded for this presenter's records.
    pub fn preload(mut self, association: impl Into<String>) -> Self {
        let association: String = association.into();
        let result = self
            .configuration
            .array(PRELOADS)
            .map(|array| array.push(association));
        self.record(result);
        self
    }

    /// Helper function callable from blocks via [`Helpers::call`].
    pub fn helper<F>(self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn(&Record, &Helpers) -> Value + Send + Sync + 'static,
    {
        self.set_in(HELPERS, name.into(), ConfigValue::Helper(Arc::new(helper)))
    }

    pub fn fields<F>(mut self, declare: F) -> Self
    where
        F: FnOnce(&mut FieldsBuilder<'_>),
    {
        match self.configuration.nest(FIELDS) {
            Ok(configuration) => {
                let mut builder = FieldsBuilder {
                    configuration,
                    prefix: String::new(),
                    errors: &mut self.errors,
                };
                declare(&mut builder);
            }
            Err(err) => self.errors.push(err),
        }
        self
    }

    pub fn associations<F>(mut self, declare: F) -> Self
    where
        F: FnOnce(&mut AssociationsBuilder<'_>),
    {
        match self.configuration.nest(ASSOCIATIONS) {
            Ok(configuration) => {
                let mut builder = AssociationsBuilder {
                    configuration,
                    errors: &mut self.errors,
                };
                declare(&mut builder);
            }
            Err(err) => self.errors.push(err),
        }
        self
    }

    pub fn conditionals<F>(mut self, declare: F) -> Self
    where
        F: FnOnce(&mut ConditionalsBuilder<'_>),
    {
        match self.configuration.nest(CONDITIONALS) {
            Ok(configuration) => {
                let mut builder = ConditionalsBuilder {
                    configuration,
                    errors: &mut self.errors,
                };
                declare(&mut builder);
            }
            Err(err) => self.errors.push(err),
        }
        self
    }

    pub fn filter(self, filter: Filter) -> Self {
        let name = filter.name().to_string();
        self.set_in(FILTERS, name, ConfigValue::Filter(Arc::new(filter)))
    }

    /// Sort order by a (possibly table-qualified) column.
    pub fn sort_order(self, name: impl Into<String>, column: impl Into<String>) -> Self {
        let name = name.into();
        let order = SortOrder::column(name.clone(), column);
        self.set_in(SORT_ORDERS, name, ConfigValue::SortOrder(Arc::new(order)))
    }

    /// Sort order computed by a scope block.
    pub fn sort_order_with<F>(self, name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(Scope, Direction) -> Scope + Send + Sync + 'static,
    {
        let name = name.into();
        let order = SortOrder::custom(name.clone(), apply);
        self.set_in(SORT_ORDERS, name, ConfigValue::SortOrder(Arc::new(order)))
    }

    /// `name:direction`, e.g. `updated_at:desc`.
    pub fn default_sort_order(mut self, order: impl Into<String>) -> Self {
        let order = order.into();
        let valid = order
            .split_once(':')
            .is_some_and(|(name, dir)| !name.is_empty() && Direction::parse(dir).is_some());
        if !valid {
            self.errors.push(Error::invalid_declaration(
                DEFAULT_SORT_ORDER,
                format!("expected `name:asc` or `name:desc`, got `{}`", order),
            ));
            return self;
        }
        let result = self.configuration.set(DEFAULT_SORT_ORDER, order);
        self.record(result);
        self
    }

    pub fn search(mut self, searcher: impl Searcher + 'static) -> Self {
        let result = self
            .configuration
            .set(SEARCH, ConfigValue::Search(Arc::new(searcher)));
        self.record(result);
        self
    }

    pub fn query_strategy(mut self, kind: StrategyKind) -> Self {
        let result = self.configuration.set(QUERY_STRATEGY, ConfigValue::Strategy(kind));
        self.record(result);
        self
    }

    /// Let the presenter compute counts itself. Disables the engine's
    /// single-round-trip count.
    pub fn evaluate_count(mut self, evaluator: impl CountEvaluator + 'static) -> Self {
        let result = self
            .configuration
            .set(EVALUATE_COUNT, ConfigValue::Count(Arc::new(evaluator)));
        self.record(result);
        self
    }

    /// Replace the default structure produced for each record.
    pub fn present_with<F>(mut self, present: F) -> Self
    where
        F: Fn(&Record, &Presenter) -> Presented + Send + Sync + 'static,
    {
        let result = self
            .configuration
            .set(PRESENT, ConfigValue::Present(Arc::new(present)));
        self.record(result);
        self
    }

    pub fn build(mut self) -> Result<Presenter> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        Ok(Presenter::from_configuration(self.configuration))
    }
}

/// Declares fields into a `fields` node or a block field's node.
pub struct FieldsBuilder<'a> {
    configuration: Configuration,
    prefix: String,
    errors: &'a mut Vec<Error>,
}

impl FieldsBuilder<'_> {
    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    fn store(&mut self, field: Result<Field>) {
        let result = field.and_then(|field| {
            let name = field.name().to_string();
            self.configuration.set(name, ConfigValue::Field(Arc::new(field)))
        });
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    pub fn field(&mut self, name: &str, field_type: FieldType, options: FieldOptions) -> &mut Self {
        let field = Field::new(name, self.path(name), field_type, options);
        self.store(field);
        self
    }

    fn block<F>(&mut self, name: &str, kind: BlockKind, options: FieldOptions, declare: F) -> &mut Self
    where
        F: FnOnce(&mut FieldsBuilder<'_>),
    {
        // A redeclared block extends the sub-fields it inherits.
        let configuration = self
            .configuration
            .get(name)
            .and_then(|value| value.as_field().and_then(|f| f.configuration().cloned()))
            .map(|inherited| inherited.child())
            .unwrap_or_default();

        let path = self.path(name);
        {
            let mut nested = FieldsBuilder {
                configuration: configuration.clone(),
                prefix: path.clone(),
                errors: &mut *self.errors,
            };
            declare(&mut nested);
        }

        let field = Field::block(name, path, kind, options, configuration);
        self.store(field);
        self
    }

    /// A nested object of sub-fields.
    pub fn hash<F>(&mut self, name: &str, options: FieldOptions, declare: F) -> &mut Self
    where
        F: FnOnce(&mut FieldsBuilder<'_>),
    {
        self.block(name, BlockKind::Hash, options, declare)
    }

    /// A list of objects, one per element of the evaluated sequence.
    pub fn array<F>(&mut self, name: &str, options: FieldOptions, declare: F) -> &mut Self
    where
        F: FnOnce(&mut FieldsBuilder<'_>),
    {
        self.block(name, BlockKind::Array, options, declare)
    }

    /// A list of lists of objects.
    pub fn nested_array<F>(&mut self, name: &str, options: FieldOptions, declare: F) -> &mut Self
    where
        F: FnOnce(&mut FieldsBuilder<'_>),
    {
        self.block(name, BlockKind::NestedArray, options, declare)
    }
}

/// Declares associations into the `associations` node.
pub struct AssociationsBuilder<'a> {
    configuration: Configuration,
    errors: &'a mut Vec<Error>,
}

impl AssociationsBuilder<'_> {
    fn store(&mut self, association: Result<Association>) {
        let result = association.and_then(|association| {
            let name = association.name().to_string();
            self.configuration
                .set(name, ConfigValue::Association(Arc::new(association)))
        });
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    pub fn association(&mut self, name: &str, target: &str, options: AssociationOptions) -> &mut Self {
        let association = Association::new(name, AssociationTarget::Fixed(target.to_string()), options);
        self.store(association);
        self
    }

    pub fn polymorphic(&mut self, name: &str, options: AssociationOptions) -> &mut Self {
        let association = Association::new(name, AssociationTarget::Polymorphic, options);
        self.store(association);
        self
    }
}

/// Declares conditionals into the `conditionals` node.
pub struct ConditionalsBuilder<'a> {
    configuration: Configuration,
    errors: &'a mut Vec<Error>,
}

impl ConditionalsBuilder<'_> {
    pub fn add(&mut self, conditional: Conditional) -> &mut Self {
        let name = conditional.name().to_string();
        if let Err(err) = self
            .configuration
            .set(name, ConfigValue::Conditional(Arc::new(conditional)))
        {
            self.errors.push(err);
        }
        self
    }

    /// Evaluated per record.
    pub fn model<F>(&mut self, name: &str, predicate: F) -> &mut Self
    where
        F: Fn(&Record, &Helpers) -> bool + Send + Sync + 'static,
    {
        self.add(Conditional::model(name, predicate))
    }

    /// Evaluated once per render pass.
    pub fn request<F>(&mut self, name: &str, predicate: F) -> &mut Self
    where
        F: Fn(&Helpers) -> bool + Send + Sync + 'static,
    {
        self.add(Conditional::request(name, predicate))
    }
}
