//! Query strategies
//!
//! A strategy turns a base scope and the request parameters into one page of
//! records plus the total count:
//! - [`Paginate`]: filter, then paginate
//! - [`FilterOrSearch`]: search replaces filtering when a query is given,
//!   otherwise filter and paginate (the default)
//! - [`FilterAndSearch`]: intersect search hits with the filtered scope
//!
//! Shared pieces (page size, `only`, id-pluck-then-refetch, count
//! negotiation and search invocation) live on [`StrategyOptions`].

mod filter_and_search;
mod filter_or_search;
mod paginate;

pub use filter_and_search::FilterAndSearch;
pub use filter_or_search::FilterOrSearch;
pub use paginate::Paginate;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::BrainstemConfig;
use crate::db::{DataSource, Record, Scope};
use crate::dsl::Helpers;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::presenter::Presenter;
use crate::search::SearchOptions;

/// Strategy a presenter asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Filter or search, never both
    #[default]
    Legacy,
    /// Intersect search results with filters when a search is requested
    FilterAndSearch,
    /// Filter and paginate only; search is ignored
    Paginate,
}

#[async_trait]
pub trait QueryStrategy: Send + Sync {
    /// The page of records and the total count.
    async fn execute(&self, scope: Scope, source: &dyn DataSource) -> Result<(Vec<Record>, u64)>;
}

/// Everything a strategy needs besides the scope.
#[derive(Clone)]
pub struct StrategyOptions {
    pub params: RequestParams,
    pub presenter: Presenter,
    pub helpers: Helpers,
    pub table_name: String,
    pub default_per_page: u64,
    pub default_max_per_page: u64,
    /// Caller override of `default_max_per_page`.
    pub max_per_page: Option<u64>,
    /// Page size requested from search when intersecting with filters.
    pub max_filter_and_search_page: u64,
    /// Use the engine's single-round-trip page + count when it has one.
    pub use_found_rows: bool,
}

impl StrategyOptions {
    pub fn new(
        presenter: Presenter,
        params: RequestParams,
        table_name: impl Into<String>,
        config: &BrainstemConfig,
    ) -> Self {
        Self {
            helpers: presenter.helpers(Helpers::new(params.clone())),
            params,
            presenter,
            table_name: table_name.into(),
            default_per_page: config.default_per_page,
            default_max_per_page: config.default_max_per_page,
            max_per_page: None,
            max_filter_and_search_page: config.max_filter_and_search_page,
            use_found_rows: config.mysql_use_calc_found_rows,
        }
    }

    pub fn with_helpers(mut self, helpers: Helpers) -> Self {
        self.helpers = helpers;
        self
    }

    pub fn with_max_per_page(mut self, max_per_page: Option<u64>) -> Self {
        self.max_per_page = max_per_page;
        self
    }

    /// The strategy the presenter asks for, given whether a search was
    /// requested.
    pub fn strategy(self) -> Box<dyn QueryStrategy> {
        let searching = self.params.search().is_some() && self.presenter.searcher().is_some();
        match self.presenter.query_strategy() {
            StrategyKind::Paginate => Box::new(Paginate::new(self)),
            StrategyKind::FilterAndSearch if searching => Box::new(FilterAndSearch::new(self)),
            StrategyKind::FilterAndSearch | StrategyKind::Legacy => Box::new(FilterOrSearch::new(self)),
        }
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    fn max_per_page(&self) -> u64 {
        self.max_per_page.unwrap_or(self.default_max_per_page).max(1)
    }

    /// Requested page size, defaulted when absent or below 1 and capped at
    /// the maximum.
    pub fn calculate_per_page(&self) -> u64 {
        let requested = self
            .params
            .per_page()
            .filter(|per_page| *per_page >= 1)
            .map_or(self.default_per_page, |per_page| per_page as u64);
        requested.min(self.max_per_page()).max(1)
    }

    /// 1-based page number.
    pub fn calculate_page(&self) -> u64 {
        self.params.page().filter(|page| *page >= 1).map_or(1, |page| page as u64)
    }

    /// `limit` + `offset` when both are given, else derived from `per_page`
    /// and `page`.
    pub fn calculate_limit_and_offset(&self) -> (u64, u64) {
        if let (Some(limit), Some(offset)) = (self.params.limit(), self.params.offset()) {
            let limit = if limit >= 1 { limit as u64 } else { self.default_per_page };
            return (limit.min(self.max_per_page()).max(1), offset.max(0) as u64);
        }

        let limit = self.calculate_per_page();
        (limit, limit * (self.calculate_page() - 1))
    }

    pub(crate) fn paginate(&self, scope: Scope) -> Scope {
        let (limit, offset) = self.calculate_limit_and_offset();
        scope.limit(limit).offset(offset)
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    pub(crate) fn apply_filters(&self, scope: Scope) -> Scope {
        self.presenter
            .apply_filters_to_scope(scope, &self.params, &self.helpers)
    }

    pub(crate) fn apply_ordering(&self, scope: Scope) -> Scope {
        self.presenter.apply_ordering_to_scope(scope, &self.params)
    }

    /// Records of `scope` in the scope's order. Engines that need it get
    /// ordered ids first, then an unordered refetch by id.
    pub(crate) async fn fetch_models(&self, scope: &Scope, source: &dyn DataSource) -> Result<Vec<Record>> {
        if !source.refetch_by_ids() {
            return source.fetch(scope).await;
        }

        let ids = source.pluck_ids(scope).await?;
        self.fetch_by_ids(scope, &ids, source).await
    }

    /// Records with `ids`, returned in `ids` order.
    pub(crate) async fn fetch_by_ids(&self, scope: &Scope, ids: &[i64], source: &dyn DataSource) -> Result<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let refetch = Scope::new(scope.class().clone()).where_ids(ids);
        let records = source.fetch(&refetch).await?;
        Ok(order_by_ids(records, ids))
    }

    /// Filtered total: the presenter's own count when it has one, else the
    /// source's.
    pub(crate) async fn evaluate_count(&self, scope: &Scope, source: &dyn DataSource) -> Result<u64> {
        let count_scope = scope.clone().unordered().unpaginated();
        match self.presenter.count_evaluator() {
            Some(evaluator) => evaluator.evaluate_count(&count_scope, source).await,
            None => source.count(&count_scope).await,
        }
    }

    /// Filter, honour `only` or paginate, order, count. With `found_rows`
    /// the engine may answer page and count in one round trip.
    pub(crate) async fn filter_and_paginate(
        &self,
        scope: Scope,
        source: &dyn DataSource,
        found_rows: bool,
    ) -> Result<(Vec<Record>, u64)> {
        let scope = self.apply_filters(scope);

        if let Some(ids) = self.params.only_ids() {
            let scope = self.apply_ordering(scope.where_ids(&ids));
            let models = self.fetch_models(&scope, source).await?;
            let count = models.len() as u64;
            tracing::debug!(table = %self.table_name, count, "restricted to only ids");
            return Ok((models, count));
        }

        let paged = self.paginate(self.apply_ordering(scope.clone()));

        if found_rows && self.use_found_rows && !self.presenter.evaluates_count() {
            if let Some((ids, count)) = source.pluck_ids_with_found_rows(&paged).await? {
                tracing::debug!(table = %self.table_name, count, "counted with found rows");
                let models = self.fetch_by_ids(&paged, &ids, source).await?;
                return Ok((models, count));
            }
        }

        let count = self.evaluate_count(&scope, source).await?;
        let models = self.fetch_models(&paged, source).await?;
        tracing::debug!(table = %self.table_name, count, "filtered and paginated");
        Ok((models, count))
    }

    /// Search options for the current request.
    pub(crate) fn search_options(&self, per_page: u64, page: u64) -> SearchOptions {
        SearchOptions {
            include: self.params.includes().into_iter().map(|include| include.name).collect(),
            order: Some(self.presenter.calculate_sort_name_and_direction(&self.params)),
            per_page,
            page,
            filters: self.presenter.extract_filters(&self.params),
        }
    }

    /// Run the presenter's search. Unavailability is an error, never an
    /// empty result.
    pub(crate) async fn run_search(&self, query: &str, options: &SearchOptions) -> Result<(Vec<i64>, u64)> {
        let searcher = self
            .presenter
            .searcher()
            .ok_or(Error::UnsupportedCapability("search"))?;
        let results = searcher.search(query, options).await.map_err(Error::Search)?;

        match results.ids {
            Some(ids) => {
                tracing::debug!(table = %self.table_name, hits = ids.len(), count = results.count, "search finished");
                Ok((ids, results.count))
            }
            None => {
                tracing::warn!(table = %self.table_name, "search backend unavailable");
                Err(Error::SearchUnavailable)
            }
        }
    }
}

impl std::fmt::Debug for StrategyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyOptions")
            .field("table_name", &self.table_name)
            .field("params", &self.params)
            .field("default_per_page", &self.default_per_page)
            .field("max_per_page", &self.max_per_page())
            .finish()
    }
}

/// Reorder `records` to follow `ids`; records whose id is not listed are
/// dropped.
pub(crate) fn order_by_ids(records: Vec<Record>, ids: &[i64]) -> Vec<Record> {
    let mut by_id: HashMap<i64, Record> = records.into_iter().map(|record| (record.id(), record)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory [`DataSource`] for strategy tests.

    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use async_trait::async_trait;

    use crate::db::{Condition, DataSource, Dialect, Direction, ModelClass, Operator, Ordering, Record, Scope};
    use crate::error::Result;
    use crate::value::Value;

    pub struct MemorySource {
        pub records: Vec<Record>,
        pub found_rows: bool,
        pub counts: AtomicUsize,
        pub found_rows_calls: AtomicUsize,
    }

    impl MemorySource {
        pub fn workspaces(n: i64) -> (Arc<ModelClass>, Self) {
            let class = Arc::new(ModelClass::new("Workspace", "workspaces"));
            let records = (1..=n)
                .map(|id| {
                    Record::new(
                        class.clone(),
                        BTreeMap::from([
                            ("id".to_string(), Value::Int(id)),
                            ("title".to_string(), Value::from(format!("ws {}", id))),
                            ("owner_id".to_string(), Value::Int(id % 2)),
                        ]),
                    )
                })
                .collect();
            (
                class,
                Self {
                    records,
                    found_rows: false,
                    counts: AtomicUsize::new(0),
                    found_rows_calls: AtomicUsize::new(0),
                },
            )
        }

        fn matches(record: &Record, condition: &Condition) -> bool {
            let column = |c: &str| c.rsplit('.').next().unwrap_or(c).to_string();
            match condition {
                Condition::Compare { column: c, op: Operator::Eq, value } => {
                    record.attribute(&column(c)).and_then(Value::as_i64) == value.as_i64()
                }
                Condition::In { column: c, values } => {
                    let id = record.attribute(&column(c)).and_then(Value::as_i64);
                    values.iter().any(|v| v.as_i64() == id)
                }
                _ => true,
            }
        }

        fn run(&self, scope: &Scope) -> Vec<Record> {
            let mut rows: Vec<Record> = self
                .records
                .iter()
                .filter(|r| scope.conditions().iter().all(|c| Self::matches(r, c)))
                .cloned()
                .collect();
            for ordering in scope.orderings().iter().rev() {
                if let Ordering::Column { column, direction } = ordering {
                    let name = column.rsplit('.').next().unwrap_or(column).to_string();
                    rows.sort_by(|a, b| {
                        let (a, b) = (a.attribute(&name), b.attribute(&name));
                        let ord = match (a, b) {
                            (Some(Value::Int(a)), Some(Value::Int(b))) => a.cmp(b),
                            (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
                            _ => std::cmp::Ordering::Equal,
                        };
                        if *direction == Direction::Desc { ord.reverse() } else { ord }
                    });
                }
            }
            let offset = scope.offset_value().unwrap_or(0) as usize;
            let limit = scope.limit_value().map_or(usize::MAX, |l| l as usize);
            rows.into_iter().skip(offset).take(limit).collect()
        }
    }

    #[async_trait]
    impl DataSource for MemorySource {
        fn dialect(&self) -> Dialect {
            if self.found_rows { Dialect::Mysql } else { Dialect::Sqlite }
        }

        async fn pluck_ids(&self, scope: &Scope) -> Result<Vec<i64>> {
            Ok(self.run(scope).iter().map(Record::id).collect())
        }

        async fn fetch(&self, scope: &Scope) -> Result<Vec<Record>> {
            Ok(self.run(scope))
        }

        async fn count(&self, scope: &Scope) -> Result<u64> {
            self.counts.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.run(&scope.clone().unpaginated()).len() as u64)
        }

        async fn pluck_ids_with_found_rows(&self, scope: &Scope) -> Result<Option<(Vec<i64>, u64)>> {
            self.found_rows_calls.fetch_add(1, AtomicOrdering::SeqCst);
            if !self.found_rows {
                return Ok(None);
            }
            let total = self.run(&scope.clone().unpaginated()).len() as u64;
            Ok(Some((self.run(scope).iter().map(Record::id).collect(), total)))
        }
    }
}
