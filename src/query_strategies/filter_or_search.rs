//! Search or filter, never both
//!
//! With a search query (and a declared search), the search backend decides
//! the page and the count and filters are not applied. Without one, the
//! scope is filtered and paginated, optionally counting in the same round
//! trip when the engine supports it.

use async_trait::async_trait;

use super::{order_by_ids, QueryStrategy, StrategyOptions};
use crate::db::{DataSource, Record, Scope};
use crate::error::Result;

pub struct FilterOrSearch {
    options: StrategyOptions,
}

impl FilterOrSearch {
    pub fn new(options: StrategyOptions) -> Self {
        Self { options }
    }

    async fn search(&self, query: &str, scope: Scope, source: &dyn DataSource) -> Result<(Vec<Record>, u64)> {
        let search_options = self
            .options
            .search_options(self.options.calculate_per_page(), self.options.calculate_page());
        let (ids, count) = self.options.run_search(query, &search_options).await?;
        if ids.is_empty() {
            return Ok((Vec::new(), count));
        }

        let scope = scope.where_ids(&ids).unordered().unpaginated();
        let records = source.fetch(&scope).await?;
        Ok((order_by_ids(records, &ids), count))
    }
}

#[async_trait]
impl QueryStrategy for FilterOrSearch {
    async fn execute(&self, scope: Scope, source: &dyn DataSource) -> Result<(Vec<Record>, u64)> {
        let query = self.options.params.search().map(str::to_string);
        match query {
            Some(query) if self.options.presenter.searcher().is_some() => {
                self.search(&query, scope, source).await
            }
            _ => self.options.filter_and_paginate(scope, source, true).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrainstemConfig;
    use crate::db::Direction;
    use crate::dsl::{FieldOptions, FieldType, Filter};
    use crate::error::Error;
    use crate::params::RequestParams;
    use crate::presenter::{CountEvaluator, Presenter};
    use crate::query_strategies::test_support::MemorySource;
    use crate::search::{SearchOptions, SearchResults};
    use assert_matches::assert_matches;
    use std::sync::atomic::Ordering;

    fn presenter() -> Presenter {
        Presenter::builder()
            .presents("Workspace")
            .default_sort_order("title:asc")
            .sort_order("title", "workspaces.title")
            .filter(Filter::new("owner_id"))
            .search(|query: &str, options: &SearchOptions| {
                assert_eq!(options.order, Some(("title".to_string(), Direction::Asc)));
                match query {
                    "down" => Ok(SearchResults::unavailable()),
                    "broken" => Err(anyhow::anyhow!("index missing")),
                    _ => Ok(SearchResults::found(vec![5, 2, 99], 12)),
                }
            })
            .fields(|f| {
                f.field("title", FieldType::String, FieldOptions::new());
            })
            .build()
            .unwrap()
    }

    fn options(query: &str, config: &BrainstemConfig) -> StrategyOptions {
        StrategyOptions::new(presenter(), RequestParams::from_query(query), "workspaces", config)
    }

    #[tokio::test]
    async fn test_search_replaces_filters_and_keeps_rank() {
        let (class, source) = MemorySource::workspaces(6);
        let strategy = FilterOrSearch::new(options("search=plan&owner_id=0", &BrainstemConfig::default()));
        let (records, count) = strategy.execute(Scope::new(class), &source).await.unwrap();

        let ids: Vec<i64> = records.iter().map(Record::id).collect();
        assert_eq!(ids, vec![5, 2]);
        assert_eq!(count, 12);
    }

    #[tokio::test]
    async fn test_search_unavailable_is_an_error() {
        let (class, source) = MemorySource::workspaces(3);
        let strategy = FilterOrSearch::new(options("search=down", &BrainstemConfig::default()));
        assert_matches!(
            strategy.execute(Scope::new(class.clone()), &source).await,
            Err(Error::SearchUnavailable)
        );

        let strategy = FilterOrSearch::new(options("search=broken", &BrainstemConfig::default()));
        assert_matches!(strategy.execute(Scope::new(class), &source).await, Err(Error::Search(_)));
    }

    #[tokio::test]
    async fn test_found_rows_replaces_the_count_query() {
        let (class, mut source) = MemorySource::workspaces(6);
        source.found_rows = true;
        let config = BrainstemConfig {
            mysql_use_calc_found_rows: true,
            ..BrainstemConfig::default()
        };

        let strategy = FilterOrSearch::new(options("per_page=4&page=2", &config));
        let (records, count) = strategy.execute(Scope::new(class.clone()), &source).await.unwrap();
        let ids: Vec<i64> = records.iter().map(Record::id).collect();
        assert_eq!(ids, vec![5, 6]);
        assert_eq!(count, 6);
        assert_eq!(source.counts.load(Ordering::SeqCst), 0);

        let strategy = FilterOrSearch::new(options("per_page=4", &BrainstemConfig::default()));
        let (_, count) = strategy.execute(Scope::new(class), &source).await.unwrap();
        assert_eq!(count, 6);
        assert_eq!(source.counts.load(Ordering::SeqCst), 1);
    }

    struct FixedCount(u64);

    #[async_trait]
    impl CountEvaluator for FixedCount {
        async fn evaluate_count(&self, _scope: &Scope, _source: &dyn DataSource) -> Result<u64> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_presenter_count_bypasses_found_rows() {
        let (class, mut source) = MemorySource::workspaces(6);
        source.found_rows = true;
        let config = BrainstemConfig {
            mysql_use_calc_found_rows: true,
            ..BrainstemConfig::default()
        };
        let presenter = Presenter::inherits(&presenter())
            .presents("Workspace")
            .evaluate_count(FixedCount(42))
            .build()
            .unwrap();

        let options = StrategyOptions::new(presenter, RequestParams::from_query("per_page=4"), "workspaces", &config);
        let (records, count) = FilterOrSearch::new(options)
            .execute(Scope::new(class), &source)
            .await
            .unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(count, 42);
        assert_eq!(source.found_rows_calls.load(Ordering::SeqCst), 0);
        assert_eq!(source.counts.load(Ordering::SeqCst), 0);
    }
}
