//! Intersect search hits with filters
//!
//! Search supplies up to `max_filter_and_search_page` ranked ids; the scope
//! is narrowed to those ids and then filtered. The count is the size of the
//! intersection. Without an explicit `order`, search rank is preserved and
//! the page is cut in memory.

use async_trait::async_trait;

use super::{order_by_ids, QueryStrategy, StrategyOptions};
use crate::db::{DataSource, Record, Scope};
use crate::error::Result;

pub struct FilterAndSearch {
    options: StrategyOptions,
}

impl FilterAndSearch {
    pub fn new(options: StrategyOptions) -> Self {
        Self { options }
    }

    async fn find_ids(&self) -> Result<Vec<i64>> {
        let query = self.options.params.search().unwrap_or_default().to_string();
        let search_options = self
            .options
            .search_options(self.options.max_filter_and_search_page, 1);
        let (ids, _) = self.options.run_search(&query, &search_options).await?;
        Ok(ids)
    }
}

#[async_trait]
impl QueryStrategy for FilterAndSearch {
    async fn execute(&self, scope: Scope, source: &dyn DataSource) -> Result<(Vec<Record>, u64)> {
        let ids = self.find_ids().await?;
        let scope = self.options.apply_filters(scope.where_ids(&ids));
        let count = self.options.evaluate_count(&scope, source).await?;

        if self.options.params.order().is_some() {
            let paged = self.options.paginate(self.options.apply_ordering(scope));
            let models = self.options.fetch_models(&paged, source).await?;
            return Ok((models, count));
        }

        let records = source.fetch(&scope.unordered().unpaginated()).await?;
        let (limit, offset) = self.options.calculate_limit_and_offset();
        let models = order_by_ids(records, &ids)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((models, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrainstemConfig;
    use crate::dsl::{FieldOptions, FieldType, Filter};
    use crate::error::Error;
    use crate::params::RequestParams;
    use crate::presenter::Presenter;
    use crate::query_strategies::test_support::MemorySource;
    use crate::query_strategies::StrategyKind;
    use crate::search::{SearchOptions, SearchResults};
    use assert_matches::assert_matches;

    fn presenter() -> Presenter {
        Presenter::builder()
            .presents("Workspace")
            .query_strategy(StrategyKind::FilterAndSearch)
            .default_sort_order("title:asc")
            .sort_order("title", "workspaces.title")
            .filter(Filter::new("owner_id"))
            .search(|_: &str, options: &SearchOptions| -> anyhow::Result<SearchResults> {
                assert_eq!((options.per_page, options.page), (10_000, 1));
                Ok(SearchResults::found(vec![6, 3, 4, 1, 2], 5))
            })
            .fields(|f| {
                f.field("title", FieldType::String, FieldOptions::new());
            })
            .build()
            .unwrap()
    }

    async fn run(query: &str) -> (Vec<i64>, u64) {
        let (class, source) = MemorySource::workspaces(6);
        let options = StrategyOptions::new(
            presenter(),
            RequestParams::from_query(query),
            "workspaces",
            &BrainstemConfig::default(),
        );
        let (records, count) = options.strategy().execute(Scope::new(class), &source).await.unwrap();
        (records.iter().map(Record::id).collect(), count)
    }

    #[tokio::test]
    async fn test_keeps_search_rank_and_counts_the_intersection() {
        assert_eq!(run("search=plan&filters=owner_id:0").await, (vec![6, 4, 2], 3));
        assert_eq!(run("search=plan&filters=owner_id:0&per_page=2&page=2").await, (vec![2], 3));
    }

    #[tokio::test]
    async fn test_explicit_order_wins_over_rank() {
        assert_eq!(run("search=plan&order=title:desc&per_page=2").await, (vec![6, 4], 5));
    }

    #[tokio::test]
    async fn test_search_unavailable_is_an_error() {
        let (class, source) = MemorySource::workspaces(6);
        let presenter = Presenter::inherits(&presenter())
            .presents("Workspace")
            .search(|_: &str, _: &SearchOptions| -> anyhow::Result<SearchResults> {
                Ok(SearchResults::unavailable())
            })
            .build()
            .unwrap();
        let options = StrategyOptions::new(
            presenter,
            RequestParams::from_query("search=plan&filters=owner_id:0"),
            "workspaces",
            &BrainstemConfig::default(),
        );

        assert_matches!(
            options.strategy().execute(Scope::new(class), &source).await,
            Err(Error::SearchUnavailable)
        );
    }
}
