//! Search capability consumed by the query strategies
//!
//! A presenter declares a [`Searcher`]; strategies hand it the free-text
//! query and receive ranked ids. `ids: None` means the backend cannot answer
//! right now and surfaces as [`crate::Error::SearchUnavailable`].

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::db::Direction;
use crate::value::Value;

/// Context passed along with the query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Association names the request asked to include.
    pub include: Vec<String>,
    /// Resolved sort order name and direction.
    pub order: Option<(String, Direction)>,
    pub per_page: u64,
    pub page: u64,
    /// Declared filters with the value each one resolved to.
    pub filters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Ranked ids, or `None` when the backend is unavailable.
    pub ids: Option<Vec<i64>>,
    /// Total number of hits across all pages.
    pub count: u64,
}

impl SearchResults {
    pub fn found(ids: Vec<i64>, count: u64) -> Self {
        Self {
            ids: Some(ids),
            count,
        }
    }

    pub fn unavailable() -> Self {
        Self { ids: None, count: 0 }
    }
}

#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> anyhow::Result<SearchResults>;
}

#[async_trait]
impl<F> Searcher for F
where
    F: Fn(&str, &SearchOptions) -> anyhow::Result<SearchResults> + Send + Sync,
{
    async fn search(&self, query: &str, options: &SearchOptions) -> anyhow::Result<SearchResults> {
        self(query, options)
    }
}
