//! Process-wide presenter configuration
//!
//! Settings are read once at boot and handed to every query strategy; nothing
//! in the crate mutates them afterwards.

use std::env;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Immutable settings shared by every presenter collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrainstemConfig {
    /// Page size used when the request does not ask for one (or asks for < 1)
    pub default_per_page: u64,

    /// Upper bound on the page size a request may ask for
    pub default_max_per_page: u64,

    /// How many ranked ids a filter-and-search request fetches from search
    pub max_filter_and_search_page: u64,

    /// Use MySQL's `SQL_CALC_FOUND_ROWS` to fetch a page and its total in one
    /// round trip when the data source supports it
    pub mysql_use_calc_found_rows: bool,
}

impl Default for BrainstemConfig {
    fn default() -> Self {
        Self {
            default_per_page: 20,
            default_max_per_page: 200,
            max_filter_and_search_page: 10_000,
            mysql_use_calc_found_rows: false,
        }
    }
}

impl BrainstemConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            default_per_page: parse_var("BRAINSTEM_DEFAULT_PER_PAGE")?
                .unwrap_or(defaults.default_per_page),

            default_max_per_page: parse_var("BRAINSTEM_DEFAULT_MAX_PER_PAGE")?
                .unwrap_or(defaults.default_max_per_page),

            max_filter_and_search_page: parse_var("BRAINSTEM_MAX_FILTER_AND_SEARCH_PAGE")?
                .unwrap_or(defaults.max_filter_and_search_page),

            mysql_use_calc_found_rows: env::var("BRAINSTEM_MYSQL_USE_CALC_FOUND_ROWS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.mysql_use_calc_found_rows),
        })
    }
}

fn parse_var(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {}: {:?}", name, raw)),
        Err(_) => Ok(None),
    }
}
