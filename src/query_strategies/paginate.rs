//! Filter, then paginate. Search parameters are ignored.

use async_trait::async_trait;

use super::{QueryStrategy, StrategyOptions};
use crate::db::{DataSource, Record, Scope};
use crate::error::Result;

pub struct Paginate {
    options: StrategyOptions,
}

impl Paginate {
    pub fn new(options: StrategyOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl QueryStrategy for Paginate {
    async fn execute(&self, scope: Scope, source: &dyn DataSource) -> Result<(Vec<Record>, u64)> {
        self.options.filter_and_paginate(scope, source, false).await
    }
}
