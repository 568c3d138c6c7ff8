//! Declared filters and sort orders
//!
//! Requests can only name filters and sort orders a presenter declared; the
//! request value reaches SQL as a bound parameter via the filter's scope
//! block.

use std::fmt;
use std::sync::Arc;

use super::helpers::Helpers;
use crate::db::{Direction, Scope};
use crate::value::Value;

pub type FilterFn = Arc<dyn Fn(Scope, &Value, &Helpers) -> Scope + Send + Sync>;
pub type SortFn = Arc<dyn Fn(Scope, Direction) -> Scope + Send + Sync>;

/// A named, request-selectable scope narrowing.
#[derive(Clone)]
pub struct Filter {
    name: String,
    default: Option<Value>,
    apply: Option<FilterFn>,
    info: Option<String>,
}

impl Filter {
    /// A filter matching `name = value`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            apply: None,
            info: None,
        }
    }

    /// A filter narrowing the scope with `apply(scope, value, helpers)`.
    pub fn with<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(Scope, &Value, &Helpers) -> Scope + Send + Sync + 'static,
    {
        Self {
            apply: Some(Arc::new(apply)),
            ..Self::new(name)
        }
    }

    /// Applied with this value when the request does not name the filter.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_arg(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    pub fn apply(&self, scope: Scope, arg: &Value, helpers: &Helpers) -> Scope {
        match &self.apply {
            Some(apply) => apply(scope, arg, helpers),
            None => scope.where_eq(self.name.clone(), arg.clone()),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("custom", &self.apply.is_some())
            .finish()
    }
}

/// How a named sort order orders a scope.
#[derive(Clone)]
pub enum SortOrderKind {
    /// `ORDER BY <column> <direction>`; the column may be table-qualified
    Column(String),
    Custom(SortFn),
}

#[derive(Clone)]
pub struct SortOrder {
    name: String,
    kind: SortOrderKind,
}

impl SortOrder {
    pub fn column(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SortOrderKind::Column(column.into()),
        }
    }

    pub fn custom<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(Scope, Direction) -> Scope + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: SortOrderKind::Custom(Arc::new(apply)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SortOrderKind {
        &self.kind
    }

    /// Replace the scope's ordering with this sort order.
    pub fn apply(&self, scope: Scope, direction: Direction) -> Scope {
        match &self.kind {
            SortOrderKind::Column(column) => scope.reorder(column.clone(), direction),
            SortOrderKind::Custom(apply) => apply(scope.unordered(), direction),
        }
    }
}

impl fmt::Debug for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            SortOrderKind::Column(column) => column.as_str(),
            SortOrderKind::Custom(_) => "<custom>",
        };
        f.debug_struct("SortOrder")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}
