//! Query scope builder
//!
//! A [`Scope`] only describes a query. Rendering lives in [`super::sql`] and
//! execution in a [`super::DataSource`], so presenters and filters can narrow a
//! scope without touching a connection.

use std::sync::Arc;

use super::ModelClass;
use crate::value::Value;

/// Comparison operator for a single-column condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
}

impl Operator {
    pub fn to_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
        }
    }
}

/// One `WHERE` predicate. Predicates are joined with `AND`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        op: Operator,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    Null {
        column: String,
        negated: bool,
    },
    /// Trusted SQL fragment with `?` placeholders for `binds`
    Raw { sql: String, binds: Vec<Value> },
}

/// Sort direction for `ORDER BY` clauses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn to_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    /// Parse `asc`/`desc` case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ordering {
    Column { column: String, direction: Direction },
    /// Trusted SQL expression, e.g. from a presenter's sort order declaration
    Raw(String),
}

/// An immutable-by-value query description over one model class.
#[derive(Debug, Clone)]
pub struct Scope {
    class: Arc<ModelClass>,
    conditions: Vec<Condition>,
    orderings: Vec<Ordering>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Scope {
    pub fn new(class: Arc<ModelClass>) -> Self {
        Self {
            class,
            conditions: Vec::new(),
            orderings: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn class(&self) -> &Arc<ModelClass> {
        &self.class
    }

    pub fn table(&self) -> &str {
        &self.class.table
    }

    pub fn primary_key(&self) -> &str {
        &self.class.primary_key
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn orderings(&self) -> &[Ordering] {
        &self.orderings
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_ordered(&self) -> bool {
        !self.orderings.is_empty()
    }

    /// `column = value`; a `Null` value becomes `column IS NULL`.
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if value.is_null() {
            return self.where_null(column);
        }
        self.where_op(column, Operator::Eq, value)
    }

    pub fn where_op(mut self, column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_in<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Restrict to the given primary keys.
    pub fn where_ids(self, ids: &[i64]) -> Self {
        let column = self.class.primary_key.clone();
        self.where_in(column, ids.iter().copied())
    }

    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::Null {
            column: column.into(),
            negated: false,
        });
        self
    }

    pub fn where_not_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::Null {
            column: column.into(),
            negated: true,
        });
        self
    }

    /// Add a trusted SQL predicate. Never build `sql` from request input; pass
    /// request values through `binds`.
    pub fn where_raw(mut self, sql: impl Into<String>, binds: Vec<Value>) -> Self {
        self.conditions.push(Condition::Raw {
            sql: sql.into(),
            binds,
        });
        self
    }

    /// Append an ordering.
    pub fn order(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.orderings.push(Ordering::Column {
            column: column.into(),
            direction,
        });
        self
    }

    /// Replace all orderings.
    pub fn reorder(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.orderings.clear();
        self.order(column, direction)
    }

    /// Replace all orderings with a trusted SQL expression.
    pub fn reorder_raw(mut self, sql: impl Into<String>) -> Self {
        self.orderings = vec![Ordering::Raw(sql.into())];
        self
    }

    /// Append a trusted SQL ordering expression.
    pub fn order_raw(mut self, sql: impl Into<String>) -> Self {
        self.orderings.push(Ordering::Raw(sql.into()));
        self
    }

    pub fn unordered(mut self) -> Self {
        self.orderings.clear();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Drop limit and offset, e.g. to count the full filtered set.
    pub fn unpaginated(mut self) -> Self {
        self.limit = None;
        self.offset = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::new(Arc::new(ModelClass::new("Workspace", "workspaces")))
    }

    #[test]
    fn test_where_eq_null_becomes_is_null() {
        let scope = scope().where_eq("archived_at", Value::Null);
        assert_eq!(
            scope.conditions(),
            &[Condition::Null {
                column: "archived_at".into(),
                negated: false
            }]
        );
    }

    #[test]
    fn test_reorder_replaces_orderings() {
        let scope = scope()
            .order("title", Direction::Asc)
            .order("id", Direction::Desc)
            .reorder("updated_at", Direction::Desc);
        assert_eq!(scope.orderings().len(), 1);
        assert!(scope.unordered().orderings().is_empty());
    }

    #[test]
    fn test_unpaginated_clears_limit_and_offset() {
        let scope = scope().limit(5).offset(10).unpaginated();
        assert_eq!(scope.limit_value(), None);
        assert_eq!(scope.offset_value(), None);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("DESC"), Some(Direction::Desc));
        assert_eq!(Direction::parse(" asc "), Some(Direction::Asc));
        assert_eq!(Direction::parse("sideways"), None);
    }
}
