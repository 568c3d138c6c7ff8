//! SQL rendering for scopes
//!
//! Every request-derived value is bound as a parameter. Identifiers are
//! validated and quoted, so only presenter declarations can shape the
//! statement text.

use std::fmt::Write as _;

use super::scope::{Condition, Ordering, Scope};
use crate::error::{Error, Result};
use crate::value::Value;

/// SQL flavour used for quoting and placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `"name"` identifiers, `?1` placeholders
    Sqlite,
    /// `` `name` `` identifiers, `?` placeholders
    Mysql,
    /// `"name"` identifiers, `$1` placeholders
    Postgres,
}

/// What the statement selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select {
    /// Every column
    Rows,
    /// Primary keys only, honouring order/limit/offset
    Ids,
    /// `COUNT(*)` of the filtered set; order/limit/offset are ignored
    Count,
    /// MySQL `SQL_CALC_FOUND_ROWS` id pluck, followed by `SELECT FOUND_ROWS()`
    IdsCalcFoundRows,
}

/// A rendered statement and its bind values in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub binds: Vec<Value>,
}

/// `name` or `table.name`, each part `[A-Za-z_][A-Za-z0-9_]*`.
fn is_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Quote a (possibly table-qualified) identifier for `dialect`.
pub fn quote_identifier(name: &str, dialect: Dialect) -> Result<String> {
    if !is_identifier(name) {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }

    let quote = match dialect {
        Dialect::Mysql => '`',
        Dialect::Sqlite | Dialect::Postgres => '"',
    };

    Ok(name
        .split('.')
        .map(|part| format!("{quote}{part}{quote}"))
        .collect::<Vec<_>>()
        .join("."))
}

/// Numbers placeholders as they are emitted.
struct Binder {
    dialect: Dialect,
    binds: Vec<Value>,
}

impl Binder {
    fn push(&mut self, value: Value) -> String {
        self.binds.push(value);
        let n = self.binds.len();
        match self.dialect {
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Mysql => "?".to_string(),
            Dialect::Postgres => format!("${}", n),
        }
    }

    /// Rewrite each bare `?` in a raw fragment to the next placeholder.
    fn rewrite(&mut self, sql: &str, binds: &[Value]) -> String {
        let mut binds = binds.iter();
        let mut chars = sql.chars().peekable();
        let mut out = String::with_capacity(sql.len());

        while let Some(c) = chars.next() {
            let numbered = chars.peek().is_some_and(|next| next.is_ascii_digit());
            if c == '?' && !numbered {
                match binds.next() {
                    Some(value) => out.push_str(&self.push(value.clone())),
                    None => out.push(c),
                }
            } else {
                out.push(c);
            }
        }

        out
    }
}

fn render_condition(condition: &Condition, binder: &mut Binder) -> Result<String> {
    let dialect = binder.dialect;
    Ok(match condition {
        Condition::Compare { column, op, value } => {
            let column = quote_identifier(column, dialect)?;
            format!("{} {} {}", column, op.to_sql(), binder.push(value.clone()))
        }
        Condition::In { values, .. } if values.is_empty() => "1 = 0".to_string(),
        Condition::In { column, values } => {
            let column = quote_identifier(column, dialect)?;
            let placeholders: Vec<String> = values.iter().map(|v| binder.push(v.clone())).collect();
            format!("{} IN ({})", column, placeholders.join(", "))
        }
        Condition::Null { column, negated } => {
            let column = quote_identifier(column, dialect)?;
            if *negated {
                format!("{} IS NOT NULL", column)
            } else {
                format!("{} IS NULL", column)
            }
        }
        Condition::Raw { sql, binds } => format!("({})", binder.rewrite(sql, binds)),
    })
}

fn render_ordering(ordering: &Ordering, dialect: Dialect) -> Result<String> {
    Ok(match ordering {
        Ordering::Column { column, direction } => {
            format!("{} {}", quote_identifier(column, dialect)?, direction.to_sql())
        }
        Ordering::Raw(sql) => sql.clone(),
    })
}

/// Render `scope` as a parameterised statement.
pub fn build(scope: &Scope, dialect: Dialect, select: Select) -> Result<SqlQuery> {
    let table = quote_identifier(scope.table(), dialect)?;
    let primary_key = format!("{}.{}", table, quote_identifier(scope.primary_key(), dialect)?);

    let mut sql = match select {
        Select::Rows => format!("SELECT {}.* FROM {}", table, table),
        Select::Ids => format!("SELECT {} FROM {}", primary_key, table),
        Select::Count => format!("SELECT COUNT(*) FROM {}", table),
        Select::IdsCalcFoundRows => {
            if dialect != Dialect::Mysql {
                return Err(Error::UnsupportedCapability("SQL_CALC_FOUND_ROWS"));
            }
            format!("SELECT SQL_CALC_FOUND_ROWS {} FROM {}", primary_key, table)
        }
    };

    let mut binder = Binder {
        dialect,
        binds: Vec::new(),
    };

    if !scope.conditions().is_empty() {
        let clauses = scope
            .conditions()
            .iter()
            .map(|c| render_condition(c, &mut binder))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if select == Select::Count {
        return Ok(SqlQuery {
            sql,
            binds: binder.binds,
        });
    }

    if scope.is_ordered() {
        let orderings = scope
            .orderings()
            .iter()
            .map(|o| render_ordering(o, dialect))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&orderings.join(", "));
    }

    match (scope.limit_value(), scope.offset_value()) {
        (Some(limit), offset) => {
            let _ = write!(sql, " LIMIT {}", limit);
            if let Some(offset) = offset.filter(|o| *o > 0) {
                let _ = write!(sql, " OFFSET {}", offset);
            }
        }
        (None, Some(offset)) if offset > 0 => match dialect {
            Dialect::Sqlite => {
                let _ = write!(sql, " LIMIT -1 OFFSET {}", offset);
            }
            Dialect::Mysql => {
                let _ = write!(sql, " LIMIT 18446744073709551615 OFFSET {}", offset);
            }
            Dialect::Postgres => {
                let _ = write!(sql, " OFFSET {}", offset);
            }
        },
        _ => {}
    }

    Ok(SqlQuery {
        sql,
        binds: binder.binds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::scope::{Direction, Operator};
    use crate::db::ModelClass;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn scope() -> Scope {
        Scope::new(Arc::new(ModelClass::new("Workspace", "workspaces")))
    }

    #[test]
    fn test_build_rows_with_binds_per_dialect() {
        let scope = scope()
            .where_eq("owner_id", 3)
            .where_op("title", Operator::Like, "%plan%")
            .order("updated_at", Direction::Desc)
            .limit(2)
            .offset(2);

        let sqlite = build(&scope, Dialect::Sqlite, Select::Rows).unwrap();
        assert_eq!(
            sqlite.sql,
            r#"SELECT "workspaces".* FROM "workspaces" WHERE "owner_id" = ?1 AND "title" LIKE ?2 ORDER BY "updated_at" DESC LIMIT 2 OFFSET 2"#
        );
        assert_eq!(sqlite.binds, vec![Value::Int(3), Value::from("%plan%")]);

        let mysql = build(&scope, Dialect::Mysql, Select::Ids).unwrap();
        assert_eq!(
            mysql.sql,
            "SELECT `workspaces`.`id` FROM `workspaces` WHERE `owner_id` = ? AND `title` LIKE ? ORDER BY `updated_at` DESC LIMIT 2 OFFSET 2"
        );

        let postgres = build(&scope, Dialect::Postgres, Select::Count).unwrap();
        assert_eq!(
            postgres.sql,
            r#"SELECT COUNT(*) FROM "workspaces" WHERE "owner_id" = $1 AND "title" LIKE $2"#
        );
    }

    #[test]
    fn test_empty_in_list_is_false_predicate() {
        let scope = scope().where_ids(&[]);
        let query = build(&scope, Dialect::Sqlite, Select::Ids).unwrap();
        assert_eq!(query.sql, r#"SELECT "workspaces"."id" FROM "workspaces" WHERE 1 = 0"#);
        assert!(query.binds.is_empty());
    }

    #[test]
    fn test_raw_fragments_are_renumbered() {
        let scope = scope()
            .where_eq("archived", false)
            .where_raw("participant_id = ? OR owner_id = ?", vec![Value::Int(4), Value::Int(4)]);
        let query = build(&scope, Dialect::Sqlite, Select::Count).unwrap();
        assert_eq!(
            query.sql,
            r#"SELECT COUNT(*) FROM "workspaces" WHERE "archived" = ?1 AND (participant_id = ?2 OR owner_id = ?3)"#
        );
        assert_eq!(query.binds.len(), 3);
    }

    #[test]
    fn test_injection_through_identifiers_is_rejected() {
        let scope = scope().order("id; DROP TABLE workspaces", Direction::Asc);
        assert!(matches!(
            build(&scope, Dialect::Sqlite, Select::Rows),
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_calc_found_rows_requires_mysql() {
        let scope = scope().limit(5);
        assert!(matches!(
            build(&scope, Dialect::Sqlite, Select::IdsCalcFoundRows),
            Err(Error::UnsupportedCapability(_))
        ));
        let query = build(&scope, Dialect::Mysql, Select::IdsCalcFoundRows).unwrap();
        assert!(query.sql.starts_with("SELECT SQL_CALC_FOUND_ROWS `workspaces`.`id`"));
    }

    #[test]
    fn test_offset_without_limit_on_sqlite() {
        let query = build(&scope().offset(4), Dialect::Sqlite, Select::Ids).unwrap();
        assert!(query.sql.ends_with("LIMIT -1 OFFSET 4"));
    }
}
