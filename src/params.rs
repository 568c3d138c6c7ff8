//! Untrusted request parameters
//!
//! Everything here is lenient: malformed numbers, ids, orders and filters are
//! dropped rather than reported, so arbitrary query strings only ever reach
//! SQL as bound values or as names matched against declared allowlists.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::Direction;
use crate::value::Value;

static LEADING_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)").unwrap());

/// One entry of the `include` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeRequest {
    pub name: String,
    /// Optional fields requested for this association's bucket
    pub fields: Vec<String>,
}

/// Request parameters keyed by name; a repeated key keeps its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    values: BTreeMap<String, String>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Raw value, `None` when absent or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn page(&self) -> Option<i64> {
        self.integer("page")
    }

    pub fn per_page(&self) -> Option<i64> {
        self.integer("per_page")
    }

    pub fn limit(&self) -> Option<i64> {
        self.integer("limit")
    }

    pub fn offset(&self) -> Option<i64> {
        self.integer("offset")
    }

    /// Ids from `only`: the leading digit run of each comma-separated entry.
    ///
    /// Entries without one are dropped. `None` only when `only` is absent;
    /// a present `only` with nothing usable restricts to no records.
    pub fn only_ids(&self) -> Option<Vec<i64>> {
        let mut ids: Vec<i64> = Vec::new();

        for entry in self.get("only")?.split(',') {
            let id = LEADING_ID
                .captures(entry)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse().ok());
            if let Some(id) = id {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        Some(ids)
    }

    /// `include=owner;tasks:title,due` style entries. An entry without a
    /// field list may also list several names separated by commas.
    pub fn includes(&self) -> Vec<IncludeRequest> {
        let Some(raw) = self.get("include") else {
            return Vec::new();
        };

        let mut requests: Vec<IncludeRequest> = Vec::new();
        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let parsed: Vec<IncludeRequest> = match entry.split_once(':') {
                Some((name, fields)) => vec![IncludeRequest {
                    name: name.trim().to_string(),
                    fields: split_list(fields),
                }],
                None => split_list(entry)
                    .into_iter()
                    .map(|name| IncludeRequest {
                        name,
                        fields: Vec::new(),
                    })
                    .collect(),
            };

            for request in parsed {
                if !requests.iter().any(|r| r.name == request.name) {
                    requests.push(request);
                }
            }
        }

        requests
    }

    /// Optional fields requested for the primary resource.
    pub fn optional_fields(&self) -> Vec<String> {
        self.get("fields").map(split_list).unwrap_or_default()
    }

    /// `filters=name:value,other:true`; `true`/`false` become booleans.
    pub fn filters(&self) -> BTreeMap<String, Value> {
        let Some(raw) = self.get("filters") else {
            return BTreeMap::new();
        };

        raw.split(',')
            .filter_map(|pair| pair.split_once(':'))
            .filter(|(name, _)| !name.trim().is_empty())
            .map(|(name, value)| (name.trim().to_string(), coerce_filter_value(value.trim())))
            .collect()
    }

    /// Argument for a declared filter: the `filters` entry, else a top-level
    /// parameter of the same name.
    pub fn filter_value(&self, name: &str) -> Option<Value> {
        self.filters()
            .remove(name)
            .or_else(|| self.get(name).map(coerce_filter_value))
    }

    /// `order=name:dir`. The direction is `None` when absent or unrecognised.
    pub fn order(&self) -> Option<(String, Option<Direction>)> {
        let raw = self.get("order")?;
        let (name, direction) = match raw.split_once(':') {
            Some((name, direction)) => (name.trim(), Direction::parse(direction)),
            None => (raw, None),
        };

        if name.is_empty() {
            return None;
        }
        Some((name.to_string(), direction))
    }

    pub fn search(&self) -> Option<&str> {
        self.get("search")
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn coerce_filter_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => Value::String(other.to_string()),
    }
}
