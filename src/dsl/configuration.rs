//! Inheritable configuration tree backing every presenter declaration
//!
//! Each node owns its own entries and points at an optional parent node:
//! - `get` falls back to the parent unless the parent marked the key
//!   nonheritable
//! - `nest` creates a child node wired to the parent's node of the same key
//! - `array` creates an append-only list that yields the parent's entries
//!   first
//!
//! Nodes are shared (`Arc`), so entries a parent gains after a child was
//! created are still visible through the child.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::association::Association;
use super::conditional::Conditional;
use super::field::Field;
use super::filter::{Filter, SortOrder};
use super::helpers::HelperFn;
use crate::error::{Error, Result};
use crate::presenter::{CountEvaluator, PresentFn};
use crate::query_strategies::StrategyKind;
use crate::search::Searcher;

/// A scalar configuration value.
#[derive(Clone)]
pub enum ConfigValue {
    Str(String),
    Bool(bool),
    Field(Arc<Field>),
    Association(Arc<Association>),
    Conditional(Arc<Conditional>),
    Filter(Arc<Filter>),
    SortOrder(Arc<SortOrder>),
    Helper(HelperFn),
    Search(Arc<dyn Searcher>),
    Strategy(StrategyKind),
    Count(Arc<dyn CountEvaluator>),
    Present(PresentFn),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&Arc<Field>> {
        match self {
            ConfigValue::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_association(&self) -> Option<&Arc<Association>> {
        match self {
            ConfigValue::Association(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_conditional(&self) -> Option<&Arc<Conditional>> {
        match self {
            ConfigValue::Conditional(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_filter(&self) -> Option<&Arc<Filter>> {
        match self {
            ConfigValue::Filter(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_sort_order(&self) -> Option<&Arc<SortOrder>> {
        match self {
            ConfigValue::SortOrder(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_helper(&self) -> Option<&HelperFn> {
        match self {
            ConfigValue::Helper(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_search(&self) -> Option<&Arc<dyn Searcher>> {
        match self {
            ConfigValue::Search(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_strategy(&self) -> Option<StrategyKind> {
        match self {
            ConfigValue::Strategy(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<&Arc<dyn CountEvaluator>> {
        match self {
            ConfigValue::Count(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_present(&self) -> Option<&PresentFn> {
        match self {
            ConfigValue::Present(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Str(s) => write!(f, "Str({:?})", s),
            ConfigValue::Bool(b) => write!(f, "Bool({})", b),
            ConfigValue::Field(field) => write!(f, "Field({})", field.name()),
            ConfigValue::Association(a) => write!(f, "Association({})", a.name()),
            ConfigValue::Conditional(c) => write!(f, "Conditional({})", c.name()),
            ConfigValue::Filter(filter) => write!(f, "Filter({})", filter.name()),
            ConfigValue::SortOrder(s) => write!(f, "SortOrder({})", s.name()),
            ConfigValue::Helper(_) => f.write_str("Helper"),
            ConfigValue::Search(_) => f.write_str("Search"),
            ConfigValue::Strategy(s) => write!(f, "Strategy({:?})", s),
            ConfigValue::Count(_) => f.write_str("Count"),
            ConfigValue::Present(_) => f.write_str("Present"),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

// ============================================================================
// Append-only arrays
// ============================================================================

struct ArrayNode {
    parent: Option<ConfigArray>,
    own: RwLock<Vec<ConfigValue>>,
}

/// Append-only list merged with the parent's list of the same key.
#[derive(Clone)]
pub struct ConfigArray {
    inner: Arc<ArrayNode>,
}

impl ConfigArray {
    fn new(parent: Option<ConfigArray>) -> Self {
        Self {
            inner: Arc::new(ArrayNode {
                parent,
                own: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn push(&self, value: impl Into<ConfigValue>) {
        self.inner.own.write().push(value.into());
    }

    /// Inherited entries followed by this node's own.
    pub fn to_vec(&self) -> Vec<ConfigValue> {
        let mut values = self
            .inner
            .parent
            .as_ref()
            .map(ConfigArray::to_vec)
            .unwrap_or_default();
        values.extend(self.inner.own.read().iter().cloned());
        values
    }

    pub fn strings(&self) -> Vec<String> {
        self.to_vec()
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.to_vec().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ConfigArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// What a node stores under a key.
#[derive(Clone, Debug)]
pub enum Entry {
    Value(ConfigValue),
    Nested(Configuration),
    Array(ConfigArray),
}

#[derive(Default)]
struct State {
    storage: BTreeMap<String, Entry>,
    nonheritable: BTreeSet<String>,
}

struct Node {
    parent: Option<Configuration>,
    state: RwLock<State>,
}

/// A configuration node.
#[derive(Clone)]
pub struct Configuration {
    inner: Arc<Node>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Configuration>) -> Self {
        Self {
            inner: Arc::new(Node {
                parent,
                state: RwLock::new(State::default()),
            }),
        }
    }

    /// A live child node inheriting from this one.
    pub fn child(&self) -> Configuration {
        Self::with_parent(Some(self.clone()))
    }

    pub fn parent(&self) -> Option<&Configuration> {
        self.inner.parent.as_ref()
    }

    fn own_entry(&self, key: &str) -> Option<Entry> {
        self.inner.state.read().storage.get(key).cloned()
    }

    fn is_nonheritable(&self, key: &str) -> bool {
        self.inner.state.read().nonheritable.contains(key)
    }

    /// The parent's view of `key`, or `None` when the parent marked it
    /// nonheritable.
    fn parent_entry(&self, key: &str) -> Option<Entry> {
        let parent = self.inner.parent.as_ref()?;
        if parent.is_nonheritable(key) {
            return None;
        }
        parent.entry(key)
    }

    fn entry(&self, key: &str) -> Option<Entry> {
        self.own_entry(key).or_else(|| self.parent_entry(key))
    }

    /// Scalar value for `key`, falling back to the parent chain.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        match self.entry(key)? {
            Entry::Value(value) => Some(value),
            Entry::Nested(_) | Entry::Array(_) => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// Nested node for `key` without creating one.
    pub fn get_nested(&self, key: &str) -> Option<Configuration> {
        match self.entry(key)? {
            Entry::Nested(node) => Some(node),
            _ => None,
        }
    }

    /// Array for `key` without creating one.
    pub fn get_array(&self, key: &str) -> Option<ConfigArray> {
        match self.entry(key)? {
            Entry::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// Store a scalar. Keys holding a nested node or an array (here or
    /// inherited) cannot be overwritten.
    pub fn set(&self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Result<()> {
        let key = key.into();
        if let Some(Entry::Nested(_) | Entry::Array(_)) = self.entry(&key) {
            return Err(Error::ConfigurationOverwrite(key));
        }
        self.inner
            .state
            .write()
            .storage
            .insert(key, Entry::Value(value.into()));
        Ok(())
    }

    /// Idempotently create (or return) the nested node for `key`, inheriting
    /// from the parent's node of the same key.
    pub fn nest(&self, key: impl Into<String>) -> Result<Configuration> {
        let key = key.into();
        match self.own_entry(&key) {
            Some(Entry::Nested(node)) => return Ok(node),
            Some(_) => return Err(Error::ConfigurationOverwrite(key)),
            None => {}
        }

        let parent = match &self.inner.parent {
            Some(parent) if !parent.is_nonheritable(&key) => Some(parent.nest(key.clone())?),
            _ => None,
        };

        let mut state = self.inner.state.write();
        // Another caller may have nested the key while the lock was released.
        if let Some(Entry::Nested(node)) = state.storage.get(&key) {
            return Ok(node.clone());
        }
        let node = Self::with_parent(parent);
        state.storage.insert(key, Entry::Nested(node.clone()));
        Ok(node)
    }

    /// Idempotently create (or return) the append-only array for `key`.
    pub fn array(&self, key: impl Into<String>) -> Result<ConfigArray> {
        let key = key.into();
        match self.own_entry(&key) {
            Some(Entry::Array(array)) => return Ok(array),
            Some(_) => return Err(Error::ConfigurationOverwrite(key)),
            None => {}
        }

        let parent = match &self.inner.parent {
            Some(parent) if !parent.is_nonheritable(&key) => Some(parent.array(key.clone())?),
            _ => None,
        };

        let mut state = self.inner.state.write();
        if let Some(Entry::Array(array)) = state.storage.get(&key) {
            return Ok(array.clone());
        }
        let array = ConfigArray::new(parent);
        state.storage.insert(key, Entry::Array(array.clone()));
        Ok(array)
    }

    /// Children of this node no longer inherit `key`.
    pub fn mark_nonheritable(&self, key: impl Into<String>) {
        self.inner.state.write().nonheritable.insert(key.into());
    }

    /// Own keys plus every heritable inherited key.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self.inner.state.read().storage.keys().cloned().collect();
        if let Some(parent) = &self.inner.parent {
            let hidden = parent.inner.state.read().nonheritable.clone();
            keys.extend(parent.keys().into_iter().filter(|k| !hidden.contains(k)));
        }
        keys.into_iter().collect()
    }

    /// Every scalar entry visible from this node, keyed by name.
    pub fn entries(&self) -> Vec<(String, ConfigValue)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    pub fn fields(&self) -> Vec<Arc<Field>> {
        self.entries()
            .iter()
            .filter_map(|(_, v)| v.as_field().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    pub fn ptr_eq(&self, other: &Configuration) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for key in self.keys() {
            map.entry(&key, &self.entry(&key));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_get_falls_back_to_parent() {
        let parent = Configuration::new();
        parent.set("brainstem_key", "workspaces").unwrap();
        let child = parent.child();

        assert_eq!(child.get_str("brainstem_key").as_deref(), Some("workspaces"));
        child.set("brainstem_key", "spaces").unwrap();
        assert_eq!(child.get_str("brainstem_key").as_deref(), Some("spaces"));
        assert_eq!(parent.get_str("brainstem_key").as_deref(), Some("workspaces"));
    }

    #[test]
    fn test_later_parent_changes_are_visible() {
        let parent = Configuration::new();
        let child = parent.child();
        parent.set("default_sort_order", "title:asc").unwrap();
        assert_eq!(child.get_str("default_sort_order").as_deref(), Some("title:asc"));
    }

    #[test]
    fn test_nonheritable_is_checked_on_the_declaring_node() {
        let base = Configuration::new();
        base.set("title", "Base").unwrap();
        base.mark_nonheritable("title");

        let child = base.child();
        assert!(child.get("title").is_none());
        assert!(!child.keys().contains(&"title".to_string()));

        // The child's own value is visible to its own children.
        child.set("title", "Child").unwrap();
        child.set("description", "kept").unwrap();
        let grandchild = child.child();
        assert_eq!(grandchild.get_str("title").as_deref(), Some("Child"));
        assert_eq!(grandchild.get_str("description").as_deref(), Some("kept"));
    }

    #[test]
    fn test_nest_is_idempotent_and_inherits() {
        let parent = Configuration::new();
        parent.nest("fields").unwrap().set("title", true).unwrap();

        let child = parent.child();
        let fields = child.nest("fields").unwrap();
        assert!(fields.ptr_eq(&child.nest("fields").unwrap()));
        assert_eq!(fields.get_bool("title"), Some(true));

        fields.set("due", false).unwrap();
        assert!(parent.nest("fields").unwrap().get("due").is_none());
        assert_eq!(fields.keys(), vec!["due".to_string(), "title".to_string()]);
    }

    #[test]
    fn test_nested_and_array_keys_cannot_become_scalars() {
        let config = Configuration::new();
        config.nest("fields").unwrap();
        config.array("preloads").unwrap();

        assert_matches!(config.set("fields", "x"), Err(Error::ConfigurationOverwrite(_)));
        assert_matches!(config.set("preloads", "x"), Err(Error::ConfigurationOverwrite(_)));

        let child = config.child();
        assert_matches!(child.set("fields", "x"), Err(Error::ConfigurationOverwrite(_)));
    }

    #[test]
    fn test_arrays_append_to_inherited_entries() {
        let parent = Configuration::new();
        parent.array("preloads").unwrap().push("owner");

        let child = parent.child();
        let preloads = child.array("preloads").unwrap();
        preloads.push("tasks");
        parent.array("preloads").unwrap().push("members");

        assert_eq!(preloads.strings(), vec!["owner", "members", "tasks"]);
        assert_eq!(parent.array("preloads").unwrap().strings(), vec!["owner", "members"]);
    }
}
