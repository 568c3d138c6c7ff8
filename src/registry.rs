//! Process-wide presenter collections, keyed by namespace
//!
//! Collections are installed at boot and read on every request. Tests may
//! [`reset`] the registry between runs.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::collection::PresenterCollection;

static COLLECTIONS: Lazy<RwLock<HashMap<String, Arc<PresenterCollection>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Install `collection` under its namespace, replacing any previous one.
pub fn install(collection: PresenterCollection) -> Arc<PresenterCollection> {
    let namespace = collection.namespace().to_string();
    let collection = Arc::new(collection);
    let previous = COLLECTIONS
        .write()
        .insert(namespace.clone(), Arc::clone(&collection));
    if previous.is_some() {
        tracing::debug!(namespace = %namespace, "replaced presenter collection");
    } else {
        tracing::debug!(namespace = %namespace, "installed presenter collection");
    }
    collection
}

pub fn get(namespace: &str) -> Option<Arc<PresenterCollection>> {
    COLLECTIONS.read().get(namespace).cloned()
}

pub fn remove(namespace: &str) -> Option<Arc<PresenterCollection>> {
    COLLECTIONS.write().remove(namespace)
}

/// Installed namespaces, sorted.
pub fn namespaces() -> Vec<String> {
    let mut namespaces: Vec<String> = COLLECTIONS.read().keys().cloned().collect();
    namespaces.sort();
    namespaces
}

/// Drop every installed collection.
pub fn reset() {
    COLLECTIONS.write().clear();
}
