//! Named boolean gates for fields and associations

use std::fmt;
use std::sync::Arc;

use super::helpers::Helpers;
use crate::db::Record;

pub type ModelPredicate = Arc<dyn Fn(&Record, &Helpers) -> bool + Send + Sync>;
pub type RequestPredicate = Arc<dyn Fn(&Helpers) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum ConditionalKind {
    /// Evaluated per record
    Model(ModelPredicate),
    /// Evaluated once per render pass from request state
    Request(RequestPredicate),
}

#[derive(Clone)]
pub struct Conditional {
    name: String,
    kind: ConditionalKind,
    info: Option<String>,
}

impl Conditional {
    pub fn model<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Record, &Helpers) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: ConditionalKind::Model(Arc::new(predicate)),
            info: None,
        }
    }

    pub fn request<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Helpers) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: ConditionalKind::Request(Arc::new(predicate)),
            info: None,
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ConditionalKind {
        &self.kind
    }

    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    pub fn is_model(&self) -> bool {
        matches!(self.kind, ConditionalKind::Model(_))
    }

    /// Evaluate without caching; render passes go through
    /// [`crate::presenter::RenderContext::conditional_matches`].
    pub fn evaluate(&self, model: &Record, helpers: &Helpers) -> bool {
        match &self.kind {
            ConditionalKind::Model(predicate) => predicate(model, helpers),
            ConditionalKind::Request(predicate) => predicate(helpers),
        }
    }
}

impl fmt::Debug for Conditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditional")
            .field("name", &self.name)
            .field("kind", &if self.is_model() { "model" } else { "request" })
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ModelClass;
    use crate::params::RequestParams;
    use std::collections::BTreeMap;

    #[test]
    fn test_request_conditional_ignores_model() {
        let conditional = Conditional::request("is_admin", |h| h.params().get("admin") == Some("1"));
        let record = Record::new(Arc::new(ModelClass::new("Task", "tasks")), BTreeMap::new());

        let helpers = Helpers::new(RequestParams::from_query("admin=1"));
        assert!(conditional.evaluate(&record, &helpers));
        assert!(!conditional.evaluate(&record, &Helpers::default()));
        assert!(!conditional.is_model());
    }
}
