//! Helper instance handed to every dynamic, lookup and conditional block

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::db::Record;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::value::Value;

/// A named helper function declared on a presenter.
pub type HelperFn = Arc<dyn Fn(&Record, &Helpers) -> Value + Send + Sync>;

/// Request-scoped state available to presenter blocks: the request
/// parameters, an optional caller context (e.g. the current user) and the
/// presenter's declared helper functions.
#[derive(Clone, Default)]
pub struct Helpers {
    params: Arc<RequestParams>,
    context: Option<Arc<dyn Any + Send + Sync>>,
    functions: Arc<BTreeMap<String, HelperFn>>,
}

impl Helpers {
    pub fn new(params: RequestParams) -> Self {
        Self {
            params: Arc::new(params),
            ..Self::default()
        }
    }

    pub fn with_context<T: Any + Send + Sync>(mut self, context: T) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    pub fn with_shared_context(mut self, context: Arc<dyn Any + Send + Sync>) -> Self {
        self.context = Some(context);
        self
    }

    pub(crate) fn with_params(mut self, params: RequestParams) -> Self {
        self.params = Arc::new(params);
        self
    }

    /// Layer `functions` over the helpers already present.
    pub(crate) fn with_functions(mut self, functions: &BTreeMap<String, HelperFn>) -> Self {
        if functions.is_empty() {
            return self;
        }
        let mut merged = (*self.functions).clone();
        merged.extend(functions.iter().map(|(k, v)| (k.clone(), Arc::clone(v))));
        self.functions = Arc::new(merged);
        self
    }

    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    /// The caller context, if one of type `T` was supplied.
    pub fn context<T: Any>(&self) -> Option<&T> {
        self.context.as_ref()?.downcast_ref::<T>()
    }

    /// Call a declared helper function.
    pub fn call(&self, name: &str, model: &Record) -> Result<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| Error::UnknownHelper(name.to_string()))?;
        Ok(function(model, self))
    }

    pub fn has_helper(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl fmt::Debug for Helpers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helpers")
            .field("params", &self.params)
            .field("has_context", &self.context.is_some())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ModelClass;

    struct CurrentUser(i64);

    #[test]
    fn test_context_downcast() {
        let helpers = Helpers::default().with_context(CurrentUser(7));
        assert_eq!(helpers.context::<CurrentUser>().map(|u| u.0), Some(7));
        assert!(helpers.context::<String>().is_none());
    }

    #[test]
    fn test_call_declared_helper() {
        let mut functions: BTreeMap<String, HelperFn> = BTreeMap::new();
        functions.insert(
            "double_id".into(),
            Arc::new(|model: &Record, _: &Helpers| Value::Int(model.id() * 2)),
        );
        let helpers = Helpers::default().with_functions(&functions);
        let record = Record::new(
            Arc::new(ModelClass::new("Task", "tasks")),
            BTreeMap::from([("id".to_string(), Value::Int(4))]),
        );

        assert_eq!(helpers.call("double_id", &record).unwrap(), Value::Int(8));
        assert!(matches!(
            helpers.call("missing", &record),
            Err(Error::UnknownHelper(_))
        ));
    }
}
