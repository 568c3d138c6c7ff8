//! Presentable associations
//!
//! An [`Association`] renders as an id reference on its owner and, when
//! requested as an include, contributes its records to a sibling bucket.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::helpers::Helpers;
use crate::db::{Record, Related};
use crate::error::{Error, Result};
use crate::inflect;
use crate::presenter::RenderContext;

pub type RelatedFn = Arc<dyn Fn(&Record, &Helpers) -> Related + Send + Sync>;
pub type RelatedLookupFn = Arc<dyn Fn(&[Arc<Record>], &Helpers) -> HashMap<i64, Related> + Send + Sync>;
pub type RelatedFetchFn = Arc<dyn Fn(&HashMap<i64, Related>, &Record, &Helpers) -> Related + Send + Sync>;

/// The class an association points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationTarget {
    Fixed(String),
    /// Resolved per record from its runtime class
    Polymorphic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Where related records come from.
#[derive(Clone)]
pub enum RelatedSource {
    /// The same-named (preloaded) model association
    Method,
    /// A differently-named model association
    Via(String),
    Dynamic(RelatedFn),
    Lookup {
        lookup: RelatedLookupFn,
        fetch: Option<RelatedFetchFn>,
    },
}

impl fmt::Debug for RelatedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelatedSource::Method => f.write_str("Method"),
            RelatedSource::Via(name) => write!(f, "Via({:?})", name),
            RelatedSource::Dynamic(_) => f.write_str("Dynamic"),
            RelatedSource::Lookup { fetch, .. } => write!(f, "Lookup {{ custom_fetch: {} }}", fetch.is_some()),
        }
    }
}

/// Options accepted when declaring an association.
#[derive(Clone, Default)]
pub struct AssociationOptions {
    via: Option<String>,
    dynamic: Option<RelatedFn>,
    lookup: Option<RelatedLookupFn>,
    lookup_fetch: Option<RelatedFetchFn>,
    conditions: Vec<String>,
    cardinality: Option<Cardinality>,
    json_name: Option<String>,
    restrict_to_only: bool,
    polymorphic_classes: Vec<String>,
    nodoc: bool,
    info: Option<String>,
}

impl AssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn via(mut self, name: impl Into<String>) -> Self {
        self.via = Some(name.into());
        self
    }

    pub fn dynamic<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record, &Helpers) -> Related + Send + Sync + 'static,
    {
        self.dynamic = Some(Arc::new(f));
        self
    }

    pub fn lookup<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Arc<Record>], &Helpers) -> HashMap<i64, Related> + Send + Sync + 'static,
    {
        self.lookup = Some(Arc::new(f));
        self
    }

    pub fn lookup_fetch<F>(mut self, f: F) -> Self
    where
        F: Fn(&HashMap<i64, Related>, &Record, &Helpers) -> Related + Send + Sync + 'static,
    {
        self.lookup_fetch = Some(Arc::new(f));
        self
    }

    pub fn when(mut self, conditional: impl Into<String>) -> Self {
        self.conditions.push(conditional.into());
        self
    }

    /// Override the cardinality inferred from the name.
    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    /// Bucket key for included records, instead of the target's brainstem key.
    pub fn json_name(mut self, name: impl Into<String>) -> Self {
        self.json_name = Some(name.into());
        self
    }

    /// Only includable when the request also passes `only`.
    pub fn restrict_to_only(mut self) -> Self {
        self.restrict_to_only = true;
        self
    }

    /// Classes a polymorphic association may point at.
    pub fn polymorphic_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.polymorphic_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn nodoc(mut self) -> Self {
        self.nodoc = true;
        self
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }
}

/// One presentable relation.
pub struct Association {
    name: String,
    target: AssociationTarget,
    source: RelatedSource,
    conditions: Vec<String>,
    cardinality: Cardinality,
    json_name: Option<String>,
    restrict_to_only: bool,
    polymorphic_classes: Vec<String>,
    nodoc: bool,
    info: Option<String>,
}

impl Association {
    pub fn new(
        name: impl Into<String>,
        target: AssociationTarget,
        options: AssociationOptions,
    ) -> Result<Self> {
        let name = name.into();

        let declared = [
            options.via.is_some(),
            options.dynamic.is_some(),
            options.lookup.is_some(),
        ]
        .iter()
        .filter(|d| **d)
        .count();
        if declared > 1 {
            return Err(Error::invalid_declaration(
                &name,
                "only one of via, dynamic or lookup may be given",
            ));
        }
        if options.lookup_fetch.is_some() && options.lookup.is_none() {
            return Err(Error::invalid_declaration(&name, "lookup_fetch requires a lookup"));
        }
        if target != AssociationTarget::Polymorphic && !options.polymorphic_classes.is_empty() {
            return Err(Error::invalid_declaration(
                &name,
                "polymorphic_classes is only valid on polymorphic associations",
            ));
        }

        let source = match (options.lookup, options.dynamic, options.via) {
            (Some(lookup), _, _) => RelatedSource::Lookup {
                lookup,
                fetch: options.lookup_fetch,
            },
            (None, Some(dynamic), _) => RelatedSource::Dynamic(dynamic),
            (None, None, Some(via)) => RelatedSource::Via(via),
            (None, None, None) => RelatedSource::Method,
        };

        let cardinality = options.cardinality.unwrap_or(if inflect::is_plural(&name) {
            Cardinality::Many
        } else {
            Cardinality::One
        });

        Ok(Self {
            name,
            target,
            source,
            conditions: options.conditions,
            cardinality,
            json_name: options.json_name,
            restrict_to_only: options.restrict_to_only,
            polymorphic_classes: options.polymorphic_classes,
            nodoc: options.nodoc,
            info: options.info,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &AssociationTarget {
        &self.target
    }

    pub fn is_polymorphic(&self) -> bool {
        self.target == AssociationTarget::Polymorphic
    }

    pub fn source(&self) -> &RelatedSource {
        &self.source
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_multiple(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    pub fn json_name(&self) -> Option<&str> {
        self.json_name.as_deref()
    }

    pub fn restrict_to_only(&self) -> bool {
        self.restrict_to_only
    }

    pub fn polymorphic_classes(&self) -> &[String] {
        &self.polymorphic_classes
    }

    pub fn nodoc(&self) -> bool {
        self.nodoc
    }

    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    /// Model association to preload for this include, if it reads one.
    pub fn method_name(&self) -> Option<&str> {
        match &self.source {
            RelatedSource::Method => Some(&self.name),
            RelatedSource::Via(via) => Some(via),
            RelatedSource::Dynamic(_) | RelatedSource::Lookup { .. } => None,
        }
    }

    pub fn presentable(&self, model: &Record, ctx: &RenderContext) -> Result<bool> {
        for conditional in &self.conditions {
            if !ctx.conditional_matches(conditional, model)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn empty(&self) -> Related {
        match self.cardinality {
            Cardinality::One => Related::One(None),
            Cardinality::Many => Related::Many(Vec::new()),
        }
    }

    /// The related record(s) of `model`.
    pub fn run_on(&self, model: &Record, ctx: &RenderContext) -> Result<Related> {
        let helpers = ctx.helpers();
        match &self.source {
            RelatedSource::Lookup { lookup, fetch } => {
                let table = ctx.association_lookup(&self.name, || lookup(ctx.models(), helpers));
                Ok(match fetch {
                    Some(fetch) => fetch(table.as_ref(), model, helpers),
                    None => table.get(&model.id()).cloned().unwrap_or_else(|| self.empty()),
                })
            }
            RelatedSource::Dynamic(dynamic) => Ok(dynamic(model, helpers)),
            RelatedSource::Via(via) => Ok(model.related(via)?.unwrap_or_else(|| self.empty())),
            RelatedSource::Method => Ok(model.related(&self.name)?.unwrap_or_else(|| self.empty())),
        }
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("source", &self.source)
            .field("cardinality", &self.cardinality)
            .finish()
    }
}
