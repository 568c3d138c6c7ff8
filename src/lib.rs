//! Brainstem - declarative presenters for paginated, filtered JSON APIs
//!
//! A presenter declares how a model class is rendered (fields, associations,
//! conditionals), which filters and sort orders a request may use, and how
//! the collection is queried. [`PresenterCollection::presenting`] runs the
//! whole pipeline for one request and returns the response envelope.

extern crate self as brainstem;

pub mod collection;
pub mod config;
pub mod db;
pub mod dsl;
pub mod error;
pub mod inflect;
pub mod logging;
pub mod params;
pub mod presenter;
pub mod query_strategies;
pub mod registry;
pub mod search;
pub mod value;

pub use brainstem_macros::Attributes;
pub use collection::{PresenterCollection, PresentingOptions};
pub use config::BrainstemConfig;
pub use db::{Attributes, DataSource, Direction, ModelClass, Record, Related, Schema, Scope};
#[cfg(feature = "sqlite")]
pub use db::SqliteSource;
#[cfg(feature = "mysql")]
pub use db::MySqlSource;
pub use dsl::{
    AssociationOptions, Configuration, FieldOptions, FieldType, Filter, Helpers, PresenterBuilder,
};
pub use error::{Error, Result};
pub use params::RequestParams;
pub use presenter::{CountEvaluator, PresentOptions, Presented, Presenter};
pub use query_strategies::StrategyKind;
pub use search::{SearchOptions, SearchResults, Searcher};
pub use value::Value;
