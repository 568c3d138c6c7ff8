//! Presenter declaration DSL
//!
//! Declarations are stored in an inheritable [`Configuration`] tree and
//! assembled with [`PresenterBuilder`]:
//! - [`Field`] - a rendered attribute, method, dynamic value or block
//! - [`Association`] - a related record reference and include target
//! - [`Conditional`] - a named predicate gating fields and associations
//! - [`Filter`] and [`SortOrder`] - scope narrowing and ordering
//!
//! Re-exports are provided for convenience.

pub mod association;
pub mod builder;
pub mod conditional;
pub mod configuration;
pub mod field;
pub mod filter;
pub mod helpers;

pub use association::{Association, AssociationOptions, AssociationTarget, Cardinality, RelatedSource};
pub use builder::{AssociationsBuilder, ConditionalsBuilder, FieldsBuilder, PresenterBuilder};
pub use conditional::{Conditional, ConditionalKind};
pub use configuration::{ConfigArray, ConfigValue, Configuration, Entry};
pub use field::{BlockKind, Field, FieldOptions, FieldType, ValueSource};
pub use filter::{Filter, SortOrder, SortOrderKind};
pub use helpers::{HelperFn, Helpers};
