//! Presenter validation
//!
//! Catches declarations that would only fail at request time: a default sort
//! order nobody declared, a conditional nobody defined, an association to a
//! class without a presenter, a preload the model does not have.

use std::sync::Arc;

use super::Presenter;
use crate::collection::PresenterCollection;
use crate::dsl::{AssociationTarget, Field};

/// Every problem found with `presenter`, as human-readable messages.
pub fn validate(presenter: &Presenter, collection: &PresenterCollection) -> Vec<String> {
    let label = presenter.presents().join(", ");
    let mut errors = Vec::new();

    if presenter.presents().is_empty() {
        errors.push("presenter does not present any class".to_string());
    }

    validate_default_sort_order(presenter, &mut errors);
    validate_conditionals(presenter, &mut errors);
    validate_associations(presenter, collection, &mut errors);
    validate_preloads(presenter, collection, &mut errors);

    errors
        .into_iter()
        .map(|error| if label.is_empty() { error } else { format!("{}: {}", label, error) })
        .collect()
}

fn validate_default_sort_order(presenter: &Presenter, errors: &mut Vec<String>) {
    let Some(default) = presenter.default_sort_order() else {
        return;
    };
    let name = default.split(':').next().unwrap_or_default();
    if presenter.sort_order(name).is_none() {
        errors.push(format!("default sort order `{}` is not a declared sort order", name));
    }
}

fn validate_conditionals(presenter: &Presenter, errors: &mut Vec<String>) {
    let conditionals = presenter.conditionals();
    let mut check = |owner: &str, names: &[String]| {
        for name in names {
            if conditionals.get(name).and_then(|v| v.as_conditional().cloned()).is_none() {
                errors.push(format!("`{}` references unknown conditional `{}`", owner, name));
            }
        }
    };

    let mut fields = Vec::new();
    collect_fields(&presenter.fields(), &mut fields);
    for field in &fields {
        check(field.path(), field.conditions());
    }
    for association in presenter.associations() {
        check(association.name(), association.conditions());
    }
}

/// Every field, including the sub-fields of block fields.
fn collect_fields(fields: &[Arc<Field>], out: &mut Vec<Arc<Field>>) {
    for field in fields {
        out.push(Arc::clone(field));
        if let Some(config) = field.configuration() {
            collect_fields(&config.fields(), out);
        }
    }
}

fn validate_associations(presenter: &Presenter, collection: &PresenterCollection, errors: &mut Vec<String>) {
    for association in presenter.associations() {
        let targets = match association.target() {
            AssociationTarget::Fixed(class) => vec![class.clone()],
            AssociationTarget::Polymorphic => association.polymorphic_classes().to_vec(),
        };
        for target in targets {
            if collection.for_class(&target).is_err() {
                errors.push(format!(
                    "association `{}` points at `{}`, which has no presenter",
                    association.name(),
                    target
                ));
            }
        }
    }
}

fn validate_preloads(presenter: &Presenter, collection: &PresenterCollection, errors: &mut Vec<String>) {
    let preloads = presenter.preloads();
    for class_name in presenter.presents() {
        let Some(class) = collection.schema().class(&class_name) else {
            errors.push(format!("presented class `{}` is not in the schema", class_name));
            continue;
        };
        for preload in &preloads {
            if class.reflection(preload).is_none() {
                errors.push(format!("`{}` has no association `{}` to preload", class_name, preload));
            }
        }
    }
}
