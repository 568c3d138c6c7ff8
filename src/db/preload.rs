//! Bulk association preloading
//!
//! Loads one association for a whole page of records with a single
//! `IN (...)` query (one per target class for polymorphic belongs-to), then
//! attaches the results to each record:
//!
//! 1. Group records by the reflection they expose for the name
//! 2. Collect the keys to look up (foreign keys or record ids)
//! 3. `SELECT * FROM target WHERE key IN (...)`
//! 4. Hand each record its matches
//!
//! Records whose class does not declare the association are skipped, so
//! mixed STI or polymorphic collections preload what each class has.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::scope::{Direction, Scope};
use super::source::DataSource;
use super::{ModelClass, Record, Reflection, ReflectionKind, Related, Schema};
use crate::error::Result;

/// Preload each of `names` onto `records`.
pub async fn preload(
    source: &dyn DataSource,
    schema: &Schema,
    records: &mut [Record],
    names: &[String],
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    for name in names {
        for (reflection, indices) in group_by_reflection(records, name) {
            tracing::debug!(
                association = %name,
                record_count = indices.len(),
                "Preloading association"
            );

            match &reflection.kind {
                ReflectionKind::BelongsTo {
                    foreign_key,
                    target,
                } => {
                    let class = schema.class_named(target)?;
                    load_belongs_to(source, &class, records, &indices, name, foreign_key).await?;
                }
                ReflectionKind::PolymorphicBelongsTo {
                    foreign_key,
                    type_column,
                } => {
                    let mut by_type: HashMap<String, Vec<usize>> = HashMap::new();
                    for &i in &indices {
                        match records[i].attribute(type_column).and_then(|v| v.as_str()) {
                            Some(class_name) => {
                                by_type.entry(class_name.to_string()).or_default().push(i)
                            }
                            None => records[i].set_association(name.clone(), Related::One(None)),
                        }
                    }

                    for (class_name, group) in by_type {
                        let class = schema.class_named(&class_name)?;
                        load_belongs_to(source, &class, records, &group, name, foreign_key).await?;
                    }
                }
                ReflectionKind::HasMany {
                    foreign_key,
                    target,
                } => {
                    let class = schema.class_named(target)?;
                    let mut children = load_children(source, &class, records, &indices, foreign_key).await?;
                    for &i in &indices {
                        let matches = children.remove(&records[i].id()).unwrap_or_default();
                        records[i].set_association(name.clone(), Related::Many(matches));
                    }
                }
                ReflectionKind::HasOne {
                    foreign_key,
                    target,
                } => {
                    let class = schema.class_named(target)?;
                    let mut children = load_children(source, &class, records, &indices, foreign_key).await?;
                    for &i in &indices {
                        let first = children
                            .remove(&records[i].id())
                            .and_then(|matches| matches.into_iter().next());
                        records[i].set_association(name.clone(), Related::One(first));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Partition record indices by the reflection their class declares for `name`.
fn group_by_reflection(records: &[Record], name: &str) -> Vec<(Reflection, Vec<usize>)> {
    let mut groups: Vec<(Reflection, Vec<usize>)> = Vec::new();

    for (i, record) in records.iter().enumerate() {
        let Some(reflection) = record.class().reflection(name) else {
            continue;
        };

        match groups.iter_mut().find(|(r, _)| r == reflection) {
            Some((_, indices)) => indices.push(i),
            None => groups.push((reflection.clone(), vec![i])),
        }
    }

    groups
}

async fn load_belongs_to(
    source: &dyn DataSource,
    class: &Arc<ModelClass>,
    records: &mut [Record],
    indices: &[usize],
    name: &str,
    foreign_key: &str,
) -> Result<()> {
    let keys: BTreeSet<i64> = indices
        .iter()
        .filter_map(|&i| records[i].attribute(foreign_key).and_then(|v| v.as_i64()))
        .collect();

    let parents: HashMap<i64, Arc<Record>> = if keys.is_empty() {
        HashMap::new()
    } else {
        let ids: Vec<i64> = keys.into_iter().collect();
        source
            .fetch(&Scope::new(Arc::clone(class)).where_ids(&ids))
            .await?
            .into_iter()
            .map(|record| (record.id(), Arc::new(record)))
            .collect()
    };

    for &i in indices {
        let parent = records[i]
            .attribute(foreign_key)
            .and_then(|v| v.as_i64())
            .and_then(|key| parents.get(&key).cloned());
        records[i].set_association(name.to_string(), Related::One(parent));
    }

    Ok(())
}

/// Children of the given records keyed by their foreign key value, in
/// primary key order.
async fn load_children(
    source: &dyn DataSource,
    class: &Arc<ModelClass>,
    records: &[Record],
    indices: &[usize],
    foreign_key: &str,
) -> Result<HashMap<i64, Vec<Arc<Record>>>> {
    let ids: BTreeSet<i64> = indices.iter().map(|&i| records[i].id()).collect();
    let scope = Scope::new(Arc::clone(class))
        .where_in(foreign_key, ids)
        .order(class.primary_key.clone(), Direction::Asc);

    let mut grouped: HashMap<i64, Vec<Arc<Record>>> = HashMap::new();
    for child in source.fetch(&scope).await? {
        if let Some(parent_id) = child.attribute(foreign_key).and_then(|v| v.as_i64()) {
            grouped.entry(parent_id).or_default().push(Arc::new(child));
        }
    }

    Ok(grouped)
}
