//! Structural diff between current and desired state

use crate::change::Change;
use crate::error::{Error, Result};
use crate::types::{DesiredState, InfrastructureState, ResourceConfig};
use std::collections::BTreeMap;

/// Compute the changes that turn `current` into `desired`.
///
/// Resources are matched by key. The result is sorted by key and carries no
/// dependencies or risk yet; it depends only on the inputs, never on
/// iteration order.
pub fn compute_changes(
    current: Option<&InfrastructureState>,
    desired: &DesiredState,
) -> Result<Vec<Change>> {
    let current: BTreeMap<&str, ResourceConfig> = current
        .map(|state| {
            state
                .resources()
                .iter()
                .map(|r| (r.id.as_str(), r.config()))
                .collect()
        })
        .unwrap_or_default();
    let desired = index_desired(desired)?;

    let mut changes = Vec::new();
    for (key, wanted) in &desired {
        match current.get(key) {
            None => changes.push(Change::create((*wanted).clone())),
            Some(existing) if existing.differs_from(wanted) => {
                changes.push(Change::update(existing.clone(), (*wanted).clone()));
            }
            Some(_) => {}
        }
    }
    for (key, existing) in &current {
        if !desired.contains_key(key) {
            changes.push(Change::delete(existing.clone()));
        }
    }

    changes.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(changes)
}

/// Index desired resources by key, rejecting duplicate keys.
fn index_desired(desired: &DesiredState) -> Result<BTreeMap<&str, &ResourceConfig>> {
    let mut index = BTreeMap::new();
    let mut duplicates = Vec::new();
    for config in &desired.resources {
        if index.insert(config.id.as_str(), config).is_some() {
            duplicates.push(config.id.clone());
        }
    }
    if !duplicates.is_empty() {
        duplicates.sort();
        duplicates.dedup();
        return Err(Error::validation(
            "desired state declares the same resource key more than once",
            duplicates,
        ));
    }
    Ok(index)
}
