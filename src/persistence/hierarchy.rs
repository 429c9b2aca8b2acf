//! Helpers shared by the store implementations for wiring and rebuilding
//! service hierarchies.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::models::{ServiceData, ServiceId};

/// Number of records in the tree that still need an id
pub fn count_unassigned(service_data: &ServiceData) -> usize {
    let own = usize::from(service_data.id.is_none());
    own + service_data
        .dependencies
        .iter()
        .map(count_unassigned)
        .sum::<usize>()
}

/// Assign ids from `ids` and wire parent/root/dependency references.
///
/// Ids are handed out in pre-order so a dependency's root is known before it
/// is visited. The top record keeps whatever root it already has.
pub fn wire_hierarchy<I>(service_data: &mut ServiceData, ids: &mut I)
where
    I: Iterator<Item = ServiceId>,
{
    if service_data.id.is_none() {
        service_data.id = ids.next();
    }
    let root = service_data.root_service_id.or(service_data.id);
    wire_dependencies(service_data, root, ids);
}

fn wire_dependencies<I>(service_data: &mut ServiceData, root: Option<ServiceId>, ids: &mut I)
where
    I: Iterator<Item = ServiceId>,
{
    let parent_id = service_data.id;
    let now = Utc::now();
    for dependency in service_data.dependencies.iter_mut() {
        if dependency.id.is_none() {
            dependency.id = ids.next();
        }
        if dependency.parent_service_id.is_none() && dependency.id != parent_id {
            dependency.parent_service_id = parent_id;
        }
        if dependency.root_service_id.is_none() && dependency.id != root {
            dependency.root_service_id = root;
        }
        dependency.modification_date = Some(now);
        wire_dependencies(dependency, root, ids);
    }
    let dependency_ids: Vec<ServiceId> = service_data
        .dependencies
        .iter()
        .filter_map(|dependency| dependency.id)
        .collect();
    for id in dependency_ids {
        if !service_data.dependency_ids.contains(&id) {
            service_data.dependency_ids.push(id);
        }
    }
}

/// Flat copies of every record in the tree (without nested dependencies),
/// each id once, top record first
pub fn flatten_hierarchy(service_data: &ServiceData) -> Vec<ServiceData> {
    service_data
        .hierarchy()
        .into_iter()
        .map(|record| {
            let mut flat = record.clone();
            flat.dependencies.clear();
            flat
        })
        .collect()
}

/// Rebuild the dependency tree rooted at `root_id` from flat records
pub fn assemble_hierarchy(
    root_id: ServiceId,
    records: &HashMap<ServiceId, ServiceData>,
) -> Option<ServiceData> {
    let mut path = HashSet::new();
    assemble_node(root_id, records, &mut path)
}

fn assemble_node(
    id: ServiceId,
    records: &HashMap<ServiceId, ServiceData>,
    path: &mut HashSet<ServiceId>,
) -> Option<ServiceData> {
    let mut node = records.get(&id)?.clone();
    if !path.insert(id) {
        // dependency cycle; stop descending
        node.dependencies.clear();
        return Some(node);
    }
    node.dependencies = node
        .dependency_ids
        .iter()
        .filter_map(|dependency_id| assemble_node(*dependency_id, records, path))
        .collect();
    path.remove(&id);
    Some(node)
}
