//! Pure task-graph functions
//!
//! Deterministic, store-free helpers: bead-group partitioning, the cycle
//! preflight for dependency inserts, and a pure mirror of the ready-set
//! query for tests and the workflow machine.

use std::collections::{HashMap, HashSet};

use workstore::{Task, TaskStatus, WorkBead};

/// Partition a work's bead assignments into task-sized groups
///
/// Group 0 beads each become their own singleton group, preserving
/// insertion order; beads sharing a positive group id become one
/// multi-bead group, placed at the position of the group's first bead.
pub fn partition_beads_into_tasks(beads: &[WorkBead]) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut group_index: HashMap<i64, usize> = HashMap::new();

    for bead in beads {
        if bead.group_id == 0 {
            groups.push(vec![bead.bead_id.clone()]);
        } else {
            match group_index.get(&bead.group_id) {
                Some(&i) => groups[i].push(bead.bead_id.clone()),
                None => {
                    group_index.insert(bead.group_id, groups.len());
                    groups.push(vec![bead.bead_id.clone()]);
                }
            }
        }
    }

    groups
}

/// Check whether adding `dependent -> dependency` would close a cycle
///
/// Edges are (dependent, dependency) pairs. A self-edge is a cycle.
pub fn would_create_cycle(edges: &[(String, String)], dependent: &str, dependency: &str) -> bool {
    if dependent == dependency {
        return true;
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (a, b) in edges {
        adjacency.entry(a.as_str()).or_default().push(b.as_str());
    }

    let mut stack = vec![dependency];
    let mut visited = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == dependent {
            return true;
        }
        if visited.insert(node)
            && let Some(next) = adjacency.get(node)
        {
            stack.extend(next.iter().copied());
        }
    }
    false
}

/// Ids of tasks that are pending with every dependency completed
///
/// Pure mirror of the store's ready query, in the given task order.
pub fn ready_task_ids(tasks: &[Task], edges: &[(String, String)]) -> Vec<String> {
    let completed: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id.as_str())
        .collect();

    let mut deps: HashMap<&str, Vec<&str>> = HashMap::new();
    for (dependent, dependency) in edges {
        deps.entry(dependent.as_str()).or_default().push(dependency.as_str());
    }

    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter(|t| {
            deps.get(t.id.as_str())
                .map(|ds| ds.iter().all(|d| completed.contains(d)))
                .unwrap_or(true)
        })
        .map(|t| t.id.clone())
        .collect()
}
