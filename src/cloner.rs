//! Project duplication under fresh identifiers.
//!
//! Task ids and node ids are separate namespaces linked only through
//! `Task::node_id` and a card's `taskId`, so each gets its own map. Phase one
//! allocates every new id; phase two deep-copies each entity, substituting
//! references through the maps. Nothing in the copy points back into the source.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::db::{Comment, Edge, Node, NodeData, Project, ProjectAggregate, Subtask, Task};
use crate::error::CloneError;
use crate::store::ProjectSource;

/// Node attributes that hold another node's id (group nesting).
const NODE_REF_KEYS: [&str; 2] = ["parentId", "parentNode"];

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Name given to a copy when the caller supplies none.
pub fn copy_name(original: &str) -> String {
    format!("{} (copy)", original)
}

/// Load a project from `source` and clone it.
pub async fn duplicate_project(
    source: &dyn ProjectSource,
    project_id: &str,
    new_name: Option<&str>,
) -> Result<ProjectAggregate, CloneError> {
    let aggregate = source
        .load_aggregate(project_id)
        .await?
        .ok_or_else(|| CloneError::NotFound(project_id.to_string()))?;
    clone_aggregate(&aggregate, new_name)
}

/// Deep-copy a project aggregate under new ids.
///
/// Edges, subtasks and comments whose parent is missing from the aggregate
/// are rejected. Softer references are dropped instead: a task's `node_id`
/// pointing at a node outside the aggregate is cleared, and a card whose task
/// is missing becomes a plain decoration.
pub fn clone_aggregate(
    source: &ProjectAggregate,
    new_name: Option<&str>,
) -> Result<ProjectAggregate, CloneError> {
    validate(source)?;

    // Phase 1: identifier maps
    let node_ids: HashMap<&str, String> =
        source.nodes.iter().map(|n| (n.id.as_str(), new_id())).collect();
    let task_ids: HashMap<&str, String> =
        source.tasks.iter().map(|t| (t.id.as_str(), new_id())).collect();

    // Phase 2: structural copy with substitution
    let now = Utc::now();
    let project = Project {
        id: new_id(),
        name: new_name
            .map(|n| n.to_string())
            .unwrap_or_else(|| copy_name(&source.project.name)),
        description: source.project.description.clone(),
        created_at: now,
        updated_at: now,
    };

    let tasks: Vec<Task> = source
        .tasks
        .iter()
        .map(|t| Task {
            id: task_ids[t.id.as_str()].clone(),
            project_id: project.id.clone(),
            node_id: t.node_id.as_deref().and_then(|n| node_ids.get(n).cloned()),
            ..t.clone()
        })
        .collect();

    let nodes: Vec<Node> = source
        .nodes
        .iter()
        .map(|n| clone_node(n, &node_ids, &task_ids))
        .collect();

    let edges: Vec<Edge> = source
        .edges
        .iter()
        .map(|e| Edge {
            id: new_id(),
            source: node_ids[e.source.as_str()].clone(),
            target: node_ids[e.target.as_str()].clone(),
            ..e.clone()
        })
        .collect();

    let subtasks: Vec<Subtask> = source
        .subtasks
        .iter()
        .map(|s| Subtask {
            id: new_id(),
            task_id: task_ids[s.task_id.as_str()].clone(),
            ..s.clone()
        })
        .collect();

    let comments: Vec<Comment> = source
        .comments
        .iter()
        .map(|c| Comment {
            id: new_id(),
            task_id: task_ids[c.task_id.as_str()].clone(),
            ..c.clone()
        })
        .collect();

    info!(
        source_project = %source.project.id,
        new_project = %project.id,
        tasks = tasks.len(),
        nodes = nodes.len(),
        edges = edges.len(),
        "project cloned"
    );

    Ok(ProjectAggregate { project, tasks, subtasks, comments, nodes, edges })
}

/// Hard references must resolve inside the aggregate.
fn validate(source: &ProjectAggregate) -> Result<(), CloneError> {
    let node_ids: std::collections::HashSet<&str> = source.nodes.iter().map(|n| n.id.as_str()).collect();
    let task_ids: std::collections::HashSet<&str> = source.tasks.iter().map(|t| t.id.as_str()).collect();

    for e in &source.edges {
        for end in [&e.source, &e.target] {
            if !node_ids.contains(end.as_str()) {
                return Err(CloneError::Validation {
                    entity: "edge",
                    id: e.id.clone(),
                    reference: format!("node {}", end),
                });
            }
        }
    }
    for s in &source.subtasks {
        if !task_ids.contains(s.task_id.as_str()) {
            return Err(CloneError::Validation {
                entity: "subtask",
                id: s.id.clone(),
                reference: format!("task {}", s.task_id),
            });
        }
    }
    for c in &source.comments {
        if !task_ids.contains(c.task_id.as_str()) {
            return Err(CloneError::Validation {
                entity: "comment",
                id: c.id.clone(),
                reference: format!("task {}", c.task_id),
            });
        }
    }
    Ok(())
}

fn clone_node(node: &Node, node_ids: &HashMap<&str, String>, task_ids: &HashMap<&str, String>) -> Node {
    let data = match &node.data {
        NodeData::Task(card) => match task_ids.get(card.task_id.as_str()) {
            Some(new_task) => {
                let mut card = card.clone();
                card.task_id = new_task.clone();
                NodeData::Task(card)
            }
            None => {
                let mut card = card.clone();
                card.stale = false;
                NodeData::Task(card).detached()
            }
        },
        NodeData::Decoration(fields) => NodeData::Decoration(fields.clone()),
    };

    let mut extra = node.extra.clone();
    for key in NODE_REF_KEYS {
        let remapped = extra
            .get(key)
            .and_then(Value::as_str)
            .map(|old| node_ids.get(old).cloned());
        match remapped {
            Some(Some(new)) => {
                extra.insert(key.to_string(), Value::String(new));
            }
            Some(None) => {
                extra.remove(key);
            }
            None => {}
        }
    }

    Node {
        id: node_ids[node.id.as_str()].clone(),
        data,
        extra,
        ..node.clone()
    }
}
