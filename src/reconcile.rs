//! Reconciliation of the latest layout snapshot with the current task set.
//!
//! The snapshot says *where* things are; the task table says *what* they are.
//! Loading a project fetches both concurrently and produces one renderable
//! graph:
//!
//! 1. Snapshot nodes keep their position and every visual attribute; task
//!    cards get the authoritative title/status/estimate/time spent/description.
//! 2. Task cards whose task no longer exists are kept and flagged stale
//!    (or removed, under [`StaleNodePolicy::Prune`]).
//! 3. Tasks not referenced by any snapshot node get a synthesized card at a
//!    deterministic grid position below the existing layout.
//!
//! A failed fetch on either side yields an empty graph, never a partial one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::{debug, warn};

use crate::db::{Graph, Node, NodeData, Position, SnapshotData, Task, TaskCard, TASK_NODE_TYPE};
use crate::error::ServiceError;
use crate::status;
use crate::store::{SnapshotStore, TaskRepository};

/// What to do with a snapshot node whose task reference no longer resolves.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StaleNodePolicy {
    /// Keep the node with its last-known data, flagged stale.
    #[default]
    Keep,
    /// Drop the node and every edge touching it.
    Prune,
}

/// Grid used for task cards that have no position yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackLayout {
    pub columns: usize,
    pub spacing_x: f64,
    pub spacing_y: f64,
    pub origin_x: f64,
    pub origin_y: f64,
}

impl Default for FallbackLayout {
    fn default() -> Self {
        Self {
            columns: 4,
            spacing_x: 280.0,
            spacing_y: 180.0,
            origin_x: 0.0,
            origin_y: 0.0,
        }
    }
}

impl FallbackLayout {
    /// Grid slot `index`, row-major from the origin.
    pub fn position(&self, index: usize) -> Position {
        self.position_from(self.origin_y, index)
    }

    /// Grid slot `index` on rows starting one row below the lowest existing node.
    pub fn position_below(&self, existing: &[Node], index: usize) -> Position {
        let top = existing
            .iter()
            .map(|n| n.position.y)
            .fold(None, |acc: Option<f64>, y| Some(acc.map_or(y, |a| a.max(y))));
        match top {
            Some(lowest) => self.position_from(lowest + self.spacing_y, index),
            None => self.position(index),
        }
    }

    fn position_from(&self, top: f64, index: usize) -> Position {
        let columns = self.columns.max(1);
        Position {
            x: self.origin_x + (index % columns) as f64 * self.spacing_x,
            y: top + (index / columns) as f64 * self.spacing_y,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileOptions {
    pub stale_nodes: StaleNodePolicy,
    pub layout: FallbackLayout,
}

/// Merged graph plus the task list it was built from.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    pub graph: Graph,
    pub tasks: Vec<Task>,
}

pub struct Reconciler {
    tasks: Arc<dyn TaskRepository>,
    snapshots: Arc<dyn SnapshotStore>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        snapshots: Arc<dyn SnapshotStore>,
        options: ReconcileOptions,
    ) -> Self {
        Self { tasks, snapshots, options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Renderable graph for a project. Empty on any fetch failure.
    pub async fn load(&self, project_id: &str) -> Graph {
        self.reconcile(project_id).await.graph
    }

    /// Like [`load`](Self::load) but also hands back the task list.
    pub async fn reconcile(&self, project_id: &str) -> Reconciled {
        match self.fetch(project_id).await {
            Ok((layout, tasks)) => {
                let graph = merge(layout, &tasks, &self.options);
                debug!(
                    project_id,
                    nodes = graph.nodes.len(),
                    edges = graph.edges.len(),
                    tasks = tasks.len(),
                    "reconciled project"
                );
                Reconciled { graph, tasks }
            }
            Err(e) => {
                warn!(project_id, error = %e, "project load failed, presenting empty canvas");
                Reconciled::default()
            }
        }
    }

    async fn fetch(&self, project_id: &str) -> Result<(Option<SnapshotData>, Vec<Task>), ServiceError> {
        let (snapshot, tasks) = tokio::try_join!(
            self.snapshots.latest_snapshot(project_id, None),
            self.tasks.fetch_tasks(project_id),
        )?;

        let layout = match snapshot {
            Some(snapshot) => {
                let layout = snapshot.layout();
                if layout.is_none() {
                    debug!(project_id, snapshot_id = %snapshot.id, "snapshot payload empty or malformed");
                }
                layout
            }
            None => None,
        };
        let tasks = tasks.into_iter().filter(|t| !t.is_deleted()).collect();
        Ok((layout, tasks))
    }
}

/// Pure merge of a parsed layout with the active task list.
pub fn merge(layout: Option<SnapshotData>, tasks: &[Task], options: &ReconcileOptions) -> Graph {
    let Some(layout) = layout else {
        let mut taken = HashSet::new();
        let nodes = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| synthesize_node(task, options.layout.position(i), &mut taken))
            .collect();
        return Graph { nodes, edges: Vec::new() };
    };

    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut pruned: HashSet<String> = HashSet::new();
    let mut nodes = Vec::with_capacity(layout.nodes.len() + tasks.len());

    for mut node in layout.nodes {
        let claimed = match node.task_card_mut() {
            // The first card referencing a task owns it
            Some(card) if seen.contains(&card.task_id) => true,
            Some(card) => {
                seen.insert(card.task_id.clone());
                match by_id.get(card.task_id.as_str()) {
                    Some(task) => overlay(card, task),
                    None if options.stale_nodes == StaleNodePolicy::Prune => {
                        pruned.insert(node.id.clone());
                        continue;
                    }
                    None => card.stale = true,
                }
                false
            }
            None => false,
        };
        if claimed {
            if options.stale_nodes == StaleNodePolicy::Prune {
                debug!(node_id = %node.id, "dropping second card for the same task");
                pruned.insert(node.id.clone());
                continue;
            }
            debug!(node_id = %node.id, "second card for the same task loses its reference");
            node.data = std::mem::take(&mut node.data).detached();
        }
        nodes.push(node);
    }

    let mut taken: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let fresh: Vec<&Task> = tasks.iter().filter(|t| !seen.contains(&t.id)).collect();
    let mut appended = Vec::with_capacity(fresh.len());
    for (i, task) in fresh.iter().enumerate() {
        let position = options.layout.position_below(&nodes, i);
        appended.push(synthesize_node(task, position, &mut taken));
    }
    nodes.extend(appended);

    let edges = if pruned.is_empty() {
        layout.edges
    } else {
        layout
            .edges
            .into_iter()
            .filter(|e| !pruned.contains(&e.source) && !pruned.contains(&e.target))
            .collect()
    };

    Graph { nodes, edges }
}

/// Copy the task's display fields onto a card. Nothing else on the node changes.
pub fn overlay(card: &mut TaskCard, task: &Task) {
    card.title = Some(task.title.clone());
    card.status = Some(status::to_display(&task.status));
    card.estimated_hours = task.estimated_hours;
    card.time_spent = Some(task.time_spent);
    card.description = task.description.clone();
    card.stale = false;
}

/// Id used for a node synthesized from a task. Stable across loads.
pub fn synthesized_node_id(task_id: &str) -> String {
    format!("task-{}", task_id)
}

/// `synthesized_node_id`, suffixed `-2`, `-3`... while it collides with `taken`.
pub fn unique_node_id(task_id: &str, taken: &HashSet<String>) -> String {
    let base = synthesized_node_id(task_id);
    let mut id = base.clone();
    let mut n = 2;
    while taken.contains(&id) {
        id = format!("{}-{}", base, n);
        n += 1;
    }
    id
}

/// Fresh card for `task`. Its id is recorded in `taken`.
pub fn synthesize_node(task: &Task, position: Position, taken: &mut HashSet<String>) -> Node {
    let mut card = TaskCard { task_id: task.id.clone(), ..Default::default() };
    overlay(&mut card, task);
    let id = unique_node_id(&task.id, taken);
    taken.insert(id.clone());
    Node {
        id,
        node_type: TASK_NODE_TYPE.to_string(),
        position,
        data: NodeData::Task(card),
        draggable: Some(true),
        selectable: Some(true),
        extra: Map::new(),
    }
}
