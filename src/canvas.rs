//! In-memory canvas for the active project.
//!
//! `CanvasState` is a plain data structure: nodes, edges and the task list,
//! changed only through its command methods. `Canvas` wires it to the
//! services; persistence happens only when a command asks for it (`save`,
//! `edit_task`), never as a side effect of touching the state.
//!
//! Every load takes a generation ticket. Switching projects bumps the
//! generation, so a slow response for the previous project is discarded
//! instead of overwriting the newer canvas.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::db::{Edge, Graph, Position, SnapshotData, SnapshotType, Task, TaskPatch};
use crate::mutation;
use crate::realtime::{self, Subscription};
use crate::reconcile::{self, ReconcileOptions, Reconciled, Reconciler, StaleNodePolicy};
use crate::snapshot;
use crate::store::{ChangeFeed, SnapshotStore, TaskRepository};

/// Proof that a load was started for a given generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub project_id: String,
    pub generation: u64,
}

/// Layout captured for saving, tagged with what it was captured from.
#[derive(Debug, Clone)]
pub struct LayoutCapture {
    pub project_id: String,
    pub generation: u64,
    pub revision: u64,
    pub data: SnapshotData,
}

#[derive(Debug, Default)]
pub struct CanvasState {
    options: ReconcileOptions,
    project_id: Option<String>,
    generation: u64,
    graph: Graph,
    tasks: HashMap<String, Task>,
    revision: u64,        // Bumped on every layout change
    saved_revision: u64,  // Revision last persisted as a snapshot
}

impl CanvasState {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options, ..Default::default() }
    }

    // ==================== Queries ====================

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }

    pub fn capture(&self) -> Option<LayoutCapture> {
        let project_id = self.project_id.clone()?;
        Some(LayoutCapture {
            project_id,
            generation: self.generation,
            revision: self.revision,
            data: self.graph.clone().into_snapshot_data(),
        })
    }

    // ==================== Commands ====================

    /// Switch to `project_id`, clearing the canvas. Any load still in flight
    /// for an earlier ticket will be rejected by `finish_load`.
    pub fn begin_load(&mut self, project_id: &str) -> LoadTicket {
        self.generation += 1;
        self.project_id = Some(project_id.to_string());
        self.graph = Graph::empty();
        self.tasks.clear();
        self.revision = 0;
        self.saved_revision = 0;
        LoadTicket { project_id: project_id.to_string(), generation: self.generation }
    }

    /// Install a reconciled graph. Returns false if the ticket is stale.
    pub fn finish_load(&mut self, ticket: &LoadTicket, reconciled: Reconciled) -> bool {
        if ticket.generation != self.generation {
            debug!(
                project_id = %ticket.project_id,
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale load"
            );
            return false;
        }
        self.graph = reconciled.graph;
        self.tasks = reconciled.tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        true
    }

    pub fn move_node(&mut self, node_id: &str, position: Position) -> bool {
        let Some(node) = self.graph.nodes.iter_mut().find(|n| n.id == node_id) else {
            return false;
        };
        node.position = position;
        self.revision += 1;
        true
    }

    /// Add an edge. Both endpoints must be on the canvas.
    pub fn connect(&mut self, edge: Edge) -> bool {
        let has = |id: &str| self.graph.nodes.iter().any(|n| n.id == id);
        if !has(&edge.source) || !has(&edge.target) {
            return false;
        }
        if self.graph.edges.iter().any(|e| e.id == edge.id) {
            return false;
        }
        self.graph.edges.push(edge);
        self.revision += 1;
        true
    }

    pub fn disconnect(&mut self, edge_id: &str) -> bool {
        let before = self.graph.edges.len();
        self.graph.edges.retain(|e| e.id != edge_id);
        let removed = self.graph.edges.len() != before;
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Optimistically apply a canvas edit (status in display vocabulary).
    /// Returns the task as it was before, for rollback.
    pub fn apply_local_edit(&mut self, task_id: &str, patch: &TaskPatch) -> Option<Task> {
        let task = self.tasks.get_mut(task_id)?;
        let previous = task.clone();
        mutation::to_wire(patch).apply_to(task);
        let task = task.clone();
        self.refresh_card(&task);
        Some(previous)
    }

    /// Put a task back as it was (failed optimistic edit).
    pub fn restore_task(&mut self, task: Task) {
        if self.tasks.contains_key(&task.id) {
            self.refresh_card(&task);
            self.tasks.insert(task.id.clone(), task);
        }
    }

    /// Apply an authoritative task change from the change feed.
    pub fn apply_remote_task(&mut self, task: Task) -> bool {
        if self.project_id.as_deref() != Some(task.project_id.as_str()) {
            return false;
        }

        if task.is_deleted() {
            self.tasks.remove(&task.id);
            self.drop_task_link(&task.id);
            return true;
        }

        if self.graph.node_for_task(&task.id).is_some() {
            self.refresh_card(&task);
        } else {
            let position = self.options.layout.position_below(&self.graph.nodes, 0);
            let mut taken: HashSet<String> = self.graph.nodes.iter().map(|n| n.id.clone()).collect();
            self.graph.nodes.push(reconcile::synthesize_node(&task, position, &mut taken));
            self.revision += 1;
        }
        self.tasks.insert(task.id.clone(), task);
        true
    }

    /// Record that `capture` was persisted. Later edits keep the canvas dirty.
    pub fn mark_saved(&mut self, capture: &LayoutCapture) {
        if capture.generation == self.generation && capture.revision > self.saved_revision {
            self.saved_revision = capture.revision;
        }
    }

    fn refresh_card(&mut self, task: &Task) {
        for node in &mut self.graph.nodes {
            if let Some(card) = node.task_card_mut() {
                if card.task_id == task.id {
                    reconcile::overlay(card, task);
                }
            }
        }
    }

    fn drop_task_link(&mut self, task_id: &str) {
        match self.options.stale_nodes {
            StaleNodePolicy::Keep => {
                for node in &mut self.graph.nodes {
                    if let Some(card) = node.task_card_mut() {
                        if card.task_id == task_id {
                            card.stale = true;
                        }
                    }
                }
            }
            StaleNodePolicy::Prune => {
                let removed: Vec<String> = self
                    .graph
                    .nodes
                    .iter()
                    .filter(|n| n.task_id() == Some(task_id))
                    .map(|n| n.id.clone())
                    .collect();
                if removed.is_empty() {
                    return;
                }
                self.graph.nodes.retain(|n| !removed.contains(&n.id));
                self.graph
                    .edges
                    .retain(|e| !removed.contains(&e.source) && !removed.contains(&e.target));
                self.revision += 1;
            }
        }
    }
}

fn lock(state: &Mutex<CanvasState>) -> MutexGuard<'_, CanvasState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The active project's canvas, bound to the remote services.
pub struct Canvas {
    state: Arc<Mutex<CanvasState>>,
    reconciler: Reconciler,
    tasks: Arc<dyn TaskRepository>,
    snapshots: Arc<dyn SnapshotStore>,
    feed: Arc<dyn ChangeFeed>,
    subscription: Mutex<Option<Subscription>>,
}

impl Canvas {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        snapshots: Arc<dyn SnapshotStore>,
        feed: Arc<dyn ChangeFeed>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(CanvasState::new(options.clone()))),
            reconciler: Reconciler::new(tasks.clone(), snapshots.clone(), options),
            tasks,
            snapshots,
            feed,
            subscription: Mutex::new(None),
        }
    }

    pub fn graph(&self) -> Graph {
        lock(&self.state).graph().clone()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        lock(&self.state).task(task_id).cloned()
    }

    pub fn project_id(&self) -> Option<String> {
        lock(&self.state).project_id().map(String::from)
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.state).is_dirty()
    }

    /// Load a project and follow its task changes. Returns false if a newer
    /// `open` superseded this one before it finished.
    pub async fn open(&self, project_id: &str) -> bool {
        self.unsubscribe();
        let ticket = lock(&self.state).begin_load(project_id);

        let reconciled = self.reconciler.reconcile(project_id).await;
        let applied = lock(&self.state).finish_load(&ticket, reconciled);
        if !applied {
            return false;
        }

        let state = Arc::clone(&self.state);
        let generation = ticket.generation;
        let sub = realtime::subscribe(self.feed.clone(), project_id, move |task| {
            let mut state = lock(&state);
            if state.generation() == generation {
                state.apply_remote_task(task);
            }
        });
        *self.subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(sub);

        info!(project_id, generation, "project opened");
        true
    }

    /// Stop following the current project's changes.
    pub fn unsubscribe(&self) {
        let sub = self.subscription.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sub) = sub {
            sub.unsubscribe();
        }
    }

    pub fn move_node(&self, node_id: &str, position: Position) -> bool {
        lock(&self.state).move_node(node_id, position)
    }

    pub fn connect(&self, edge: Edge) -> bool {
        lock(&self.state).connect(edge)
    }

    pub fn disconnect(&self, edge_id: &str) -> bool {
        lock(&self.state).disconnect(edge_id)
    }

    /// Edit a task optimistically, then push the change. Rolls back on failure.
    pub async fn edit_task(&self, task_id: &str, patch: &TaskPatch) -> bool {
        let (project_id, generation, previous) = {
            let mut state = lock(&self.state);
            let Some(project_id) = state.project_id().map(String::from) else {
                return false;
            };
            let Some(previous) = state.apply_local_edit(task_id, patch) else {
                warn!(project_id = %project_id, task_id, "edit for unknown task ignored");
                return false;
            };
            (project_id, state.generation(), previous)
        };

        let ok = mutation::update_task(self.tasks.as_ref(), &project_id, task_id, patch).await;
        if !ok {
            let mut state = lock(&self.state);
            if state.generation() == generation {
                state.restore_task(previous);
            }
        }
        ok
    }

    /// Append the current layout to the snapshot log.
    pub async fn save(&self, snapshot_type: SnapshotType) -> bool {
        let capture = lock(&self.state).capture();
        let Some(capture) = capture else {
            return false;
        };

        let ok = snapshot::save(
            self.snapshots.as_ref(),
            &capture.project_id,
            &capture.data.nodes,
            &capture.data.edges,
            snapshot_type,
        )
        .await;
        if ok {
            lock(&self.state).mark_saved(&capture);
        }
        ok
    }

    /// Save only when there are unsaved layout changes.
    pub async fn save_if_dirty(&self, snapshot_type: SnapshotType) -> bool {
        let dirty = self.is_dirty();
        if !dirty {
            return false;
        }
        self.save(snapshot_type).await
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
