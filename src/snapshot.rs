//! Layout persistence: every save appends a new snapshot row.
//!
//! Nothing here retries. `save` reports success as a bool and the caller
//! decides what to do about a failure; autosave just tries again on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::canvas::Canvas;
use crate::db::{Edge, NewSnapshot, Node, SnapshotData, SnapshotType};
use crate::store::SnapshotStore;

/// Append a capture of `nodes`/`edges` to the project's snapshot log.
pub async fn save(
    store: &dyn SnapshotStore,
    project_id: &str,
    nodes: &[Node],
    edges: &[Edge],
    snapshot_type: SnapshotType,
) -> bool {
    let body = NewSnapshot {
        snapshot_data: SnapshotData { nodes: nodes.to_vec(), edges: edges.to_vec() },
        snapshot_type,
    };

    match store.insert_snapshot(project_id, &body).await {
        Ok(row) => {
            debug!(
                project_id,
                snapshot_id = %row.id,
                snapshot_type = snapshot_type.as_str(),
                nodes = nodes.len(),
                edges = edges.len(),
                "snapshot saved"
            );
            true
        }
        Err(e) => {
            warn!(project_id, snapshot_type = snapshot_type.as_str(), error = %e, "snapshot save failed");
            false
        }
    }
}

/// Periodically persist the canvas while it has unsaved layout changes.
///
/// Fire-and-forget: the returned handle only exists so the owner can abort it.
pub fn spawn_autosave(canvas: Arc<Canvas>, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "autosave started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick completes immediately; nothing to save yet
        interval.tick().await;
        loop {
            interval.tick().await;
            canvas.save_if_dirty(SnapshotType::Autosave).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NodeData, Position, TaskCard};
    use crate::store::mock::MockBackend;
    use serde_json::Map;
    use std::sync::atomic::Ordering;

    fn node(id: &str, task_id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: "task".to_string(),
            position: Position { x: 5.0, y: 6.0 },
            data: NodeData::Task(TaskCard { task_id: task_id.to_string(), ..Default::default() }),
            draggable: None,
            selectable: None,
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_save_appends_new_rows() {
        let backend = MockBackend::new();

        assert!(save(&backend, "p1", &[node("n1", "t1")], &[], SnapshotType::Manual).await);
        assert!(save(&backend, "p1", &[node("n1", "t1"), node("n2", "t2")], &[], SnapshotType::Autosave).await);

        let rows = backend.snapshots.lock().unwrap();
        assert_eq!(rows.len(), 2);
        // First row untouched by the second save
        let first = rows[0].layout().unwrap();
        assert_eq!(first.nodes.len(), 1);
        assert_eq!(rows[1].snapshot_type, SnapshotType::Autosave);
    }

    #[tokio::test]
    async fn test_saved_snapshot_becomes_latest() {
        let backend = MockBackend::new();
        backend.push_snapshot("p1", serde_json::json!({"nodes": []}), 120);

        assert!(save(&backend, "p1", &[node("n7", "t7")], &[], SnapshotType::AiGenerated).await);

        let latest = backend.latest_snapshot("p1", None).await.unwrap().unwrap();
        assert_eq!(latest.snapshot_type, SnapshotType::AiGenerated);
        assert_eq!(latest.layout().unwrap().nodes[0].id, "n7");
    }

    #[tokio::test]
    async fn test_save_failure_returns_false() {
        let backend = MockBackend::new();
        backend.fail_writes.store(true, Ordering::SeqCst);

        assert!(!save(&backend, "p1", &[node("n1", "t1")], &[], SnapshotType::Manual).await);
        assert!(backend.snapshots.lock().unwrap().is_empty());
    }
}
