//! Forwarding of local task edits to the task repository.

use tracing::{debug, warn};

use crate::db::TaskPatch;
use crate::status;
use crate::store::TaskRepository;

/// Translate a canvas-side patch for the wire: status goes to storage vocabulary.
pub fn to_wire(patch: &TaskPatch) -> TaskPatch {
    let mut wire = patch.clone();
    if let Some(s) = &patch.status {
        wire.status = Some(status::to_storage(s));
    }
    wire
}

/// Push a partial task update. One request, no retry; `false` on any failure.
///
/// An empty patch is still sent; the backend only bumps `updated_at`.
/// Local optimistic state is not touched here.
pub async fn update_task(
    repo: &dyn TaskRepository,
    project_id: &str,
    task_id: &str,
    fields: &TaskPatch,
) -> bool {
    let wire = to_wire(fields);
    match repo.patch_task(task_id, &wire).await {
        Ok(task) => {
            debug!(project_id, task_id, status = %task.status, "task updated");
            true
        }
        Err(e) => {
            warn!(project_id, task_id, error = %e, "task update failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::{sample_task, MockBackend};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_status_is_mapped_before_sending() {
        let backend = MockBackend::with_tasks(vec![sample_task("p1", "t1", "A", "Backlog")]);
        let patch = TaskPatch { status: Some("On-going".into()), ..Default::default() };

        assert!(update_task(&backend, "p1", "t1", &patch).await);

        let sent = backend.patches.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "t1");
        assert_eq!(sent[0].1.status.as_deref(), Some("In Progress"));
        assert_eq!(backend.tasks.lock().unwrap()[0].status, "In Progress");
    }

    #[tokio::test]
    async fn test_non_status_fields_pass_unchanged() {
        let backend = MockBackend::with_tasks(vec![sample_task("p1", "t1", "A", "Backlog")]);
        let patch = TaskPatch {
            title: Some("Renamed".into()),
            time_spent: Some(2.5),
            ..Default::default()
        };

        assert!(update_task(&backend, "p1", "t1", &patch).await);
        let sent = backend.patches.lock().unwrap();
        assert_eq!(sent[0].1, patch);
    }

    #[tokio::test]
    async fn test_storage_status_passes_through() {
        let backend = MockBackend::with_tasks(vec![sample_task("p1", "t1", "A", "Backlog")]);
        let patch = TaskPatch { status: Some("Cancelled".into()), ..Default::default() };

        assert!(update_task(&backend, "p1", "t1", &patch).await);
        assert_eq!(backend.patches.lock().unwrap()[0].1.status.as_deref(), Some("Cancelled"));
    }

    #[tokio::test]
    async fn test_empty_patch_still_makes_one_call() {
        let backend = MockBackend::with_tasks(vec![sample_task("p1", "t1", "A", "Backlog")]);

        assert!(update_task(&backend, "p1", "t1", &TaskPatch::default()).await);
        assert_eq!(backend.patches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_returns_false_without_retry() {
        let backend = MockBackend::with_tasks(vec![sample_task("p1", "t1", "A", "Backlog")]);
        backend.fail_writes.store(true, Ordering::SeqCst);
        let patch = TaskPatch { title: Some("x".into()), ..Default::default() };

        assert!(!update_task(&backend, "p1", "t1", &patch).await);
        assert!(backend.patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_returns_false() {
        let backend = MockBackend::new();
        let patch = TaskPatch { title: Some("x".into()), ..Default::default() };
        assert!(!update_task(&backend, "p1", "missing", &patch).await);
    }
}
