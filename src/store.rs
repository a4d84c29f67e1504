//! Service boundaries consumed by the sync core.
//!
//! The task table, the snapshot log and the change feed live behind a remote
//! service. Everything in this crate talks to them through these traits;
//! `remote_client::RemoteClient` is the HTTP implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::db::{NewSnapshot, ProjectAggregate, Snapshot, SnapshotType, Task, TaskChange, TaskPatch};
use crate::error::ServiceError;

/// Authoritative task collection for a project.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Active (non-deleted) tasks of a project.
    async fn fetch_tasks(&self, project_id: &str) -> Result<Vec<Task>, ServiceError>;

    /// Patch a task. `patch.status` must already be in storage vocabulary.
    async fn patch_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Task, ServiceError>;
}

/// Append-only log of layout captures.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Most recently created snapshot, optionally restricted to one type.
    async fn latest_snapshot(
        &self,
        project_id: &str,
        snapshot_type: Option<SnapshotType>,
    ) -> Result<Option<Snapshot>, ServiceError>;

    /// Insert a new snapshot row. Never updates an existing one.
    async fn insert_snapshot(
        &self,
        project_id: &str,
        snapshot: &NewSnapshot,
    ) -> Result<Snapshot, ServiceError>;
}

pub type ChangeStream = BoxStream<'static, Result<TaskChange, ServiceError>>;

/// Server-push channel of task changes scoped to one project.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn open(&self, project_id: &str) -> Result<ChangeStream, ServiceError>;
}

/// Source of full project aggregates for duplication.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn load_aggregate(&self, project_id: &str) -> Result<Option<ProjectAggregate>, ServiceError>;
}

/// In-memory backend for tests, with injectable failures and call counters.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::db::{ChangeKind, Project};
    use chrono::{Duration, Utc};
    use futures::StreamExt;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    pub fn sample_task(project_id: &str, id: &str, title: &str, status: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            description: None,
            status: status.to_string(),
            estimated_hours: None,
            time_spent: 0.0,
            sort_order: 0,
            node_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn sample_project(id: &str, name: &str) -> Project {
        let now = Utc::now();
        Project {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub struct MockBackend {
        pub tasks: Mutex<Vec<Task>>,
        pub snapshots: Mutex<Vec<Snapshot>>,
        pub patches: Mutex<Vec<(String, TaskPatch)>>,
        pub aggregates: Mutex<HashMap<String, ProjectAggregate>>,
        pub fail_tasks: AtomicBool,
        pub fail_snapshots: AtomicBool,
        pub fail_writes: AtomicBool,
        pub task_fetches: AtomicUsize,
        pub snapshot_fetches: AtomicUsize,
        pub feeds_opened: AtomicUsize,
        changes: broadcast::Sender<TaskChange>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            let (changes, _) = broadcast::channel(64);
            Self {
                tasks: Mutex::new(Vec::new()),
                snapshots: Mutex::new(Vec::new()),
                patches: Mutex::new(Vec::new()),
                aggregates: Mutex::new(HashMap::new()),
                fail_tasks: AtomicBool::new(false),
                fail_snapshots: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                task_fetches: AtomicUsize::new(0),
                snapshot_fetches: AtomicUsize::new(0),
                feeds_opened: AtomicUsize::new(0),
                changes,
            }
        }

        pub fn with_tasks(tasks: Vec<Task>) -> Self {
            let backend = Self::new();
            *backend.tasks.lock().unwrap() = tasks;
            backend
        }

        /// Seed a snapshot whose `created_at` is `age_secs` in the past.
        pub fn push_snapshot(&self, project_id: &str, data: serde_json::Value, age_secs: i64) {
            let mut snapshots = self.snapshots.lock().unwrap();
            let id = format!("snap-{}", snapshots.len() + 1);
            snapshots.push(Snapshot {
                id,
                project_id: project_id.to_string(),
                snapshot_data: data,
                snapshot_type: SnapshotType::Manual,
                created_at: Utc::now() - Duration::seconds(age_secs),
            });
        }

        pub fn emit(&self, kind: ChangeKind, task: &Task) {
            let _ = self.changes.send(TaskChange::new(kind, task));
        }

        pub fn emit_raw(&self, change: TaskChange) {
            let _ = self.changes.send(change);
        }

        fn unavailable(what: &str) -> ServiceError {
            ServiceError::Unavailable(format!("mock {} failure", what))
        }
    }

    #[async_trait]
    impl TaskRepository for MockBackend {
        async fn fetch_tasks(&self, project_id: &str) -> Result<Vec<Task>, ServiceError> {
            self.task_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_tasks.load(Ordering::SeqCst) {
                return Err(Self::unavailable("tasks"));
            }
            let tasks = self.tasks.lock().unwrap();
            Ok(tasks
                .iter()
                .filter(|t| t.project_id == project_id && !t.is_deleted())
                .cloned()
                .collect())
        }

        async fn patch_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Task, ServiceError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::unavailable("patch"));
            }
            self.patches.lock().unwrap().push((task_id.to_string(), patch.clone()));
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| ServiceError::Status { status: 404, body: "task not found".into() })?;
            patch.apply_to(task);
            task.updated_at = Utc::now();
            Ok(task.clone())
        }
    }

    #[async_trait]
    impl SnapshotStore for MockBackend {
        async fn latest_snapshot(
            &self,
            project_id: &str,
            snapshot_type: Option<SnapshotType>,
        ) -> Result<Option<Snapshot>, ServiceError> {
            self.snapshot_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_snapshots.load(Ordering::SeqCst) {
                return Err(Self::unavailable("snapshots"));
            }
            let snapshots = self.snapshots.lock().unwrap();
            Ok(snapshots
                .iter()
                .filter(|s| s.project_id == project_id)
                .filter(|s| snapshot_type.map_or(true, |t| s.snapshot_type == t))
                .max_by_key(|s| s.created_at)
                .cloned())
        }

        async fn insert_snapshot(
            &self,
            project_id: &str,
            snapshot: &NewSnapshot,
        ) -> Result<Snapshot, ServiceError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::unavailable("insert"));
            }
            let mut snapshots = self.snapshots.lock().unwrap();
            let row = Snapshot {
                id: format!("snap-{}", snapshots.len() + 1),
                project_id: project_id.to_string(),
                snapshot_data: serde_json::to_value(&snapshot.snapshot_data)?,
                snapshot_type: snapshot.snapshot_type,
                created_at: Utc::now(),
            };
            snapshots.push(row.clone());
            Ok(row)
        }
    }

    #[async_trait]
    impl ChangeFeed for MockBackend {
        async fn open(&self, _project_id: &str) -> Result<ChangeStream, ServiceError> {
            self.feeds_opened.fetch_add(1, Ordering::SeqCst);
            let rx = self.changes.subscribe();
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(change) => return Some((Ok(change), rx)),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            });
            Ok(stream.boxed())
        }
    }

    #[async_trait]
    impl ProjectSource for MockBackend {
        async fn load_aggregate(&self, project_id: &str) -> Result<Option<ProjectAggregate>, ServiceError> {
            Ok(self.aggregates.lock().unwrap().get(project_id).cloned())
        }
    }
}
