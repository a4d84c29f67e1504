use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::models::{
    Comment, NewSnapshot, NewTask, Project, ProjectAggregate, RawSnapshot, Snapshot, SnapshotType, Subtask,
    Task, TaskPatch,
};
use crate::cloner;
use crate::error::CloneError;
use crate::status::StorageStatus;

pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn json_err(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path)?;
        let db = Database { conn: Mutex::new(conn), path: path_str };
        db.init()?;
        Ok(db)
    }

    pub fn get_path(&self) -> String {
        self.path.clone()
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.init()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Online copy of the whole database to `dest`.
    pub fn backup_to<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        self.conn().backup(DatabaseName::Main, dest, None)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn();

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,          -- storage vocabulary
                estimated_hours REAL,
                time_spent REAL NOT NULL DEFAULT 0,
                sort_order INTEGER NOT NULL DEFAULT 0,
                node_id TEXT,                  -- canvas node placed for this task
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER             -- soft delete
            );

            CREATE TABLE IF NOT EXISTS subtasks (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                estimated_hours REAL,
                time_spent REAL NOT NULL DEFAULT 0,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                author TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Append-only: rows are never updated
            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                snapshot_data TEXT NOT NULL,
                snapshot_type TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id, sort_order);
            CREATE INDEX IF NOT EXISTS idx_subtasks_task ON subtasks(task_id);
            CREATE INDEX IF NOT EXISTS idx_comments_task ON comments(task_id);
            CREATE INDEX IF NOT EXISTS idx_snapshots_project ON snapshots(project_id, created_at);
            ",
        )?;

        Ok(())
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub fn create_project(&self, name: &str, description: Option<&str>) -> Result<Project> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.map(|d| d.to_string()),
            created_at: now,
            updated_at: now,
        };
        Self::insert_project(&self.conn(), &project)?;
        Ok(project)
    }

    fn insert_project(conn: &Connection, project: &Project) -> Result<()> {
        conn.execute(
            "INSERT INTO projects (id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project.id,
                project.name,
                project.description,
                to_millis(&project.created_at),
                to_millis(&project.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, description, created_at, updated_at FROM projects WHERE id = ?1",
            params![id],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    created_at: from_millis(row.get(3)?),
                    updated_at: from_millis(row.get(4)?),
                })
            },
        )
        .optional()
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    const TASK_COLUMNS: &'static str = "id, project_id, title, description, status, estimated_hours, time_spent, sort_order, node_id, created_at, updated_at, deleted_at";

    fn row_to_task(row: &Row) -> Result<Task> {
        Ok(Task {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            estimated_hours: row.get(5)?,
            time_spent: row.get(6)?,
            sort_order: row.get(7)?,
            node_id: row.get(8)?,
            created_at: from_millis(row.get(9)?),
            updated_at: from_millis(row.get(10)?),
            deleted_at: row.get::<_, Option<i64>>(11)?.map(from_millis),
        })
    }

    fn write_task(conn: &Connection, task: &Task) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                Self::TASK_COLUMNS
            ),
            params![
                task.id,
                task.project_id,
                task.title,
                task.description,
                task.status,
                task.estimated_hours,
                task.time_spent,
                task.sort_order,
                task.node_id,
                to_millis(&task.created_at),
                to_millis(&task.updated_at),
                task.deleted_at.as_ref().map(to_millis),
            ],
        )?;
        Ok(())
    }

    /// Create a task. Status defaults to `Backlog`; sort order defaults to the end of the list.
    pub fn insert_task(&self, project_id: &str, new: &NewTask) -> Result<Task> {
        let conn = self.conn();
        let sort_order = match new.sort_order {
            Some(order) => order,
            None => conn.query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM tasks WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?,
        };
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            title: new.title.clone(),
            description: new.description.clone(),
            status: new
                .status
                .clone()
                .unwrap_or_else(|| StorageStatus::Backlog.as_str().to_string()),
            estimated_hours: new.estimated_hours,
            time_spent: 0.0,
            sort_order,
            node_id: new.node_id.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        Self::write_task(&conn, &task)?;
        Ok(task)
    }

    /// Any task by id, soft-deleted ones included.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.conn();
        Self::get_task_with(&conn, id)
    }

    fn get_task_with(conn: &Connection, id: &str) -> Result<Option<Task>> {
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", Self::TASK_COLUMNS),
            params![id],
            Self::row_to_task,
        )
        .optional()
    }

    /// Non-deleted tasks of a project in sort order.
    pub fn get_active_tasks(&self, project_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE project_id = ?1 AND deleted_at IS NULL
             ORDER BY sort_order, created_at",
            Self::TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![project_id], Self::row_to_task)?
            .collect::<Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Apply a partial update. Returns `None` when the task does not exist.
    pub fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let conn = self.conn();
        let Some(mut task) = Self::get_task_with(&conn, id)? else {
            return Ok(None);
        };
        patch.apply_to(&mut task);
        task.updated_at = Utc::now();
        conn.execute(
            "UPDATE tasks SET title = ?2, description = ?3, status = ?4, estimated_hours = ?5,
                 time_spent = ?6, sort_order = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                task.id,
                task.title,
                task.description,
                task.status,
                task.estimated_hours,
                task.time_spent,
                task.sort_order,
                to_millis(&task.updated_at),
            ],
        )?;
        Ok(Some(task))
    }

    /// Mark a task deleted. Idempotent: an already-deleted task keeps its first timestamp.
    pub fn soft_delete_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.conn();
        let now = to_millis(&Utc::now());
        conn.execute(
            "UPDATE tasks SET deleted_at = COALESCE(deleted_at, ?2), updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Self::get_task_with(&conn, id)
    }

    // ========================================================================
    // Subtasks and comments
    // ========================================================================

    pub fn add_subtask(&self, task_id: &str, title: &str) -> Result<Subtask> {
        let conn = self.conn();
        let sort_order: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM subtasks WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        let now = Utc::now();
        let subtask = Subtask {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            title: title.to_string(),
            completed: false,
            estimated_hours: None,
            time_spent: 0.0,
            sort_order,
            created_at: now,
            updated_at: now,
        };
        Self::write_subtask(&conn, &subtask)?;
        Ok(subtask)
    }

    fn write_subtask(conn: &Connection, subtask: &Subtask) -> Result<()> {
        conn.execute(
            "INSERT INTO subtasks (id, task_id, title, completed, estimated_hours, time_spent, sort_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                subtask.id,
                subtask.task_id,
                subtask.title,
                subtask.completed as i32,
                subtask.estimated_hours,
                subtask.time_spent,
                subtask.sort_order,
                to_millis(&subtask.created_at),
                to_millis(&subtask.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn add_comment(&self, task_id: &str, author: &str, body: &str) -> Result<Comment> {
        let now = Utc::now();
        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            author: author.to_string(),
            body: body.to_string(),
            created_at: now,
            updated_at: now,
        };
        Self::write_comment(&self.conn(), &comment)?;
        Ok(comment)
    }

    fn write_comment(conn: &Connection, comment: &Comment) -> Result<()> {
        conn.execute(
            "INSERT INTO comments (id, task_id, author, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                comment.id,
                comment.task_id,
                comment.author,
                comment.body,
                to_millis(&comment.created_at),
                to_millis(&comment.updated_at),
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn insert_snapshot(&self, project_id: &str, new: &NewSnapshot) -> Result<Snapshot> {
        let raw = RawSnapshot::try_from(new).map_err(json_err)?;
        self.insert_raw_snapshot(project_id, raw)
    }

    /// Store a layout without looking inside it.
    pub fn insert_raw_snapshot(&self, project_id: &str, raw: RawSnapshot) -> Result<Snapshot> {
        let conn = self.conn();
        Self::write_snapshot(&conn, project_id, raw)
    }

    fn write_snapshot(conn: &Connection, project_id: &str, raw: RawSnapshot) -> Result<Snapshot> {
        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            snapshot_data: raw.snapshot_data,
            snapshot_type: raw.snapshot_type,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO snapshots (id, project_id, snapshot_data, snapshot_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.id,
                snapshot.project_id,
                snapshot.snapshot_data.to_string(),
                snapshot.snapshot_type.as_str(),
                to_millis(&snapshot.created_at),
            ],
        )?;
        Ok(snapshot)
    }

    /// Most recently created snapshot, optionally of one type. Ties on
    /// `created_at` go to the later insert.
    pub fn latest_snapshot(
        &self,
        project_id: &str,
        snapshot_type: Option<SnapshotType>,
    ) -> Result<Option<Snapshot>> {
        let conn = self.conn();
        Self::latest_snapshot_with(&conn, project_id, snapshot_type)
    }

    fn latest_snapshot_with(
        conn: &Connection,
        project_id: &str,
        snapshot_type: Option<SnapshotType>,
    ) -> Result<Option<Snapshot>> {
        Ok(Self::recent_snapshots_with(conn, project_id, snapshot_type, 1)?.into_iter().next())
    }

    /// Newest-first snapshots of a project, at most `limit`.
    pub fn recent_snapshots(
        &self,
        project_id: &str,
        snapshot_type: Option<SnapshotType>,
        limit: usize,
    ) -> Result<Vec<Snapshot>> {
        let conn = self.conn();
        Self::recent_snapshots_with(&conn, project_id, snapshot_type, limit)
    }

    fn recent_snapshots_with(
        conn: &Connection,
        project_id: &str,
        snapshot_type: Option<SnapshotType>,
        limit: usize,
    ) -> Result<Vec<Snapshot>> {
        let mut stmt = conn.prepare(
            "SELECT id, project_id, snapshot_data, snapshot_type, created_at FROM snapshots
             WHERE project_id = ?1 AND (?2 IS NULL OR snapshot_type = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![project_id, snapshot_type.map(|t| t.as_str()), limit as i64],
            |row| {
                let raw: String = row.get(2)?;
                let kind: String = row.get(3)?;
                Ok(Snapshot {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    // Payload is opaque here; an unparsable one loads as "no layout"
                    snapshot_data: serde_json::from_str(&raw).unwrap_or(Value::Null),
                    snapshot_type: SnapshotType::from_str(&kind).unwrap_or(SnapshotType::Manual),
                    created_at: from_millis(row.get(4)?),
                })
            },
        )?;
        let snapshots = rows.collect::<Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    pub fn count_snapshots(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========================================================================
    // Aggregates and duplication
    // ========================================================================

    /// Project, active tasks with their subtasks and comments, and the canvas
    /// from the latest snapshot.
    pub fn load_aggregate(&self, project_id: &str) -> Result<Option<ProjectAggregate>> {
        let Some(project) = self.get_project(project_id)? else {
            return Ok(None);
        };
        let tasks = self.get_active_tasks(project_id)?;

        let conn = self.conn();
        let subtasks = {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.task_id, s.title, s.completed, s.estimated_hours, s.time_spent,
                        s.sort_order, s.created_at, s.updated_at
                 FROM subtasks s JOIN tasks t ON t.id = s.task_id
                 WHERE t.project_id = ?1 AND t.deleted_at IS NULL
                 ORDER BY s.task_id, s.sort_order",
            )?;
            let rows = stmt.query_map(params![project_id], |row| {
                Ok(Subtask {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    title: row.get(2)?,
                    completed: row.get::<_, i32>(3)? != 0,
                    estimated_hours: row.get(4)?,
                    time_spent: row.get(5)?,
                    sort_order: row.get(6)?,
                    created_at: from_millis(row.get(7)?),
                    updated_at: from_millis(row.get(8)?),
                })
            })?;
            rows.collect::<Result<Vec<_>>>()?
        };
        let comments = {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.task_id, c.author, c.body, c.created_at, c.updated_at
                 FROM comments c JOIN tasks t ON t.id = c.task_id
                 WHERE t.project_id = ?1 AND t.deleted_at IS NULL
                 ORDER BY c.created_at",
            )?;
            let rows = stmt.query_map(params![project_id], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    author: row.get(2)?,
                    body: row.get(3)?,
                    created_at: from_millis(row.get(4)?),
                    updated_at: from_millis(row.get(5)?),
                })
            })?;
            rows.collect::<Result<Vec<_>>>()?
        };
        let layout = Self::latest_snapshot_with(&conn, project_id, None)?
            .and_then(|s| s.layout())
            .unwrap_or_default();

        Ok(Some(ProjectAggregate {
            project,
            tasks,
            subtasks,
            comments,
            nodes: layout.nodes,
            edges: layout.edges,
        }))
    }

    /// Write a whole aggregate in one transaction. The canvas becomes the
    /// project's first (manual) snapshot.
    pub fn insert_aggregate(&self, aggregate: &ProjectAggregate) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        Self::insert_project(&tx, &aggregate.project)?;
        for task in &aggregate.tasks {
            Self::write_task(&tx, task)?;
        }
        for subtask in &aggregate.subtasks {
            Self::write_subtask(&tx, subtask)?;
        }
        for comment in &aggregate.comments {
            Self::write_comment(&tx, comment)?;
        }
        if !aggregate.nodes.is_empty() {
            let snapshot = NewSnapshot {
                snapshot_data: super::models::SnapshotData {
                    nodes: aggregate.nodes.clone(),
                    edges: aggregate.edges.clone(),
                },
                snapshot_type: SnapshotType::Manual,
            };
            let raw = RawSnapshot::try_from(&snapshot).map_err(json_err)?;
            Self::write_snapshot(&tx, &aggregate.project.id, raw)?;
        }

        tx.commit()
    }

    /// Clone a stored project under fresh ids and persist the copy.
    pub fn duplicate_project(
        &self,
        project_id: &str,
        new_name: Option<&str>,
    ) -> std::result::Result<ProjectAggregate, CloneError> {
        let source = self
            .load_aggregate(project_id)?
            .ok_or_else(|| CloneError::NotFound(project_id.to_string()))?;
        let copy = cloner::clone_aggregate(&source, new_name)?;
        self.insert_aggregate(&copy)?;
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Edge, Node, NodeData, Position, SnapshotData, TaskCard};
    use serde_json::Map;

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: None,
            status: None,
            estimated_hours: Some(2.0),
            sort_order: None,
            node_id: None,
        }
    }

    fn card_node(id: &str, task_id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: "task".to_string(),
            position: Position { x: 10.0, y: 20.0 },
            data: NodeData::Task(TaskCard { task_id: task_id.to_string(), ..Default::default() }),
            draggable: None,
            selectable: None,
            extra: Map::new(),
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            edge_type: None,
            label: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_task_lifecycle() {
        let db = Database::in_memory().unwrap();
        let project = db.create_project("Launch", None).unwrap();

        let a = db.insert_task(&project.id, &new_task("A")).unwrap();
        let b = db.insert_task(&project.id, &new_task("B")).unwrap();
        assert_eq!(a.status, "Backlog");
        assert_eq!((a.sort_order, b.sort_order), (0, 1));

        let patched = db
            .patch_task(&a.id, &TaskPatch { status: Some("In Progress".into()), ..Default::default() })
            .unwrap()
            .unwrap();
        assert_eq!(patched.status, "In Progress");
        assert_eq!(patched.title, "A");
        assert!(db.patch_task("missing", &TaskPatch::default()).unwrap().is_none());

        let deleted = db.soft_delete_task(&b.id).unwrap().unwrap();
        assert!(deleted.is_deleted());
        let active = db.get_active_tasks(&project.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
        // Soft-deleted rows stay readable
        assert!(db.get_task(&b.id).unwrap().unwrap().is_deleted());
    }

    #[test]
    fn test_latest_snapshot_by_type() {
        let db = Database::in_memory().unwrap();
        let project = db.create_project("P", Some("desc")).unwrap();
        let data = |n: &str| SnapshotData { nodes: vec![card_node(n, "t")], edges: vec![] };

        assert!(db.latest_snapshot(&project.id, None).unwrap().is_none());

        db.insert_snapshot(&project.id, &NewSnapshot { snapshot_data: data("m"), snapshot_type: SnapshotType::Manual }).unwrap();
        let auto = db
            .insert_snapshot(&project.id, &NewSnapshot { snapshot_data: data("a"), snapshot_type: SnapshotType::Autosave })
            .unwrap();

        let latest = db.latest_snapshot(&project.id, None).unwrap().unwrap();
        assert_eq!(latest.id, auto.id);
        assert_eq!(latest.layout().unwrap().nodes[0].id, "a");

        let manual = db.latest_snapshot(&project.id, Some(SnapshotType::Manual)).unwrap().unwrap();
        assert_eq!(manual.snapshot_type, SnapshotType::Manual);
        assert!(db.latest_snapshot(&project.id, Some(SnapshotType::AiGenerated)).unwrap().is_none());
        assert_eq!(db.count_snapshots(&project.id).unwrap(), 2);

        let recent = db.recent_snapshots(&project.id, None, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, auto.id);
    }

    #[test]
    fn test_duplicate_project_persists_copy() {
        let db = Database::in_memory().unwrap();
        let project = db.create_project("Roadmap", None).unwrap();
        let task = db.insert_task(&project.id, &new_task("Design")).unwrap();
        let gone = db.insert_task(&project.id, &new_task("Dropped")).unwrap();
        db.soft_delete_task(&gone.id).unwrap();
        db.add_subtask(&task.id, "Sketch").unwrap();
        db.add_comment(&task.id, "sam", "looks good").unwrap();
        db.insert_snapshot(
            &project.id,
            &NewSnapshot {
                snapshot_data: SnapshotData {
                    nodes: vec![card_node("n1", &task.id), card_node("n2", &task.id)],
                    edges: vec![edge("e1", "n1", "n2")],
                },
                snapshot_type: SnapshotType::Manual,
            },
        )
        .unwrap();

        let copy = db.duplicate_project(&project.id, None).unwrap();
        assert_eq!(copy.project.name, "Roadmap (copy)");

        let stored = db.load_aggregate(&copy.project.id).unwrap().unwrap();
        assert_eq!(stored.tasks.len(), 1);
        assert_eq!(stored.subtasks.len(), 1);
        assert_eq!(stored.comments.len(), 1);
        assert_eq!(stored.nodes.len(), 2);
        assert_eq!(stored.edges.len(), 1);
        assert_ne!(stored.tasks[0].id, task.id);
        assert_eq!(stored.nodes[0].task_id(), Some(stored.tasks[0].id.as_str()));
        assert_eq!(stored.subtasks[0].task_id, stored.tasks[0].id);

        // Source untouched
        let source = db.load_aggregate(&project.id).unwrap().unwrap();
        assert_eq!(source.tasks[0].id, task.id);
        assert_eq!(source.nodes[0].id, "n1");
    }

    #[test]
    fn test_duplicate_missing_project() {
        let db = Database::in_memory().unwrap();
        assert!(matches!(
            db.duplicate_project("nope", Some("x")),
            Err(CloneError::NotFound(ref id)) if id == "nope"
        ));
    }

    #[test]
    fn test_unparsable_snapshot_loads_without_layout() {
        let db = Database::in_memory().unwrap();
        let project = db.create_project("P", None).unwrap();
        db.conn()
            .execute(
                "INSERT INTO snapshots (id, project_id, snapshot_data, snapshot_type, created_at)
                 VALUES ('s1', ?1, '{broken', 'manual', 1)",
                params![project.id],
            )
            .unwrap();
        let snapshot = db.latest_snapshot(&project.id, None).unwrap().unwrap();
        assert_eq!(snapshot.snapshot_data, Value::Null);
        assert!(snapshot.layout().is_none());
        let aggregate = db.load_aggregate(&project.id).unwrap().unwrap();
        assert!(aggregate.nodes.is_empty());
    }

    #[test]
    fn test_file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.db");
        let id = {
            let db = Database::new(&path).unwrap();
            db.create_project("Persisted", None).unwrap().id
        };
        let db = Database::new(&path).unwrap();
        assert_eq!(db.get_project(&id).unwrap().unwrap().name, "Persisted");
        assert_eq!(db.get_path(), path.to_string_lossy());
    }

    #[test]
    fn test_backup_copies_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let project = db.create_project("Backed up", None).unwrap();
        db.insert_task(&project.id, &new_task("A")).unwrap();

        let dest = dir.path().join("backup.db");
        db.backup_to(&dest).unwrap();

        let restored = Database::new(&dest).unwrap();
        assert_eq!(restored.get_active_tasks(&project.id).unwrap().len(), 1);
    }
}
