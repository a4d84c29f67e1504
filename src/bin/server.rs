//! Plancanvas reference server: HTTP API over the task table and snapshot log.
//!
//! Thin axum server wrapping the shared plancanvas_lib database layer. Every
//! task write is also published on the project's change feed (server-sent
//! events), which is what the realtime listener consumes.
//!
//! Usage:
//!   PLANCANVAS_DB=/path/to/plan.db PLANCANVAS_BIND=127.0.0.1:3741 plancanvas-server
//!
//! Or with args:
//!   plancanvas-server --db /path/to/plan.db --bind 0.0.0.0:3741

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use futures::stream::{self, Stream};
use plancanvas_lib::db::{
    ChangeKind, Comment, Database, NewTask, Project, ProjectAggregate, RawSnapshot, Snapshot,
    SnapshotType, Subtask, Task, TaskChange, TaskPatch,
};
use plancanvas_lib::error::CloneError;
use plancanvas_lib::remote_client::{
    DuplicateRequest, Health, NewComment, NewProject, NewSubtask, SnapshotsEnvelope, TasksEnvelope,
};
use plancanvas_lib::status::StorageStatus;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

/// Snapshot payloads carry whole canvases.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const CHANGE_BUFFER: usize = 256;

// ============================================================================
// AppState
// ============================================================================

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
    changes: broadcast::Sender<TaskChange>,
    start_time: Instant,
}

impl AppState {
    fn publish(&self, kind: ChangeKind, task: &Task) {
        // No receivers is fine: nobody is watching this project
        let _ = self.changes.send(TaskChange::new(kind, task));
    }
}

// ============================================================================
// Error type
// ============================================================================

struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError(StatusCode::INTERNAL_SERVER_ERROR, s)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        error!(error = %e, "database error");
        AppError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<CloneError> for AppError {
    fn from(e: CloneError) -> Self {
        match e {
            CloneError::NotFound(id) => not_found(format!("Project '{}' not found", id)),
            CloneError::Validation { .. } => AppError(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            other => AppError::from(other.to_string()),
        }
    }
}

fn not_found(msg: impl Into<String>) -> AppError {
    AppError(StatusCode::NOT_FOUND, msg.into())
}

fn bad_request(msg: impl Into<String>) -> AppError {
    AppError(StatusCode::BAD_REQUEST, msg.into())
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Deserialize)]
struct SnapshotsQuery {
    limit: Option<usize>,
    #[serde(rename = "type")]
    snapshot_type: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

fn require_project(state: &AppState, id: &str) -> Result<Project, AppError> {
    state
        .db
        .get_project(id)?
        .ok_or_else(|| not_found(format!("Project '{}' not found", id)))
}

fn check_status(status: Option<&str>) -> Result<(), AppError> {
    match status {
        Some(s) if StorageStatus::from_str(s).is_none() => {
            Err(bad_request(format!("Unknown status '{}'", s)))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    info!(uptime_secs = state.start_time.elapsed().as_secs(), "health check");
    Json(Health {
        status: "ok".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    })
}

// POST /projects
async fn create_project_handler(
    State(state): State<AppState>,
    Json(req): Json<NewProject>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    if req.name.trim().is_empty() {
        return Err(bad_request("Project name must not be empty"));
    }
    let project = state.db.create_project(&req.name, req.description.as_deref())?;
    info!(project_id = %project.id, name = %project.name, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

// GET /projects/{id}
async fn get_project_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(require_project(&state, &id)?))
}

// GET /projects/{id}/aggregate
async fn aggregate_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectAggregate>, AppError> {
    state
        .db
        .load_aggregate(&id)?
        .map(Json)
        .ok_or_else(|| not_found(format!("Project '{}' not found", id)))
}

// POST /projects/{id}/duplicate
async fn duplicate_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DuplicateRequest>,
) -> Result<(StatusCode, Json<ProjectAggregate>), AppError> {
    let copy = state.db.duplicate_project(&id, req.name.as_deref())?;
    info!(source = %id, copy = %copy.project.id, tasks = copy.tasks.len(), "project duplicated");
    Ok((StatusCode::CREATED, Json(copy)))
}

// GET /projects/{id}/tasks
async fn list_tasks_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TasksEnvelope>, AppError> {
    require_project(&state, &id)?;
    let tasks = state.db.get_active_tasks(&id)?;
    Ok(Json(TasksEnvelope { tasks }))
}

// POST /projects/{id}/tasks
async fn create_task_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    require_project(&state, &id)?;
    if req.title.trim().is_empty() {
        return Err(bad_request("Task title must not be empty"));
    }
    check_status(req.status.as_deref())?;

    let task = state.db.insert_task(&id, &req)?;
    state.publish(ChangeKind::Insert, &task);
    Ok((StatusCode::CREATED, Json(task)))
}

// PATCH /tasks/{id}
async fn patch_task_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TaskPatch>,
) -> Result<Json<Task>, AppError> {
    check_status(req.status.as_deref())?;
    require_active_task(&state, &id)?;

    let task = state
        .db
        .patch_task(&id, &req)?
        .ok_or_else(|| not_found(format!("Task '{}' not found", id)))?;
    state.publish(ChangeKind::Update, &task);
    Ok(Json(task))
}

fn require_active_task(state: &AppState, id: &str) -> Result<Task, AppError> {
    match state.db.get_task(id)? {
        Some(task) if !task.is_deleted() => Ok(task),
        _ => Err(not_found(format!("Task '{}' not found", id))),
    }
}

// POST /tasks/{id}/subtasks
async fn create_subtask_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NewSubtask>,
) -> Result<(StatusCode, Json<Subtask>), AppError> {
    require_active_task(&state, &id)?;
    if req.title.trim().is_empty() {
        return Err(bad_request("Subtask title must not be empty"));
    }
    let subtask = state.db.add_subtask(&id, &req.title)?;
    Ok((StatusCode::CREATED, Json(subtask)))
}

// POST /tasks/{id}/comments
async fn create_comment_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NewComment>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    require_active_task(&state, &id)?;
    if req.body.trim().is_empty() {
        return Err(bad_request("Comment body must not be empty"));
    }
    let comment = state.db.add_comment(&id, &req.author, &req.body)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

// DELETE /tasks/{id}
async fn delete_task_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = state
        .db
        .soft_delete_task(&id)?
        .ok_or_else(|| not_found(format!("Task '{}' not found", id)))?;
    // Soft delete: subscribers see an update carrying deleted_at
    state.publish(ChangeKind::Update, &task);
    info!(task_id = %id, "task deleted");
    Ok(Json(task))
}

// GET /projects/{id}/snapshots?limit=&type=
async fn list_snapshots_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SnapshotsQuery>,
) -> Result<Json<SnapshotsEnvelope>, AppError> {
    require_project(&state, &id)?;
    let snapshot_type = match query.snapshot_type.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            SnapshotType::from_str(raw)
                .ok_or_else(|| bad_request(format!("Unknown snapshot type '{}'", raw)))?,
        ),
    };
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let snapshots = state.db.recent_snapshots(&id, snapshot_type, limit)?;
    Ok(Json(SnapshotsEnvelope { snapshots }))
}

// POST /projects/{id}/snapshots
async fn create_snapshot_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RawSnapshot>,
) -> Result<(StatusCode, Json<Snapshot>), AppError> {
    require_project(&state, &id)?;
    let count = |key: &str| req.snapshot_data.get(key).and_then(Value::as_array).map_or(0, Vec::len);
    let (nodes, edges) = (count("nodes"), count("edges"));
    let snapshot = state.db.insert_raw_snapshot(&id, req)?;
    info!(
        project_id = %id,
        snapshot_type = snapshot.snapshot_type.as_str(),
        nodes,
        edges,
        "snapshot stored"
    );
    Ok((StatusCode::CREATED, Json(snapshot)))
}

// GET /projects/{id}/events
async fn events_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_project(&state, &id)?;
    let rx = state.changes.subscribe();
    info!(project_id = %id, "change feed opened");

    let events = stream::unfold((rx, id), |(mut rx, project_id)| async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    let ours = change.task().map_or(false, |t| t.project_id == project_id);
                    if !ours {
                        continue;
                    }
                    match Event::default().json_data(&change) {
                        Ok(event) => return Some((Ok::<_, Infallible>(event), (rx, project_id))),
                        Err(e) => warn!(error = %e, "unencodable change event"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%project_id, skipped, "change feed subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/projects", post(create_project_handler))
        .route("/projects/{id}", get(get_project_handler))
        .route("/projects/{id}/aggregate", get(aggregate_handler))
        .route("/projects/{id}/duplicate", post(duplicate_handler))
        .route("/projects/{id}/tasks", get(list_tasks_handler).post(create_task_handler))
        .route("/projects/{id}/snapshots", get(list_snapshots_handler).post(create_snapshot_handler))
        .route("/projects/{id}/events", get(events_handler))
        .route("/tasks/{id}", patch(patch_task_handler).delete(delete_task_handler))
        .route("/tasks/{id}/subtasks", post(create_subtask_handler))
        .route("/tasks/{id}/comments", post(create_comment_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Auto-backup system
// ============================================================================

fn backup_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plancanvas/backups")
}

fn run_backup(db: &Database, label: &str) {
    let dir = backup_dir();
    if std::fs::create_dir_all(&dir).is_err() {
        warn!(dir = %dir.display(), "failed to create backup directory");
        return;
    }
    let now = chrono::Utc::now();
    let filename = format!("{}-{}.db", label, now.format("%Y%m%d-%H%M%S"));
    let path = dir.join(&filename);
    match db.backup_to(&path) {
        Ok(_) => info!(label, path = %path.display(), "backup written"),
        Err(e) => warn!(label, error = %e, "backup failed"),
    }
}

fn prune_backups() {
    let dir = backup_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else { return };

    let mut hourly_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("hourly-") && name.ends_with(".db")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    // Newest first; keep the last 24
    hourly_files.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in hourly_files.iter().skip(24) {
        std::fs::remove_file(path).ok();
    }
}

async fn backup_loop(db: Arc<Database>) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    interval.tick().await;
    loop {
        interval.tick().await;
        run_backup(&db, "hourly");
        prune_backups();
    }
}

// ============================================================================
// Database path resolution
// ============================================================================

fn find_database(db_arg: Option<&str>) -> PathBuf {
    // 1. CLI argument
    if let Some(path) = db_arg {
        return PathBuf::from(path);
    }

    // 2. Environment variable
    if let Ok(path) = std::env::var("PLANCANVAS_DB") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // 3. Default app data directory
    dirs::data_dir()
        .map(|p| p.join("plancanvas/plancanvas.db"))
        .unwrap_or_else(|| PathBuf::from("plancanvas.db"))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    plancanvas_lib::init_logging("info");

    // Parse simple args (no clap to keep binary small)
    let args: Vec<String> = std::env::args().collect();
    let mut db_arg: Option<&str> = None;
    let mut bind_arg: Option<&str> = None;
    let mut backups = true;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" if i + 1 < args.len() => {
                db_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--bind" if i + 1 < args.len() => {
                bind_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--no-backup" => {
                backups = false;
                i += 1;
            }
            "--help" | "-h" => {
                println!("plancanvas-server - task and canvas snapshot HTTP API");
                println!();
                println!("Usage: plancanvas-server [--db PATH] [--bind ADDR:PORT] [--no-backup]");
                println!();
                println!("Environment variables:");
                println!("  PLANCANVAS_DB    Database path");
                println!("  PLANCANVAS_BIND  Bind address (default: 0.0.0.0:3741)");
                println!("  RUST_LOG         Log filter (default: info)");
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_arg
        .map(|s| s.to_string())
        .or_else(|| std::env::var("PLANCANVAS_BIND").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "0.0.0.0:3741".to_string());

    let db_path = find_database(db_arg);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    info!(path = %db_path.display(), "opening database");

    let db = match Database::new(&db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    if backups {
        run_backup(&db, "startup");
        tokio::spawn(backup_loop(db.clone()));
    }

    let (changes, _) = broadcast::channel(CHANGE_BUFFER);
    let state = AppState {
        db,
        changes,
        start_time: Instant::now(),
    };

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%bind_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(%bind_addr, "listening");
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down");
    };
    if let Err(e) = axum::serve(listener, app(state)).with_graceful_shutdown(shutdown).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use plancanvas_lib::db::{NewSnapshot, Node, NodeData, Position, SnapshotData, TaskCard};
    use plancanvas_lib::realtime;
    use plancanvas_lib::reconcile::{ReconcileOptions, Reconciler};
    use plancanvas_lib::store::{ChangeFeed, SnapshotStore, TaskRepository};
    use plancanvas_lib::RemoteClient;
    use serde_json::{json, Map};

    async fn spawn_server() -> (RemoteClient, Arc<Database>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let state = AppState { db: db.clone(), changes, start_time: Instant::now() };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });
        (RemoteClient::new(&format!("http://{}", addr)).unwrap(), db)
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: None,
            status: None,
            estimated_hours: None,
            sort_order: None,
            node_id: None,
        }
    }

    #[tokio::test]
    async fn test_load_against_server() {
        let (client, db) = spawn_server().await;
        let project = client
            .create_project(&NewProject { name: "Launch".into(), description: None })
            .await
            .unwrap();
        let a = client.create_task(&project.id, &new_task("A")).await.unwrap();
        client.create_task(&project.id, &new_task("B")).await.unwrap();

        let card = Node {
            id: "n-a".into(),
            node_type: "task".into(),
            position: Position { x: 40.0, y: 40.0 },
            data: NodeData::Task(TaskCard { task_id: a.id.clone(), ..Default::default() }),
            draggable: None,
            selectable: None,
            extra: Map::new(),
        };
        client
            .insert_snapshot(
                &project.id,
                &NewSnapshot {
                    snapshot_data: SnapshotData { nodes: vec![card], edges: vec![] },
                    snapshot_type: SnapshotType::Manual,
                },
            )
            .await
            .unwrap();

        let client = Arc::new(client);
        let reconciler = Reconciler::new(client.clone(), client.clone(), ReconcileOptions::default());
        let graph = reconciler.load(&project.id).await;
        assert_eq!(graph.nodes.len(), 2);
        let placed = graph.node_for_task(&a.id).unwrap();
        assert_eq!(placed.position, Position { x: 40.0, y: 40.0 });
        assert_eq!(placed.task_card().unwrap().title.as_deref(), Some("A"));
        assert_eq!(placed.task_card().unwrap().status.as_deref(), Some("Not started"));
        assert_eq!(db.count_snapshots(&project.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_patch_validates_storage_status() {
        let (client, _db) = spawn_server().await;
        let project = client
            .create_project(&NewProject { name: "P".into(), description: None })
            .await
            .unwrap();
        let task = client.create_task(&project.id, &new_task("A")).await.unwrap();

        let bad = TaskPatch { status: Some("On-going".into()), ..Default::default() };
        let err = client.patch_task(&task.id, &bad).await.unwrap_err();
        assert!(matches!(err, plancanvas_lib::ServiceError::Status { status: 400, .. }));

        let good = TaskPatch { status: Some("In Progress".into()), ..Default::default() };
        assert_eq!(client.patch_task(&task.id, &good).await.unwrap().status, "In Progress");

        client.delete_task(&task.id).await.unwrap();
        assert!(client.fetch_tasks(&project.id).await.unwrap().is_empty());
        assert!(client.patch_task(&task.id, &good).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_event_stream_carries_project_changes() {
        let (client, _db) = spawn_server().await;
        let mine = client
            .create_project(&NewProject { name: "Mine".into(), description: None })
            .await
            .unwrap();
        let other = client
            .create_project(&NewProject { name: "Other".into(), description: None })
            .await
            .unwrap();

        let mut feed = client.open(&mine.id).await.unwrap();
        client.create_task(&other.id, &new_task("Elsewhere")).await.unwrap();
        let task = client.create_task(&mine.id, &new_task("Here")).await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(2), feed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(change.event_type, ChangeKind::Insert);
        assert_eq!(realtime::forwardable(&mine.id, &change).unwrap().id, task.id);
    }

    #[tokio::test]
    async fn test_duplicate_endpoint() {
        let (client, _db) = spawn_server().await;
        let project = client
            .create_project(&NewProject { name: "Roadmap".into(), description: None })
            .await
            .unwrap();
        client.create_task(&project.id, &new_task("A")).await.unwrap();

        let copy = client.duplicate_project(&project.id, Some("Roadmap v2")).await.unwrap();
        assert_eq!(copy.project.name, "Roadmap v2");
        assert_eq!(copy.tasks.len(), 1);
        assert_eq!(client.fetch_tasks(&copy.project.id).await.unwrap().len(), 1);

        assert!(matches!(
            client.duplicate_project("missing", None).await,
            Err(CloneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_layout_is_stored_as_sent() {
        let (client, db) = spawn_server().await;
        let project = client
            .create_project(&NewProject { name: "Sketch".into(), description: None })
            .await
            .unwrap();
        let layout = json!({
            "nodes": [{"id": "n1", "position": {"x": 1, "y": 2}, "data": {"label": "draft"}}],
            "edges": [{"id": "e1", "target": "n1"}],
            "viewport": {"zoom": 1}
        });

        let response = reqwest::Client::new()
            .post(format!("{}projects/{}/snapshots", client.base_url(), project.id))
            .json(&json!({"snapshot_data": layout, "snapshot_type": "autosave"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);

        let stored = db.latest_snapshot(&project.id, None).unwrap().unwrap();
        assert_eq!(stored.snapshot_data, layout);
        assert_eq!(stored.snapshot_type, SnapshotType::Autosave);
    }

    #[tokio::test]
    async fn test_subtasks_and_comments_follow_a_duplicate() {
        let (client, _db) = spawn_server().await;
        let project = client
            .create_project(&NewProject { name: "Roadmap".into(), description: None })
            .await
            .unwrap();
        let task = client.create_task(&project.id, &new_task("A")).await.unwrap();

        let subtask = client.add_subtask(&task.id, &NewSubtask { title: "step".into() }).await.unwrap();
        assert_eq!(subtask.task_id, task.id);
        let comment = NewComment { author: "ana".into(), body: "ship it".into() };
        client.add_comment(&task.id, &comment).await.unwrap();

        let empty = NewSubtask { title: "  ".into() };
        let err = client.add_subtask(&task.id, &empty).await.unwrap_err();
        assert!(matches!(err, plancanvas_lib::ServiceError::Status { status: 400, .. }));
        assert!(client.add_comment("missing", &comment).await.unwrap_err().is_not_found());

        let copy = client.duplicate_project(&project.id, None).await.unwrap();
        assert_eq!(copy.subtasks.len(), 1);
        assert_eq!(copy.comments.len(), 1);
        assert_eq!(copy.subtasks[0].task_id, copy.tasks[0].id);
        assert_ne!(copy.subtasks[0].id, subtask.id);
    }
}
