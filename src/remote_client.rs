//! HTTP client for the plan service.
//!
//! Implements every `store` trait against the REST endpoints served by
//! `plancanvas-server` (or any backend speaking the same shapes). Both the
//! CLI and the canvas controller talk to the service through this.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::db::{
    Comment, NewSnapshot, NewTask, Project, ProjectAggregate, Snapshot, SnapshotType, Subtask, Task,
    TaskPatch,
};
use crate::error::{CloneError, ServiceError};
use crate::realtime::decode_event_stream;
use crate::settings::Settings;
use crate::store::{ChangeFeed, ChangeStream, ProjectSource, SnapshotStore, TaskRepository};

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotsEnvelope {
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TasksEnvelope {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Body of `POST /projects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of `POST /tasks/{id}/subtasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubtask {
    pub title: String,
}

/// Body of `POST /tasks/{id}/comments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub author: String,
    pub body: String,
}

/// Body of `POST /projects/{id}/duplicate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

pub struct RemoteClient {
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
    http: Client,
}

impl RemoteClient {
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        Self::with_options(base_url, None, Duration::from_secs(10))
    }

    pub fn with_options(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)?;
        if base_url.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }
        Ok(Self {
            base_url,
            token,
            timeout,
            http: Client::new(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ServiceError> {
        Self::with_options(
            &settings.api_base_url,
            settings.api_token.clone(),
            settings.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Endpoint under the base path. Each segment is percent-encoded, so ids
    /// containing `/`, `?` or `#` stay one segment.
    fn url(&self, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Bounded request for ordinary calls. The event stream is built separately
    /// since a whole-request timeout would cut it off.
    fn request(&self, method: reqwest::Method, url: Url) -> RequestBuilder {
        self.authorize(self.http.request(method, url).timeout(self.timeout))
    }

    async fn check(response: Response) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::Status { status: status.as_u16(), body })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ========================================================================
    // Endpoints outside the store traits
    // ========================================================================

    pub async fn health(&self) -> Result<Health, ServiceError> {
        let url = self.url(&["health"])?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        Self::json(response).await
    }

    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ServiceError> {
        let url = self.url(&["projects"])?;
        let response = self.request(reqwest::Method::POST, url).json(project).send().await?;
        Self::json(response).await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>, ServiceError> {
        let url = self.url(&["projects", project_id])?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        match Self::json(response).await {
            Ok(project) => Ok(Some(project)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_task(&self, project_id: &str, task: &NewTask) -> Result<Task, ServiceError> {
        let url = self.url(&["projects", project_id, "tasks"])?;
        let response = self.request(reqwest::Method::POST, url).json(task).send().await?;
        Self::json(response).await
    }

    /// Soft-delete a task. The service keeps the row with `deleted_at` set.
    pub async fn delete_task(&self, task_id: &str) -> Result<Task, ServiceError> {
        let url = self.url(&["tasks", task_id])?;
        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        Self::json(response).await
    }

    pub async fn add_subtask(&self, task_id: &str, subtask: &NewSubtask) -> Result<Subtask, ServiceError> {
        let url = self.url(&["tasks", task_id, "subtasks"])?;
        let response = self.request(reqwest::Method::POST, url).json(subtask).send().await?;
        Self::json(response).await
    }

    pub async fn add_comment(&self, task_id: &str, comment: &NewComment) -> Result<Comment, ServiceError> {
        let url = self.url(&["tasks", task_id, "comments"])?;
        let response = self.request(reqwest::Method::POST, url).json(comment).send().await?;
        Self::json(response).await
    }

    /// Server-side duplication; the service runs the cloner against its own store.
    pub async fn duplicate_project(
        &self,
        project_id: &str,
        new_name: Option<&str>,
    ) -> Result<ProjectAggregate, CloneError> {
        let url = self.url(&["projects", project_id, "duplicate"])?;
        let body = DuplicateRequest { name: new_name.map(|n| n.to_string()) };
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(ServiceError::from)?;
        match Self::json(response).await {
            Ok(aggregate) => Ok(aggregate),
            Err(e) if e.is_not_found() => Err(CloneError::NotFound(project_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TaskRepository for RemoteClient {
    async fn fetch_tasks(&self, project_id: &str) -> Result<Vec<Task>, ServiceError> {
        let url = self.url(&["projects", project_id, "tasks"])?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let envelope: TasksEnvelope = Self::json(response).await?;
        Ok(envelope.tasks)
    }

    async fn patch_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Task, ServiceError> {
        let url = self.url(&["tasks", task_id])?;
        let response = self.request(reqwest::Method::PATCH, url).json(patch).send().await?;
        Self::json(response).await
    }
}

#[async_trait]
impl SnapshotStore for RemoteClient {
    async fn latest_snapshot(
        &self,
        project_id: &str,
        snapshot_type: Option<SnapshotType>,
    ) -> Result<Option<Snapshot>, ServiceError> {
        let mut url = self.url(&["projects", project_id, "snapshots"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", "1");
            if let Some(t) = snapshot_type {
                query.append_pair("type", t.as_str());
            }
        }
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let envelope: SnapshotsEnvelope = Self::json(response).await?;
        Ok(envelope.snapshots.into_iter().next())
    }

    async fn insert_snapshot(
        &self,
        project_id: &str,
        snapshot: &NewSnapshot,
    ) -> Result<Snapshot, ServiceError> {
        let url = self.url(&["projects", project_id, "snapshots"])?;
        let response = self.request(reqwest::Method::POST, url).json(snapshot).send().await?;
        Self::json(response).await
    }
}

#[async_trait]
impl ChangeFeed for RemoteClient {
    async fn open(&self, project_id: &str) -> Result<ChangeStream, ServiceError> {
        let url = self.url(&["projects", project_id, "events"])?;
        let response = self
            .authorize(self.http.get(url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::check(response).await?;
        debug!(project_id, "change feed connected");
        Ok(decode_event_stream(response.bytes_stream().boxed()))
    }
}

#[async_trait]
impl ProjectSource for RemoteClient {
    async fn load_aggregate(&self, project_id: &str) -> Result<Option<ProjectAggregate>, ServiceError> {
        let url = self.url(&["projects", project_id, "aggregate"])?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        match Self::json(response).await {
            Ok(aggregate) => Ok(Some(aggregate)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::sample_task;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, patch};
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    #[test]
    fn test_url_joins_under_base_path() {
        let client = RemoteClient::new("http://localhost:3741/api").unwrap();
        assert_eq!(
            client.url(&["projects", "p1", "tasks"]).unwrap().as_str(),
            "http://localhost:3741/api/projects/p1/tasks"
        );
        assert_eq!(
            client.url(&["tasks", "t1"]).unwrap().as_str(),
            "http://localhost:3741/api/tasks/t1"
        );
    }

    #[test]
    fn test_ids_are_encoded_as_single_segments() {
        let client = RemoteClient::new("http://localhost:3741").unwrap();
        let url = client.url(&["tasks", "a/b?c#d"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3741/tasks/a%2Fb%3Fc%23d");
        assert_eq!(url.path_segments().unwrap().count(), 2);
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(RemoteClient::new("not a url"), Err(ServiceError::Url(_))));
        assert!(matches!(RemoteClient::new("mailto:ops@example.com"), Err(ServiceError::Url(_))));
    }

    #[test]
    fn test_from_settings() {
        let settings = Settings {
            api_base_url: "https://plan.example.com".into(),
            api_token: Some("secret".into()),
            request_timeout_secs: 3,
            ..Default::default()
        };
        let client = RemoteClient::from_settings(&settings).unwrap();
        assert_eq!(client.base_url().as_str(), "https://plan.example.com/");
        assert_eq!(client.timeout, Duration::from_secs(3));
        assert_eq!(client.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_envelopes_tolerate_missing_lists() {
        let tasks: TasksEnvelope = serde_json::from_value(json!({})).unwrap();
        assert!(tasks.tasks.is_empty());
        let snapshots: SnapshotsEnvelope = serde_json::from_value(json!({"snapshots": []})).unwrap();
        assert!(snapshots.snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_and_patch_against_live_server() {
        let app = Router::new()
            .route(
                "/api/projects/{id}/tasks",
                get(|Path(id): Path<String>| async move {
                    Json(json!({"tasks": [sample_task(&id, "t1", "Write", "Planned")]}))
                }),
            )
            .route(
                "/api/tasks/{id}",
                patch(|Path(id): Path<String>| async move {
                    (StatusCode::NOT_FOUND, format!("task {} not found", id))
                }),
            );
        let client = RemoteClient::new(&serve(app).await).unwrap();

        let tasks = client.fetch_tasks("p1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].project_id, "p1");

        let err = client.patch_task("t9", &TaskPatch::default()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, ServiceError::Status { ref body, .. } if body.contains("t9")));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let app = Router::new().route(
            "/api/projects/{id}/snapshots",
            get(|| async { "{\"snapshots\": 42}" }),
        );
        let client = RemoteClient::new(&serve(app).await).unwrap();
        let err = client.latest_snapshot("p1", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_aggregate_is_none() {
        let app = Router::new();
        let client = RemoteClient::new(&serve(app).await).unwrap();
        assert!(client.load_aggregate("nope").await.unwrap().is_none());
        assert!(matches!(
            client.duplicate_project("nope", None).await,
            Err(CloneError::NotFound(ref id)) if id == "nope"
        ));
    }
}
