//! Realtime task updates.
//!
//! A subscription opens the project's change feed on a background task and
//! hands every inserted or updated task to a callback. Hard deletes are not
//! forwarded; soft deletes arrive as updates carrying `deleted_at` and are.
//!
//! The wire transport is server-sent events: each event's `data:` lines hold
//! one JSON `{ "eventType": ..., "new": {...} }` object.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::db::{ChangeKind, Task, TaskChange};
use crate::error::ServiceError;
use crate::store::{ChangeFeed, ChangeStream};

/// Handle to a running subscription. Dropping it also unsubscribes.
pub struct Subscription {
    project_id: String,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(project_id = %self.project_id, "unsubscribed from change feed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Subscribe to task changes of one project. Must be called inside a tokio runtime.
///
/// Feed failures are logged and end the subscription; they are never surfaced
/// to the callback.
pub fn subscribe<F>(feed: Arc<dyn ChangeFeed>, project_id: &str, mut on_update: F) -> Subscription
where
    F: FnMut(Task) + Send + 'static,
{
    let project = project_id.to_string();
    let handle = tokio::spawn(async move {
        let mut stream = match feed.open(&project).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(project_id = %project, error = %e, "could not open change feed");
                return;
            }
        };
        debug!(project_id = %project, "change feed open");

        while let Some(item) = stream.next().await {
            match item {
                Ok(change) => {
                    if let Some(task) = forwardable(&project, &change) {
                        on_update(task);
                    }
                }
                Err(ServiceError::Decode(e)) => {
                    warn!(project_id = %project, error = %e, "skipping malformed change event");
                }
                Err(e) => {
                    warn!(project_id = %project, error = %e, "change feed failed");
                    break;
                }
            }
        }
        debug!(project_id = %project, "change feed ended");
    });

    Subscription { project_id: project_id.to_string(), handle: Some(handle) }
}

/// The task to hand to the caller for this event, if any.
pub fn forwardable(project_id: &str, change: &TaskChange) -> Option<Task> {
    match change.event_type {
        ChangeKind::Insert | ChangeKind::Update => {}
        ChangeKind::Delete | ChangeKind::Other => return None,
    }
    let task = change.task()?;
    // The channel is already project-scoped; guard anyway against a shared feed
    if task.project_id != project_id {
        return None;
    }
    Some(task)
}

/// Incremental server-sent-events parser. Only `data:` fields are kept.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk; returns the payload of every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;  // comment / keep-alive
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        events
    }
}

/// Turn a byte stream carrying server-sent events into a stream of task changes.
pub fn decode_event_stream<S, B, E>(bytes: S) -> ChangeStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ServiceError> + Send + 'static,
{
    let state = (Box::pin(bytes), SseDecoder::default(), VecDeque::<String>::new());
    futures::stream::unfold(state, |(mut bytes, mut decoder, mut pending)| async move {
        loop {
            if let Some(payload) = pending.pop_front() {
                let item = serde_json::from_str::<TaskChange>(&payload).map_err(ServiceError::from);
                return Some((item, (bytes, decoder, pending)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => pending.extend(decoder.push(chunk.as_ref())),
                Some(Err(e)) => return Some((Err(e.into()), (bytes, decoder, pending))),
                None => return None,
            }
        }
    })
    .boxed()
}
