use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Authoritative task data (server-side, snake_case on the wire)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,  // Storage vocabulary ("Backlog", "In Progress", ...)
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub time_spent: f64,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub node_id: Option<String>,  // Back-reference to the canvas node, if the UI placed one
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,  // Soft delete marker
}

impl Task {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    pub id: String,
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub time_spent: f64,
    #[serde(default)]
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /projects/{id}/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,  // Defaults to "Backlog"
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Partial task update. Only `Some` fields are transmitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.estimated_hours.is_none()
            && self.time_spent.is_none()
            && self.sort_order.is_none()
    }

    /// Apply the patch to a task in place (used for optimistic local state).
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = &self.status {
            task.status = status.clone();
        }
        if let Some(hours) = self.estimated_hours {
            task.estimated_hours = Some(hours);
        }
        if let Some(spent) = self.time_spent {
            task.time_spent = spent;
        }
        if let Some(order) = self.sort_order {
            task.sort_order = order;
        }
    }
}

// ============================================================================
// Realtime change events
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// One event from the project change feed: `{ eventType, new }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskChange {
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Value,  // Row image after the change; empty for hard deletes
}

impl TaskChange {
    pub fn new(event_type: ChangeKind, task: &Task) -> Self {
        Self {
            event_type,
            new: serde_json::to_value(task).unwrap_or(Value::Null),
        }
    }

    /// The changed task, if the row image parses as one.
    pub fn task(&self) -> Option<Task> {
        serde_json::from_value(self.new.clone()).ok()
    }
}

// ============================================================================
// Snapshots (append-only layout captures)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Manual,
    Autosave,
    AiGenerated,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Manual => "manual",
            SnapshotType::Autosave => "autosave",
            SnapshotType::AiGenerated => "ai_generated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(SnapshotType::Manual),
            "autosave" => Some(SnapshotType::Autosave),
            "ai_generated" => Some(SnapshotType::AiGenerated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub snapshot_data: Value,  // Opaque to the backend; parsed client-side only
    pub snapshot_type: SnapshotType,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Parsed layout, or `None` when the payload is missing, malformed or has no nodes.
    pub fn layout(&self) -> Option<SnapshotData> {
        SnapshotData::from_value(&self.snapshot_data)
    }
}

/// Body of `POST /projects/{id}/snapshots`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub snapshot_data: SnapshotData,
    pub snapshot_type: SnapshotType,
}

/// The same body as the backend receives it: the layout is stored as sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSnapshot {
    #[serde(default)]
    pub snapshot_data: Value,
    pub snapshot_type: SnapshotType,
}

impl TryFrom<&NewSnapshot> for RawSnapshot {
    type Error = serde_json::Error;

    fn try_from(new: &NewSnapshot) -> Result<Self, Self::Error> {
        Ok(RawSnapshot {
            snapshot_data: serde_json::to_value(&new.snapshot_data)?,
            snapshot_type: new.snapshot_type,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SnapshotData {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl SnapshotData {
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let data: SnapshotData = serde_json::from_value(value.clone()).ok()?;
        if data.nodes.is_empty() {
            return None;
        }
        Some(data)
    }
}

// ============================================================================
// Canvas (visual) entities, camelCase "diagram" convention
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

pub const TASK_NODE_TYPE: &str = "task";

fn default_node_type() -> String {
    TASK_NODE_TYPE.to_string()
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draggable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    // Any other renderer attributes (width, style, zIndex...) survive untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn task_card(&self) -> Option<&TaskCard> {
        match &self.data {
            NodeData::Task(card) => Some(card),
            NodeData::Decoration(_) => None,
        }
    }

    pub fn task_card_mut(&mut self) -> Option<&mut TaskCard> {
        match &mut self.data {
            NodeData::Task(card) => Some(card),
            NodeData::Decoration(_) => None,
        }
    }

    /// Embedded task identifier, if this node represents a task.
    pub fn task_id(&self) -> Option<&str> {
        self.task_card().map(|c| c.task_id.as_str())
    }
}

/// Node payload. A node either represents a task or is purely decorative
/// (logo, free text, group frame). The variant is decided by `taskId` alone:
/// a string makes a task card, anything else is decorative.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum NodeData {
    Task(TaskCard),
    Decoration(Map<String, Value>),
}

impl Default for NodeData {
    fn default() -> Self {
        NodeData::Decoration(Map::new())
    }
}

impl NodeData {
    pub fn from_map(map: Map<String, Value>) -> Self {
        match TaskCard::from_map(map) {
            Ok(card) => NodeData::Task(card),
            Err(map) => NodeData::Decoration(map),
        }
    }

    /// Same payload with the task reference removed.
    pub fn detached(self) -> Self {
        match self {
            NodeData::Task(card) => match serde_json::to_value(&card) {
                Ok(Value::Object(mut map)) => {
                    map.remove("taskId");
                    NodeData::Decoration(map)
                }
                _ => NodeData::Decoration(card.extra),
            },
            decoration => decoration,
        }
    }
}

impl<'de> Deserialize<'de> for NodeData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => Ok(NodeData::from_map(map)),
            Value::Null => Ok(NodeData::default()),
            other => Err(de::Error::custom(format!("node data must be an object, got {}", other))),
        }
    }
}

/// Display fields mirrored from a `Task`. Status is in display vocabulary.
///
/// Mirrors are overwritten on every reconciliation, so a mirror value of the
/// wrong type is dropped rather than rejecting the card. Numeric strings
/// (`"4"`, `"1.5"`) are accepted for the hour fields.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCard {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Reference did not resolve to an active task at the last reconciliation.
    #[serde(skip_serializing_if = "is_false")]
    pub stale: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskCard {
    /// Card from a raw `data` object. Hands the map back when `taskId` is not a string.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, Map<String, Value>> {
        let task_id = match map.remove("taskId") {
            Some(Value::String(id)) => id,
            Some(other) => {
                map.insert("taskId".to_string(), other);
                return Err(map);
            }
            None => return Err(map),
        };
        Ok(TaskCard {
            task_id,
            title: take_text(&mut map, "title"),
            status: take_text(&mut map, "status"),
            estimated_hours: take_hours(&mut map, "estimatedHours"),
            time_spent: take_hours(&mut map, "timeSpent"),
            description: take_text(&mut map, "description"),
            stale: matches!(map.remove("stale"), Some(Value::Bool(true))),
            extra: map,
        })
    }
}

impl<'de> Deserialize<'de> for TaskCard {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        TaskCard::from_map(map).map_err(|_| de::Error::missing_field("taskId"))
    }
}

fn take_text(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn take_hours(map: &mut Map<String, Value>, key: &str) -> Option<f64> {
    match map.remove(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|h| h.is_finite()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A renderable canvas: nodes plus the connectors between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node_for_task(&self, task_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.task_id() == Some(task_id))
    }

    /// Edges whose endpoints are not both present among `nodes`.
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        let ids: std::collections::HashSet<&str> =
            self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()))
            .collect()
    }

    pub fn into_snapshot_data(self) -> SnapshotData {
        SnapshotData { nodes: self.nodes, edges: self.edges }
    }
}

/// A project with everything hanging off it: the unit the cloner copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectAggregate {
    pub project: Project,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}
