mod schema;
mod models;

pub use schema::Database;
pub use models::{
    ChangeKind, Comment, Edge, Graph, NewSnapshot, NewTask, Node, NodeData, Position, Project,
    ProjectAggregate, RawSnapshot, Snapshot, SnapshotData, SnapshotType, Subtask, Task, TaskCard, TaskChange,
    TaskPatch, TASK_NODE_TYPE,
};
