//! Translation between the two status vocabularies.
//!
//! The canvas shows four display states; the task table stores six. The
//! storage -> display direction collapses states (`Planned` shows as
//! `Not started`, `Cancelled` as `Complete`), so a value read from storage and
//! written back through the canvas may change. Callers must not assume
//! round-trip fidelity outside the four display states.

use serde::{Deserialize, Serialize};

/// Status as shown on a task card.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DisplayStatus {
    #[serde(rename = "Not started")]
    NotStarted,
    #[serde(rename = "On-going")]
    OnGoing,
    Stuck,
    Complete,
}

impl DisplayStatus {
    pub const ALL: [DisplayStatus; 4] = [
        DisplayStatus::NotStarted,
        DisplayStatus::OnGoing,
        DisplayStatus::Stuck,
        DisplayStatus::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayStatus::NotStarted => "Not started",
            DisplayStatus::OnGoing => "On-going",
            DisplayStatus::Stuck => "Stuck",
            DisplayStatus::Complete => "Complete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Not started" => Some(DisplayStatus::NotStarted),
            "On-going" => Some(DisplayStatus::OnGoing),
            "Stuck" => Some(DisplayStatus::Stuck),
            "Complete" => Some(DisplayStatus::Complete),
            _ => None,
        }
    }

    pub fn to_storage(self) -> StorageStatus {
        match self {
            DisplayStatus::NotStarted => StorageStatus::Backlog,
            DisplayStatus::OnGoing => StorageStatus::InProgress,
            DisplayStatus::Stuck => StorageStatus::Stuck,
            DisplayStatus::Complete => StorageStatus::Completed,
        }
    }
}

/// Status as persisted in the task table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StorageStatus {
    Backlog,
    Planned,
    #[serde(rename = "In Progress")]
    InProgress,
    Stuck,
    Completed,
    Cancelled,
}

impl StorageStatus {
    pub const ALL: [StorageStatus; 6] = [
        StorageStatus::Backlog,
        StorageStatus::Planned,
        StorageStatus::InProgress,
        StorageStatus::Stuck,
        StorageStatus::Completed,
        StorageStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStatus::Backlog => "Backlog",
            StorageStatus::Planned => "Planned",
            StorageStatus::InProgress => "In Progress",
            StorageStatus::Stuck => "Stuck",
            StorageStatus::Completed => "Completed",
            StorageStatus::Cancelled => "Cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Backlog" => Some(StorageStatus::Backlog),
            "Planned" => Some(StorageStatus::Planned),
            "In Progress" => Some(StorageStatus::InProgress),
            "Stuck" => Some(StorageStatus::Stuck),
            "Completed" => Some(StorageStatus::Completed),
            "Cancelled" => Some(StorageStatus::Cancelled),
            _ => None,
        }
    }

    /// Lossy: several storage states share one display state.
    pub fn to_display(self) -> DisplayStatus {
        match self {
            StorageStatus::Backlog | StorageStatus::Planned => DisplayStatus::NotStarted,
            StorageStatus::InProgress => DisplayStatus::OnGoing,
            StorageStatus::Stuck => DisplayStatus::Stuck,
            StorageStatus::Completed | StorageStatus::Cancelled => DisplayStatus::Complete,
        }
    }
}

/// Map a display status to storage vocabulary. Unknown values (including
/// values already in storage vocabulary) pass through unchanged.
pub fn to_storage(status: &str) -> String {
    match DisplayStatus::from_str(status) {
        Some(display) => display.to_storage().as_str().to_string(),
        None => status.to_string(),
    }
}

/// Map a storage status to display vocabulary. Unknown values pass through unchanged.
pub fn to_display(status: &str) -> String {
    match StorageStatus::from_str(status) {
        Some(storage) => storage.to_display().as_str().to_string(),
        None => status.to_string(),
    }
}
