// Data models for Taskability

use crate::observer::Row;
use crate::record::{IndexValue, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    pub is_complete: bool,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Owning group; `None` means the task is staged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl TaskItem {
    pub fn is_staged(&self) -> bool {
        self.group_id.is_none()
    }
}

impl Record for TaskItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn sort_key(&self) -> i64 {
        self.created_at
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), IndexValue::String(self.title.clone()));
        fields.insert("is_complete".to_string(), IndexValue::Bool(self.is_complete));
        fields.insert("created_at".to_string(), IndexValue::Int(self.created_at));
        fields.insert("staged".to_string(), IndexValue::Bool(self.is_staged()));
        if let Some(group_id) = &self.group_id {
            fields.insert("group_id".to_string(), IndexValue::String(group_id.clone()));
        }
        if let Some(start) = self.start_date {
            fields.insert("start_date".to_string(), IndexValue::Int(start));
        }
        if let Some(end) = self.end_date {
            fields.insert("end_date".to_string(), IndexValue::Int(end));
        }
        fields
    }
}

impl Row for TaskItem {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn fields(&self) -> HashMap<String, IndexValue> {
        self.indexed_fields()
    }
}

/// A named collection of tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Manual ordering slot in the group list
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Record for TaskGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "groups"
    }

    fn sort_key(&self) -> i64 {
        self.position
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("position".to_string(), IndexValue::Int(self.position));
        if let Some(title) = &self.title {
            fields.insert("title".to_string(), IndexValue::String(title.clone()));
        }
        fields
    }
}

/// One row of the group list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub id: String,
    pub title: Option<String>,
    pub position: i64,
    pub task_count: usize,
    pub completed_count: usize,
    /// Title of the oldest open task, if any
    pub next_task: Option<String>,
}

impl Row for GroupSummary {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("position".to_string(), IndexValue::Int(self.position));
        fields.insert("task_count".to_string(), IndexValue::Int(self.task_count as i64));
        fields.insert("completed_count".to_string(), IndexValue::Int(self.completed_count as i64));
        if let Some(title) = &self.title {
            fields.insert("title".to_string(), IndexValue::String(title.to_lowercase()));
        }
        fields
    }
}

/// Ordering of the group list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOrder {
    /// The user's manual arrangement
    #[default]
    Manual,
    /// Case-insensitive by title; untitled groups first
    Title,
}

/// Partial update for a task
///
/// Each field is `None` to leave it alone, `Some(Some(v))` to set it, and
/// `Some(None)` to clear it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFields {
    pub title: Option<String>,
    pub subtitle: Option<Option<String>>,
    pub start_date: Option<Option<i64>>,
    pub end_date: Option<Option<i64>>,
    pub location: Option<Option<String>>,
    pub group_id: Option<Option<String>>,
}

impl TaskFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(Some(subtitle.into()));
        self
    }

    pub fn clear_subtitle(mut self) -> Self {
        self.subtitle = Some(None);
        self
    }

    pub fn start_date(mut self, ms: i64) -> Self {
        self.start_date = Some(Some(ms));
        self
    }

    pub fn clear_start_date(mut self) -> Self {
        self.start_date = Some(None);
        self
    }

    pub fn end_date(mut self, ms: i64) -> Self {
        self.end_date = Some(Some(ms));
        self
    }

    pub fn clear_end_date(mut self) -> Self {
        self.end_date = Some(None);
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(Some(location.into()));
        self
    }

    pub fn clear_location(mut self) -> Self {
        self.location = Some(None);
        self
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(Some(group_id.into()));
        self
    }

    /// Move the task back to the staging area
    pub fn unstage_from_group(mut self) -> Self {
        self.group_id = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Produce the task as it looks after this update
    pub(crate) fn apply_to(&self, task: &TaskItem) -> TaskItem {
        let mut next = task.clone();
        if let Some(title) = &self.title {
            next.title = title.trim().to_string();
        }
        if let Some(subtitle) = &self.subtitle {
            next.subtitle = subtitle.clone();
        }
        if let Some(start) = self.start_date {
            next.start_date = start;
        }
        if let Some(end) = self.end_date {
            next.end_date = end;
        }
        if let Some(location) = &self.location {
            next.location = location.clone();
        }
        if let Some(group_id) = &self.group_id {
            next.group_id = group_id.clone();
        }
        next
    }
}

/// Generate a new time-ordered record ID
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
