// Taskability - task and group store with ordered change notifications

pub mod config;
pub mod error;
pub mod filter;
pub mod jsonl;
pub mod models;
pub mod observer;
pub mod record;
pub mod store;
pub mod tasks;

// Re-export main types for convenience
pub use config::Config;
pub use error::{Error, Result};
pub use filter::{Filter, FilterOp, SortDescriptor};
pub use models::{GroupOrder, GroupSummary, TaskFields, TaskGroup, TaskItem};
pub use observer::{Batch, Change, ChangeEvent, Phase, Row, Subscription, SubscriptionId, ViewSpec, ViewState};
pub use record::{IndexValue, Record};
pub use store::{Store, now_ms};
pub use tasks::{Snapshot, TaskStore};
