// Task and group operations with ordered change notification

use crate::error::{Error, Result};
use crate::filter::{Filter, SortDescriptor};
use crate::models::{GroupOrder, GroupSummary, TaskFields, TaskGroup, TaskItem, new_id};
use crate::observer::{Hub, Subscription, SubscriptionId, ViewSpec};
use crate::record::{IndexValue, Record};
use crate::store::{Reader, Store, WriteBatch, WriteLock, now_ms};
use rusqlite::Transaction;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const MAX_IDLE_READERS: usize = 4;

/// Committed state as seen by the writer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Creation order
    pub tasks: Vec<TaskItem>,
    /// Manual order
    pub groups: Vec<TaskGroup>,
}

impl Snapshot {
    pub fn task(&self, id: &str) -> Option<&TaskItem> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&TaskGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    fn replace_task(&mut self, task: TaskItem) {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task,
            None => {
                // Creation timestamps are strictly increasing, so new tasks go last
                self.tasks.push(task);
            }
        }
    }

    /// Summaries of every group in manual order
    pub fn summaries(&self) -> Vec<GroupSummary> {
        self.groups
            .iter()
            .map(|group| {
                let tasks: Vec<&TaskItem> = self
                    .tasks
                    .iter()
                    .filter(|t| t.group_id.as_deref() == Some(group.id.as_str()))
                    .collect();
                GroupSummary {
                    id: group.id.clone(),
                    title: group.title.clone(),
                    position: group.position,
                    task_count: tasks.len(),
                    completed_count: tasks.iter().filter(|t| t.is_complete).count(),
                    next_task: tasks.iter().find(|t| !t.is_complete).map(|t| t.title.clone()),
                }
            })
            .collect()
    }
}

struct Writer {
    store: Store,
    snapshot: Snapshot,
    hub: Hub<Snapshot>,
    last_created: i64,
    /// Log lengths the snapshot reflects; `None` forces a reload
    log_lens: Option<[u64; 2]>,
}

impl Writer {
    fn load(store: &Store) -> Result<Snapshot> {
        let tasks: Vec<TaskItem> = store.list(&[])?;
        let groups: Vec<TaskGroup> = store.list(&[])?;

        for task in &tasks {
            if let Some(group_id) = &task.group_id {
                if !groups.iter().any(|g| &g.id == group_id) {
                    warn!(task = %task.id, group = %group_id, "Task references a missing group");
                }
            }
        }

        Ok(Snapshot { tasks, groups })
    }

    fn log_lens(store: &Store) -> Result<[u64; 2]> {
        Ok([
            store.log_len(TaskItem::collection_name())?,
            store.log_len(TaskGroup::collection_name())?,
        ])
    }

    /// Reload the snapshot from the cache and publish the differences
    fn reload(&mut self) -> Result<()> {
        self.snapshot = Writer::load(&self.store)?;
        let newest = self.snapshot.tasks.iter().map(|t| t.created_at).max().unwrap_or(0);
        self.last_created = self.last_created.max(newest);
        self.hub.publish(&self.snapshot);
        Ok(())
    }

    /// Catch up with writes made through other handles or processes
    ///
    /// Must be called with the store's write lock held.
    fn refresh(&mut self) -> Result<()> {
        let lens = Writer::log_lens(&self.store)?;
        if self.log_lens == Some(lens) {
            return Ok(());
        }

        if self.store.is_stale()? {
            // Lines appended without going through a store
            self.store.sync_with(reindex_all)?;
        }
        debug!(?lens, "Log changed outside this handle, reloading");
        self.reload()?;
        self.log_lens = Some(lens);
        Ok(())
    }

    /// Next creation timestamp, never equal to or before the previous one
    fn next_created_at(&mut self) -> i64 {
        let ts = now_ms().max(self.last_created + 1);
        self.last_created = ts;
        ts
    }
}

/// Result of staging a mutation: what to write, and the state after it
struct Staged<R> {
    batch: WriteBatch,
    snapshot: Snapshot,
    output: R,
}

// Field order matters: readers close before the writer, so the writer's
// close is the last one and checkpoints the WAL
struct Shared {
    readers: Mutex<Vec<Reader>>,
    writer: Mutex<Writer>,
    db_path: PathBuf,
}

/// Durable collection of tasks and groups
///
/// A cheap-to-clone handle. Mutations are serialized by a writer lock and
/// a file lock shared with every other handle on the same directory. Each
/// one is validated against the in-memory snapshot, committed as one
/// [`WriteBatch`], and only then published to subscribers. A failed commit
/// leaves the snapshot, the log and every subscriber untouched. Queries go
/// to a pool of read-only SQLite connections and never wait on the writer.
#[derive(Clone)]
pub struct TaskStore {
    shared: Arc<Shared>,
}

impl TaskStore {
    /// Open or create the store under `path/.taskability`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Store::open_with(path, reindex_all)?;
        let snapshot = Writer::load(&store)?;
        let log_lens = Writer::log_lens(&store)?;
        let last_created = snapshot.tasks.iter().map(|t| t.created_at).max().unwrap_or(0);
        let db_path = store.db_path();

        info!(
            path = %store.base_path().display(),
            tasks = snapshot.tasks.len(),
            groups = snapshot.groups.len(),
            "Opened task store"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                readers: Mutex::new(Vec::new()),
                writer: Mutex::new(Writer {
                    store,
                    snapshot,
                    hub: Hub::new(),
                    last_created,
                    log_lens: Some(log_lens),
                }),
                db_path,
            }),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Writer>> {
        self.shared
            .writer
            .lock()
            .map_err(|_| Error::PersistenceFailure("writer lock poisoned".to_string()))
    }

    /// Writer guard plus the store's write lock, with the snapshot brought up to date
    fn locked(&self) -> Result<(MutexGuard<'_, Writer>, WriteLock)> {
        let mut writer = self.writer()?;
        let lock = writer.store.lock_writes()?;
        writer.refresh()?;
        Ok((writer, lock))
    }

    /// Stage, commit, then publish; nothing is published if the commit fails
    fn commit<R>(&self, op: &'static str, stage: impl FnOnce(&mut Writer) -> Result<Staged<R>>) -> Result<R> {
        let (mut writer, _lock) = self.locked()?;
        let staged = stage(&mut writer)?;

        if let Err(e) = writer.store.apply(&staged.batch) {
            warn!(op, error = %format!("{:#}", e), "Commit failed, rolled back");
            return Err(e.into());
        }

        let writer = &mut *writer;
        writer.log_lens = Writer::log_lens(&writer.store).ok();
        writer.snapshot = staged.snapshot;
        writer.hub.publish(&writer.snapshot);
        debug!(op, writes = staged.batch.len(), subscribers = writer.hub.len(), "Committed");
        Ok(staged.output)
    }

    /// Run a query on a pooled read-only connection
    fn read<R>(&self, query: impl FnOnce(&Reader) -> eyre::Result<R>) -> Result<R> {
        let pooled = self.shared.readers.lock().ok().and_then(|mut idle| idle.pop());
        let reader = match pooled {
            Some(reader) => reader,
            None => Reader::open(&self.shared.db_path)?,
        };

        let out = query(&reader);

        if let Ok(mut idle) = self.shared.readers.lock() {
            if idle.len() < MAX_IDLE_READERS {
                idle.push(reader);
            }
        }
        Ok(out?)
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Create a task, optionally inside a group
    pub fn create_task(&self, title: &str, group_id: Option<&str>) -> Result<TaskItem> {
        let title = validate_title(title)?;

        self.commit("create_task", |w| {
            if let Some(group_id) = group_id {
                if w.snapshot.group(group_id).is_none() {
                    return Err(Error::group_not_found(group_id));
                }
            }

            let created_at = w.next_created_at();
            let task = TaskItem {
                id: new_id(),
                title,
                is_complete: false,
                created_at,
                updated_at: created_at,
                subtitle: None,
                start_date: None,
                end_date: None,
                location: None,
                group_id: group_id.map(str::to_string),
            };

            let mut batch = WriteBatch::new();
            batch.put(&task)?;
            let mut snapshot = w.snapshot.clone();
            snapshot.replace_task(task.clone());

            debug!(id = %task.id, title = %task.title, "Creating task");
            Ok(Staged {
                batch,
                snapshot,
                output: task,
            })
        })
    }

    pub fn get_task(&self, id: &str) -> Result<TaskItem> {
        self.read(|r| r.get::<TaskItem>(id))?
            .ok_or_else(|| Error::task_not_found(id))
    }

    pub fn set_complete(&self, id: &str, value: bool) -> Result<()> {
        self.commit("set_complete", |w| {
            let mut task = w
                .snapshot
                .task(id)
                .cloned()
                .ok_or_else(|| Error::task_not_found(id))?;
            task.is_complete = value;
            stage_task_update(w, task, |_| ())
        })
    }

    /// Flip the completion flag and return its new value
    pub fn toggle_complete(&self, id: &str) -> Result<bool> {
        self.commit("toggle_complete", |w| {
            let mut task = w
                .snapshot
                .task(id)
                .cloned()
                .ok_or_else(|| Error::task_not_found(id))?;
            task.is_complete = !task.is_complete;
            stage_task_update(w, task, |t| t.is_complete)
        })
    }

    /// Apply a partial update and return the updated task
    pub fn update_fields(&self, id: &str, fields: TaskFields) -> Result<TaskItem> {
        if let Some(title) = &fields.title {
            validate_title(title)?;
        }

        self.commit("update_fields", |w| {
            let current = w.snapshot.task(id).ok_or_else(|| Error::task_not_found(id))?;
            let task = fields.apply_to(current);

            if let (Some(start), Some(end)) = (task.start_date, task.end_date) {
                if end < start {
                    return Err(Error::invalid("end_date", "must not be before start_date"));
                }
            }
            if let Some(Some(group_id)) = &fields.group_id {
                if w.snapshot.group(group_id).is_none() {
                    return Err(Error::group_not_found(group_id));
                }
            }

            stage_task_update(w, task, TaskItem::clone)
        })
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.commit("delete_task", |w| {
            let task = w.snapshot.task(id).ok_or_else(|| Error::task_not_found(id))?;

            let mut batch = WriteBatch::new();
            batch.delete::<TaskItem>(id, next_stamp(task.updated_at));
            let mut snapshot = w.snapshot.clone();
            snapshot.tasks.retain(|t| t.id != id);

            debug!(id, "Deleting task");
            Ok(Staged {
                batch,
                snapshot,
                output: (),
            })
        })
    }

    /// Every task, oldest first
    pub fn query_all_sorted_by_creation(&self) -> Result<Vec<TaskItem>> {
        self.read(|r| r.list::<TaskItem>(&[]))
    }

    /// Tasks of one group, oldest first
    pub fn query_by_group(&self, group_id: &str) -> Result<Vec<TaskItem>> {
        if self.read(|r| r.get::<TaskGroup>(group_id))?.is_none() {
            return Err(Error::group_not_found(group_id));
        }
        self.query(&[Filter::eq("group_id", IndexValue::String(group_id.to_string()))])
    }

    /// Tasks that belong to no group, oldest first
    pub fn query_staged(&self) -> Result<Vec<TaskItem>> {
        self.query(&[Filter::eq("staged", IndexValue::Bool(true))])
    }

    /// Tasks matching every filter, oldest first
    pub fn query(&self, filters: &[Filter]) -> Result<Vec<TaskItem>> {
        self.read(|r| r.list::<TaskItem>(filters))
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Create a group at the end of the manual order
    pub fn create_group(&self, title: Option<&str>) -> Result<TaskGroup> {
        let title = normalize_group_title(title);

        self.commit("create_group", |w| {
            let now = now_ms();
            let position = w.snapshot.groups.iter().map(|g| g.position + 1).max().unwrap_or(0);
            let group = TaskGroup {
                id: new_id(),
                title,
                position,
                created_at: now,
                updated_at: now,
            };

            let mut batch = WriteBatch::new();
            batch.put(&group)?;
            let mut snapshot = w.snapshot.clone();
            snapshot.groups.push(group.clone());

            debug!(id = %group.id, position, "Creating group");
            Ok(Staged {
                batch,
                snapshot,
                output: group,
            })
        })
    }

    pub fn get_group(&self, id: &str) -> Result<TaskGroup> {
        self.read(|r| r.get::<TaskGroup>(id))?
            .ok_or_else(|| Error::group_not_found(id))
    }

    pub fn rename_group(&self, id: &str, title: Option<&str>) -> Result<TaskGroup> {
        let title = normalize_group_title(title);

        self.commit("rename_group", |w| {
            let mut snapshot = w.snapshot.clone();
            let group = snapshot
                .groups
                .iter_mut()
                .find(|g| g.id == id)
                .ok_or_else(|| Error::group_not_found(id))?;
            group.title = title;
            group.updated_at = next_stamp(group.updated_at);

            let mut batch = WriteBatch::new();
            batch.put(&*group)?;
            let output = group.clone();
            Ok(Staged {
                batch,
                snapshot,
                output,
            })
        })
    }

    /// Move a group to `index` in the manual order (clamped to the list)
    ///
    /// Positions are renumbered densely; only groups whose position changed
    /// are rewritten.
    pub fn move_group(&self, id: &str, index: usize) -> Result<()> {
        self.commit("move_group", |w| {
            let mut groups = w.snapshot.groups.clone();
            let from = groups
                .iter()
                .position(|g| g.id == id)
                .ok_or_else(|| Error::group_not_found(id))?;
            let group = groups.remove(from);
            let to = index.min(groups.len());
            groups.insert(to, group);

            let mut batch = WriteBatch::new();
            for (position, group) in groups.iter_mut().enumerate() {
                if group.position != position as i64 {
                    group.position = position as i64;
                    group.updated_at = next_stamp(group.updated_at);
                    batch.put(&*group)?;
                }
            }

            let mut snapshot = w.snapshot.clone();
            snapshot.groups = groups;

            debug!(id, from, to, "Moving group");
            Ok(Staged {
                batch,
                snapshot,
                output: (),
            })
        })
    }

    /// Delete a group and every task in it; returns how many tasks went with it
    pub fn delete_group(&self, id: &str) -> Result<usize> {
        self.commit("delete_group", |w| {
            let group = w.snapshot.group(id).ok_or_else(|| Error::group_not_found(id))?;

            let mut batch = WriteBatch::new();
            let doomed: Vec<&TaskItem> = w
                .snapshot
                .tasks
                .iter()
                .filter(|t| t.group_id.as_deref() == Some(id))
                .collect();

            for task in &doomed {
                batch.delete::<TaskItem>(&task.id, next_stamp(task.updated_at));
            }
            batch.delete::<TaskGroup>(id, next_stamp(group.updated_at));
            let removed = doomed.len();

            let mut snapshot = w.snapshot.clone();

            snapshot.tasks.retain(|t| t.group_id.as_deref() != Some(id));
            snapshot.groups.retain(|g| g.id != id);

            info!(id, tasks = removed, "Deleting group");
            Ok(Staged {
                batch,
                snapshot,
                output: removed,
            })
        })
    }

    /// Every group in manual order
    pub fn list_groups(&self) -> Result<Vec<TaskGroup>> {
        self.read(|r| r.list::<TaskGroup>(&[]))
    }

    /// The group list rows, ordered as requested
    pub fn group_summaries(&self, order: GroupOrder) -> Result<Vec<GroupSummary>> {
        let snapshot = Snapshot {
            tasks: self.query_all_sorted_by_creation()?,
            groups: self.list_groups()?,
        };
        Ok(group_view(order).select(snapshot.summaries()))
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Observe tasks through a filtered, ordered view
    pub fn subscribe_tasks(&self, spec: ViewSpec) -> Result<Subscription<TaskItem>> {
        let (mut writer, _lock) = self.locked()?;
        let writer = &mut *writer;
        Ok(writer
            .hub
            .subscribe(&writer.snapshot, spec, |s: &Snapshot| s.tasks.clone()))
    }

    /// Observe the tasks of one group
    pub fn subscribe_group_tasks(&self, group_id: &str) -> Result<Subscription<TaskItem>> {
        let (mut writer, _lock) = self.locked()?;
        if writer.snapshot.group(group_id).is_none() {
            return Err(Error::group_not_found(group_id));
        }
        let spec = ViewSpec::all().filter(Filter::eq("group_id", IndexValue::String(group_id.to_string())));
        let writer = &mut *writer;
        Ok(writer
            .hub
            .subscribe(&writer.snapshot, spec, |s: &Snapshot| s.tasks.clone()))
    }

    /// Observe the group list
    pub fn subscribe_groups(&self, order: GroupOrder) -> Result<Subscription<GroupSummary>> {
        let (mut writer, _lock) = self.locked()?;
        let writer = &mut *writer;
        Ok(writer
            .hub
            .subscribe(&writer.snapshot, group_view(order), Snapshot::summaries))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        Ok(self.writer()?.hub.unsubscribe(id))
    }

    pub fn subscriber_count(&self) -> Result<usize> {
        Ok(self.writer()?.hub.len())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Rebuild the query cache from the JSONL log and publish any differences
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer()?;
        let _lock = writer.store.lock_writes()?;

        // One transaction, so readers never see rows without their indexes
        writer.store.sync_with(reindex_all)?;
        writer.log_lens = Writer::log_lens(&writer.store).ok();
        writer.reload()?;

        info!(tasks = writer.snapshot.tasks.len(), "Store synced");
        Ok(())
    }

    pub fn base_path(&self) -> Result<PathBuf> {
        Ok(self.writer()?.store.base_path().to_path_buf())
    }
}

fn stage_task_update<R>(w: &Writer, mut task: TaskItem, output: impl FnOnce(&TaskItem) -> R) -> Result<Staged<R>> {
    task.updated_at = next_stamp(task.updated_at);

    let mut batch = WriteBatch::new();
    batch.put(&task)?;
    let output = output(&task);
    let mut snapshot = w.snapshot.clone();
    debug!(id = %task.id, "Updating task");
    snapshot.replace_task(task);

    Ok(Staged {
        batch,
        snapshot,
        output,
    })
}

/// Timestamp for a write that supersedes one stamped `prev`
///
/// Replay keeps the highest `updated_at`, so this must pass `prev` even
/// when `prev` is ahead of the local clock.
fn next_stamp(prev: i64) -> i64 {
    now_ms().max(prev + 1)
}

/// Restore indexes and sort keys for every record type during a sync
fn reindex_all(tx: &Transaction) -> eyre::Result<()> {
    Store::rebuild_indexes_tx::<TaskItem>(tx)?;
    Store::rebuild_indexes_tx::<TaskGroup>(tx)?;
    Ok(())
}

fn group_view(order: GroupOrder) -> ViewSpec {
    match order {
        GroupOrder::Manual => ViewSpec::all(),
        GroupOrder::Title => ViewSpec::all().sort_by(SortDescriptor::ascending("title")),
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::invalid("title", "must not be empty"));
    }
    Ok(title.to_string())
}

fn normalize_group_title(title: Option<&str>) -> Option<String> {
    title.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use crate::observer::{Change, ChangeEvent, Phase};
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open() -> (TempDir, TaskStore) {
        let temp = TempDir::new().unwrap();
        let store = TaskStore::open(temp.path()).unwrap();
        (temp, store)
    }

    fn titles(tasks: &[TaskItem]) -> Vec<&str> {
        tasks.iter().map(|t| t.title.as_str()).collect()
    }

    fn remove_cache(temp: &TempDir) {
        for file in ["taskability.db", "taskability.db-wal", "taskability.db-shm"] {
            let path = temp.path().join(".taskability").join(file);
            if path.exists() {
                fs::remove_file(path).unwrap();
            }
        }
    }

    /// Write a record straight to a log, the way another writer would
    fn append_to_log<T: Record>(temp: &TempDir, record: &T) {
        let path = temp
            .path()
            .join(".taskability")
            .join(format!("{}.jsonl", T::collection_name()));
        crate::jsonl::append_lines(&path, &[serde_json::to_string(record).unwrap()]).unwrap();
    }

    /// Replace the task log with a directory so the next append fails
    fn break_task_log(temp: &TempDir) {
        let log = temp.path().join(".taskability/tasks.jsonl");
        if log.exists() {
            fs::remove_file(&log).unwrap();
        }
        fs::create_dir(&log).unwrap();
    }

    #[test]
    fn test_create_task_then_query() {
        let (_temp, store) = open();

        let task = store.create_task("Buy milk", None).unwrap();
        assert!(!task.is_complete);
        assert!(task.is_staged());

        let all = store.query_all_sorted_by_creation().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Buy milk");
        assert!(!all[0].is_complete);
        assert_eq!(all[0], task);
    }

    #[test]
    fn test_tasks_sorted_by_creation() {
        let (_temp, store) = open();

        for title in ["one", "two", "three", "four", "five"] {
            store.create_task(title, None).unwrap();
        }

        let all = store.query_all_sorted_by_creation().unwrap();
        assert_eq!(titles(&all), vec!["one", "two", "three", "four", "five"]);
        assert!(all.windows(2).all(|w| w[0].created_at < w[1].created_at));

        // Deleting an unrelated task keeps the others in place
        store.delete_task(&all[2].id).unwrap();
        let all = store.query_all_sorted_by_creation().unwrap();
        assert_eq!(titles(&all), vec!["one", "two", "four", "five"]);
    }

    #[test]
    fn test_empty_title_rejected_without_side_effects() {
        let (temp, store) = open();
        let mut sub = store.subscribe_tasks(ViewSpec::all()).unwrap();

        let err = store.create_task("", None).unwrap_err();
        assert!(err.is_validation());
        let err = store.create_task("   ", None).unwrap_err();
        assert!(err.is_validation());

        assert!(store.query_all_sorted_by_creation().unwrap().is_empty());
        assert!(sub.poll().unwrap().is_empty());
        assert!(!temp.path().join(".taskability/tasks.jsonl").exists());
    }

    #[test]
    fn test_set_complete_emits_single_update() {
        let (_temp, store) = open();
        let task = store.create_task("Buy milk", None).unwrap();

        let mut first = store.subscribe_tasks(ViewSpec::all()).unwrap();
        let mut second = store.subscribe_tasks(ViewSpec::all()).unwrap();

        store.set_complete(&task.id, true).unwrap();
        assert!(store.get_task(&task.id).unwrap().is_complete);

        for sub in [&mut first, &mut second] {
            let batches = sub.poll().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 1);
            match &batches[0][0] {
                Change::Update { item, position } => {
                    assert_eq!(*position, 0);
                    assert!(item.is_complete);
                }
                other => panic!("expected update, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_toggle_complete() {
        let (_temp, store) = open();
        let task = store.create_task("Buy milk", None).unwrap();

        assert!(store.toggle_complete(&task.id).unwrap());
        assert!(!store.toggle_complete(&task.id).unwrap());
        assert!(!store.get_task(&task.id).unwrap().is_complete);
    }

    #[test]
    fn test_missing_ids_are_not_found() {
        let (_temp, store) = open();
        store.create_task("Keep me", None).unwrap();
        let mut sub = store.subscribe_tasks(ViewSpec::all()).unwrap();

        assert!(store.delete_task("nope").unwrap_err().is_not_found());
        assert!(store.set_complete("nope", true).unwrap_err().is_not_found());
        assert!(store.update_fields("nope", TaskFields::new().subtitle("x")).unwrap_err().is_not_found());
        assert!(store.get_task("nope").unwrap_err().is_not_found());
        assert!(store.create_task("Orphan", Some("nope")).unwrap_err().is_not_found());
        assert!(store.query_by_group("nope").unwrap_err().is_not_found());

        assert_eq!(store.query_all_sorted_by_creation().unwrap().len(), 1);
        assert!(sub.poll().unwrap().is_empty());
    }

    #[test]
    fn test_update_fields() {
        let (_temp, store) = open();
        let task = store.create_task("Dentist", None).unwrap();

        let updated = store
            .update_fields(
                &task.id,
                TaskFields::new()
                    .subtitle("Checkup")
                    .location("Main St")
                    .start_date(1_000)
                    .end_date(2_000),
            )
            .unwrap();
        assert_eq!(updated.subtitle.as_deref(), Some("Checkup"));
        assert_eq!(updated.created_at, task.created_at);
        assert!(updated.updated_at > task.updated_at);

        let stored = store.get_task(&task.id).unwrap();
        assert_eq!(stored, updated);

        let cleared = store.update_fields(&task.id, TaskFields::new().clear_location()).unwrap();
        assert_eq!(cleared.location, None);
        assert_eq!(cleared.subtitle.as_deref(), Some("Checkup"));
    }

    #[test]
    fn test_update_fields_validation() {
        let (_temp, store) = open();
        let task = store.create_task("Dentist", None).unwrap();

        assert!(store.update_fields(&task.id, TaskFields::new().title("")).unwrap_err().is_validation());
        assert!(
            store
                .update_fields(&task.id, TaskFields::new().start_date(5_000).end_date(1_000))
                .unwrap_err()
                .is_validation()
        );
        assert!(store.update_fields(&task.id, TaskFields::new().group("nope")).unwrap_err().is_not_found());

        assert_eq!(store.get_task(&task.id).unwrap(), task);
    }

    #[test]
    fn test_delete_emits_delete_record() {
        let (_temp, store) = open();
        let a = store.create_task("a", None).unwrap();
        let b = store.create_task("b", None).unwrap();
        let mut sub = store.subscribe_tasks(ViewSpec::all()).unwrap();

        store.delete_task(&a.id).unwrap();

        let batch = sub.wait(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(batch, vec![Change::Delete { position: 0 }]);
        assert_eq!(sub.rows(), &[b]);
    }

    #[test]
    fn test_insert_position_follows_creation_order() {
        let (_temp, store) = open();
        store.create_task("first", None).unwrap();
        let mut sub = store.subscribe_tasks(ViewSpec::all()).unwrap();

        let second = store.create_task("second", None).unwrap();

        let batches = sub.poll().unwrap();
        assert_eq!(
            batches,
            vec![vec![Change::Insert {
                item: second,
                position: 1
            }]]
        );
    }

    #[test]
    fn test_subscription_replay_matches_queries() {
        let (_temp, store) = open();
        let group = store.create_group(Some("Errands")).unwrap();
        let a = store.create_task("a", None).unwrap();
        store.create_task("b", Some(&group.id)).unwrap();

        let mut all = store.subscribe_tasks(ViewSpec::all()).unwrap();
        let mut open_first = store
            .subscribe_tasks(ViewSpec::all().sort_by(SortDescriptor::ascending("is_complete")))
            .unwrap();
        let mut in_group = store.subscribe_group_tasks(&group.id).unwrap();

        let c = store.create_task("c", None).unwrap();
        store.set_complete(&a.id, true).unwrap();
        store.update_fields(&c.id, TaskFields::new().group(&group.id)).unwrap();
        store.create_task("d", Some(&group.id)).unwrap();
        store.delete_task(&a.id).unwrap();

        all.poll().unwrap();
        open_first.poll().unwrap();
        in_group.poll().unwrap();

        assert_eq!(all.rows(), store.query_all_sorted_by_creation().unwrap().as_slice());
        assert_eq!(in_group.rows(), store.query_by_group(&group.id).unwrap().as_slice());
        assert_eq!(titles(in_group.rows()), vec!["b", "c", "d"]);
        assert_eq!(titles(open_first.rows()), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_completion_reorders_sorted_view_with_move() {
        let (_temp, store) = open();
        let a = store.create_task("a", None).unwrap();
        store.create_task("b", None).unwrap();

        let mut sub = store
            .subscribe_tasks(ViewSpec::all().sort_by(SortDescriptor::ascending("is_complete")))
            .unwrap();
        store.set_complete(&a.id, true).unwrap();

        let batch = sub.poll().unwrap().remove(0);
        assert!(batch.contains(&Change::Move { from: 1, to: 0 }) || batch.contains(&Change::Move { from: 0, to: 1 }));
        assert_eq!(titles(sub.rows()), vec!["b", "a"]);
    }

    #[test]
    fn test_batches_never_interleave_under_concurrency() {
        let (_temp, store) = open();
        let sub = store.subscribe_tasks(ViewSpec::all()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        let task = store.create_task(&format!("t{}-{}", t, i), None).unwrap();
                        store.set_complete(&task.id, true).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (rows, rx) = sub.into_parts();
        let mut state = crate::observer::ViewState::new(rows);
        let mut batches = 0;
        for event in rx.try_iter() {
            if matches!(event, ChangeEvent::DidChange) {
                batches += 1;
            }
            // Any overlap of begin/end pairs is a protocol error here
            state.apply(event).unwrap();
        }

        assert_eq!(batches, 80);
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.rows(), store.query_all_sorted_by_creation().unwrap().as_slice());
    }

    #[test]
    fn test_persistence_failure_rolls_back() {
        let (temp, store) = open();
        let kept = store.create_task("kept", None).unwrap();
        let mut sub = store.subscribe_tasks(ViewSpec::all()).unwrap();

        break_task_log(&temp);

        assert!(store.create_task("lost", None).unwrap_err().is_persistence());
        assert!(store.set_complete(&kept.id, true).unwrap_err().is_persistence());
        assert!(store.delete_task(&kept.id).unwrap_err().is_persistence());

        let all = store.query_all_sorted_by_creation().unwrap();
        assert_eq!(all, vec![kept.clone()]);
        assert!(sub.poll().unwrap().is_empty());
        assert_eq!(sub.rows(), &[kept]);
    }

    #[test]
    fn test_reopen_and_rebuild_from_log() {
        let temp = TempDir::new().unwrap();
        let (group_id, titles_before) = {
            let store = TaskStore::open(temp.path()).unwrap();
            let group = store.create_group(Some("Home")).unwrap();
            store.create_task("a", Some(&group.id)).unwrap();
            let b = store.create_task("b", None).unwrap();
            store.create_task("c", None).unwrap();
            store.set_complete(&b.id, true).unwrap();
            let all = store.query_all_sorted_by_creation().unwrap();
            (group.id, all.iter().map(|t| t.title.clone()).collect::<Vec<_>>())
        };

        remove_cache(&temp);

        let store = TaskStore::open(temp.path()).unwrap();
        let all = store.query_all_sorted_by_creation().unwrap();
        assert_eq!(all.iter().map(|t| t.title.clone()).collect::<Vec<_>>(), titles_before);
        assert!(all[1].is_complete);
        assert_eq!(titles(&store.query_by_group(&group_id).unwrap()), vec!["a"]);
        assert_eq!(titles(&store.query_staged().unwrap()), vec!["b", "c"]);

        // New tasks still sort after the reloaded ones
        store.create_task("d", None).unwrap();
        let all = store.query_all_sorted_by_creation().unwrap();
        assert_eq!(all.last().unwrap().title, "d");
    }

    #[test]
    fn test_sync_publishes_external_changes() {
        let (temp, store) = open();
        store.create_task("a", None).unwrap();
        let mut sub = store.subscribe_tasks(ViewSpec::all()).unwrap();

        // Another writer appends a task straight to the log
        let external = TaskItem {
            id: "external-1".to_string(),
            title: "from elsewhere".to_string(),
            is_complete: false,
            created_at: now_ms() + 60_000,
            updated_at: now_ms() + 60_000,
            subtitle: None,
            start_date: None,
            end_date: None,
            location: None,
            group_id: None,
        };
        crate::jsonl::append_lines(
            &temp.path().join(".taskability/tasks.jsonl"),
            &[serde_json::to_string(&external).unwrap()],
        )
        .unwrap();

        store.sync().unwrap();

        let batch = sub.poll().unwrap().remove(0);
        assert_eq!(
            batch,
            vec![Change::Insert {
                item: external,
                position: 1
            }]
        );
        assert_eq!(store.query_all_sorted_by_creation().unwrap().len(), 2);
    }

    #[test]
    fn test_group_lifecycle_and_cascade() {
        let (_temp, store) = open();
        let work = store.create_group(Some("Work")).unwrap();
        let home = store.create_group(Some("Home")).unwrap();
        store.create_task("report", Some(&work.id)).unwrap();
        store.create_task("slides", Some(&work.id)).unwrap();
        store.create_task("laundry", Some(&home.id)).unwrap();
        store.create_task("staged", None).unwrap();

        let mut tasks = store.subscribe_tasks(ViewSpec::all()).unwrap();
        let mut groups = store.subscribe_groups(GroupOrder::Manual).unwrap();

        assert_eq!(store.delete_group(&work.id).unwrap(), 2);
        assert!(store.get_group(&work.id).unwrap_err().is_not_found());
        assert_eq!(titles(&store.query_all_sorted_by_creation().unwrap()), vec!["laundry", "staged"]);

        let task_batch = tasks.poll().unwrap().remove(0);
        assert_eq!(
            task_batch,
            vec![Change::Delete { position: 1 }, Change::Delete { position: 0 }]
        );
        let group_batch = groups.poll().unwrap().remove(0);
        assert_eq!(group_batch, vec![Change::Delete { position: 0 }]);
        assert_eq!(groups.rows().len(), 1);
    }

    #[test]
    fn test_move_and_rename_group() {
        let (_temp, store) = open();
        let a = store.create_group(Some("Alpha")).unwrap();
        let b = store.create_group(Some("beta")).unwrap();
        let c = store.create_group(None).unwrap();

        let mut manual = store.subscribe_groups(GroupOrder::Manual).unwrap();

        store.move_group(&c.id, 0).unwrap();
        let ids: Vec<String> = store.list_groups().unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![c.id.clone(), a.id.clone(), b.id.clone()]);

        let batch = manual.poll().unwrap().remove(0);
        assert!(matches!(batch[0], Change::Move { from: 2, to: 0 }));
        assert_eq!(manual.rows().iter().map(|s| s.id.clone()).collect::<Vec<_>>(), ids);

        // Out-of-range index clamps to the end
        store.move_group(&c.id, 99).unwrap();
        let positions: Vec<i64> = store.list_groups().unwrap().iter().map(|g| g.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);

        let renamed = store.rename_group(&a.id, Some("  zeta ")).unwrap();
        assert_eq!(renamed.title.as_deref(), Some("zeta"));

        let by_title = store.group_summaries(GroupOrder::Title).unwrap();
        let titles: Vec<Option<&str>> = by_title.iter().map(|s| s.title.as_deref()).collect();
        assert_eq!(titles, vec![None, Some("beta"), Some("zeta")]);
    }

    #[test]
    fn test_group_summaries_track_tasks() {
        let (_temp, store) = open();
        let group = store.create_group(Some("Errands")).unwrap();
        let mut groups = store.subscribe_groups(GroupOrder::Manual).unwrap();

        let milk = store.create_task("milk", Some(&group.id)).unwrap();
        store.create_task("bread", Some(&group.id)).unwrap();
        store.create_task("unrelated", None).unwrap();
        store.set_complete(&milk.id, true).unwrap();

        let batches = groups.poll().unwrap();
        // The staged task does not touch the group list
        assert_eq!(batches.len(), 3);
        let summary = &groups.rows()[0];
        assert_eq!(summary.task_count, 2);
        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.next_task.as_deref(), Some("bread"));
        assert_eq!(store.group_summaries(GroupOrder::Manual).unwrap(), groups.rows());
    }

    #[test]
    fn test_unsubscribe() {
        let (_temp, store) = open();
        let sub = store.subscribe_tasks(ViewSpec::all()).unwrap();
        let dropped = store.subscribe_tasks(ViewSpec::all()).unwrap();
        assert_eq!(store.subscriber_count().unwrap(), 2);

        assert!(store.unsubscribe(sub.id()).unwrap());
        drop(dropped);
        store.create_task("a", None).unwrap();
        assert_eq!(store.subscriber_count().unwrap(), 0);
    }

    #[test]
    fn test_delete_outlasts_writes_stamped_ahead_of_clock() {
        let (temp, store) = open();
        let ahead = now_ms() + 60_000;
        let task = TaskItem {
            id: "ext-1".to_string(),
            title: "from a fast clock".to_string(),
            is_complete: false,
            created_at: ahead,
            updated_at: ahead,
            subtitle: None,
            start_date: None,
            end_date: None,
            location: None,
            group_id: None,
        };
        let group = TaskGroup {
            id: "ext-g".to_string(),
            title: Some("fast".to_string()),
            position: 0,
            created_at: ahead,
            updated_at: ahead,
        };
        append_to_log(&temp, &task);
        append_to_log(&temp, &group);
        store.sync().unwrap();

        store.rename_group("ext-g", Some("renamed")).unwrap();
        store.delete_task("ext-1").unwrap();
        store.sync().unwrap();

        assert!(store.query_all_sorted_by_creation().unwrap().is_empty());
        assert_eq!(store.get_group("ext-g").unwrap().title.as_deref(), Some("renamed"));

        drop(store);
        remove_cache(&temp);
        let store = TaskStore::open(temp.path()).unwrap();
        assert!(store.get_task("ext-1").unwrap_err().is_not_found());
        assert_eq!(store.get_group("ext-g").unwrap().title.as_deref(), Some("renamed"));
    }

    #[test]
    fn test_delete_after_rapid_toggles_survives_sync() {
        let (_temp, store) = open();
        let task = store.create_task("flicker", None).unwrap();
        for _ in 0..300 {
            store.toggle_complete(&task.id).unwrap();
        }

        store.delete_task(&task.id).unwrap();
        store.sync().unwrap();

        assert!(store.query_all_sorted_by_creation().unwrap().is_empty());
    }

    #[test]
    fn test_queries_during_sync_see_whole_state() {
        let (_temp, store) = open();
        let group = store.create_group(Some("Batch")).unwrap();
        for i in 0..20 {
            store.create_task(&format!("task {}", i), Some(&group.id)).unwrap();
        }
        let expected = store.query_by_group(&group.id).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let done = Arc::clone(&done);
            let group_id = group.id.clone();
            let expected = expected.clone();
            thread::spawn(move || {
                let mut reads = 0;
                loop {
                    assert_eq!(store.query_by_group(&group_id).unwrap(), expected);
                    assert!(store.query_staged().unwrap().is_empty());
                    reads += 1;
                    if done.load(Ordering::SeqCst) {
                        return reads;
                    }
                }
            })
        };

        for _ in 0..20 {
            store.sync().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() > 0);
    }

    #[test]
    fn test_handles_on_one_directory_share_state() {
        let (temp, a) = open();
        let b = TaskStore::open(temp.path()).unwrap();
        let mut b_view = b.subscribe_tasks(ViewSpec::all()).unwrap();

        let task = a.create_task("shared", None).unwrap();
        b.set_complete(&task.id, true).unwrap();
        assert!(a.get_task(&task.id).unwrap().is_complete);

        // b caught up with a's insert before committing its own update
        let batches = b_view.poll().unwrap();
        assert_eq!(batches.len(), 2);
        assert!(b_view.rows()[0].is_complete);

        a.delete_task(&task.id).unwrap();
        assert!(b.set_complete(&task.id, false).unwrap_err().is_not_found());
        assert!(a.query_all_sorted_by_creation().unwrap().is_empty());

        let one = a.create_group(Some("one")).unwrap();
        let two = b.create_group(Some("two")).unwrap();
        assert_eq!((one.position, two.position), (0, 1));
    }

    #[test]
    fn test_contains_filter_agrees_between_query_and_view() {
        let (_temp, store) = open();
        let filter = Filter::new("title", FilterOp::Contains, IndexValue::String("a_c".to_string()));
        let mut view = store.subscribe_tasks(ViewSpec::all().filter(filter.clone())).unwrap();

        store.create_task("abc", None).unwrap();
        store.create_task("XA_C", None).unwrap();
        store.create_task("100%", None).unwrap();

        let queried = store.query(&[filter]).unwrap();
        view.poll().unwrap();
        assert_eq!(titles(&queried), vec!["XA_C"]);
        assert_eq!(view.rows(), queried.as_slice());
    }
}
