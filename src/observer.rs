// Change notification for ordered views

use crate::error::{Error, Result};
use crate::filter::{Filter, SortDescriptor};
use crate::record::IndexValue;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Anything that can appear as a row in an observed view
pub trait Row: Clone + PartialEq + Send + 'static {
    /// Stable identity of the row across mutations
    fn row_id(&self) -> &str;

    /// Values available to view filters and sort descriptors
    fn fields(&self) -> HashMap<String, IndexValue>;
}

/// One row-level effect of a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Insert { item: T, position: usize },
    Delete { position: usize },
    Update { item: T, position: usize },
    Move { from: usize, to: usize },
}

/// What a subscription receives
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    /// A batch begins (Idle -> Batching)
    WillChange,
    Change(Change<T>),
    /// The batch is complete and matches committed state (Batching -> Idle)
    DidChange,
}

/// The change records of one mutation cycle
pub type Batch<T> = Vec<Change<T>>;

/// Which rows a subscription sees, and in what order
///
/// Rows arrive in the store's base order (creation order for tasks, manual
/// position for groups). Sort descriptors are applied with a stable sort,
/// so ties keep the base order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSpec {
    pub filters: Vec<Filter>,
    pub order: Vec<SortDescriptor>,
}

impl ViewSpec {
    /// Every row, in base order
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, descriptor: SortDescriptor) -> Self {
        self.order.push(descriptor);
        self
    }

    /// Apply the filters and ordering to rows given in base order
    pub fn select<T: Row>(&self, rows: Vec<T>) -> Vec<T> {
        let rows: Vec<T> = if self.filters.is_empty() {
            rows
        } else {
            rows.into_iter()
                .filter(|row| {
                    let fields = row.fields();
                    self.filters.iter().all(|f| f.matches(&fields))
                })
                .collect()
        };

        if self.order.is_empty() {
            return rows;
        }

        let mut keyed: Vec<(HashMap<String, IndexValue>, T)> = rows.into_iter().map(|r| (r.fields(), r)).collect();
        keyed.sort_by(|(a, _), (b, _)| {
            self.order
                .iter()
                .map(|d| d.compare(a, b))
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        keyed.into_iter().map(|(_, row)| row).collect()
    }
}

/// Compute change records that turn `old` into `new`
///
/// Both slices must hold unique row ids. Deletes come first (highest
/// position first), then each target slot is filled left to right by a
/// Move of an existing row or an Insert of a new one, followed by an
/// Update when the row's content differs.
pub fn diff<T: Row>(old: &[T], new: &[T]) -> Batch<T> {
    let mut changes = Vec::new();
    let keep: HashSet<&str> = new.iter().map(|r| r.row_id()).collect();
    let mut current: Vec<&T> = old.iter().collect();

    for position in (0..current.len()).rev() {
        if !keep.contains(current[position].row_id()) {
            changes.push(Change::Delete { position });
            current.remove(position);
        }
    }

    for (target, row) in new.iter().enumerate() {
        // Slots before `target` already match `new`
        let found = current[target..]
            .iter()
            .position(|r| r.row_id() == row.row_id())
            .map(|offset| target + offset);

        match found {
            Some(from) => {
                if from != target {
                    changes.push(Change::Move { from, to: target });
                    let moved = current.remove(from);
                    current.insert(target, moved);
                }
                if current[target] != row {
                    changes.push(Change::Update {
                        item: row.clone(),
                        position: target,
                    });
                    current[target] = row;
                }
            }
            None => {
                changes.push(Change::Insert {
                    item: row.clone(),
                    position: target,
                });
                current.insert(target, row);
            }
        }
    }

    changes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Batching,
}

/// Subscriber-side replica of an ordered view
///
/// Applies events one at a time and enforces the begin/change/end protocol.
#[derive(Debug, Clone)]
pub struct ViewState<T> {
    rows: Vec<T>,
    phase: Phase,
    pending: Batch<T>,
}

impl<T: Row> ViewState<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self {
            rows,
            phase: Phase::Idle,
            pending: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Apply one event; returns the finished batch on `DidChange`
    pub fn apply(&mut self, event: ChangeEvent<T>) -> Result<Option<Batch<T>>> {
        match (event, self.phase) {
            (ChangeEvent::WillChange, Phase::Idle) => {
                self.phase = Phase::Batching;
                Ok(None)
            }
            (ChangeEvent::WillChange, Phase::Batching) => {
                Err(Error::Protocol("batch started while another is open".to_string()))
            }
            (ChangeEvent::Change(_), Phase::Idle) => Err(Error::Protocol("change outside a batch".to_string())),
            (ChangeEvent::Change(change), Phase::Batching) => {
                self.apply_change(&change)?;
                self.pending.push(change);
                Ok(None)
            }
            (ChangeEvent::DidChange, Phase::Batching) => {
                self.phase = Phase::Idle;
                Ok(Some(std::mem::take(&mut self.pending)))
            }
            (ChangeEvent::DidChange, Phase::Idle) => Err(Error::Protocol("batch ended without starting".to_string())),
        }
    }

    fn apply_change(&mut self, change: &Change<T>) -> Result<()> {
        let len = self.rows.len();
        match change {
            Change::Insert { item, position } => {
                if *position > len {
                    return Err(out_of_range("insert", *position, len));
                }
                self.rows.insert(*position, item.clone());
            }
            Change::Delete { position } => {
                if *position >= len {
                    return Err(out_of_range("delete", *position, len));
                }
                self.rows.remove(*position);
            }
            Change::Update { item, position } => {
                let Some(slot) = self.rows.get_mut(*position) else {
                    return Err(out_of_range("update", *position, len));
                };
                if slot.row_id() != item.row_id() {
                    return Err(Error::Protocol(format!(
                        "update at {} targets row {} but found {}",
                        position,
                        item.row_id(),
                        slot.row_id()
                    )));
                }
                *slot = item.clone();
            }
            Change::Move { from, to } => {
                if *from >= len || *to >= len {
                    return Err(out_of_range("move", (*from).max(*to), len));
                }
                let row = self.rows.remove(*from);
                self.rows.insert(*to, row);
            }
        }
        Ok(())
    }
}

fn out_of_range(what: &str, position: usize, len: usize) -> Error {
    Error::Protocol(format!("{} position {} out of range for view of {} rows", what, position, len))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of a subscription, with its replicated view
///
/// Events queue without bound until polled. Dropping it unsubscribes at
/// the next publish.
pub struct Subscription<T: Row> {
    id: SubscriptionId,
    rx: Receiver<ChangeEvent<T>>,
    state: ViewState<T>,
}

impl<T: Row> Subscription<T> {
    fn new(id: SubscriptionId, initial: Vec<T>, rx: Receiver<ChangeEvent<T>>) -> Self {
        Self {
            id,
            rx,
            state: ViewState::new(initial),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The view with every received event applied
    pub fn rows(&self) -> &[T] {
        self.state.rows()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Apply every event already delivered and return the completed batches
    pub fn poll(&mut self) -> Result<Vec<Batch<T>>> {
        let mut batches = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(batch) = self.state.apply(event)? {
                        batches.push(batch);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(batches),
            }
        }
    }

    /// Block until one batch completes, the timeout passes, or the store goes away
    pub fn wait(&mut self, timeout: Duration) -> Result<Option<Batch<T>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(batch) = self.state.apply(event)? {
                        return Ok(Some(batch));
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    /// Take the raw event stream and the view it applies to
    pub fn into_parts(self) -> (Vec<T>, Receiver<ChangeEvent<T>>) {
        (self.state.rows, self.rx)
    }
}

trait Feed<S>: Send {
    fn id(&self) -> SubscriptionId;

    /// Send this subscriber its batch; false once the receiver is gone
    fn publish(&mut self, snapshot: &S) -> bool;
}

type Projection<S, T> = Box<dyn Fn(&S) -> Vec<T> + Send>;

struct Subscriber<S, T> {
    id: SubscriptionId,
    project: Projection<S, T>,
    spec: ViewSpec,
    view: Vec<T>,
    tx: Sender<ChangeEvent<T>>,
}

impl<S: 'static, T: Row> Feed<S> for Subscriber<S, T> {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn publish(&mut self, snapshot: &S) -> bool {
        let next = self.spec.select((self.project)(snapshot));
        let changes = diff(&self.view, &next);
        if changes.is_empty() {
            return true;
        }

        let count = changes.len();
        let events = std::iter::once(ChangeEvent::WillChange)
            .chain(changes.into_iter().map(ChangeEvent::Change))
            .chain(std::iter::once(ChangeEvent::DidChange));
        for event in events {
            if self.tx.send(event).is_err() {
                return false;
            }
        }

        self.view = next;
        debug!(subscription = %self.id, changes = count, "Delivered change batch");
        true
    }
}

/// Fan-out of snapshots of type `S` to any number of subscriptions
///
/// Every subscription owns an ordered view defined by a [`ViewSpec`]. On
/// each publish the hub recomputes every view, diffs it against what that
/// subscriber last saw, and sends one batch:
///
/// ```text
/// WillChange, Change(..), Change(..), ..., DidChange
/// ```
///
/// Positions in each [`Change`] refer to the view after the preceding
/// records of the same batch, so replaying a batch in order reproduces the
/// new view. Subscribers whose view is unaffected receive nothing. The
/// caller publishes under its writer lock, which keeps batches whole and in
/// commit order; a consumer that mutates in response runs after the batch.
///
/// Channels are unbounded: events queue until the [`Subscription`] is
/// polled. A subscriber that stops polling should be dropped or
/// unsubscribed; a dropped one is removed on the next publish.
pub struct Hub<S> {
    next_id: u64,
    feeds: Vec<Box<dyn Feed<S>>>,
}

impl<S: 'static> Default for Hub<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> Hub<S> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            feeds: Vec::new(),
        }
    }

    /// Register a view over `project(snapshot)` filtered and ordered by `spec`
    ///
    /// `snapshot` must be the current committed state; the subscription's
    /// initial rows are computed from it.
    pub fn subscribe<T, F>(&mut self, snapshot: &S, spec: ViewSpec, project: F) -> Subscription<T>
    where
        T: Row,
        F: Fn(&S) -> Vec<T> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let view = spec.select(project(snapshot));
        let (tx, rx) = mpsc::channel();
        self.feeds.push(Box::new(Subscriber {
            id,
            project: Box::new(project),
            spec,
            view: view.clone(),
            tx,
        }));

        debug!(subscription = %id, rows = view.len(), "Subscribed");
        Subscription::new(id, view, rx)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.feeds.len();
        self.feeds.retain(|feed| feed.id() != id);
        before != self.feeds.len()
    }

    /// Deliver the new state to every subscriber, dropping closed ones
    pub fn publish(&mut self, snapshot: &S) {
        self.feeds.retain_mut(|feed| {
            let alive = feed.publish(snapshot);
            if !alive {
                debug!(subscription = %feed.id(), "Subscriber gone, dropping");
            }
            alive
        });
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}
