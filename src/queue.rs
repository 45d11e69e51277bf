//! The global event queue (C5): an ordered multimap of event time to
//! variable with FIFO tie-break, supporting insert/shift/top/pop and
//! simultaneous-batch extraction (§4.3).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::{QssError, Result};
use crate::variable::VariableId;

/// The three event kinds the driver schedules (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A variable's own requantization, scheduled at its `tE`.
    Requantization,
    /// A zero-crossing handler firing, scheduled at a variable's `tZ`.
    Handler,
    /// A periodic output sample, not tied to any one variable.
    Output,
}

/// An entry popped from the queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueEntry {
    /// Event time.
    pub time: f64,
    /// Which kind of event this is.
    pub kind: EventKind,
    /// The variable this event targets, or `None` for `Output`.
    pub variable: Option<VariableId>,
}

/// Total-ordered wrapper around `f64` so event times can key a `BTreeMap`
/// (event times are always finite or `+inf`, never `NaN`, by construction).
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeKey(f64);

impl Eq for TimeKey {}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

type Slot = (TimeKey, u64);

/// A variable holds at most one queue entry per [`EventKind`]; `shift` must
/// move that single entry rather than duplicate it (§4.3).
pub struct EventQueue {
    entries: BTreeMap<Slot, QueueEntry>,
    positions: HashMap<(EventKind, Option<VariableId>), Slot>,
    next_seq: u64,
}

impl EventQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            positions: HashMap::new(),
            next_seq: 0,
        }
    }

    fn key_of(kind: EventKind, variable: Option<VariableId>) -> (EventKind, Option<VariableId>) {
        (kind, variable)
    }

    /// Insert a new entry for `(kind, variable)`. Errors if that
    /// combination already holds an entry — callers must `shift` an
    /// existing entry instead (§4.3, §4.7 "duplicate insert... fatal").
    pub fn insert(&mut self, kind: EventKind, variable: Option<VariableId>, time: f64) -> Result<()> {
        let key = Self::key_of(kind, variable);
        if self.positions.contains_key(&key) {
            let err = QssError::queue(format!("duplicate insert for {:?}/{:?}", kind, variable));
            tracing::error!("{err}");
            return Err(err);
        }
        let slot = (TimeKey(time), self.next_seq);
        self.next_seq += 1;
        self.entries.insert(
            slot,
            QueueEntry {
                time,
                kind,
                variable,
            },
        );
        self.positions.insert(key, slot);
        Ok(())
    }

    /// Move the sole entry for `(kind, variable)` to `time_new`. Errors if
    /// no prior entry exists (§4.7: "shift of a variable with no prior
    /// entry: programmer error; abort").
    pub fn shift(&mut self, kind: EventKind, variable: Option<VariableId>, time_new: f64) -> Result<()> {
        let key = Self::key_of(kind, variable);
        let old_slot = self.positions.remove(&key).ok_or_else(|| {
            let err = QssError::queue(format!("shift of {:?}/{:?} with no prior entry", kind, variable));
            tracing::error!("{err}");
            err
        })?;
        self.entries.remove(&old_slot);
        let new_slot = (TimeKey(time_new), self.next_seq);
        self.next_seq += 1;
        self.entries.insert(
            new_slot,
            QueueEntry {
                time: time_new,
                kind,
                variable,
            },
        );
        self.positions.insert(key, new_slot);
        Ok(())
    }

    /// Remove the entry for `(kind, variable)` if present, without
    /// reinserting it (used when a zero-crossing variable's `tZ` becomes
    /// `+inf` and its pending Handler event must be cancelled).
    pub fn remove(&mut self, kind: EventKind, variable: Option<VariableId>) {
        let key = Self::key_of(kind, variable);
        if let Some(slot) = self.positions.remove(&key) {
            self.entries.remove(&slot);
        }
    }

    /// The entry with the least event time, without removing it.
    pub fn top(&self) -> Option<QueueEntry> {
        self.entries.values().next().copied()
    }

    /// Remove and return every entry whose time equals `top().time` (exact
    /// double equality), in FIFO order within that time. Requantization
    /// entries are returned before Handler entries scheduled at the same
    /// time (§4.5: "Handler events within a batch run after all
    /// Requantization events in the same batch").
    pub fn pop_simultaneous(&mut self) -> Vec<QueueEntry> {
        let Some(top_time) = self.top().map(|e| e.time) else {
            return Vec::new();
        };
        let mut batch = Vec::new();
        let slots: Vec<Slot> = self
            .entries
            .range((TimeKey(top_time), 0)..)
            .take_while(|(slot, _)| slot.0 .0 == top_time)
            .map(|(slot, _)| *slot)
            .collect();
        for slot in slots {
            if let Some(entry) = self.entries.remove(&slot) {
                self.positions.remove(&Self::key_of(entry.kind, entry.variable));
                batch.push(entry);
            }
        }
        batch.sort_by(|a, b| {
            let rank = |k: EventKind| match k {
                EventKind::Requantization => 0,
                EventKind::Output => 1,
                EventKind::Handler => 2,
            };
            rank(a.kind).cmp(&rank(b.kind))
        });
        batch
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `(kind, variable)` currently holds an entry.
    pub fn contains(&self, kind: EventKind, variable: Option<VariableId>) -> bool {
        self.positions.contains_key(&Self::key_of(kind, variable))
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_top() {
        let mut q = EventQueue::new();
        q.insert(EventKind::Requantization, Some(VariableId(0)), 3.0).unwrap();
        q.insert(EventKind::Requantization, Some(VariableId(1)), 1.0).unwrap();
        let top = q.top().unwrap();
        assert_eq!(top.time, 1.0);
        assert_eq!(top.variable, Some(VariableId(1)));
    }

    #[test]
    fn test_duplicate_insert_errors() {
        let mut q = EventQueue::new();
        q.insert(EventKind::Requantization, Some(VariableId(0)), 1.0).unwrap();
        let err = q.insert(EventKind::Requantization, Some(VariableId(0)), 2.0);
        assert!(err.is_err());
    }

    #[test]
    fn test_shift_moves_single_entry() {
        let mut q = EventQueue::new();
        q.insert(EventKind::Requantization, Some(VariableId(0)), 1.0).unwrap();
        q.shift(EventKind::Requantization, Some(VariableId(0)), 5.0).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.top().unwrap().time, 5.0);
    }

    #[test]
    fn test_shift_without_prior_entry_errors() {
        let mut q = EventQueue::new();
        let err = q.shift(EventKind::Requantization, Some(VariableId(0)), 5.0);
        assert!(err.is_err());
    }

    #[test]
    fn test_pop_simultaneous_batches_equal_times() {
        let mut q = EventQueue::new();
        q.insert(EventKind::Requantization, Some(VariableId(0)), 2.0).unwrap();
        q.insert(EventKind::Requantization, Some(VariableId(1)), 2.0).unwrap();
        q.insert(EventKind::Requantization, Some(VariableId(2)), 3.0).unwrap();
        let batch = q.pop_simultaneous();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|e| e.time == 2.0));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_pop_simultaneous_orders_handlers_after_requantizations() {
        let mut q = EventQueue::new();
        q.insert(EventKind::Handler, Some(VariableId(0)), 2.0).unwrap();
        q.insert(EventKind::Requantization, Some(VariableId(1)), 2.0).unwrap();
        let batch = q.pop_simultaneous();
        assert_eq!(batch[0].kind, EventKind::Requantization);
        assert_eq!(batch[1].kind, EventKind::Handler);
    }

    #[test]
    fn test_remove_cancels_entry() {
        let mut q = EventQueue::new();
        q.insert(EventKind::Handler, Some(VariableId(0)), 2.0).unwrap();
        q.remove(EventKind::Handler, Some(VariableId(0)));
        assert!(q.is_empty());
        assert!(!q.contains(EventKind::Handler, Some(VariableId(0))));
    }
}
