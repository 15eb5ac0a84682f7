//! Past/future command ledger.
//!
//! The history never executes anything itself; the interpreter peeks
//! an entry, runs its inverse, and only then settles the entry onto the
//! other stack. A failed undo or redo therefore leaves both stacks as
//! they were.

use tracing::trace;

use super::{Action, ActionKind, Completion};

/// A recorded, reversible command.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Monotonic id, used to settle the right entry after an undo/redo
    pub seq: u64,
    pub action: Action,
    pub undo: Action,
    pub redo: Option<Action>,
}

impl Entry {
    /// The action to run when redoing this entry.
    pub fn redo_action(&self) -> &Action {
        self.redo.as_ref().unwrap_or(&self.action)
    }

    fn touches(&self, ids: &[i64]) -> bool {
        [&self.action, &self.undo]
            .into_iter()
            .chain(self.redo.as_ref())
            .any(|action| action.targets().iter().any(|id| ids.contains(id)))
    }
}

/// Which entries [`History::discard`] removes.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryFilter {
    All,
    /// Entries whose actions target any of these ids
    Targets(Vec<i64>),
    Kind(ActionKind),
}

impl HistoryFilter {
    fn matches(&self, entry: &Entry) -> bool {
        match self {
            HistoryFilter::All => true,
            HistoryFilter::Targets(ids) => entry.touches(ids),
            HistoryFilter::Kind(kind) => entry.action.kind == *kind,
        }
    }
}

#[derive(Debug, Default)]
pub struct History {
    /// Most recent last
    past: Vec<Entry>,
    future: Vec<Entry>,
    next: u64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn past(&self) -> &[Entry] {
        &self.past
    }

    pub fn future(&self) -> &[Entry] {
        &self.future
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Record a freshly executed command. Always invalidates the future;
    /// pushes onto the past only if the command declared an inverse.
    pub fn record(&mut self, action: &Action, done: &Completion) {
        if !self.future.is_empty() {
            trace!(cleared = self.future.len(), "redo stack cleared");
        }
        self.future.clear();

        if let Some(undo) = &done.undo {
            let seq = self.next;
            self.next += 1;
            self.past.push(Entry {
                seq,
                action: action.clone(),
                undo: undo.clone(),
                redo: done.redo.clone(),
            });
            trace!(kind = ?action.kind, seq, past = self.past.len(), "history entry pushed");
        }
    }

    /// The entry `undo` would revert next.
    pub fn peek_undo(&self) -> Option<Entry> {
        self.past.last().cloned()
    }

    /// The entry `redo` would re-apply next.
    pub fn peek_redo(&self) -> Option<Entry> {
        self.future.last().cloned()
    }

    /// Move an undone entry from the past to the future.
    pub fn settle_undo(&mut self, seq: u64) -> bool {
        let Some(index) = self.past.iter().rposition(|e| e.seq == seq) else {
            return false;
        };
        let entry = self.past.remove(index);
        self.future.push(entry);
        true
    }

    /// Move a redone entry back onto the past, adopting the fresh inverse
    /// the re-run produced.
    pub fn settle_redo(&mut self, seq: u64, done: &Completion) -> bool {
        let Some(index) = self.future.iter().rposition(|e| e.seq == seq) else {
            return false;
        };
        let mut entry = self.future.remove(index);
        if let Some(undo) = &done.undo {
            entry.undo = undo.clone();
        }
        if done.redo.is_some() {
            entry.redo = done.redo.clone();
        }
        self.past.push(entry);
        true
    }

    /// Remove matching entries from both stacks without running anything.
    pub fn discard(&mut self, filter: &HistoryFilter) -> usize {
        let before = self.past.len() + self.future.len();
        self.past.retain(|e| !filter.matches(e));
        self.future.retain(|e| !filter.matches(e));
        before - (self.past.len() + self.future.len())
    }
}
