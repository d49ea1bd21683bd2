use indexmap::IndexMap;

use super::date_segmenter::Placement;
use crate::render::{ResourceKey, VisualHandle};
use crate::types::{BatchId, MessageId};

#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub id: MessageId,
    pub prepend: bool,
    /// Re-place an already committed entry instead of updating it in place.
    pub update_position: bool,
    /// Follow the new bottom if the viewport was at the bottom when queued.
    pub stick_to_bottom: bool,
    /// Replacement handle for an entry that is already mounted.
    pub staged: Option<VisualHandle>,
    pub pending: Vec<ResourceKey>,
}

impl QueuedEntry {
    pub fn new(id: MessageId, prepend: bool) -> Self {
        Self {
            id,
            prepend,
            update_position: false,
            stick_to_bottom: false,
            staged: None,
            pending: Vec::new(),
        }
    }

    fn absorb(&mut self, later: QueuedEntry) {
        self.update_position |= later.update_position;
        self.stick_to_bottom |= later.stick_to_bottom;
        if later.staged.is_some() {
            self.staged = later.staged;
        }
        for key in later.pending {
            if !self.pending.contains(&key) {
                self.pending.push(key);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub batch: BatchId,
    pub entries: Vec<QueuedEntry>,
}

impl Commit {
    pub fn resources(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self
            .entries
            .iter()
            .flat_map(|e| e.pending.iter().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn has_prepend(&self) -> bool {
        self.entries.iter().any(|e| e.prepend)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// The batch the entry will be committed in.
    pub batch: BatchId,
    /// The caller must schedule a tick for `batch`.
    pub schedule: bool,
}

/// Collects entries between ticks and hands them out one commit at a time.
#[derive(Debug, Default)]
pub struct RenderQueue {
    pending: IndexMap<MessageId, QueuedEntry>,
    in_flight: Option<Commit>,
    tick_scheduled: bool,
    next_batch: u64,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_batch(&self) -> BatchId {
        BatchId(self.next_batch)
    }

    pub fn enqueue(&mut self, entry: QueuedEntry) -> Enqueued {
        match self.pending.get_mut(&entry.id) {
            Some(existing) => existing.absorb(entry),
            None => {
                self.pending.insert(entry.id, entry);
            }
        }
        let schedule = !self.tick_scheduled && self.in_flight.is_none();
        if schedule {
            self.tick_scheduled = true;
        }
        Enqueued {
            batch: self.pending_batch(),
            schedule,
        }
    }

    /// Move the pending set into flight when the tick for `batch` fires.
    pub fn start(&mut self, batch: BatchId) -> Option<&Commit> {
        if batch != self.pending_batch() || self.in_flight.is_some() {
            return None;
        }
        self.tick_scheduled = false;
        if self.pending.is_empty() {
            return None;
        }
        let entries = std::mem::take(&mut self.pending).into_values().collect();
        self.next_batch += 1;
        self.in_flight = Some(Commit { batch, entries });
        self.in_flight.as_ref()
    }

    pub fn finish(&mut self, batch: BatchId) -> Option<Commit> {
        if self.in_flight.as_ref().is_some_and(|c| c.batch == batch) {
            self.in_flight.take()
        } else {
            None
        }
    }

    /// After a commit, claim the next tick if entries piled up meanwhile.
    pub fn next_tick(&mut self) -> Option<BatchId> {
        if self.pending.is_empty() || self.tick_scheduled || self.in_flight.is_some() {
            return None;
        }
        self.tick_scheduled = true;
        Some(self.pending_batch())
    }

    pub fn cancel(&mut self, id: MessageId) -> Option<QueuedEntry> {
        self.pending.shift_remove(&id)
    }

    pub fn rekey(&mut self, old: MessageId, new: MessageId) {
        if let Some(mut entry) = self.pending.shift_remove(&old) {
            entry.id = new;
            self.pending.insert(new, entry);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight = None;
        self.tick_scheduled = false;
        self.next_batch += 1;
    }
}

/// Position of `key` among its bucket siblings, `(timestamp, id)` or `(id, id)`
/// keyed, listed in visual order.
pub fn placement_for(
    sorted_insert: bool,
    prepend: bool,
    siblings: &[(i64, MessageId)],
    key: (i64, MessageId),
) -> Placement {
    if !sorted_insert {
        if prepend && siblings.first().is_none_or(|first| key < *first) {
            return Placement::AfterSeparator;
        }
        if !prepend && siblings.last().is_none_or(|last| key > *last) {
            return Placement::End;
        }
    }
    Placement::Index(siblings.partition_point(|sibling| *sibling < key))
}
