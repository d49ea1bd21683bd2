use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::types::MessageId;

/// Per-conversation read position. Neither field ever moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadCursor {
    pub max_read_inbound: Option<MessageId>,
    pub max_read_outbound: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkReadRequest {
    pub max_id: MessageId,
    pub attempt: u8,
}

/// Watches unread inbound entries and turns their visibility into
/// mark-read requests.
#[derive(Debug)]
pub struct ReadTracker {
    observed: BTreeSet<MessageId>,
    cursor: ReadCursor,
    online: bool,
    max_retries: u8,
}

impl ReadTracker {
    pub fn new(max_retries: u8) -> Self {
        Self {
            observed: BTreeSet::new(),
            cursor: ReadCursor::default(),
            online: true,
            max_retries,
        }
    }

    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Start watching an entry. Ids already at or below the cursor are
    /// ignored.
    pub fn observe(&mut self, id: MessageId) -> bool {
        if self.cursor.max_read_inbound.is_some_and(|max| id <= max) {
            return false;
        }
        self.observed.insert(id)
    }

    pub fn unobserve(&mut self, id: MessageId) {
        self.observed.remove(&id);
    }

    pub fn is_observed(&self, id: MessageId) -> bool {
        self.observed.contains(&id)
    }

    /// Fold a visibility report into at most one mark-read request.
    ///
    /// `newest_override` replaces the max when the window sits at the bottom
    /// and the highest mounted entry was seen.
    pub fn on_visible(
        &mut self,
        visible: &[MessageId],
        newest_override: Option<MessageId>,
    ) -> Option<MarkReadRequest> {
        if !self.online {
            return None;
        }
        let seen = visible
            .iter()
            .copied()
            .filter(|id| self.observed.contains(id))
            .max()?;
        let max = newest_override.map_or(seen, |newest| newest.max(seen));

        self.observed.retain(|id| *id > max);

        if self.cursor.max_read_inbound.is_some_and(|current| current >= max) {
            return None;
        }
        debug!(target: "feed.read", %max, "advancing read cursor");
        self.cursor.max_read_inbound = Some(max);
        Some(MarkReadRequest {
            max_id: max,
            attempt: 0,
        })
    }

    /// One more attempt for a failed request, or `None` once retries are spent.
    pub fn retry(&self, failed: MarkReadRequest) -> Option<MarkReadRequest> {
        if failed.attempt >= self.max_retries {
            warn!(
                target: "feed.read",
                max_id = %failed.max_id,
                "giving up on read mark after {} attempts",
                failed.attempt + 1
            );
            return None;
        }
        Some(MarkReadRequest {
            max_id: failed.max_id,
            attempt: failed.attempt + 1,
        })
    }

    /// Apply a read position reported by the store. Returns whether the
    /// outbound cursor moved.
    pub fn apply_history_read(
        &mut self,
        inbound: Option<MessageId>,
        outbound: Option<MessageId>,
    ) -> bool {
        if let Some(inbound) = inbound
            && self.cursor.max_read_inbound < Some(inbound)
        {
            self.cursor.max_read_inbound = Some(inbound);
            self.observed.retain(|id| *id > inbound);
        }
        match outbound {
            Some(outbound) if self.cursor.max_read_outbound < Some(outbound) => {
                self.cursor.max_read_outbound = Some(outbound);
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self, cursor: ReadCursor) {
        self.observed.clear();
        self.cursor = cursor;
    }
}
