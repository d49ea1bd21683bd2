use chrono::NaiveDate;

use super::grouping::GroupPosition;
use super::read_tracker::ReadCursor;
use crate::types::{FeedKind, GroupId, MessageId, PeerId, ThreadId};

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub id: MessageId,
    pub day: NaiveDate,
    pub group: Option<GroupId>,
    pub position: GroupPosition,
    pub top: f64,
    pub height: f64,
    pub lines: Vec<String>,
    pub outgoing: bool,
    pub unread: bool,
    pub read_by_peer: bool,
    pub first_unread: bool,
    pub album_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotBucket {
    pub day: NaiveDate,
    pub label: String,
    pub is_sticky: bool,
    pub ids: Vec<MessageId>,
}

/// A read-only view of a feed, in surface order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub kind: FeedKind,
    pub peer: Option<PeerId>,
    pub thread: Option<ThreadId>,
    pub phase: String,
    pub buckets: Vec<SnapshotBucket>,
    /// Day whose separator is pinned over the top of the viewport.
    pub sticky_day: Option<NaiveDate>,
    pub entries: Vec<SnapshotEntry>,
    /// Mounted but not yet committed.
    pub pending: Vec<MessageId>,
    pub reached_top: bool,
    pub reached_bottom: bool,
    pub loading_top: bool,
    pub loading_bottom: bool,
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub content_height: f64,
    pub visible: Vec<MessageId>,
    pub read_cursor: ReadCursor,
}

impl FeedSnapshot {
    pub fn ids(&self) -> Vec<MessageId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn entry(&self, id: MessageId) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}
