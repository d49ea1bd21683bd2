use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::render::ResourceKey;
use crate::types::{GroupedId, MessageId, PeerId, SenderId, ThreadId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MessageFlags: u8 {
        const OUTGOING = 1 << 0;
        const UNREAD = 1 << 1;
        const PINNED = 1 << 2;
        const EDITED = 1 << 3;
        const DELETED = 1 << 4;
        /// Join/leave/pin notices and similar. Never grouped.
        const SERVICE = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Sticker,
    Document,
    Poll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub key: ResourceKey,
    pub kind: MediaKind,
    /// Laid-out height once the resource is ready.
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
    pub media: Option<MediaRef>,
}

/// A message as owned by the store. The feed never mutates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub peer: PeerId,
    pub thread: Option<ThreadId>,
    /// Unix seconds.
    pub timestamp: i64,
    pub sender: SenderId,
    pub grouped_id: Option<GroupedId>,
    pub flags: MessageFlags,
    pub content: MessageContent,
}

impl Message {
    pub fn new(
        id: MessageId,
        peer: PeerId,
        sender: SenderId,
        timestamp: i64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            peer,
            thread: None,
            timestamp,
            sender,
            grouped_id: None,
            flags: MessageFlags::empty(),
            content: MessageContent {
                text: text.into(),
                media: None,
            },
        }
    }

    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.content.media = Some(media);
        self
    }

    pub fn in_album(mut self, grouped_id: GroupedId) -> Self {
        self.grouped_id = Some(grouped_id);
        self
    }

    pub fn in_thread(mut self, thread: ThreadId) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn is_outgoing(&self) -> bool {
        self.flags.contains(MessageFlags::OUTGOING)
    }

    pub fn is_unread(&self) -> bool {
        self.flags.contains(MessageFlags::UNREAD)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(MessageFlags::DELETED)
    }

    pub fn is_service(&self) -> bool {
        self.flags.contains(MessageFlags::SERVICE)
    }

    /// Whether this message belongs in a feed opened on `(peer, thread)`.
    pub fn belongs_to(&self, peer: PeerId, thread: Option<ThreadId>) -> bool {
        self.peer == peer && (thread.is_none() || self.thread == thread)
    }
}
