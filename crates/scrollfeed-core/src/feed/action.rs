use crate::message::Message;
use crate::store::{DialogState, HistoryPage};
use crate::types::{
    BatchId, Direction, Generation, GroupedId, LoadMode, LoadToken, MessageId, PeerId, ThreadId,
};

use super::read_tracker::MarkReadRequest;

/// Store-originated changes, ingested through one entry point.
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    NewMessages(Vec<Message>),
    /// A locally sent message received its store id.
    MessageSent {
        temp_id: MessageId,
        message: Message,
    },
    Edited(Message),
    Deleted {
        peer: PeerId,
        ids: Vec<MessageId>,
    },
    AlbumEdited {
        peer: PeerId,
        grouped_id: GroupedId,
        deleted: Vec<MessageId>,
    },
    DialogFlushed {
        peer: PeerId,
    },
    PeerMigrated {
        from: PeerId,
        to: PeerId,
    },
    HistoryRead {
        peer: PeerId,
        thread: Option<ThreadId>,
        max_inbound: Option<MessageId>,
        max_outbound: Option<MessageId>,
    },
}

#[derive(Debug, Clone)]
pub enum FeedAction {
    SetConversation {
        peer: PeerId,
        thread: Option<ThreadId>,
        target: Option<MessageId>,
    },
    DialogStateLoaded {
        generation: Generation,
        state: DialogState,
    },
    DialogStateFailed {
        generation: Generation,
        error: String,
    },
    LoadMore {
        direction: Direction,
        mode: LoadMode,
        anchor: Option<MessageId>,
        preload_only: bool,
    },
    ScrollReachedEdge {
        direction: Direction,
    },
    PageLoaded {
        token: LoadToken,
        page: HistoryPage,
    },
    PageFailed {
        token: LoadToken,
        error: String,
    },
    TickElapsed {
        generation: Generation,
        batch: BatchId,
    },
    ResourcesSettled {
        generation: Generation,
        batch: BatchId,
        timed_out: usize,
    },
    AlbumResolved {
        generation: Generation,
        grouped_id: GroupedId,
        messages: Vec<Message>,
    },
    MarkReadSettled {
        generation: Generation,
        request: MarkReadRequest,
        error: Option<String>,
    },
    Update(FeedUpdate),
    /// Visibility reported by the host, in addition to what the layout derives.
    EntriesVisible {
        ids: Vec<MessageId>,
    },
    Scrolled {
        scroll_top: f64,
    },
    ViewportResized {
        height: f64,
    },
    SetOnline(bool),
    Destroy,
}
