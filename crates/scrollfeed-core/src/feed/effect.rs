use std::time::Duration;

use crate::render::ResourceKey;
use crate::store::PageRequest;
use crate::types::{
    BatchId, Direction, Generation, GroupedId, LoadToken, MessageId, PeerId, ThreadId,
};

use super::read_tracker::MarkReadRequest;

/// Work the engine asks its runtime to perform. Every completion is fed back
/// as a [`super::FeedAction`] carrying the generation or token it was issued
/// with.
#[derive(Debug, Clone)]
pub enum FeedEffect {
    FetchDialogState {
        generation: Generation,
        peer: PeerId,
        thread: Option<ThreadId>,
    },
    RequestPage {
        token: LoadToken,
        request: PageRequest,
        preload_only: bool,
    },
    ScheduleTick {
        generation: Generation,
        batch: BatchId,
        delay: Duration,
    },
    AwaitResources {
        generation: Generation,
        batch: BatchId,
        resources: Vec<ResourceKey>,
        cap: Duration,
    },
    ResolveAlbum {
        generation: Generation,
        peer: PeerId,
        grouped_id: GroupedId,
    },
    MarkRead {
        generation: Generation,
        peer: PeerId,
        thread: Option<ThreadId>,
        request: MarkReadRequest,
    },
    Notify(FeedNotice),
}

/// Broadcast to subscribers of a running feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedNotice {
    ConversationOpened {
        peer: PeerId,
        thread: Option<ThreadId>,
    },
    Ready,
    Committed {
        batch: BatchId,
        ids: Vec<MessageId>,
        scroll_top: f64,
        content_height: f64,
    },
    Evicted {
        side: Direction,
        ids: Vec<MessageId>,
    },
    ReachedEdge {
        direction: Direction,
    },
    LoadFailed {
        direction: Direction,
        error: String,
    },
    ReadAdvanced {
        max_id: MessageId,
    },
    Destroyed,
}
