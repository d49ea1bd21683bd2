//! The external message store seam.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;
use crate::types::{GroupedId, MessageId, PeerId, ThreadId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Peer not found: {peer}")]
    PeerNotFound { peer: PeerId },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Request rejected: {message}")]
    Rejected { message: String },

    #[error("In-memory store lock poisoned: {message}")]
    LockPoisoned { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn lock_poisoned(message: impl Into<String>) -> Self {
        Self::LockPoisoned {
            message: message.into(),
        }
    }
}

/// One page of history around `anchor`.
///
/// Up to `count` ids strictly older than the anchor and up to `back_limit`
/// ids at or newer than it. Without an anchor the newest `count` ids are
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub peer: PeerId,
    pub thread: Option<ThreadId>,
    pub anchor: Option<MessageId>,
    pub count: usize,
    pub back_limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    /// Ascending. May name ids the store cannot resolve.
    pub ids: Vec<MessageId>,
    pub messages: Vec<Message>,
    /// The store's newest known id for the conversation at response time.
    pub newest_id: Option<MessageId>,
}

impl HistoryPage {
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogState {
    pub newest_id: Option<MessageId>,
    pub read_inbound_max: Option<MessageId>,
    pub read_outbound_max: Option<MessageId>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn dialog_state(
        &self,
        peer: PeerId,
        thread: Option<ThreadId>,
    ) -> Result<DialogState, StoreError>;

    async fn request_page(&self, request: &PageRequest) -> Result<HistoryPage, StoreError>;

    /// Serve a page synchronously when the store already holds it.
    fn cached_page(&self, _request: &PageRequest) -> Option<HistoryPage> {
        None
    }

    async fn get_message(
        &self,
        peer: PeerId,
        id: MessageId,
    ) -> Result<Option<Message>, StoreError>;

    async fn get_mids_in_album(
        &self,
        peer: PeerId,
        grouped_id: GroupedId,
    ) -> Result<Vec<MessageId>, StoreError>;

    async fn mark_read(
        &self,
        peer: PeerId,
        max_id: MessageId,
        thread: Option<ThreadId>,
    ) -> Result<(), StoreError>;
}
