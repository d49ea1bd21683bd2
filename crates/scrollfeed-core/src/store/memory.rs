use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

use super::{DialogState, HistoryPage, MessageStore, PageRequest, StoreError};
use crate::message::{Message, MessageFlags};
use crate::types::{GroupedId, MessageId, PeerId, ThreadId};

#[derive(Default)]
struct Conversation {
    messages: BTreeMap<MessageId, Message>,
    /// Ids listed in history whose message cannot be resolved.
    phantoms: BTreeSet<MessageId>,
    read_inbound_max: Option<MessageId>,
    read_outbound_max: Option<MessageId>,
}

impl Conversation {
    fn ids(&self, thread: Option<ThreadId>) -> BTreeSet<MessageId> {
        let mut ids: BTreeSet<MessageId> = self
            .messages
            .values()
            .filter(|m| thread.is_none() || m.thread == thread)
            .map(|m| m.id)
            .collect();
        ids.extend(self.phantoms.iter().copied());
        ids
    }
}

/// A `MessageStore` held entirely in memory, with knobs for latency, failures
/// and cache hits.
pub struct InMemoryStore {
    conversations: RwLock<HashMap<PeerId, Conversation>>,
    latency: Duration,
    serve_from_cache: AtomicBool,
    fail_pages: AtomicUsize,
    fail_mark_reads: AtomicUsize,
    page_log: Mutex<Vec<PageRequest>>,
    mark_read_log: Mutex<Vec<(PeerId, MessageId)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            latency: Duration::ZERO,
            serve_from_cache: AtomicBool::new(false),
            fail_pages: AtomicUsize::new(0),
            fail_mark_reads: AtomicUsize::new(0),
            page_log: Mutex::new(Vec::new()),
            mark_read_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer page requests through `cached_page` instead of `request_page`.
    pub fn set_serve_from_cache(&self, enabled: bool) {
        self.serve_from_cache.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_next_pages(&self, count: usize) {
        self.fail_pages.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_mark_reads(&self, count: usize) {
        self.fail_mark_reads.store(count, Ordering::SeqCst);
    }

    pub fn insert(&self, message: Message) -> Result<(), StoreError> {
        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        conversations
            .entry(message.peer)
            .or_default()
            .messages
            .insert(message.id, message);
        Ok(())
    }

    pub fn insert_phantom(&self, peer: PeerId, id: MessageId) -> Result<(), StoreError> {
        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        conversations.entry(peer).or_default().phantoms.insert(id);
        Ok(())
    }

    pub fn remove(&self, peer: PeerId, ids: &[MessageId]) -> Result<(), StoreError> {
        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        if let Some(conversation) = conversations.get_mut(&peer) {
            for id in ids {
                conversation.messages.remove(id);
            }
        }
        Ok(())
    }

    pub fn set_read_inbound(&self, peer: PeerId, max_id: MessageId) -> Result<(), StoreError> {
        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        let conversation = conversations.entry(peer).or_default();
        conversation.read_inbound_max = conversation.read_inbound_max.max(Some(max_id));
        Ok(())
    }

    pub fn set_read_outbound(&self, peer: PeerId, max_id: MessageId) -> Result<(), StoreError> {
        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        let conversation = conversations.entry(peer).or_default();
        conversation.read_outbound_max = conversation.read_outbound_max.max(Some(max_id));
        Ok(())
    }

    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.page_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn mark_read_calls(&self) -> Vec<(PeerId, MessageId)> {
        self.mark_read_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn record_page(&self, request: &PageRequest) {
        if let Ok(mut log) = self.page_log.lock() {
            log.push(request.clone());
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn build_page(&self, request: &PageRequest) -> Result<HistoryPage, StoreError> {
        let conversations = self
            .conversations
            .read()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        let Some(conversation) = conversations.get(&request.peer) else {
            return Err(StoreError::PeerNotFound { peer: request.peer });
        };

        let all = conversation.ids(request.thread);
        let mut ids: Vec<MessageId> = match request.anchor {
            None => all.iter().rev().take(request.count).copied().collect(),
            Some(anchor) => {
                let older = all.range(..anchor).rev().take(request.count);
                let newer = all.range(anchor..).take(request.back_limit);
                older.chain(newer).copied().collect()
            }
        };
        ids.sort_unstable();

        let messages = ids
            .iter()
            .filter_map(|id| conversation.messages.get(id).cloned())
            .collect();

        Ok(HistoryPage {
            ids,
            messages,
            newest_id: all.last().copied(),
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn dialog_state(
        &self,
        peer: PeerId,
        thread: Option<ThreadId>,
    ) -> Result<DialogState, StoreError> {
        let conversations = self
            .conversations
            .read()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        let Some(conversation) = conversations.get(&peer) else {
            return Err(StoreError::PeerNotFound { peer });
        };
        Ok(DialogState {
            newest_id: conversation.ids(thread).last().copied(),
            read_inbound_max: conversation.read_inbound_max,
            read_outbound_max: conversation.read_outbound_max,
        })
    }

    async fn request_page(&self, request: &PageRequest) -> Result<HistoryPage, StoreError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.record_page(request);
        if Self::take_failure(&self.fail_pages) {
            return Err(StoreError::unavailable("injected page failure"));
        }
        self.build_page(request)
    }

    fn cached_page(&self, request: &PageRequest) -> Option<HistoryPage> {
        if !self.serve_from_cache.load(Ordering::SeqCst) {
            return None;
        }
        self.record_page(request);
        match self.build_page(request) {
            Ok(page) => Some(page),
            Err(e) => {
                debug!(target: "feed.store", "cache miss: {e}");
                None
            }
        }
    }

    async fn get_message(
        &self,
        peer: PeerId,
        id: MessageId,
    ) -> Result<Option<Message>, StoreError> {
        let conversations = self
            .conversations
            .read()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        Ok(conversations
            .get(&peer)
            .and_then(|c| c.messages.get(&id))
            .cloned())
    }

    async fn get_mids_in_album(
        &self,
        peer: PeerId,
        grouped_id: GroupedId,
    ) -> Result<Vec<MessageId>, StoreError> {
        let conversations = self
            .conversations
            .read()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        Ok(conversations
            .get(&peer)
            .map(|c| {
                c.messages
                    .values()
                    .filter(|m| m.grouped_id == Some(grouped_id))
                    .map(|m| m.id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_read(
        &self,
        peer: PeerId,
        max_id: MessageId,
        _thread: Option<ThreadId>,
    ) -> Result<(), StoreError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Ok(mut log) = self.mark_read_log.lock() {
            log.push((peer, max_id));
        }
        if Self::take_failure(&self.fail_mark_reads) {
            return Err(StoreError::unavailable("injected mark-read failure"));
        }

        let mut conversations = self
            .conversations
            .write()
            .map_err(|_| StoreError::lock_poisoned("conversations"))?;
        let conversation = conversations
            .get_mut(&peer)
            .ok_or(StoreError::PeerNotFound { peer })?;
        conversation.read_inbound_max = conversation.read_inbound_max.max(Some(max_id));
        for message in conversation.messages.range_mut(..=max_id).map(|(_, m)| m) {
            if !message.is_outgoing() {
                message.flags.remove(MessageFlags::UNREAD);
            }
        }
        Ok(())
    }
}
