use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::feed::{FeedAction, MarkReadRequest};
use crate::message::Message;
use crate::render::{ResourceKey, ResourceLoader};
use crate::store::{HistoryPage, MessageStore, PageRequest, StoreError};
use crate::types::{BatchId, Generation, GroupedId, LoadToken, PeerId, ThreadId};

/// Performs the asynchronous half of each effect and turns the outcome back
/// into the action the engine expects.
#[derive(Clone)]
pub struct EffectInterpreter {
    store: Arc<dyn MessageStore>,
    loader: Arc<dyn ResourceLoader>,
}

impl EffectInterpreter {
    pub fn new(store: Arc<dyn MessageStore>, loader: Arc<dyn ResourceLoader>) -> Self {
        Self { store, loader }
    }

    pub fn cached_page(&self, request: &PageRequest) -> Option<HistoryPage> {
        self.store.cached_page(request)
    }

    pub async fn dialog_state(
        &self,
        generation: Generation,
        peer: PeerId,
        thread: Option<ThreadId>,
    ) -> FeedAction {
        match self.store.dialog_state(peer, thread).await {
            Ok(state) => FeedAction::DialogStateLoaded { generation, state },
            Err(e) => FeedAction::DialogStateFailed {
                generation,
                error: e.to_string(),
            },
        }
    }

    pub async fn request_page(&self, token: LoadToken, request: PageRequest) -> FeedAction {
        match self.store.request_page(&request).await {
            Ok(page) => FeedAction::PageLoaded { token, page },
            Err(e) => FeedAction::PageFailed {
                token,
                error: e.to_string(),
            },
        }
    }

    /// Wait for every resource, each capped at `cap`. Slow resources are
    /// counted, not awaited further.
    pub async fn await_resources(
        &self,
        generation: Generation,
        batch: BatchId,
        resources: Vec<ResourceKey>,
        cap: Duration,
    ) -> FeedAction {
        let waits = resources.iter().map(|key| {
            let loader = self.loader.clone();
            async move { tokio::time::timeout(cap, loader.wait_ready(key)).await.is_err() }
        });
        let timed_out = join_all(waits).await.into_iter().filter(|slow| *slow).count();
        FeedAction::ResourcesSettled {
            generation,
            batch,
            timed_out,
        }
    }

    pub async fn resolve_album(
        &self,
        generation: Generation,
        peer: PeerId,
        grouped_id: GroupedId,
    ) -> FeedAction {
        let messages = match self.album_messages(peer, grouped_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(target: "feed.runtime", %grouped_id, "album lookup failed: {e}");
                Vec::new()
            }
        };
        FeedAction::AlbumResolved {
            generation,
            grouped_id,
            messages,
        }
    }

    async fn album_messages(
        &self,
        peer: PeerId,
        grouped_id: GroupedId,
    ) -> Result<Vec<Message>, StoreError> {
        let ids = self.store.get_mids_in_album(peer, grouped_id).await?;
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_message(peer, id).await? {
                Some(message) => messages.push(message),
                None => debug!(target: "feed.runtime", %id, "album member vanished"),
            }
        }
        Ok(messages)
    }

    pub async fn mark_read(
        &self,
        generation: Generation,
        peer: PeerId,
        thread: Option<ThreadId>,
        request: MarkReadRequest,
    ) -> FeedAction {
        let error = self
            .store
            .mark_read(peer, request.max_id, thread)
            .await
            .err()
            .map(|e| e.to_string());
        FeedAction::MarkReadSettled {
            generation,
            request,
            error,
        }
    }
}
