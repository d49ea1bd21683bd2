use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use strum::Display;
use tracing::{debug, info, trace, warn};

use super::action::{FeedAction, FeedUpdate};
use super::date_segmenter::{DateSegmenter, Placement, bucket_label};
use super::effect::{FeedEffect, FeedNotice};
use super::grouping::{GroupItem, GroupingEngine};
use super::layout::{
    AnchorCapture, Row, RowKind, Viewport, build_rows, content_height, sticky_day, visible_ids,
};
use super::pagination::{ActiveLoad, LoadPhase, PaginationController};
use super::read_tracker::{MarkReadRequest, ReadCursor, ReadTracker};
use super::render_queue::{QueuedEntry, RenderQueue, placement_for};
use super::snapshot::{FeedSnapshot, SnapshotBucket, SnapshotEntry};
use super::window::{FeedEntry, FeedWindow};
use crate::config::FeedConfig;
use crate::message::Message;
use crate::render::{EntryRenderer, RenderContext, Rendered, ResourceKey};
use crate::store::{DialogState, HistoryPage};
use crate::types::{
    BatchId, Direction, Generation, GroupedId, HandleId, LoadMode, LoadOutcome, LoadToken,
    MessageId, PeerId, ThreadId,
};

/// How close to the bottom still counts as "at the bottom" for live appends.
const BOTTOM_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FeedPhase {
    Empty,
    Loading,
    Ready,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conversation {
    peer: PeerId,
    thread: Option<ThreadId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScrollTarget {
    Bottom,
    Entry(MessageId),
}

/// One feed instance: a synchronous reducer over [`FeedAction`]s.
///
/// All asynchronous work leaves as [`FeedEffect`]s and comes back as actions
/// stamped with the window generation (or load token) current when the work
/// was issued. Anything stamped with an older generation is dropped.
pub struct FeedEngine {
    config: FeedConfig,
    renderer: Arc<dyn EntryRenderer>,
    phase: FeedPhase,
    conversation: Option<Conversation>,
    window: FeedWindow,
    segmenter: DateSegmenter,
    grouping: GroupingEngine,
    queue: RenderQueue,
    reads: ReadTracker,
    pagination: PaginationController,
    viewport: Viewport,
    rows: Vec<Row>,
    next_handle: u64,
    newest_known: Option<MessageId>,
    pending_target: Option<MessageId>,
    scroll_target: Option<ScrollTarget>,
    unread_floor: Option<MessageId>,
    delimiter_placed: bool,
    /// Mode and anchor of an initial load that failed, replayed by the next
    /// edge request while the window is still empty.
    retry_initial: Option<(LoadMode, Option<MessageId>)>,
}

impl FeedEngine {
    pub fn new(config: FeedConfig, renderer: Arc<dyn EntryRenderer>) -> Self {
        Self {
            segmenter: DateSegmenter::new(config.utc_offset_secs),
            grouping: GroupingEngine::new(
                config.group_proximity_secs,
                config.kind.positions_by_timestamp(),
            ),
            reads: ReadTracker::new(config.mark_read_retries),
            pagination: PaginationController::new(&config),
            viewport: Viewport::new(0.0),
            renderer,
            phase: FeedPhase::Empty,
            conversation: None,
            window: FeedWindow::new(),
            queue: RenderQueue::new(),
            rows: Vec::new(),
            next_handle: 0,
            newest_known: None,
            pending_target: None,
            scroll_target: None,
            unread_floor: None,
            delimiter_placed: false,
            retry_initial: None,
            config,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.window.generation()
    }

    pub fn window(&self) -> &FeedWindow {
        &self.window
    }

    pub fn segmenter(&self) -> &DateSegmenter {
        &self.segmenter
    }

    pub fn grouping(&self) -> &GroupingEngine {
        &self.grouping
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn read_cursor(&self) -> ReadCursor {
        self.reads.cursor()
    }

    pub fn newest_known(&self) -> Option<MessageId> {
        self.newest_known
    }

    pub fn is_fully_loaded(&self, direction: Direction) -> bool {
        self.window.reached(direction)
    }

    pub fn is_loading(&self, direction: Direction) -> bool {
        self.window.outstanding(direction).is_some()
    }

    pub fn is_render_idle(&self) -> bool {
        self.queue.is_idle()
    }

    pub fn handle(&mut self, action: FeedAction) -> Vec<FeedEffect> {
        if self.phase == FeedPhase::Destroyed {
            debug!(target: "feed.engine", ?action, "feed destroyed; ignoring action");
            return Vec::new();
        }

        match action {
            FeedAction::SetConversation {
                peer,
                thread,
                target,
            } => self.set_conversation(peer, thread, target),
            FeedAction::DialogStateLoaded { generation, state } => {
                self.dialog_state_loaded(generation, state)
            }
            FeedAction::DialogStateFailed { generation, error } => {
                if generation != self.generation() {
                    return Vec::new();
                }
                warn!(target: "feed.pagination", "dialog state unavailable: {error}");
                self.dialog_state_loaded(generation, DialogState::default())
            }
            FeedAction::LoadMore {
                direction,
                mode,
                anchor,
                preload_only,
            } => self.load_more(direction, mode, anchor, preload_only).1,
            FeedAction::ScrollReachedEdge { direction } => {
                self.load_more(direction, LoadMode::Extend, None, false).1
            }
            FeedAction::PageLoaded { token, page } => self.page_loaded(token, page),
            FeedAction::PageFailed { token, error } => self.page_failed(token, error),
            FeedAction::TickElapsed { generation, batch } => self.tick_elapsed(generation, batch),
            FeedAction::ResourcesSettled {
                generation,
                batch,
                timed_out,
            } => {
                if generation != self.generation() {
                    debug!(target: "feed.render", %generation, "stale readiness result");
                    return Vec::new();
                }
                if timed_out > 0 {
                    debug!(target: "feed.render", %batch, timed_out, "committing without waiting for slow resources");
                }
                self.commit(batch)
            }
            FeedAction::AlbumResolved {
                generation,
                grouped_id,
                messages,
            } => {
                if generation != self.generation() {
                    return Vec::new();
                }
                self.album_resolved(grouped_id, messages)
            }
            FeedAction::MarkReadSettled {
                generation,
                request,
                error,
            } => self.mark_read_settled(generation, request, error),
            FeedAction::Update(update) => self.ingest(update),
            FeedAction::EntriesVisible { ids } => self.observe_visibility(&ids),
            FeedAction::Scrolled { scroll_top } => self.scrolled(scroll_top),
            FeedAction::ViewportResized { height } => {
                self.viewport.height = height.max(0.0);
                self.viewport.clamp();
                self.after_layout_change()
            }
            FeedAction::SetOnline(online) => {
                self.reads.set_online(online);
                if online {
                    self.after_layout_change()
                } else {
                    Vec::new()
                }
            }
            FeedAction::Destroy => self.destroy(),
        }
    }

    // Lifecycle

    fn set_conversation(
        &mut self,
        peer: PeerId,
        thread: Option<ThreadId>,
        target: Option<MessageId>,
    ) -> Vec<FeedEffect> {
        self.teardown();
        self.conversation = Some(Conversation { peer, thread });
        self.pending_target = target;
        self.phase = FeedPhase::Loading;
        info!(target: "feed.pagination", %peer, ?thread, ?target, "opening conversation");

        vec![
            FeedEffect::Notify(FeedNotice::ConversationOpened { peer, thread }),
            FeedEffect::FetchDialogState {
                generation: self.generation(),
                peer,
                thread,
            },
        ]
    }

    fn dialog_state_loaded(&mut self, generation: Generation, state: DialogState) -> Vec<FeedEffect> {
        if generation != self.generation() || self.phase != FeedPhase::Loading {
            debug!(target: "feed.pagination", %generation, "stale dialog state");
            return Vec::new();
        }

        self.newest_known = state.newest_id;
        self.reads.reset(ReadCursor {
            max_read_inbound: state.read_inbound_max,
            max_read_outbound: state.read_outbound_max,
        });

        let conversation_feed = self.config.kind.is_conversation();
        let has_unread = matches!(
            (state.read_inbound_max, state.newest_id),
            (Some(read), Some(newest)) if read < newest
        );
        if conversation_feed && has_unread {
            self.unread_floor = state.read_inbound_max;
        }

        let (mode, anchor) = match self.pending_target.take() {
            Some(target) => (LoadMode::JumpTo, Some(target)),
            None if conversation_feed && has_unread => {
                (LoadMode::JumpTo, state.read_inbound_max)
            }
            None => (LoadMode::Extend, None),
        };
        self.scroll_target = Some(match anchor {
            Some(id) => ScrollTarget::Entry(id),
            None => ScrollTarget::Bottom,
        });

        self.start_load(Direction::Top, mode, anchor, false, true).1
    }

    fn clear_window(&mut self) {
        self.window.teardown();
        self.segmenter.clear();
        self.grouping.clear();
        self.queue.clear();
        self.reads.reset(self.reads.cursor());
        self.pagination.reset();
        self.rows.clear();
        self.viewport.scroll_top = 0.0;
        self.viewport.content_height = 0.0;
        self.viewport.user_scrolled = false;
        self.scroll_target = None;
    }

    fn teardown(&mut self) {
        self.clear_window();
        self.reads.reset(ReadCursor::default());
        self.conversation = None;
        self.newest_known = None;
        self.pending_target = None;
        self.unread_floor = None;
        self.delimiter_placed = false;
        self.retry_initial = None;
    }

    fn destroy(&mut self) -> Vec<FeedEffect> {
        self.teardown();
        self.phase = FeedPhase::Destroyed;
        info!(target: "feed.engine", "feed destroyed");
        vec![FeedEffect::Notify(FeedNotice::Destroyed)]
    }

    // Pagination

    /// Request the next page in `direction`. Without an anchor an `Extend`
    /// grows from the current window edge.
    pub fn load_more(
        &mut self,
        direction: Direction,
        mode: LoadMode,
        anchor: Option<MessageId>,
        preload_only: bool,
    ) -> (LoadOutcome, Vec<FeedEffect>) {
        if let Some(token) = self.window.outstanding(direction) {
            return (LoadOutcome::InFlight(token), Vec::new());
        }
        if self.phase != FeedPhase::Ready {
            return (LoadOutcome::Idle, Vec::new());
        }

        match mode {
            LoadMode::Extend => {
                if self.window.is_empty()
                    && let Some((mode, anchor)) = self.retry_initial
                {
                    info!(target: "feed.pagination", ?anchor, "retrying initial load");
                    self.phase = FeedPhase::Loading;
                    self.scroll_target = Some(match anchor {
                        Some(id) => ScrollTarget::Entry(id),
                        None => ScrollTarget::Bottom,
                    });
                    return self.start_load(Direction::Top, mode, anchor, false, true);
                }
                if self.window.reached(direction) {
                    return (LoadOutcome::FullyLoaded, Vec::new());
                }
                if direction == Direction::Bottom
                    && let Some(newest) = self.newest_known
                    && self.window.contains(newest)
                {
                    let effects = self.mark_reached(Direction::Bottom);
                    return (LoadOutcome::FullyLoaded, effects);
                }
                let Some(anchor) = anchor.or_else(|| self.window.edge(direction)) else {
                    return (LoadOutcome::Idle, Vec::new());
                };
                self.start_load(direction, mode, Some(anchor), preload_only, false)
            }
            LoadMode::JumpTo => {
                let Some(target) = anchor else {
                    return (LoadOutcome::Idle, Vec::new());
                };
                if self.window.contains(target) {
                    self.scroll_to_entry(target);
                    let effects = self.after_layout_change();
                    return (LoadOutcome::Idle, effects);
                }
                info!(target: "feed.pagination", %target, "jumping outside the window");
                self.clear_window();
                self.phase = FeedPhase::Loading;
                self.scroll_target = Some(ScrollTarget::Entry(target));
                self.start_load(Direction::Top, mode, Some(target), false, true)
            }
        }
    }

    fn start_load(
        &mut self,
        direction: Direction,
        mode: LoadMode,
        anchor: Option<MessageId>,
        preload_only: bool,
        initial: bool,
    ) -> (LoadOutcome, Vec<FeedEffect>) {
        let Some(conversation) = self.conversation else {
            return (LoadOutcome::Idle, Vec::new());
        };
        let page = self
            .pagination
            .page_size(self.window.len(), self.viewport.height);
        let Some(token) = self.window.acquire(direction) else {
            return match self.window.outstanding(direction) {
                Some(token) => (LoadOutcome::InFlight(token), Vec::new()),
                None => (LoadOutcome::Idle, Vec::new()),
            };
        };
        if initial {
            self.retry_initial = None;
        }
        let request = self.pagination.request(
            conversation.peer,
            conversation.thread,
            direction,
            mode,
            anchor,
            page,
        );
        self.pagination.begin(ActiveLoad {
            token,
            mode,
            anchor,
            page,
            preload_only,
            initial,
            phase: LoadPhase::Fetching,
        });
        debug!(
            target: "feed.pagination",
            %token,
            ?anchor,
            count = request.count,
            back_limit = request.back_limit,
            preload_only,
            "page requested"
        );

        (
            LoadOutcome::Started(token),
            vec![FeedEffect::RequestPage {
                token,
                request,
                preload_only,
            }],
        )
    }

    fn page_loaded(&mut self, token: LoadToken, page: HistoryPage) -> Vec<FeedEffect> {
        if !self.window.is_current(token) {
            debug!(target: "feed.pagination", %token, "dropping stale page");
            return Vec::new();
        }
        let direction = token.direction;
        let Some(load) = self.pagination.active(direction).cloned() else {
            self.window.release(token);
            return Vec::new();
        };

        if let Some(newest) = page.newest_id {
            self.newest_known = self.newest_known.max(Some(newest));
        }

        if load.preload_only {
            trace!(target: "feed.pagination", %token, ids = page.ids.len(), "preload finished");
            self.pagination.finish(direction);
            self.window.release(token);
            return Vec::new();
        }

        let mut effects = self.merge_page(&load, page);
        if self.queue.has_pending() {
            self.pagination
                .mark_rendering(direction, self.queue.pending_batch());
        } else {
            effects.extend(self.settle_load(direction));
        }
        effects
    }

    fn page_failed(&mut self, token: LoadToken, error: String) -> Vec<FeedEffect> {
        if !self.window.is_current(token) {
            debug!(target: "feed.pagination", %token, "dropping stale failure");
            return Vec::new();
        }
        warn!(target: "feed.pagination", %token, "page load failed: {error}");
        let failed = self.pagination.finish(token.direction);
        self.window.release(token);
        if let Some(load) = failed.filter(|load| load.initial) {
            self.retry_initial = Some((load.mode, load.anchor));
            self.phase = FeedPhase::Ready;
        }
        vec![FeedEffect::Notify(FeedNotice::LoadFailed {
            direction: token.direction,
            error,
        })]
    }

    /// Fold a page into the window and queue its new entries.
    fn merge_page(&mut self, load: &ActiveLoad, page: HistoryPage) -> Vec<FeedEffect> {
        let mut effects = Vec::new();
        let direction = load.token.direction;

        if page.ids.is_empty() {
            let edge = match (load.mode, direction) {
                (LoadMode::Extend, Direction::Top) => Direction::Top,
                _ => Direction::Bottom,
            };
            effects.extend(self.mark_reached(edge));
        }
        if let Some(newest) = self.newest_known
            && page.ids.contains(&newest)
        {
            effects.extend(self.mark_reached(Direction::Bottom));
        }
        if load.initial && load.anchor.is_none() {
            effects.extend(self.mark_reached(Direction::Bottom));
        }

        let units = self.collapse_page(page);
        let prepend = direction == Direction::Top;
        let ordered: Box<dyn Iterator<Item = Vec<Message>>> = if prepend {
            Box::new(units.into_iter().rev())
        } else {
            Box::new(units.into_iter())
        };

        let mut mounted = 0usize;
        for unit in ordered {
            effects.extend(self.mount_unit(unit, prepend, false));
            mounted += 1;
        }
        debug!(target: "feed.pagination", token = %load.token, mounted, "page merged");
        effects
    }

    /// Resolve page ids into mountable units: skips ids already in the window
    /// and ids the store could not resolve, and folds album members together.
    fn collapse_page(&self, page: HistoryPage) -> Vec<Vec<Message>> {
        let Some(conversation) = self.conversation else {
            return Vec::new();
        };
        let mut by_id: HashMap<MessageId, Message> =
            page.messages.into_iter().map(|m| (m.id, m)).collect();
        let mut units: Vec<Vec<Message>> = Vec::new();
        let mut album_slots: HashMap<GroupedId, usize> = HashMap::new();

        for id in page.ids {
            let Some(message) = by_id.remove(&id) else {
                debug!(target: "feed.pagination", %id, "skipping unresolved message");
                continue;
            };
            if message.is_deleted() || !message.belongs_to(conversation.peer, conversation.thread) {
                continue;
            }
            if let Some(grouped_id) = message.grouped_id
                && self.window.album_entry(grouped_id).is_some()
            {
                if !self.window.contains(id) {
                    units.push(vec![message]);
                }
                continue;
            }
            if self.window.contains(id) {
                continue;
            }
            match message.grouped_id.and_then(|g| album_slots.get(&g).copied()) {
                Some(slot) => {
                    if let Some(unit) = units.get_mut(slot) {
                        unit.push(message);
                    }
                }
                None => {
                    if let Some(grouped_id) = message.grouped_id {
                        album_slots.insert(grouped_id, units.len());
                    }
                    units.push(vec![message]);
                }
            }
        }
        for unit in &mut units {
            unit.sort_by_key(|m| m.id);
        }
        units
    }

    /// Mount a unit as a new entry, or fold it into the album entry it
    /// belongs to.
    fn mount_unit(&mut self, unit: Vec<Message>, prepend: bool, stick: bool) -> Vec<FeedEffect> {
        let Some(primary) = unit.last() else {
            return Vec::new();
        };
        if let Some(grouped_id) = primary.grouped_id
            && let Some(key) = self.window.album_entry(grouped_id)
        {
            let mut messages = self
                .window
                .get(key)
                .map(|entry| entry.messages.clone())
                .unwrap_or_default();
            for message in unit {
                if !messages.iter().any(|m| m.id == message.id) {
                    messages.push(message);
                }
            }
            messages.sort_by_key(|m| m.id);
            return self.replace_content(key, messages);
        }

        match self.mount(unit, None) {
            Some((id, pending)) => {
                let mut queued = QueuedEntry::new(id, prepend);
                queued.pending = pending;
                queued.stick_to_bottom = stick;
                self.enqueue(queued)
            }
            None => Vec::new(),
        }
    }

    /// Create and record a new entry. Returns its id and pending resources.
    fn mount(
        &mut self,
        messages: Vec<Message>,
        reuse: Option<HandleId>,
    ) -> Option<(MessageId, Vec<ResourceKey>)> {
        let primary = messages.last()?.clone();
        if messages.iter().any(|m| self.window.contains(m.id)) {
            return None;
        }
        let handle = reuse.unwrap_or_else(|| self.allocate_handle());
        let rendered = self.render(&messages, handle);
        let day = self.segmenter.bucket_for(primary.id, primary.timestamp);

        let unread_inbound = self.config.kind.is_conversation()
            && !primary.is_outgoing()
            && messages.iter().any(Message::is_unread);
        let unread_observed = unread_inbound && self.reads.observe(primary.id);
        let read_by_peer = primary.is_outgoing()
            && self
                .reads
                .cursor()
                .max_read_outbound
                .is_some_and(|max| primary.id <= max);

        let entry = FeedEntry {
            id: primary.id,
            timestamp: primary.timestamp,
            day,
            group: None,
            handle: rendered.handle,
            sender: primary.sender,
            outgoing: primary.is_outgoing(),
            service: primary.is_service(),
            unread_observed,
            grouped_id: primary.grouped_id,
            messages,
            committed: false,
            read_by_peer,
            first_unread: false,
        };
        if !self.window.insert(entry) {
            self.segmenter.release(primary.id);
            self.reads.unobserve(primary.id);
            return None;
        }
        trace!(target: "feed.render", id = %primary.id, %day, "entry mounted");
        Some((primary.id, rendered.pending))
    }

    /// Remove an entry and every back-reference to it.
    fn unmount(&mut self, id: MessageId) -> Option<FeedEntry> {
        let entry = self.window.remove(id)?;
        self.segmenter.release(entry.id);
        let touched = self.grouping.remove_entry(entry.id);
        self.sync_groups(&touched);
        self.reads.unobserve(entry.id);
        self.queue.cancel(entry.id);
        trace!(target: "feed.render", id = %entry.id, "entry unmounted");
        Some(entry)
    }

    /// Re-render an existing entry with new content, keeping its handle.
    fn replace_content(&mut self, key: MessageId, messages: Vec<Message>) -> Vec<FeedEffect> {
        let Some(primary) = messages.last().cloned() else {
            self.unmount(key);
            return self.relayout_and_observe();
        };
        let Some(entry) = self.window.get(key) else {
            return Vec::new();
        };
        let key = entry.id;
        let handle = entry.handle.id;
        let committed = entry.committed;
        let old_day = entry.day;
        let old_timestamp = entry.timestamp;

        let new_id = primary.id;
        // Every id of the new content must be free or already owned by `key`.
        if let Some((id, owner)) = messages.iter().find_map(|m| {
            self.window
                .resolve(m.id)
                .filter(|owner| *owner != key)
                .map(|owner| (m.id, owner))
        }) {
            warn!(target: "feed.render", %key, %id, %owner, "content id belongs to another entry");
            return Vec::new();
        }
        let rendered = self.render(&messages, handle);
        let new_day = self.segmenter.day_of(primary.timestamp);
        let reposition = committed
            && (new_id != key
                || new_day != old_day
                || (self.config.kind.positions_by_timestamp()
                    && old_timestamp != primary.timestamp));

        if new_id != key {
            if committed {
                let touched = self.grouping.remove_entry(key);
                self.sync_groups(&touched);
            }
            self.segmenter.rekey(key, new_id);
            self.queue.rekey(key, new_id);
            if self.reads.is_observed(key) {
                self.reads.unobserve(key);
                self.reads.observe(new_id);
            }
            if !self.window.rekey(key, new_id, messages.clone()) {
                warn!(target: "feed.render", %key, %new_id, "could not rekey entry");
                return Vec::new();
            }
        }
        let day = self.segmenter.bucket_for(new_id, primary.timestamp);

        if let Some(entry) = self.window.get_mut(new_id) {
            entry.timestamp = primary.timestamp;
            entry.day = day;
            entry.sender = primary.sender;
            entry.outgoing = primary.is_outgoing();
            entry.service = primary.is_service();
            entry.grouped_id = primary.grouped_id;
            entry.messages = messages;
        }

        let Rendered { handle, pending } = rendered;
        let mut queued = QueuedEntry::new(new_id, false);
        queued.update_position = reposition;
        queued.staged = Some(handle);
        queued.pending = pending;
        self.enqueue(queued)
    }

    fn enqueue(&mut self, queued: QueuedEntry) -> Vec<FeedEffect> {
        let enqueued = self.queue.enqueue(queued);
        if enqueued.schedule {
            vec![FeedEffect::ScheduleTick {
                generation: self.generation(),
                batch: enqueued.batch,
                delay: self.config.commit_tick(),
            }]
        } else {
            Vec::new()
        }
    }

    fn mark_reached(&mut self, direction: Direction) -> Vec<FeedEffect> {
        if self.window.set_reached(direction, true) {
            debug!(target: "feed.pagination", %direction, "edge reached");
            vec![FeedEffect::Notify(FeedNotice::ReachedEdge { direction })]
        } else {
            Vec::new()
        }
    }

    /// Called once every entry of a load has been committed.
    fn settle_load(&mut self, direction: Direction) -> Vec<FeedEffect> {
        let Some(load) = self.pagination.finish(direction) else {
            return Vec::new();
        };
        self.window.release(load.token);
        let mut effects = Vec::new();

        if load.initial {
            self.phase = FeedPhase::Ready;
            self.place_unread_delimiter();
            info!(target: "feed.pagination", entries = self.window.len(), "conversation ready");
            effects.push(FeedEffect::Notify(FeedNotice::Ready));
        } else {
            self.pagination.record_settled(direction);
            effects.extend(self.evict_after(direction, &load));
        }

        if self.config.preload_after_load
            && self.config.kind.is_conversation()
            && !self.window.reached(direction)
            && self.phase == FeedPhase::Ready
        {
            let edge = self.window.edge(direction);
            if edge.is_some() {
                effects.extend(
                    self.start_load(direction, LoadMode::Extend, edge, true, false)
                        .1,
                );
            }
        }
        effects
    }

    fn evict_after(&mut self, direction: Direction, load: &ActiveLoad) -> Vec<FeedEffect> {
        let mut protected: BTreeSet<MessageId> =
            visible_ids(&self.rows, &self.viewport).into_iter().collect();
        protected.extend(load.anchor.and_then(|a| self.window.resolve(a)));

        let Some(eviction) =
            self.pagination
                .plan_eviction(direction, &self.window.ids(), load.page, &protected)
        else {
            return Vec::new();
        };

        let capture = AnchorCapture::capture(
            &self.rows,
            &self.viewport,
            eviction.side == Direction::Top,
        );
        for id in &eviction.ids {
            self.unmount(*id);
        }
        self.window.set_reached(eviction.side, false);
        self.relayout();
        self.viewport.scroll_top = capture.restore(&self.rows, self.viewport.content_height);
        self.viewport.clamp();

        info!(
            target: "feed.pagination",
            side = %eviction.side,
            count = eviction.ids.len(),
            remaining = self.window.len(),
            "evicted entries"
        );
        vec![FeedEffect::Notify(FeedNotice::Evicted {
            side: eviction.side,
            ids: eviction.ids,
        })]
    }

    // Rendering

    fn allocate_handle(&mut self) -> HandleId {
        self.next_handle += 1;
        HandleId(self.next_handle)
    }

    fn render(&self, messages: &[Message], handle: HandleId) -> Rendered {
        self.renderer.render(
            messages,
            &RenderContext {
                handle,
                width: self.config.render_width,
                kind: self.config.kind,
            },
        )
    }

    fn tick_elapsed(&mut self, generation: Generation, batch: BatchId) -> Vec<FeedEffect> {
        if generation != self.generation() {
            debug!(target: "feed.render", %generation, "stale tick");
            return Vec::new();
        }
        let Some(commit) = self.queue.start(batch) else {
            trace!(target: "feed.render", %batch, "nothing to commit");
            return Vec::new();
        };
        let resources = commit.resources();
        if resources.is_empty() {
            return self.commit(batch);
        }
        debug!(target: "feed.render", %batch, count = resources.len(), "awaiting resources");
        vec![FeedEffect::AwaitResources {
            generation,
            batch,
            resources,
            cap: self.config.media_ready_cap(),
        }]
    }

    /// Place a batch on the surface with the scroll anchor preserved.
    fn commit(&mut self, batch: BatchId) -> Vec<FeedEffect> {
        let Some(commit) = self.queue.finish(batch) else {
            return Vec::new();
        };

        let prepend = commit.has_prepend();
        let was_at_bottom = self.viewport.is_at_bottom(BOTTOM_TOLERANCE);
        let capture = (self.viewport.content_height > 0.0
            && (prepend || self.config.anchor_appends))
            .then(|| AnchorCapture::capture(&self.rows, &self.viewport, prepend));

        let mut committed = Vec::with_capacity(commit.entries.len());
        let mut touched = Vec::new();
        let mut stick = false;

        for queued in commit.entries {
            let Some(id) = self.window.resolve(queued.id) else {
                trace!(target: "feed.render", id = %queued.id, "entry gone before commit");
                continue;
            };
            stick |= queued.stick_to_bottom;

            let Some(entry) = self.window.get_mut(id) else {
                continue;
            };
            if let Some(handle) = queued.staged {
                entry.handle = handle;
            }
            let was_committed = entry.committed;
            entry.committed = true;
            let item = group_item(entry);

            if was_committed && !queued.update_position {
                touched.extend(self.grouping.update_group_for_id(item));
            } else {
                if was_committed {
                    self.segmenter.unplace(id);
                    touched.extend(self.grouping.remove_entry(id));
                }
                let placement = self.placement(id, queued.prepend);
                self.segmenter.place(id, placement);
                touched.extend(self.grouping.add_entry(item, queued.prepend));
            }
            committed.push(id);
        }
        self.sync_groups(&touched);
        self.relayout();

        if let Some(capture) = capture {
            self.viewport.scroll_top = capture.restore(&self.rows, self.viewport.content_height);
            self.viewport.clamp();
        }
        if stick && was_at_bottom {
            self.viewport.scroll_to_bottom();
        }
        match self.scroll_target {
            Some(ScrollTarget::Bottom) => {
                self.viewport.scroll_to_bottom();
                self.scroll_target = None;
            }
            Some(ScrollTarget::Entry(target)) => {
                if self.scroll_to_entry(target) {
                    self.scroll_target = None;
                }
            }
            None => {}
        }
        debug_assert!(self.buckets_ordered());

        debug!(
            target: "feed.render",
            %batch,
            count = committed.len(),
            scroll_top = self.viewport.scroll_top,
            content_height = self.viewport.content_height,
            "batch committed"
        );
        let mut effects = vec![FeedEffect::Notify(FeedNotice::Committed {
            batch,
            ids: committed,
            scroll_top: self.viewport.scroll_top,
            content_height: self.viewport.content_height,
        })];

        for direction in self.pagination.settled_by(batch) {
            effects.extend(self.settle_load(direction));
        }
        effects.extend(self.after_layout_change());

        if let Some(next) = self.queue.next_tick() {
            effects.push(FeedEffect::ScheduleTick {
                generation: self.generation(),
                batch: next,
                delay: self.config.commit_tick(),
            });
        }
        effects
    }

    fn placement(&self, id: MessageId, prepend: bool) -> Placement {
        let sorted_insert = self.config.kind.positions_by_timestamp();
        let Some(entry) = self.window.get(id) else {
            return Placement::End;
        };
        let key = self.sort_key(entry);
        let siblings: Vec<(i64, MessageId)> = self
            .segmenter
            .day_for_id(id)
            .and_then(|day| self.segmenter.bucket(day))
            .map(|bucket| {
                bucket
                    .order()
                    .iter()
                    .filter(|sibling| **sibling != id)
                    .filter_map(|sibling| self.window.get(*sibling))
                    .map(|sibling| self.sort_key(sibling))
                    .collect()
            })
            .unwrap_or_default();
        placement_for(sorted_insert, prepend, &siblings, key)
    }

    fn sort_key(&self, entry: &FeedEntry) -> (i64, MessageId) {
        if self.config.kind.positions_by_timestamp() {
            (entry.timestamp, entry.id)
        } else {
            (entry.id.0, entry.id)
        }
    }

    fn buckets_ordered(&self) -> bool {
        self.segmenter.buckets().all(|bucket| {
            let keys: Vec<(i64, MessageId)> = bucket
                .order()
                .iter()
                .filter_map(|id| self.window.get(*id))
                .map(|entry| self.sort_key(entry))
                .collect();
            keys.windows(2).all(|pair| pair[0] < pair[1])
        })
    }

    fn sync_groups(&mut self, touched: &[MessageId]) {
        for id in touched {
            let group = self.grouping.group_of(*id);
            if let Some(entry) = self.window.get_mut(*id) {
                entry.group = group;
            }
        }
    }

    fn relayout(&mut self) {
        self.rows = build_rows(&self.segmenter, &self.window, self.config.separator_height);
        self.viewport.content_height = content_height(&self.rows);
        self.viewport.clamp();
    }

    fn relayout_and_observe(&mut self) -> Vec<FeedEffect> {
        self.relayout();
        self.after_layout_change()
    }

    fn scroll_to_entry(&mut self, target: MessageId) -> bool {
        let target = self.window.resolve(target).unwrap_or(target);
        let row = self
            .rows
            .iter()
            .find(|row| matches!(row.kind, RowKind::Entry(id) if id >= target))
            .copied();
        match row {
            Some(row) => {
                self.viewport.center_on(&row);
                true
            }
            None => false,
        }
    }

    /// Sticky bucket and read visibility follow every layout or scroll change.
    fn after_layout_change(&mut self) -> Vec<FeedEffect> {
        let sticky = sticky_day(&self.rows, &self.viewport);
        self.segmenter.set_sticky(sticky);
        let visible = visible_ids(&self.rows, &self.viewport);
        self.observe_visibility(&visible)
    }

    // Scrolling

    fn scrolled(&mut self, scroll_top: f64) -> Vec<FeedEffect> {
        self.viewport.scroll_to(scroll_top);
        let mut effects = self.after_layout_change();
        if self.phase != FeedPhase::Ready
            || (self.rows.is_empty() && self.retry_initial.is_none())
        {
            return effects;
        }
        for direction in [Direction::Top, Direction::Bottom] {
            if self.viewport.distance_to(direction) < self.config.edge_threshold
                && !self.window.reached(direction)
            {
                effects.extend(self.load_more(direction, LoadMode::Extend, None, false).1);
            }
        }
        effects
    }

    // Reads

    fn observe_visibility(&mut self, ids: &[MessageId]) -> Vec<FeedEffect> {
        let Some(conversation) = self.conversation else {
            return Vec::new();
        };
        if !self.config.kind.is_conversation() || ids.is_empty() {
            return Vec::new();
        }
        let seen_last = ids.iter().max().copied() >= self.window.last_id();
        let newest_override = if self.window.reached(Direction::Bottom) && seen_last {
            self.newest_known
        } else {
            None
        };
        let Some(request) = self.reads.on_visible(ids, newest_override) else {
            return Vec::new();
        };

        for entry in self.window.entries_mut() {
            if entry.id > request.max_id {
                break;
            }
            entry.unread_observed = false;
        }
        vec![
            FeedEffect::MarkRead {
                generation: self.generation(),
                peer: conversation.peer,
                thread: conversation.thread,
                request,
            },
            FeedEffect::Notify(FeedNotice::ReadAdvanced {
                max_id: request.max_id,
            }),
        ]
    }

    fn mark_read_settled(
        &mut self,
        generation: Generation,
        request: MarkReadRequest,
        error: Option<String>,
    ) -> Vec<FeedEffect> {
        if generation != self.generation() {
            return Vec::new();
        }
        let Some(error) = error else {
            trace!(target: "feed.read", max_id = %request.max_id, "read mark accepted");
            return Vec::new();
        };
        warn!(target: "feed.read", max_id = %request.max_id, attempt = request.attempt, "read mark failed: {error}");
        let Some(conversation) = self.conversation else {
            return Vec::new();
        };
        match self.reads.retry(request) {
            Some(retry) => vec![FeedEffect::MarkRead {
                generation,
                peer: conversation.peer,
                thread: conversation.thread,
                request: retry,
            }],
            None => Vec::new(),
        }
    }

    fn place_unread_delimiter(&mut self) {
        if self.delimiter_placed {
            return;
        }
        let Some(floor) = self.unread_floor else {
            return;
        };
        let newest = self.newest_known;
        let candidate = self
            .window
            .entries()
            .find(|entry| !entry.outgoing && entry.id > floor)
            .map(|entry| entry.id);
        if let Some(id) = candidate
            && Some(id) != newest
            && let Some(entry) = self.window.get_mut(id)
        {
            entry.first_unread = true;
            self.delimiter_placed = true;
        }
    }

    // Updates

    /// Apply one store update.
    pub fn ingest(&mut self, update: FeedUpdate) -> Vec<FeedEffect> {
        let Some(conversation) = self.conversation else {
            return Vec::new();
        };
        match update {
            FeedUpdate::NewMessages(messages) => self.on_new_messages(messages),
            FeedUpdate::MessageSent { temp_id, message } => self.on_message_sent(temp_id, message),
            FeedUpdate::Edited(message) => self.on_edited(message),
            FeedUpdate::Deleted { peer, ids } => {
                if peer != conversation.peer {
                    return Vec::new();
                }
                let mut effects = Vec::new();
                for id in ids {
                    effects.extend(self.delete_one(id));
                }
                effects.extend(self.relayout_and_observe());
                effects
            }
            FeedUpdate::AlbumEdited {
                peer,
                grouped_id,
                deleted,
            } => {
                if peer != conversation.peer {
                    return Vec::new();
                }
                let Some(key) = self.window.album_entry(grouped_id) else {
                    return Vec::new();
                };
                let remaining: Vec<Message> = self
                    .window
                    .get(key)
                    .map(|entry| {
                        entry
                            .messages
                            .iter()
                            .filter(|m| !deleted.contains(&m.id))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                let mut effects = self.replace_content(key, remaining);
                effects.push(FeedEffect::ResolveAlbum {
                    generation: self.generation(),
                    peer,
                    grouped_id,
                });
                effects
            }
            FeedUpdate::DialogFlushed { peer } => {
                if peer != conversation.peer {
                    return Vec::new();
                }
                info!(target: "feed.engine", %peer, "dialog flushed");
                for id in self.window.ids() {
                    self.unmount(id);
                }
                self.relayout_and_observe()
            }
            FeedUpdate::PeerMigrated { from, to } => {
                if from != conversation.peer {
                    return Vec::new();
                }
                info!(target: "feed.engine", %from, %to, "peer migrated");
                self.set_conversation(to, conversation.thread, None)
            }
            FeedUpdate::HistoryRead {
                peer,
                thread,
                max_inbound,
                max_outbound,
            } => {
                if peer != conversation.peer || (thread.is_some() && thread != conversation.thread)
                {
                    return Vec::new();
                }
                self.on_history_read(max_inbound, max_outbound);
                Vec::new()
            }
        }
    }

    fn on_new_messages(&mut self, messages: Vec<Message>) -> Vec<FeedEffect> {
        let Some(conversation) = self.conversation else {
            return Vec::new();
        };
        let relevant: Vec<Message> = messages
            .into_iter()
            .filter(|m| m.belongs_to(conversation.peer, conversation.thread) && !m.is_deleted())
            .collect();
        for message in &relevant {
            self.newest_known = self.newest_known.max(Some(message.id));
        }
        if relevant.is_empty() {
            return Vec::new();
        }
        if !self.window.reached(Direction::Bottom) {
            debug!(
                target: "feed.engine",
                count = relevant.len(),
                "window detached from the bottom; leaving live messages to paging"
            );
            return Vec::new();
        }

        let stick = self.viewport.is_at_bottom(BOTTOM_TOLERANCE);
        let page = HistoryPage {
            ids: {
                let mut ids: Vec<MessageId> = relevant.iter().map(|m| m.id).collect();
                ids.sort_unstable();
                ids
            },
            messages: relevant,
            newest_id: self.newest_known,
        };
        let mut effects = Vec::new();
        for unit in self.collapse_page(page) {
            effects.extend(self.mount_unit(unit, false, stick));
        }
        effects
    }

    fn on_message_sent(&mut self, temp_id: MessageId, message: Message) -> Vec<FeedEffect> {
        let Some(conversation) = self.conversation else {
            return Vec::new();
        };
        if !message.belongs_to(conversation.peer, conversation.thread) {
            return Vec::new();
        }
        self.newest_known = if self.newest_known == Some(temp_id) {
            Some(message.id)
        } else {
            self.newest_known.max(Some(message.id))
        };

        let Some(key) = self.window.resolve(temp_id) else {
            return self.on_new_messages(vec![message]);
        };
        let stick = self.viewport.is_at_bottom(BOTTOM_TOLERANCE);
        let Some(old) = self.unmount(key) else {
            return Vec::new();
        };
        let mut messages: Vec<Message> = old
            .messages
            .into_iter()
            .filter(|m| m.id != temp_id && m.id != message.id)
            .collect();
        messages.push(message);
        messages.sort_by_key(|m| m.id);

        debug!(target: "feed.engine", %temp_id, "sent message confirmed");
        match self.mount(messages, Some(old.handle.id)) {
            Some((id, pending)) => {
                let mut queued = QueuedEntry::new(id, false);
                queued.pending = pending;
                queued.stick_to_bottom = stick;
                self.enqueue(queued)
            }
            None => Vec::new(),
        }
    }

    fn on_edited(&mut self, message: Message) -> Vec<FeedEffect> {
        let Some(key) = self.window.resolve(message.id) else {
            trace!(target: "feed.engine", id = %message.id, "edit outside the window");
            return Vec::new();
        };
        if message.is_deleted() {
            let mut effects = self.delete_one(message.id);
            effects.extend(self.relayout_and_observe());
            return effects;
        }
        let Some(entry) = self.window.get(key) else {
            return Vec::new();
        };
        let mut messages = entry.messages.clone();
        for slot in &mut messages {
            if slot.id == message.id {
                *slot = message.clone();
            }
        }
        self.replace_content(key, messages)
    }

    fn album_resolved(&mut self, grouped_id: GroupedId, mut messages: Vec<Message>) -> Vec<FeedEffect> {
        let Some(key) = self.window.album_entry(grouped_id) else {
            return Vec::new();
        };
        messages.retain(|m| !m.is_deleted());
        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        if messages.is_empty() {
            self.unmount(key);
            return self.relayout_and_observe();
        }
        self.replace_content(key, messages)
    }

    fn delete_one(&mut self, id: MessageId) -> Vec<FeedEffect> {
        let Some(entry) = self.window.get(id) else {
            trace!(target: "feed.engine", %id, "delete outside the window");
            return Vec::new();
        };
        if entry.is_album() {
            let key = entry.id;
            let remaining: Vec<Message> = entry
                .messages
                .iter()
                .filter(|m| m.id != id)
                .cloned()
                .collect();
            return self.replace_content(key, remaining);
        }
        let key = entry.id;
        self.unmount(key);
        Vec::new()
    }

    fn on_history_read(&mut self, inbound: Option<MessageId>, outbound: Option<MessageId>) {
        let outbound_moved = self.reads.apply_history_read(inbound, outbound);
        let cursor = self.reads.cursor();
        for entry in self.window.entries_mut() {
            if cursor.max_read_inbound.is_some_and(|max| entry.id <= max) {
                entry.unread_observed = false;
            }
            if outbound_moved
                && entry.outgoing
                && cursor.max_read_outbound.is_some_and(|max| entry.id <= max)
            {
                entry.read_by_peer = true;
            }
        }
    }

    // Snapshot

    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> FeedSnapshot {
        let today = self.segmenter.today(now);
        let buckets = self
            .segmenter
            .buckets()
            .map(|bucket| SnapshotBucket {
                day: bucket.day,
                label: bucket_label(bucket.day, today, self.config.kind),
                is_sticky: bucket.is_sticky,
                ids: bucket.order().to_vec(),
            })
            .collect();

        let entries = self
            .rows
            .iter()
            .filter_map(|row| match row.kind {
                RowKind::Entry(id) => self.window.get(id).map(|entry| (row, entry)),
                RowKind::Separator(_) => None,
            })
            .map(|(row, entry)| SnapshotEntry {
                id: entry.id,
                day: entry.day,
                group: entry.group,
                position: self.grouping.position(entry.id).unwrap_or_default(),
                top: row.top,
                height: row.height,
                lines: entry.handle.lines.clone(),
                outgoing: entry.outgoing,
                unread: entry.unread_observed,
                read_by_peer: entry.read_by_peer,
                first_unread: entry.first_unread,
                album_size: entry.messages.len(),
            })
            .collect();

        let pending = self
            .window
            .entries()
            .filter(|entry| !entry.committed)
            .map(|entry| entry.id)
            .collect();

        FeedSnapshot {
            kind: self.config.kind,
            peer: self.conversation.map(|c| c.peer),
            thread: self.conversation.and_then(|c| c.thread),
            phase: self.phase.to_string(),
            buckets,
            sticky_day: self.segmenter.sticky(),
            entries,
            pending,
            reached_top: self.window.reached(Direction::Top),
            reached_bottom: self.window.reached(Direction::Bottom),
            loading_top: self.is_loading(Direction::Top),
            loading_bottom: self.is_loading(Direction::Bottom),
            scroll_top: self.viewport.scroll_top,
            viewport_height: self.viewport.height,
            content_height: self.viewport.content_height,
            visible: visible_ids(&self.rows, &self.viewport),
            read_cursor: self.reads.cursor(),
        }
    }
}

fn group_item(entry: &FeedEntry) -> GroupItem {
    GroupItem {
        id: entry.id,
        sender: entry.sender,
        timestamp: entry.timestamp,
        day: entry.day,
        outgoing: entry.outgoing,
        service: entry.service,
    }
}
