//! Engine tests driven by a synchronous in-process store.
//!
//! - Scenario tests: conversation open, paging, anchoring, live updates
//! - Property tests: ordering and bucket invariants under random sequences

mod scenarios;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Once};

use super::{FeedAction, FeedEffect, FeedEngine, FeedNotice, FeedUpdate, MarkReadRequest, RowKind};
use crate::config::FeedConfig;
use crate::message::{MediaKind, MediaRef, Message, MessageFlags};
use crate::render::{PlainRenderer, ResourceKey};
use crate::store::{DialogState, HistoryPage, PageRequest};
use crate::types::{Direction, GroupedId, LoadMode, LoadOutcome, LoadToken, MessageId, PeerId, SenderId};

/// 2024-03-10T00:00:00Z
pub(super) const DAY_ONE: i64 = 1_710_028_800;
pub(super) const DAY: i64 = 86_400;
pub(super) const PEER: PeerId = PeerId(1);
pub(super) const OTHER_PEER: PeerId = PeerId(2);
pub(super) const VIEWPORT: f64 = 300.0;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub(super) fn test_config() -> FeedConfig {
    FeedConfig {
        row_height_hint: 20.0,
        preload_after_load: false,
        utc_offset_secs: Some(0),
        ..FeedConfig::default()
    }
}

/// An inbound message from sender 7, one minute apart per id.
pub(super) fn inbound(id: i64) -> Message {
    Message::new(
        MessageId(id),
        PEER,
        SenderId(7),
        DAY_ONE + id * 60,
        format!("message {id}"),
    )
}

pub(super) fn outgoing(id: i64) -> Message {
    Message::new(MessageId(id), PEER, SenderId(1), DAY_ONE + id * 60, format!("sent {id}"))
        .with_flags(MessageFlags::OUTGOING)
}

pub(super) fn photo(id: i64, grouped: i64) -> Message {
    inbound(id)
        .in_album(GroupedId(grouped))
        .with_media(MediaRef {
            key: ResourceKey::new(format!("photo-{id}")),
            kind: MediaKind::Photo,
            height: 120,
        })
}

pub(super) fn ids(raw: impl IntoIterator<Item = i64>) -> Vec<MessageId> {
    raw.into_iter().map(MessageId).collect()
}

/// Feeds the engine's effects back into it the way the runtime would, but
/// synchronously and against an in-memory history.
pub(super) struct Harness {
    pub engine: FeedEngine,
    pub history: BTreeMap<(PeerId, MessageId), Message>,
    pub read_inbound: BTreeMap<PeerId, MessageId>,
    pub notices: Vec<FeedNotice>,
    pub mark_reads: Vec<MarkReadRequest>,
    pub page_requests: Vec<PageRequest>,
    pub fail_mark_reads: usize,
    pub fail_pages: usize,
    pub hold_pages: bool,
    pub held: Vec<(LoadToken, PageRequest)>,
}

impl Harness {
    pub fn new(config: FeedConfig) -> Self {
        init_tracing();
        let mut engine = FeedEngine::new(config, Arc::new(PlainRenderer::default()));
        let effects = engine.handle(FeedAction::ViewportResized { height: VIEWPORT });
        assert!(effects.is_empty());
        Self {
            engine,
            history: BTreeMap::new(),
            read_inbound: BTreeMap::new(),
            notices: Vec::new(),
            mark_reads: Vec::new(),
            page_requests: Vec::new(),
            fail_mark_reads: 0,
            fail_pages: 0,
            hold_pages: false,
            held: Vec::new(),
        }
    }

    pub fn chat() -> Self {
        Self::new(test_config())
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        for message in messages {
            self.store(message);
        }
        self
    }

    /// `1..=n` inbound messages, all read.
    pub fn with_read_history(self, n: i64) -> Self {
        self.with_messages((1..=n).map(inbound)).read_through(PEER, n)
    }

    pub fn read_through(mut self, peer: PeerId, id: i64) -> Self {
        self.read_inbound.insert(peer, MessageId(id));
        self
    }

    pub fn store(&mut self, message: Message) {
        self.history.insert((message.peer, message.id), message);
    }

    pub fn open(&mut self, peer: PeerId) {
        self.dispatch(FeedAction::SetConversation {
            peer,
            thread: None,
            target: None,
        });
    }

    pub fn open_at(&mut self, peer: PeerId, target: i64) {
        self.dispatch(FeedAction::SetConversation {
            peer,
            thread: None,
            target: Some(MessageId(target)),
        });
    }

    pub fn dispatch(&mut self, action: FeedAction) {
        let effects = self.engine.handle(action);
        self.run(effects);
    }

    pub fn ingest(&mut self, update: FeedUpdate) {
        self.dispatch(FeedAction::Update(update));
    }

    pub fn scroll_to(&mut self, scroll_top: f64) {
        self.dispatch(FeedAction::Scrolled { scroll_top });
    }

    pub fn load(&mut self, direction: Direction) -> LoadOutcome {
        let (outcome, effects) = self
            .engine
            .load_more(direction, LoadMode::Extend, None, false);
        self.run(effects);
        outcome
    }

    pub fn jump(&mut self, target: i64) -> LoadOutcome {
        let (outcome, effects) =
            self.engine
                .load_more(Direction::Top, LoadMode::JumpTo, Some(MessageId(target)), false);
        self.run(effects);
        outcome
    }

    /// Answer every held page request.
    pub fn release_held(&mut self) {
        let held = std::mem::take(&mut self.held);
        for (token, request) in held {
            let page = self.page(&request);
            self.dispatch(FeedAction::PageLoaded { token, page });
        }
    }

    pub fn run(&mut self, effects: Vec<FeedEffect>) {
        let mut queue: VecDeque<FeedEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            let follow_up = match effect {
                FeedEffect::FetchDialogState {
                    generation, peer, ..
                } => Some(FeedAction::DialogStateLoaded {
                    generation,
                    state: self.dialog_state(peer),
                }),
                FeedEffect::RequestPage { token, request, .. } => {
                    self.page_requests.push(request.clone());
                    if self.hold_pages {
                        self.held.push((token, request));
                        None
                    } else if self.fail_pages > 0 {
                        self.fail_pages -= 1;
                        Some(FeedAction::PageFailed {
                            token,
                            error: "store unavailable".to_string(),
                        })
                    } else {
                        Some(FeedAction::PageLoaded {
                            token,
                            page: self.page(&request),
                        })
                    }
                }
                FeedEffect::ScheduleTick {
                    generation, batch, ..
                } => Some(FeedAction::TickElapsed { generation, batch }),
                FeedEffect::AwaitResources {
                    generation, batch, ..
                } => Some(FeedAction::ResourcesSettled {
                    generation,
                    batch,
                    timed_out: 0,
                }),
                FeedEffect::ResolveAlbum {
                    generation,
                    peer,
                    grouped_id,
                } => Some(FeedAction::AlbumResolved {
                    generation,
                    grouped_id,
                    messages: self
                        .history
                        .values()
                        .filter(|m| m.peer == peer && m.grouped_id == Some(grouped_id))
                        .cloned()
                        .collect(),
                }),
                FeedEffect::MarkRead {
                    generation,
                    request,
                    ..
                } => {
                    self.mark_reads.push(request);
                    let error = (self.fail_mark_reads > 0).then(|| {
                        self.fail_mark_reads -= 1;
                        "flood wait".to_string()
                    });
                    Some(FeedAction::MarkReadSettled {
                        generation,
                        request,
                        error,
                    })
                }
                FeedEffect::Notify(notice) => {
                    self.notices.push(notice);
                    None
                }
            };
            if let Some(action) = follow_up {
                queue.extend(self.engine.handle(action));
            }
        }
    }

    fn dialog_state(&self, peer: PeerId) -> DialogState {
        DialogState {
            newest_id: self
                .history
                .keys()
                .filter(|(p, _)| *p == peer)
                .map(|(_, id)| *id)
                .next_back(),
            read_inbound_max: self.read_inbound.get(&peer).copied(),
            read_outbound_max: None,
        }
    }

    pub fn page(&self, request: &PageRequest) -> HistoryPage {
        let all: Vec<MessageId> = self
            .history
            .values()
            .filter(|m| m.belongs_to(request.peer, request.thread))
            .map(|m| m.id)
            .collect();
        let ids: Vec<MessageId> = match request.anchor {
            None => all.iter().rev().take(request.count).rev().copied().collect(),
            Some(anchor) => {
                let older = all.iter().filter(|id| **id < anchor).collect::<Vec<_>>();
                let older = older.iter().rev().take(request.count).rev().map(|id| **id);
                let newer = all
                    .iter()
                    .filter(|id| **id >= anchor)
                    .take(request.back_limit)
                    .copied();
                older.chain(newer).collect()
            }
        };
        HistoryPage {
            messages: ids
                .iter()
                .filter_map(|id| self.history.get(&(request.peer, *id)).cloned())
                .collect(),
            ids,
            newest_id: all.last().copied(),
        }
    }

    /// Entry ids in surface order.
    pub fn surface(&self) -> Vec<MessageId> {
        self.engine
            .rows()
            .iter()
            .filter_map(|row| match row.kind {
                RowKind::Entry(id) => Some(id),
                RowKind::Separator(_) => None,
            })
            .collect()
    }

    pub fn separators(&self) -> usize {
        self.engine
            .rows()
            .iter()
            .filter(|row| matches!(row.kind, RowKind::Separator(_)))
            .count()
    }

    pub fn scroll_top(&self) -> f64 {
        self.engine.viewport().scroll_top
    }

    pub fn content_height(&self) -> f64 {
        self.engine.viewport().content_height
    }

    pub fn saw(&self, predicate: impl Fn(&FeedNotice) -> bool) -> bool {
        self.notices.iter().any(predicate)
    }

    /// Every bucket is non-empty, dated by its members, and strictly ordered.
    pub fn assert_consistent(&self) {
        let window = self.engine.window();
        let segmenter = self.engine.segmenter();
        let mut placed = 0;
        for bucket in segmenter.buckets() {
            assert!(!bucket.members().is_empty(), "empty bucket {}", bucket.day);
            for id in bucket.members() {
                let entry = window.get(*id).unwrap();
                assert_eq!(entry.day, bucket.day);
            }
            let order = bucket.order();
            assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "unordered bucket {order:?}");
            placed += order.len();
        }
        let committed = window.entries().filter(|entry| entry.committed).count();
        assert_eq!(placed, committed);
        let surface = self.surface();
        assert!(surface.windows(2).all(|pair| pair[0] < pair[1]), "unordered surface {surface:?}");
        for entry in window.entries().filter(|entry| entry.committed) {
            assert!(self.engine.grouping().group_of(entry.id).is_some());
        }
    }
}
