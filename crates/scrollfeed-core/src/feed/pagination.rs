use std::collections::BTreeSet;
use tracing::debug;

use crate::config::FeedConfig;
use crate::store::PageRequest;
use crate::types::{BatchId, Direction, LoadMode, LoadToken, MessageId, PeerId, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Fetching,
    /// Merged; settles once this batch has been committed.
    Rendering { through: BatchId },
}

#[derive(Debug, Clone)]
pub struct ActiveLoad {
    pub token: LoadToken,
    pub mode: LoadMode,
    pub anchor: Option<MessageId>,
    pub page: usize,
    pub preload_only: bool,
    /// The first load after opening a conversation.
    pub initial: bool,
    pub phase: LoadPhase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// The side entries are trimmed from.
    pub side: Direction,
    pub ids: Vec<MessageId>,
}

#[derive(Debug)]
pub struct PaginationController {
    row_height_hint: f64,
    max_initial_page: usize,
    min_extend_page: usize,
    eviction_after_loads: u32,
    eviction_page_multiplier: usize,
    consecutive: [u32; 2],
    active: [Option<ActiveLoad>; 2],
}

impl PaginationController {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            row_height_hint: config.row_height_hint,
            max_initial_page: config.max_initial_page.max(1),
            min_extend_page: config.min_extend_page,
            eviction_after_loads: config.eviction_after_loads,
            eviction_page_multiplier: config.eviction_page_multiplier.max(1),
            consecutive: [0; 2],
            active: [None, None],
        }
    }

    /// Entries to request: enough to fill the viewport at first, then at
    /// least `min_extend_page` once something is mounted.
    pub fn page_size(&self, window_len: usize, viewport_height: f64) -> usize {
        let fits = if self.row_height_hint > 0.0 {
            (viewport_height / self.row_height_hint).floor().max(0.0) as usize
        } else {
            self.max_initial_page
        };
        let page = fits.clamp(1, self.max_initial_page);
        if window_len > 0 {
            page.max(self.min_extend_page)
        } else {
            page
        }
    }

    pub fn request(
        &self,
        peer: PeerId,
        thread: Option<ThreadId>,
        direction: Direction,
        mode: LoadMode,
        anchor: Option<MessageId>,
        page: usize,
    ) -> PageRequest {
        let (count, back_limit) = match (mode, anchor, direction) {
            (_, None, _) => (page, 0),
            (LoadMode::JumpTo, Some(_), _) => (page, page),
            (LoadMode::Extend, Some(_), Direction::Top) => (page, 0),
            (LoadMode::Extend, Some(_), Direction::Bottom) => (0, page),
        };
        PageRequest {
            peer,
            thread,
            anchor,
            count,
            back_limit,
        }
    }

    pub fn begin(&mut self, load: ActiveLoad) {
        let direction = load.token.direction;
        self.active[direction.index()] = Some(load);
    }

    pub fn active(&self, direction: Direction) -> Option<&ActiveLoad> {
        self.active[direction.index()].as_ref()
    }

    pub fn mark_rendering(&mut self, direction: Direction, through: BatchId) {
        if let Some(load) = self.active[direction.index()].as_mut() {
            load.phase = LoadPhase::Rendering { through };
        }
    }

    /// Directions whose merged entries are all committed by `batch`.
    pub fn settled_by(&self, batch: BatchId) -> Vec<Direction> {
        self.active
            .iter()
            .flatten()
            .filter(|load| matches!(load.phase, LoadPhase::Rendering { through } if through <= batch))
            .map(|load| load.token.direction)
            .collect()
    }

    pub fn finish(&mut self, direction: Direction) -> Option<ActiveLoad> {
        self.active[direction.index()].take()
    }

    /// Count a settled load toward eviction.
    pub fn record_settled(&mut self, direction: Direction) {
        self.consecutive[direction.index()] += 1;
        let opposite = &mut self.consecutive[direction.opposite().index()];
        *opposite = opposite.saturating_sub(1);
    }

    pub fn consecutive(&self, direction: Direction) -> u32 {
        self.consecutive[direction.index()]
    }

    /// Trim the end opposite to repeated loads in `direction`.
    ///
    /// `ids` is the ascending window content. Protected ids (the load anchor
    /// and whatever is visible) are never removed; trimming stops before the
    /// first one.
    pub fn plan_eviction(
        &self,
        direction: Direction,
        ids: &[MessageId],
        page: usize,
        protected: &BTreeSet<MessageId>,
    ) -> Option<Eviction> {
        let keep = page.saturating_mul(self.eviction_page_multiplier);
        if self.consecutive(direction) <= self.eviction_after_loads || ids.len() <= keep {
            return None;
        }

        let removed: Vec<MessageId> = match direction {
            Direction::Top => {
                let tail = ids.get(keep..).unwrap_or_default();
                let barrier = tail.iter().rev().find(|id| protected.contains(id));
                tail.iter()
                    .copied()
                    .filter(|id| barrier.is_none_or(|b| id > b))
                    .collect()
            }
            Direction::Bottom => {
                let head = ids.get(..ids.len() - keep).unwrap_or_default();
                let barrier = head.iter().find(|id| protected.contains(id));
                head.iter()
                    .copied()
                    .filter(|id| barrier.is_none_or(|b| id < b))
                    .collect()
            }
        };

        if removed.is_empty() {
            debug!(target: "feed.pagination", %direction, "eviction blocked by protected entries");
            return None;
        }
        Some(Eviction {
            side: direction.opposite(),
            ids: removed,
        })
    }

    pub fn reset(&mut self) {
        self.consecutive = [0; 2];
        self.active = [None, None];
    }
}
