use chrono::NaiveDate;

use super::date_segmenter::DateSegmenter;
use super::window::FeedWindow;
use crate::types::{Direction, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Separator(NaiveDate),
    Entry(MessageId),
}

/// One measured row of the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row {
    pub kind: RowKind,
    pub top: f64,
    pub height: f64,
}

impl Row {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Lay out committed entries bucket by bucket, each bucket headed by its
/// separator. Buckets with nothing committed yet produce no rows.
pub fn build_rows(segmenter: &DateSegmenter, window: &FeedWindow, separator_height: f64) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut top = 0.0;
    for bucket in segmenter.buckets() {
        if bucket.order().is_empty() {
            continue;
        }
        rows.push(Row {
            kind: RowKind::Separator(bucket.day),
            top,
            height: separator_height,
        });
        top += separator_height;
        for id in bucket.order() {
            let Some(entry) = window.get(*id) else {
                continue;
            };
            rows.push(Row {
                kind: RowKind::Entry(*id),
                top,
                height: entry.handle.height,
            });
            top += entry.handle.height;
        }
    }
    rows
}

pub fn content_height(rows: &[Row]) -> f64 {
    rows.last().map_or(0.0, Row::bottom)
}

/// Scroll state of the surface.
#[derive(Debug, Clone, Default)]
pub struct Viewport {
    pub scroll_top: f64,
    pub height: f64,
    pub content_height: f64,
    /// The host moved away from the bottom on purpose.
    pub user_scrolled: bool,
}

impl Viewport {
    pub fn new(height: f64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    pub fn max_offset(&self) -> f64 {
        (self.content_height - self.height).max(0.0)
    }

    pub fn clamp(&mut self) {
        self.scroll_top = self.scroll_top.clamp(0.0, self.max_offset());
    }

    pub fn scroll_to(&mut self, offset: f64) -> bool {
        let previous = self.scroll_top;
        self.scroll_top = offset;
        self.clamp();
        let moved = (self.scroll_top - previous).abs() > f64::EPSILON;
        if moved {
            self.user_scrolled = self.scroll_top < self.max_offset();
        }
        moved
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_top = self.max_offset();
        self.user_scrolled = false;
    }

    pub fn is_at_bottom(&self, tolerance: f64) -> bool {
        if self.content_height <= self.height {
            return true;
        }
        self.scroll_top + tolerance >= self.max_offset()
    }

    pub fn distance_to(&self, edge: Direction) -> f64 {
        match edge {
            Direction::Top => self.scroll_top,
            Direction::Bottom => (self.max_offset() - self.scroll_top).max(0.0),
        }
    }

    /// Center `row` when possible.
    pub fn center_on(&mut self, row: &Row) {
        self.scroll_top = row.top + row.height / 2.0 - self.height / 2.0;
        self.clamp();
        self.user_scrolled = self.scroll_top < self.max_offset();
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.scroll_top, self.scroll_top + self.height)
    }
}

/// Entry rows intersecting the viewport.
pub fn visible_ids(rows: &[Row], viewport: &Viewport) -> Vec<MessageId> {
    let (top, bottom) = viewport.bounds();
    rows.iter()
        .filter(|row| row.bottom() > top && row.top < bottom)
        .filter_map(|row| match row.kind {
            RowKind::Entry(id) => Some(id),
            RowKind::Separator(_) => None,
        })
        .collect()
}

/// The bucket whose separator sits at or above the viewport top.
pub fn sticky_day(rows: &[Row], viewport: &Viewport) -> Option<NaiveDate> {
    rows.iter()
        .take_while(|row| row.top <= viewport.scroll_top)
        .filter_map(|row| match row.kind {
            RowKind::Separator(day) => Some(day),
            RowKind::Entry(_) => None,
        })
        .last()
}

/// Scroll position captured before a commit or an eviction.
///
/// The first entry row on screen is the anchor: after the surface changes the
/// viewport is moved so that row keeps its screen offset, whatever was
/// inserted or removed above or below it. Without a visible entry the capture
/// falls back to a fixed distance from one edge of the content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnchorCapture {
    Row {
        id: MessageId,
        /// Row top minus scroll top.
        offset: f64,
        scroll_top: f64,
    },
    FromBottom(f64),
    FromTop(f64),
}

impl AnchorCapture {
    pub fn capture(rows: &[Row], viewport: &Viewport, prepend: bool) -> Self {
        let (top, bottom) = viewport.bounds();
        let anchor = rows
            .iter()
            .filter(|row| row.bottom() > top && row.top < bottom)
            .find_map(|row| match row.kind {
                RowKind::Entry(id) => Some((id, row.top)),
                RowKind::Separator(_) => None,
            });
        match anchor {
            Some((id, row_top)) => AnchorCapture::Row {
                id,
                offset: row_top - viewport.scroll_top,
                scroll_top: viewport.scroll_top,
            },
            None if prepend => {
                AnchorCapture::FromBottom(viewport.content_height - viewport.scroll_top)
            }
            None => AnchorCapture::FromTop(viewport.scroll_top),
        }
    }

    /// Scroll top for the new layout. An anchor row that did not survive
    /// leaves the offset where it was.
    pub fn restore(self, rows: &[Row], new_content_height: f64) -> f64 {
        match self {
            AnchorCapture::Row {
                id,
                offset,
                scroll_top,
            } => rows
                .iter()
                .find(|row| row.kind == RowKind::Entry(id))
                .map_or(scroll_top, |row| row.top - offset),
            AnchorCapture::FromBottom(captured) => new_content_height - captured,
            AnchorCapture::FromTop(captured) => captured,
        }
    }
}
