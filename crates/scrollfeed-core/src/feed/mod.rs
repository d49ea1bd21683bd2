//! The feed engine and the components it coordinates.

pub mod action;
pub mod date_segmenter;
pub mod effect;
pub mod engine;
pub mod grouping;
pub mod layout;
pub mod pagination;
pub mod read_tracker;
pub mod render_queue;
pub mod snapshot;
pub mod window;

#[cfg(test)]
mod tests;

pub use action::{FeedAction, FeedUpdate};
pub use date_segmenter::{DateBucket, DateSegmenter, Placement, bucket_label};
pub use effect::{FeedEffect, FeedNotice};
pub use engine::{FeedEngine, FeedPhase};
pub use grouping::{GroupItem, GroupPosition, GroupingEngine};
pub use layout::{Row, RowKind, Viewport};
pub use pagination::PaginationController;
pub use read_tracker::{MarkReadRequest, ReadCursor, ReadTracker};
pub use render_queue::RenderQueue;
pub use snapshot::{FeedSnapshot, SnapshotBucket, SnapshotEntry};
pub use window::{FeedEntry, FeedWindow};
