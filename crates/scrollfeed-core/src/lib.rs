//! Windowed, bidirectionally paged message feed.
//!
//! [`feed::FeedEngine`] is a synchronous reducer over [`feed::FeedAction`]s that
//! produces [`feed::FeedEffect`]s; [`runtime::FeedRuntime`] owns one engine on a
//! tokio task and interprets those effects against a [`store::MessageStore`].

pub mod config;
pub mod error;
pub mod feed;
pub mod message;
pub mod render;
pub mod runtime;
pub mod store;
pub mod types;

pub use config::FeedConfig;
pub use error::{FeedError, Result};
pub use feed::{FeedAction, FeedEffect, FeedEngine, FeedNotice, FeedSnapshot, FeedUpdate};
pub use message::{MediaKind, MediaRef, Message, MessageContent, MessageFlags};
pub use runtime::{FeedHandle, FeedRuntime};
pub use store::{DialogState, HistoryPage, MessageStore, PageRequest, StoreError};
pub use types::{Direction, FeedKind, LoadMode, LoadOutcome, MessageId, PeerId, ThreadId};
