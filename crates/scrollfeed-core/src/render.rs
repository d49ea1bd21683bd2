//! Seams between the feed and whatever turns a message into something with
//! a height: text formatting, media wrapping and resource readiness.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::message::Message;
use crate::types::{FeedKind, HandleId};

/// Identifies a media resource the renderer needs before its height is final.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(pub String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The rendered form of one feed entry. Exclusively owned by its entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualHandle {
    pub id: HandleId,
    pub height: f64,
    pub lines: Vec<String>,
    pub content_hash: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    pub handle: HandleId,
    pub width: u16,
    pub kind: FeedKind,
}

#[derive(Debug, Clone)]
pub struct Rendered {
    pub handle: VisualHandle,
    /// Resources that must be awaited (bounded) before the handle is committed.
    pub pending: Vec<ResourceKey>,
}

pub trait EntryRenderer: Send + Sync {
    /// `album` holds every message of the entry, primary last. It is a
    /// single-element slice for ordinary messages.
    fn render(&self, album: &[Message], ctx: &RenderContext) -> Rendered;
}

/// Wraps message text to the context width and stacks media below it.
#[derive(Debug, Clone)]
pub struct PlainRenderer {
    pub line_height: f64,
    pub padding: f64,
}

impl Default for PlainRenderer {
    fn default() -> Self {
        Self {
            line_height: 20.0,
            padding: 12.0,
        }
    }
}

impl EntryRenderer for PlainRenderer {
    fn render(&self, album: &[Message], ctx: &RenderContext) -> Rendered {
        let width = usize::from(ctx.width.max(8));
        let mut lines = Vec::new();
        let mut media_height = 0.0;
        let mut pending = Vec::new();

        for message in album {
            if let Some(media) = &message.content.media {
                lines.push(format!("[{} {}]", media.kind, media.key));
                media_height += f64::from(media.height);
                pending.push(media.key.clone());
            }
            for line in textwrap::wrap(&message.content.text, width) {
                lines.push(line.into_owned());
            }
        }
        if lines.is_empty() {
            lines.push(String::new());
        }

        let height = lines.len() as f64 * self.line_height + media_height + self.padding;

        Rendered {
            handle: VisualHandle {
                id: ctx.handle,
                height,
                content_hash: content_hash(&lines),
                lines,
            },
            pending,
        }
    }
}

fn content_hash(lines: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    lines.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Resolves once the resource can be laid out. Callers bound the wait.
    async fn wait_ready(&self, key: &ResourceKey);
}

/// Treats every resource as already available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateLoader;

#[async_trait]
impl ResourceLoader for ImmediateLoader {
    async fn wait_ready(&self, _key: &ResourceKey) {}
}

/// Every resource becomes ready after a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct DelayedLoader {
    pub delay: Duration,
}

#[async_trait]
impl ResourceLoader for DelayedLoader {
    async fn wait_ready(&self, _key: &ResourceKey) {
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl<T: ResourceLoader + ?Sized> ResourceLoader for Arc<T> {
    async fn wait_ready(&self, key: &ResourceKey) {
        (**self).wait_ready(key).await;
    }
}
