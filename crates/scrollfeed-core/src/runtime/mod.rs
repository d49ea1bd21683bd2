//! Runs a [`FeedEngine`] on its own task and interprets its effects.

mod actor;
mod interpreter;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

pub use actor::FeedHandle;
pub use interpreter::EffectInterpreter;

use crate::config::FeedConfig;
use crate::feed::FeedEngine;
use crate::render::{EntryRenderer, ResourceLoader};
use crate::store::MessageStore;
use actor::FeedActor;

const COMMAND_CAPACITY: usize = 32;

pub struct FeedRuntime;

impl FeedRuntime {
    /// Start a feed. Must be called from within a tokio runtime.
    pub fn spawn(
        config: FeedConfig,
        store: Arc<dyn MessageStore>,
        renderer: Arc<dyn EntryRenderer>,
        loader: Arc<dyn ResourceLoader>,
    ) -> FeedHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        debug!(target: "feed.runtime", kind = %config.kind, "spawning feed actor");

        let engine = FeedEngine::new(config, renderer);
        let actor = FeedActor::new(engine, EffectInterpreter::new(store, loader));
        tokio::spawn(actor.run(cmd_rx));

        FeedHandle { cmd_tx }
    }
}
