use std::collections::VecDeque;
use std::future::Future;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace};

use super::interpreter::EffectInterpreter;
use crate::error::{FeedError, Result};
use crate::feed::{FeedAction, FeedEffect, FeedEngine, FeedNotice, FeedSnapshot, FeedUpdate};
use crate::types::{Direction, LoadMode, LoadOutcome, MessageId, PeerId, ThreadId};

const NOTICE_BROADCAST_CAPACITY: usize = 256;
const INTERNAL_ACTION_CAPACITY: usize = 64;

pub(crate) enum FeedCmd {
    Dispatch {
        action: Box<FeedAction>,
        reply: oneshot::Sender<()>,
    },
    LoadMore {
        direction: Direction,
        mode: LoadMode,
        anchor: Option<MessageId>,
        preload_only: bool,
        reply: oneshot::Sender<LoadOutcome>,
    },
    IsFullyLoaded {
        direction: Direction,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<FeedSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<FeedNotice>>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cloneable handle to a running feed.
#[derive(Clone)]
pub struct FeedHandle {
    pub(crate) cmd_tx: mpsc::Sender<FeedCmd>,
}

impl FeedHandle {
    pub async fn dispatch(&self, action: FeedAction) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(FeedCmd::Dispatch {
                action: Box::new(action),
                reply: reply_tx,
            })
            .await
            .map_err(|_| FeedError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FeedError::ChannelClosed)
    }

    /// Tear down whatever is mounted and open `peer`, optionally centred on
    /// `target`.
    pub async fn set_conversation(
        &self,
        peer: PeerId,
        thread: Option<ThreadId>,
        target: Option<MessageId>,
    ) -> Result<()> {
        self.dispatch(FeedAction::SetConversation {
            peer,
            thread,
            target,
        })
        .await
    }

    pub async fn load_more(
        &self,
        direction: Direction,
        mode: LoadMode,
        anchor: Option<MessageId>,
        preload_only: bool,
    ) -> Result<LoadOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(FeedCmd::LoadMore {
                direction,
                mode,
                anchor,
                preload_only,
                reply: reply_tx,
            })
            .await
            .map_err(|_| FeedError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FeedError::ChannelClosed)
    }

    pub async fn on_scroll_reached_edge(&self, direction: Direction) -> Result<LoadOutcome> {
        self.load_more(direction, LoadMode::Extend, None, false)
            .await
    }

    pub async fn jump_to(&self, target: MessageId) -> Result<LoadOutcome> {
        self.load_more(Direction::Top, LoadMode::JumpTo, Some(target), false)
            .await
    }

    pub async fn is_fully_loaded(&self, direction: Direction) -> Result<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(FeedCmd::IsFullyLoaded {
                direction,
                reply: reply_tx,
            })
            .await
            .map_err(|_| FeedError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FeedError::ChannelClosed)
    }

    pub async fn ingest(&self, update: FeedUpdate) -> Result<()> {
        self.dispatch(FeedAction::Update(update)).await
    }

    pub async fn report_visible(&self, ids: Vec<MessageId>) -> Result<()> {
        self.dispatch(FeedAction::EntriesVisible { ids }).await
    }

    pub async fn scroll_to(&self, scroll_top: f64) -> Result<()> {
        self.dispatch(FeedAction::Scrolled { scroll_top }).await
    }

    pub async fn resize(&self, height: f64) -> Result<()> {
        self.dispatch(FeedAction::ViewportResized { height }).await
    }

    pub async fn set_online(&self, online: bool) -> Result<()> {
        self.dispatch(FeedAction::SetOnline(online)).await
    }

    pub async fn snapshot(&self) -> Result<FeedSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(FeedCmd::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| FeedError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FeedError::ChannelClosed)
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<FeedNotice>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(FeedCmd::Subscribe { reply: reply_tx })
            .await
            .map_err(|_| FeedError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FeedError::ChannelClosed)
    }

    /// Destroy the feed. Outstanding loads and timers are abandoned and the
    /// actor stops.
    pub async fn destroy(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(FeedCmd::Destroy { reply: reply_tx })
            .await
            .map_err(|_| FeedError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FeedError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.try_send(FeedCmd::Shutdown);
    }
}

pub(crate) struct FeedActor {
    engine: FeedEngine,
    interpreter: EffectInterpreter,
    notices: broadcast::Sender<FeedNotice>,
    internal_action_tx: mpsc::Sender<FeedAction>,
    internal_action_rx: mpsc::Receiver<FeedAction>,
}

impl FeedActor {
    pub(crate) fn new(engine: FeedEngine, interpreter: EffectInterpreter) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BROADCAST_CAPACITY);
        let (internal_action_tx, internal_action_rx) = mpsc::channel(INTERNAL_ACTION_CAPACITY);
        Self {
            engine,
            interpreter,
            notices,
            internal_action_tx,
            internal_action_rx,
        }
    }

    pub(crate) async fn run(mut self, mut cmd_rx: mpsc::Receiver<FeedCmd>) {
        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    match cmd {
                        FeedCmd::Dispatch { action, reply } => {
                            self.handle_action(*action);
                            let _ = reply.send(());
                        }
                        FeedCmd::LoadMore { direction, mode, anchor, preload_only, reply } => {
                            let (outcome, effects) =
                                self.engine.load_more(direction, mode, anchor, preload_only);
                            self.run_effects(effects);
                            let _ = reply.send(outcome);
                        }
                        FeedCmd::IsFullyLoaded { direction, reply } => {
                            let _ = reply.send(self.engine.is_fully_loaded(direction));
                        }
                        FeedCmd::Snapshot { reply } => {
                            let _ = reply.send(self.engine.snapshot());
                        }
                        FeedCmd::Subscribe { reply } => {
                            let _ = reply.send(self.notices.subscribe());
                        }
                        FeedCmd::Destroy { reply } => {
                            self.handle_action(FeedAction::Destroy);
                            let _ = reply.send(());
                            break;
                        }
                        FeedCmd::Shutdown => break,
                    }
                }

                Some(action) = self.internal_action_rx.recv() => {
                    self.handle_action(action);
                }
            }
        }

        debug!(target: "feed.runtime", "feed actor stopped");
    }

    fn handle_action(&mut self, action: FeedAction) {
        let effects = self.engine.handle(action);
        self.run_effects(effects);
    }

    /// Interpret effects in order. Pages the store already holds are merged
    /// inline; everything else completes on its own task.
    fn run_effects(&mut self, effects: Vec<FeedEffect>) {
        let mut queue: VecDeque<FeedEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                FeedEffect::FetchDialogState {
                    generation,
                    peer,
                    thread,
                } => {
                    let interpreter = self.interpreter.clone();
                    self.spawn(async move { interpreter.dialog_state(generation, peer, thread).await });
                }
                FeedEffect::RequestPage {
                    token,
                    request,
                    preload_only,
                } => {
                    if let Some(page) = self.interpreter.cached_page(&request) {
                        trace!(target: "feed.runtime", %token, preload_only, "page served from cache");
                        queue.extend(self.engine.handle(FeedAction::PageLoaded { token, page }));
                        continue;
                    }
                    let interpreter = self.interpreter.clone();
                    self.spawn(async move { interpreter.request_page(token, request).await });
                }
                FeedEffect::ScheduleTick {
                    generation,
                    batch,
                    delay,
                } => {
                    self.spawn(async move {
                        tokio::time::sleep(delay).await;
                        FeedAction::TickElapsed { generation, batch }
                    });
                }
                FeedEffect::AwaitResources {
                    generation,
                    batch,
                    resources,
                    cap,
                } => {
                    let interpreter = self.interpreter.clone();
                    self.spawn(async move {
                        interpreter
                            .await_resources(generation, batch, resources, cap)
                            .await
                    });
                }
                FeedEffect::ResolveAlbum {
                    generation,
                    peer,
                    grouped_id,
                } => {
                    let interpreter = self.interpreter.clone();
                    self.spawn(async move {
                        interpreter
                            .resolve_album(generation, peer, grouped_id)
                            .await
                    });
                }
                FeedEffect::MarkRead {
                    generation,
                    peer,
                    thread,
                    request,
                } => {
                    let interpreter = self.interpreter.clone();
                    self.spawn(async move {
                        interpreter
                            .mark_read(generation, peer, thread, request)
                            .await
                    });
                }
                FeedEffect::Notify(notice) => {
                    trace!(target: "feed.runtime", ?notice, "notice");
                    let _ = self.notices.send(notice);
                }
            }
        }
    }

    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = FeedAction> + Send + 'static,
    {
        let action_tx = self.internal_action_tx.clone();
        tokio::spawn(async move {
            let action = work.await;
            let _ = action_tx.send(action).await;
        });
    }
}
