use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, eyre};
use scrollfeed_core::render::{DelayedLoader, ImmediateLoader, PlainRenderer, ResourceLoader};
use scrollfeed_core::store::InMemoryStore;
use scrollfeed_core::{
    FeedHandle, FeedNotice, FeedRuntime, FeedSnapshot, FeedUpdate, LoadOutcome, MessageFlags,
    MessageId, PeerId,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{Command, load_config};
use crate::cli::ReplayArgs;
use crate::demo::{DemoConversation, DemoOptions};
use crate::output;

const DEMO_PEER: PeerId = PeerId(1);
const SETTLE_POLL: Duration = Duration::from_millis(10);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ReplayCommand {
    pub args: ReplayArgs,
    pub config_path: Option<PathBuf>,
}

/// Notices seen while the replay ran.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayTally {
    pub commits: usize,
    pub evicted: usize,
    pub failed_loads: usize,
    pub read_advances: usize,
}

impl ReplayTally {
    fn record(&mut self, notice: &FeedNotice) {
        match notice {
            FeedNotice::Committed { .. } => self.commits += 1,
            FeedNotice::Evicted { ids, .. } => self.evicted += ids.len(),
            FeedNotice::LoadFailed { .. } => self.failed_loads += 1,
            FeedNotice::ReadAdvanced { .. } => self.read_advances += 1,
            _ => {}
        }
    }
}

pub struct ReplayReport {
    pub snapshot: FeedSnapshot,
    pub tally: ReplayTally,
    pub page_requests: usize,
}

impl ReplayCommand {
    /// Opens the generated conversation and performs the requested
    /// navigation, returning the settled window.
    pub async fn run(&self) -> Result<ReplayReport> {
        let args = &self.args;
        let mut config = load_config(self.config_path.as_deref())?;
        if let Some(kind) = args.kind {
            config.kind = kind;
        }

        let conversation = DemoConversation::generate(&DemoOptions {
            peer: DEMO_PEER,
            messages: args.messages,
            unread: args.unread,
            days: args.days,
            seed: args.seed,
            shuffle_timestamps: config.kind.positions_by_timestamp(),
        });
        let store =
            Arc::new(InMemoryStore::new().with_latency(Duration::from_millis(args.latency_ms)));
        conversation.populate(&store)?;

        let loader: Arc<dyn ResourceLoader> = match args.media_delay_ms {
            Some(ms) => Arc::new(DelayedLoader {
                delay: Duration::from_millis(ms),
            }),
            None => Arc::new(ImmediateLoader),
        };

        info!(
            target: "scrollfeed::replay",
            kind = %config.kind,
            messages = args.messages,
            unread = args.unread,
            "Starting replay"
        );
        let handle = FeedRuntime::spawn(
            config,
            store.clone(),
            Arc::new(PlainRenderer::default()),
            loader,
        );
        let mut notices = handle.subscribe().await?;
        let mut tally = ReplayTally::default();

        handle.resize(args.viewport).await?;
        handle.set_conversation(DEMO_PEER, None, None).await?;
        wait_ready(&mut notices, &mut tally).await?;
        settle(&handle).await?;

        for offset in 1..=i64::from(args.live) {
            let message = conversation.live_message(offset);
            store.insert(message.clone())?;
            handle.ingest(FeedUpdate::NewMessages(vec![message])).await?;
        }
        if let Some(id) = args.edit {
            let id = MessageId(id);
            let original = match conversation.message(id) {
                Some(message) => message.clone(),
                None => conversation.live_message(id.get() - i64::from(args.messages)),
            };
            let mut edited = original.with_flags(MessageFlags::EDITED);
            edited.content.text = format!("{} (edited)", edited.content.text);
            store.insert(edited.clone())?;
            handle.ingest(FeedUpdate::Edited(edited)).await?;
        }
        if !args.delete.is_empty() {
            let ids: Vec<MessageId> = args.delete.iter().copied().map(MessageId).collect();
            store.remove(DEMO_PEER, &ids)?;
            handle
                .ingest(FeedUpdate::Deleted {
                    peer: DEMO_PEER,
                    ids,
                })
                .await?;
        }
        settle(&handle).await?;

        for step in 0..args.scroll_up {
            let before = handle.snapshot().await?;
            if before.reached_top {
                debug!(target: "scrollfeed::replay", step, "Top reached, stopping scroll");
                break;
            }
            handle.scroll_to(0.0).await?;
            settle(&handle).await?;
        }

        if let Some(target) = args.jump {
            let outcome = handle.jump_to(MessageId(target)).await?;
            debug!(target: "scrollfeed::replay", %target, ?outcome, "Jump requested");
            if matches!(outcome, LoadOutcome::Started(_)) {
                settle(&handle).await?;
            }
        }

        let snapshot = handle.snapshot().await?;
        drain(&mut notices, &mut tally);
        handle.destroy().await?;

        Ok(ReplayReport {
            snapshot,
            tally,
            page_requests: store.page_requests().len(),
        })
    }
}

#[async_trait]
impl Command for ReplayCommand {
    async fn execute(&self) -> Result<()> {
        let report = self.run().await?;
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", output::summary(&report.snapshot))?;
        writeln!(
            stdout,
            "{} page requests, {} commits, {} evicted, {} failed loads, {} read advances",
            report.page_requests,
            report.tally.commits,
            report.tally.evicted,
            report.tally.failed_loads,
            report.tally.read_advances
        )?;
        writeln!(
            stdout,
            "{}",
            output::entry_table(&report.snapshot, !self.args.all)
        )?;
        Ok(())
    }
}

async fn wait_ready(
    notices: &mut broadcast::Receiver<FeedNotice>,
    tally: &mut ReplayTally,
) -> Result<()> {
    tokio::time::timeout(SETTLE_TIMEOUT, async {
        loop {
            let notice = notices.recv().await?;
            tally.record(&notice);
            if notice == FeedNotice::Ready {
                return Ok::<_, broadcast::error::RecvError>(());
            }
        }
    })
    .await
    .map_err(|_| eyre!("feed did not become ready"))??;
    Ok(())
}

/// Waits until no page is loading and every mounted entry is committed.
async fn settle(handle: &FeedHandle) -> Result<()> {
    tokio::time::timeout(SETTLE_TIMEOUT, async {
        loop {
            let snapshot = handle.snapshot().await?;
            if !snapshot.loading_top && !snapshot.loading_bottom && snapshot.pending.is_empty() {
                return Ok::<_, scrollfeed_core::FeedError>(());
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    })
    .await
    .map_err(|_| eyre!("feed did not settle"))??;
    Ok(())
}

fn drain(notices: &mut broadcast::Receiver<FeedNotice>, tally: &mut ReplayTally) {
    while let Ok(notice) = notices.try_recv() {
        tally.record(&notice);
    }
}
