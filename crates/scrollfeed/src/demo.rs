//! Synthetic conversations for the replay command.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use scrollfeed_core::render::ResourceKey;
use scrollfeed_core::store::InMemoryStore;
use scrollfeed_core::types::{GroupedId, SenderId};
use scrollfeed_core::{MediaKind, MediaRef, Message, MessageFlags, MessageId, PeerId, StoreError};

/// Midnight UTC, 2024-03-10.
const BASE_TIMESTAMP: i64 = 1_710_028_800;
const SECS_PER_DAY: i64 = 86_400;
const ME: SenderId = SenderId(1);
const LIVE_SENDER: SenderId = SenderId(11);
const SENDERS: [SenderId; 4] = [ME, SenderId(11), SenderId(12), SenderId(13)];

const WORDS: &[&str] = &[
    "feed", "window", "scroll", "anchor", "page", "load", "render", "commit", "album", "photo",
    "today", "yesterday", "later", "sure", "thanks", "maybe", "tomorrow", "deploy", "review",
    "coffee", "meeting", "release", "merge", "looks", "good", "ship", "it", "the", "a", "and",
];

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub peer: PeerId,
    pub messages: u32,
    pub unread: u32,
    pub days: u32,
    pub seed: u64,
    /// Scramble timestamps against ids, as scheduled and pinned feeds see them.
    pub shuffle_timestamps: bool,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            peer: PeerId(1),
            messages: 300,
            unread: 0,
            days: 4,
            seed: 7,
            shuffle_timestamps: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DemoConversation {
    pub peer: PeerId,
    pub messages: Vec<Message>,
    pub read_inbound: Option<MessageId>,
    pub read_outbound: Option<MessageId>,
}

impl DemoConversation {
    pub fn generate(options: &DemoOptions) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let total = i64::from(options.messages);
        let span = i64::from(options.days.max(1)) * SECS_PER_DAY;
        let step = (span / total.max(1)).max(2);

        let mut messages = Vec::with_capacity(options.messages as usize);
        let mut sender = ME;
        let mut next_album = 1;
        let mut id = 1;

        while id <= total {
            if rng.gen_bool(0.35) {
                sender = SENDERS.choose(&mut rng).copied().unwrap_or(ME);
            }
            let timestamp = BASE_TIMESTAMP + id * step + rng.gen_range(0..step / 2);

            if rng.gen_bool(0.05) {
                let size = rng.gen_range(2..=4).min(total - id + 1);
                let grouped = GroupedId(next_album);
                next_album += 1;
                for offset in 0..size {
                    let photo_id = id + offset;
                    let photo = Message::new(MessageId(photo_id), options.peer, sender, timestamp, "")
                        .in_album(grouped)
                        .with_media(MediaRef {
                            key: ResourceKey::new(format!("photo-{photo_id}")),
                            kind: MediaKind::Photo,
                            height: rng.gen_range(80..=200),
                        });
                    messages.push(photo);
                }
                id += size;
                continue;
            }

            let text = sentence(&mut rng);
            messages.push(Message::new(MessageId(id), options.peer, sender, timestamp, text));
            id += 1;
        }

        if options.shuffle_timestamps {
            let mut stamps: Vec<i64> = messages.iter().map(|m| m.timestamp).collect();
            stamps.shuffle(&mut rng);
            for (message, timestamp) in messages.iter_mut().zip(stamps) {
                message.timestamp = timestamp;
            }
        }

        for message in &mut messages {
            if message.sender == ME {
                message.flags |= MessageFlags::OUTGOING;
            }
        }

        let mut remaining = options.unread;
        for message in messages.iter_mut().rev() {
            if remaining == 0 {
                break;
            }
            if !message.is_outgoing() {
                message.flags |= MessageFlags::UNREAD;
                remaining -= 1;
            }
        }

        let read_inbound = messages
            .iter()
            .filter(|m| !m.is_outgoing() && !m.is_unread())
            .map(|m| m.id)
            .max();
        // The peer has seen everything but our last two messages.
        let read_outbound = messages
            .iter()
            .filter(|m| m.is_outgoing())
            .map(|m| m.id)
            .rev()
            .nth(2);

        Self {
            peer: options.peer,
            messages,
            read_inbound,
            read_outbound,
        }
    }

    pub fn populate(&self, store: &InMemoryStore) -> Result<(), StoreError> {
        for message in &self.messages {
            store.insert(message.clone())?;
        }
        if let Some(max_id) = self.read_inbound {
            store.set_read_inbound(self.peer, max_id)?;
        }
        if let Some(max_id) = self.read_outbound {
            store.set_read_outbound(self.peer, max_id)?;
        }
        Ok(())
    }

    /// An inbound message arriving after the generated history. `offset`
    /// counts from 1.
    pub fn live_message(&self, offset: i64) -> Message {
        let last_id = self.messages.last().map_or(0, |m| m.id.get());
        let last_ts = self
            .messages
            .iter()
            .map(|m| m.timestamp)
            .max()
            .unwrap_or(BASE_TIMESTAMP);
        Message::new(
            MessageId(last_id + offset),
            self.peer,
            LIVE_SENDER,
            last_ts + offset * 30,
            format!("live message {offset}"),
        )
        .with_flags(MessageFlags::UNREAD)
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn first_unread(&self) -> Option<MessageId> {
        self.messages.iter().find(|m| m.is_unread()).map(|m| m.id)
    }
}

fn sentence(rng: &mut StdRng) -> String {
    let len = rng.gen_range(2..=28);
    let mut words: Vec<&str> = Vec::with_capacity(len);
    for _ in 0..len {
        words.push(WORDS.choose(rng).copied().unwrap_or("ok"));
    }
    words.join(" ")
}
