use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use crate::message::Message;
use crate::render::VisualHandle;
use crate::types::{Direction, Generation, GroupId, GroupedId, LoadToken, MessageId, SenderId};

/// One mounted entry. Albums mount as a single entry keyed by the highest
/// member id.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub id: MessageId,
    pub timestamp: i64,
    pub day: NaiveDate,
    pub group: Option<GroupId>,
    pub handle: VisualHandle,
    pub sender: SenderId,
    pub outgoing: bool,
    pub service: bool,
    pub unread_observed: bool,
    pub grouped_id: Option<GroupedId>,
    /// Source messages, ascending. A single message outside albums; the last
    /// one is the entry's own message.
    pub messages: Vec<Message>,
    /// Placed on the surface by a commit.
    pub committed: bool,
    pub read_by_peer: bool,
    pub first_unread: bool,
}

impl FeedEntry {
    pub fn member_ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.messages.iter().map(|m| m.id)
    }

    pub fn is_album(&self) -> bool {
        self.messages.len() > 1
    }
}

/// The authoritative set of mounted entries, ordered by id.
#[derive(Debug, Default)]
pub struct FeedWindow {
    entries: BTreeMap<MessageId, FeedEntry>,
    aliases: HashMap<MessageId, MessageId>,
    albums: HashMap<GroupedId, MessageId>,
    reached: [bool; 2],
    generation: Generation,
    loads: [Option<LoadToken>; 2],
    next_seq: u64,
}

impl FeedWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map any album member id to the id its entry is keyed by.
    pub fn resolve(&self, id: MessageId) -> Option<MessageId> {
        if self.entries.contains_key(&id) {
            Some(id)
        } else {
            self.aliases.get(&id).copied()
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.resolve(id).is_some()
    }

    pub fn album_entry(&self, grouped_id: GroupedId) -> Option<MessageId> {
        self.albums.get(&grouped_id).copied()
    }

    pub fn get(&self, id: MessageId) -> Option<&FeedEntry> {
        self.resolve(id).and_then(|key| self.entries.get(&key))
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut FeedEntry> {
        let key = self.resolve(id)?;
        self.entries.get_mut(&key)
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &FeedEntry> {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut FeedEntry> {
        self.entries.values_mut()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.entries.keys().copied().collect()
    }

    pub fn first_id(&self) -> Option<MessageId> {
        self.entries.keys().next().copied()
    }

    pub fn last_id(&self) -> Option<MessageId> {
        self.entries.keys().next_back().copied()
    }

    /// Id at the edge a load in `direction` extends from.
    pub fn edge(&self, direction: Direction) -> Option<MessageId> {
        match direction {
            Direction::Top => self.first_id(),
            Direction::Bottom => self.last_id(),
        }
    }

    /// Returns `false` without inserting if the id (or any album member) is
    /// already mounted.
    pub fn insert(&mut self, entry: FeedEntry) -> bool {
        if self.contains(entry.id) || entry.member_ids().any(|id| self.contains(id)) {
            return false;
        }
        for member in entry.member_ids() {
            if member != entry.id {
                self.aliases.insert(member, entry.id);
            }
        }
        if let Some(grouped_id) = entry.grouped_id {
            self.albums.insert(grouped_id, entry.id);
        }
        self.entries.insert(entry.id, entry);
        debug_assert!(self.is_consistent());
        true
    }

    pub fn remove(&mut self, id: MessageId) -> Option<FeedEntry> {
        let key = self.resolve(id)?;
        let entry = self.entries.remove(&key)?;
        for member in entry.member_ids() {
            self.aliases.remove(&member);
        }
        if let Some(grouped_id) = entry.grouped_id {
            self.albums.remove(&grouped_id);
        }
        Some(entry)
    }

    /// Move an entry to a new key, keeping its handle. Used when a temporary
    /// id is replaced by the store id, or an album's highest member changes.
    pub fn rekey(&mut self, old: MessageId, new: MessageId, messages: Vec<Message>) -> bool {
        if old != new && self.entries.contains_key(&new) {
            return false;
        }
        let Some(mut entry) = self.remove(old) else {
            return false;
        };
        entry.id = new;
        entry.messages = messages;
        self.insert(entry)
    }

    pub fn reached(&self, direction: Direction) -> bool {
        self.reached[direction.index()]
    }

    /// Returns whether the flag changed.
    pub fn set_reached(&mut self, direction: Direction, reached: bool) -> bool {
        let slot = &mut self.reached[direction.index()];
        let changed = *slot != reached;
        *slot = reached;
        changed
    }

    pub fn outstanding(&self, direction: Direction) -> Option<LoadToken> {
        self.loads[direction.index()]
    }

    /// Claim the direction's load slot. `None` if a load is outstanding.
    pub fn acquire(&mut self, direction: Direction) -> Option<LoadToken> {
        let slot = &mut self.loads[direction.index()];
        if slot.is_some() {
            return None;
        }
        self.next_seq += 1;
        let token = LoadToken {
            direction,
            generation: self.generation,
            seq: self.next_seq,
        };
        *slot = Some(token);
        Some(token)
    }

    /// A token is current when it was issued by this generation and still
    /// occupies its slot.
    pub fn is_current(&self, token: LoadToken) -> bool {
        self.loads[token.direction.index()] == Some(token)
    }

    pub fn release(&mut self, token: LoadToken) -> bool {
        if self.is_current(token) {
            self.loads[token.direction.index()] = None;
            true
        } else {
            false
        }
    }

    /// Drop everything and invalidate in-flight work.
    pub fn teardown(&mut self) {
        self.entries.clear();
        self.aliases.clear();
        self.albums.clear();
        self.reached = [false; 2];
        self.loads = [None; 2];
        self.generation = self.generation.next();
    }

    fn is_consistent(&self) -> bool {
        self.aliases
            .iter()
            .all(|(alias, key)| !self.entries.contains_key(alias) && self.entries.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HandleId, PeerId};

    fn message(id: i64) -> Message {
        Message::new(MessageId(id), PeerId(1), SenderId(1), id * 60, "")
    }

    fn entry(id: i64) -> FeedEntry {
        FeedEntry {
            id: MessageId(id),
            timestamp: id * 60,
            day: NaiveDate::default(),
            group: None,
            handle: VisualHandle {
                id: HandleId(id as u64),
                height: 40.0,
                lines: vec![],
                content_hash: 0,
            },
            sender: SenderId(1),
            outgoing: false,
            service: false,
            unread_observed: false,
            grouped_id: None,
            messages: vec![message(id)],
            committed: false,
            read_by_peer: false,
            first_unread: false,
        }
    }

    #[test]
    fn rejects_duplicates_and_album_aliases() {
        let mut window = FeedWindow::new();
        let mut album = entry(12);
        album.grouped_id = Some(GroupedId(5));
        album.messages = vec![message(10), message(11), message(12)];
        assert!(window.insert(album));
        assert!(!window.insert(entry(12)));
        assert!(!window.insert(entry(11)));
        assert_eq!(window.resolve(MessageId(10)), Some(MessageId(12)));
        assert_eq!(window.album_entry(GroupedId(5)), Some(MessageId(12)));

        window.remove(MessageId(10));
        assert!(window.is_empty());
        assert!(!window.contains(MessageId(11)));
    }

    #[test]
    fn ids_stay_ascending() {
        let mut window = FeedWindow::new();
        for id in [5, 1, 9, 3] {
            window.insert(entry(id));
        }
        assert_eq!(window.ids(), vec![MessageId(1), MessageId(3), MessageId(5), MessageId(9)]);
        assert_eq!(window.edge(Direction::Top), Some(MessageId(1)));
        assert_eq!(window.edge(Direction::Bottom), Some(MessageId(9)));
    }

    #[test]
    fn one_token_per_direction() {
        let mut window = FeedWindow::new();
        let top = window.acquire(Direction::Top).unwrap();
        assert!(window.acquire(Direction::Top).is_none());
        let bottom = window.acquire(Direction::Bottom).unwrap();
        assert_ne!(top, bottom);

        assert!(window.release(top));
        assert!(!window.release(top));
        assert!(window.acquire(Direction::Top).is_some());
    }

    #[test]
    fn teardown_invalidates_tokens() {
        let mut window = FeedWindow::new();
        window.insert(entry(1));
        window.set_reached(Direction::Top, true);
        let token = window.acquire(Direction::Top).unwrap();
        let before = window.generation();

        window.teardown();

        assert!(window.is_empty());
        assert!(!window.reached(Direction::Top));
        assert!(!window.is_current(token));
        assert_ne!(window.generation(), before);
    }

    #[test]
    fn rekey_keeps_handle() {
        let mut window = FeedWindow::new();
        window.insert(entry(-1));
        assert!(window.rekey(MessageId(-1), MessageId(50), vec![message(50)]));
        let moved = window.get(MessageId(50)).unwrap();
        assert_eq!(moved.handle.id, HandleId(u64::MAX));
        assert!(!window.contains(MessageId(-1)));
    }
}
