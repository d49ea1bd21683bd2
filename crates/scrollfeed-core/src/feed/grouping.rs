use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

use crate::types::{GroupId, MessageId, SenderId};

/// What the grouping rules need to know about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupItem {
    pub id: MessageId,
    pub sender: SenderId,
    pub timestamp: i64,
    pub day: NaiveDate,
    pub outgoing: bool,
    pub service: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupPosition {
    /// Renders the sender name and avatar.
    pub first: bool,
    /// Renders the bubble tail.
    pub last: bool,
}

type SortKey = (i64, MessageId);

/// Clusters adjacent entries into sender runs. Every item belongs to exactly
/// one group; a lone item forms a group of one.
#[derive(Debug, Clone)]
pub struct GroupingEngine {
    items: BTreeMap<SortKey, GroupItem>,
    keys: HashMap<MessageId, SortKey>,
    membership: HashMap<MessageId, GroupId>,
    groups: HashMap<GroupId, Vec<MessageId>>,
    next_group: u64,
    proximity_secs: i64,
    by_timestamp: bool,
}

impl GroupingEngine {
    pub fn new(proximity_secs: i64, by_timestamp: bool) -> Self {
        Self {
            items: BTreeMap::new(),
            keys: HashMap::new(),
            membership: HashMap::new(),
            groups: HashMap::new(),
            next_group: 0,
            proximity_secs,
            by_timestamp,
        }
    }

    fn key_for(&self, item: &GroupItem) -> SortKey {
        if self.by_timestamp {
            (item.timestamp, item.id)
        } else {
            (item.id.0, item.id)
        }
    }

    pub fn can_group(&self, a: &GroupItem, b: &GroupItem) -> bool {
        a.sender == b.sender
            && a.outgoing == b.outgoing
            && a.day == b.day
            && !a.service
            && !b.service
            && (b.timestamp - a.timestamp).abs() <= self.proximity_secs
    }

    /// Insert an item and regroup its neighbourhood. Returns every id whose
    /// group assignment may have changed.
    pub fn add_entry(&mut self, item: GroupItem, prepend: bool) -> Vec<MessageId> {
        if self.keys.contains_key(&item.id) {
            return self.update_group_for_id(item);
        }
        trace!(target: "feed.grouping", id = %item.id, prepend, "add entry");
        let key = self.key_for(&item);
        self.items.insert(key, item);
        self.keys.insert(item.id, key);
        self.regroup_around(key)
    }

    pub fn remove_entry(&mut self, id: MessageId) -> Vec<MessageId> {
        let Some(key) = self.keys.remove(&id) else {
            return Vec::new();
        };
        let (from, to) = self.region(key);
        self.items.remove(&key);
        if let Some(group) = self.membership.remove(&id) {
            let now_empty = self.groups.get_mut(&group).is_some_and(|members| {
                members.retain(|m| *m != id);
                members.is_empty()
            });
            if now_empty {
                self.groups.remove(&group);
            }
        }
        self.rebuild(from, to)
    }

    /// Refresh an item's attributes (after an edit or a reposition) and regroup
    /// around it.
    pub fn update_group_for_id(&mut self, item: GroupItem) -> Vec<MessageId> {
        let mut touched = self.remove_entry(item.id);
        let key = self.key_for(&item);
        self.items.insert(key, item);
        self.keys.insert(item.id, key);
        touched.extend(self.regroup_around(key));
        touched.sort_unstable();
        touched.dedup();
        touched
    }

    pub fn group_of(&self, id: MessageId) -> Option<GroupId> {
        self.membership.get(&id).copied()
    }

    pub fn members(&self, group: GroupId) -> &[MessageId] {
        self.groups.get(&group).map_or(&[], Vec::as_slice)
    }

    pub fn position(&self, id: MessageId) -> Option<GroupPosition> {
        let members = self.groups.get(self.membership.get(&id)?)?;
        Some(GroupPosition {
            first: members.first() == Some(&id),
            last: members.last() == Some(&id),
        })
    }

    /// Groups in feed order.
    pub fn groups(&self) -> Vec<Vec<MessageId>> {
        let mut out: Vec<Vec<MessageId>> = Vec::new();
        let mut current = None;
        for item in self.items.values() {
            let group = self.membership.get(&item.id).copied();
            if group.is_some() && group == current {
                if let Some(last) = out.last_mut() {
                    last.push(item.id);
                }
            } else {
                out.push(vec![item.id]);
                current = group;
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.keys.clear();
        self.membership.clear();
        self.groups.clear();
    }

    fn regroup_around(&mut self, key: SortKey) -> Vec<MessageId> {
        let (from, to) = self.region(key);
        self.rebuild(from, to)
    }

    /// The span covering the groups of `key`'s item and of its two neighbours.
    fn region(&self, key: SortKey) -> (SortKey, SortKey) {
        let prev = self.items.range(..key).next_back().map(|(_, item)| item.id);
        let next = self
            .items
            .range((std::ops::Bound::Excluded(key), std::ops::Bound::Unbounded))
            .next()
            .map(|(_, item)| item.id);

        let mut from = key;
        let mut to = key;
        for id in prev.into_iter().chain(next) {
            if let Some((first, last)) = self.group_bounds(id) {
                from = from.min(first);
                to = to.max(last);
            }
        }
        (from, to)
    }

    fn group_bounds(&self, id: MessageId) -> Option<(SortKey, SortKey)> {
        let own = self.keys.get(&id).copied()?;
        let Some(members) = self.membership.get(&id).and_then(|g| self.groups.get(g)) else {
            return Some((own, own));
        };
        let first = members.first().and_then(|m| self.keys.get(m)).copied()?;
        let last = members.last().and_then(|m| self.keys.get(m)).copied()?;
        Some((first.min(own), last.max(own)))
    }

    fn rebuild(&mut self, from: SortKey, to: SortKey) -> Vec<MessageId> {
        let span: Vec<GroupItem> = self.items.range(from..=to).map(|(_, item)| *item).collect();
        for item in &span {
            if let Some(group) = self.membership.remove(&item.id) {
                self.groups.remove(&group);
            }
        }

        let mut run: Vec<MessageId> = Vec::new();
        let mut previous: Option<GroupItem> = None;
        for item in &span {
            let joins = previous.is_some_and(|p| self.can_group(&p, item));
            if !joins && !run.is_empty() {
                self.seal(std::mem::take(&mut run));
            }
            run.push(item.id);
            previous = Some(*item);
        }
        if !run.is_empty() {
            self.seal(run);
        }

        span.iter().map(|item| item.id).collect()
    }

    fn seal(&mut self, members: Vec<MessageId>) {
        self.next_group += 1;
        let group = GroupId(self.next_group);
        for id in &members {
            self.membership.insert(*id, group);
        }
        self.groups.insert(group, members);
    }
}
