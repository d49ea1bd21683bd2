use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::{FeedKind, MessageId};

/// Where a committed entry goes in its bucket's visual order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Directly below the separator.
    AfterSeparator,
    End,
    Index(usize),
}

#[derive(Debug, Clone)]
pub struct DateBucket {
    pub day: NaiveDate,
    members: BTreeSet<MessageId>,
    order: Vec<MessageId>,
    pub is_sticky: bool,
}

impl DateBucket {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            members: BTreeSet::new(),
            order: Vec::new(),
            is_sticky: false,
        }
    }

    pub fn members(&self) -> &BTreeSet<MessageId> {
        &self.members
    }

    /// Committed entries in the order they appear on the surface.
    pub fn order(&self) -> &[MessageId] {
        &self.order
    }

    pub fn day_timestamp(&self) -> i64 {
        self.day
            .and_hms_opt(0, 0, 0)
            .map_or(0, |dt| dt.and_utc().timestamp())
    }
}

/// Day buckets keyed by calendar day, iterated oldest first.
#[derive(Debug, Clone)]
pub struct DateSegmenter {
    buckets: BTreeMap<NaiveDate, DateBucket>,
    index: HashMap<MessageId, NaiveDate>,
    offset: Option<FixedOffset>,
}

impl DateSegmenter {
    pub fn new(utc_offset_secs: Option<i32>) -> Self {
        Self {
            buckets: BTreeMap::new(),
            index: HashMap::new(),
            offset: utc_offset_secs.and_then(FixedOffset::east_opt),
        }
    }

    pub fn day_of(&self, timestamp: i64) -> NaiveDate {
        let utc = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_default();
        match self.offset {
            Some(offset) => utc.with_timezone(&offset).date_naive(),
            None => utc.with_timezone(&Local).date_naive(),
        }
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.day_of(now.timestamp())
    }

    /// Register `id` in the bucket for `timestamp`, creating the bucket on
    /// first use.
    pub fn bucket_for(&mut self, id: MessageId, timestamp: i64) -> NaiveDate {
        let day = self.day_of(timestamp);
        if let Some(previous) = self.index.get(&id).copied() {
            if previous == day {
                return day;
            }
            self.release(id);
        }
        self.buckets
            .entry(day)
            .or_insert_with(|| DateBucket::new(day))
            .members
            .insert(id);
        self.index.insert(id, day);
        day
    }

    /// Remove `id` from its bucket. Returns the day of a bucket that became
    /// empty and was destroyed.
    pub fn release(&mut self, id: MessageId) -> Option<NaiveDate> {
        let day = self.index.remove(&id)?;
        let bucket = self.buckets.get_mut(&day)?;
        bucket.members.remove(&id);
        bucket.order.retain(|m| *m != id);
        if bucket.members.is_empty() {
            self.buckets.remove(&day);
            return Some(day);
        }
        None
    }

    pub fn rekey(&mut self, old: MessageId, new: MessageId) {
        let Some(day) = self.index.remove(&old) else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&day) {
            bucket.members.remove(&old);
            bucket.members.insert(new);
            for slot in &mut bucket.order {
                if *slot == old {
                    *slot = new;
                }
            }
        }
        self.index.insert(new, day);
    }

    pub fn place(&mut self, id: MessageId, placement: Placement) {
        let Some(day) = self.index.get(&id).copied() else {
            return;
        };
        let Some(bucket) = self.buckets.get_mut(&day) else {
            return;
        };
        bucket.order.retain(|m| *m != id);
        let at = match placement {
            Placement::AfterSeparator => 0,
            Placement::End => bucket.order.len(),
            Placement::Index(i) => i.min(bucket.order.len()),
        };
        bucket.order.insert(at, id);
    }

    /// Take a committed entry out of the visual order, keeping membership.
    pub fn unplace(&mut self, id: MessageId) {
        if let Some(bucket) = self
            .index
            .get(&id)
            .and_then(|day| self.buckets.get_mut(day))
        {
            bucket.order.retain(|m| *m != id);
        }
    }

    pub fn day_for_id(&self, id: MessageId) -> Option<NaiveDate> {
        self.index.get(&id).copied()
    }

    pub fn bucket(&self, day: NaiveDate) -> Option<&DateBucket> {
        self.buckets.get(&day)
    }

    pub fn buckets(&self) -> impl Iterator<Item = &DateBucket> {
        self.buckets.values()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn sticky(&self) -> Option<NaiveDate> {
        self.buckets.values().find(|b| b.is_sticky).map(|b| b.day)
    }

    pub fn set_sticky(&mut self, day: Option<NaiveDate>) {
        for bucket in self.buckets.values_mut() {
            bucket.is_sticky = Some(bucket.day) == day;
        }
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.index.clear();
    }
}

pub fn bucket_label(day: NaiveDate, today: NaiveDate, kind: FeedKind) -> String {
    let scheduled = kind == FeedKind::Scheduled;
    if day == today {
        return if scheduled {
            "Scheduled for today".to_string()
        } else {
            "Today".to_string()
        };
    }

    let date = if day.year() == today.year() {
        day.format("%B %-d").to_string()
    } else {
        day.format("%B %-d, %Y").to_string()
    };
    if scheduled {
        format!("Scheduled for {date}")
    } else {
        date
    }
}
