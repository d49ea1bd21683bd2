use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $repr:ty) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                Self(raw)
            }
        }
    };
}

numeric_id!(
    /// Store-assigned message id. Totally ordered; larger ids are newer.
    MessageId,
    i64
);
numeric_id!(PeerId, i64);
numeric_id!(ThreadId, i64);
numeric_id!(SenderId, i64);
numeric_id!(
    /// Album key shared by messages that render as one entry.
    GroupedId,
    i64
);
numeric_id!(GroupId, u64);
numeric_id!(BatchId, u64);
numeric_id!(HandleId, u64);

/// Liveness stamp of a feed window. Bumped on every teardown so that
/// completions started against an older window can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    /// Older messages.
    Top,
    /// Newer messages.
    Bottom,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Top => Direction::Bottom,
            Direction::Bottom => Direction::Top,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Top => 0,
            Direction::Bottom => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoadMode {
    /// Grow the window past its current edge.
    Extend,
    /// Load a slice centered on a target id.
    JumpTo,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeedKind {
    #[default]
    Chat,
    Discussion,
    Pinned,
    Scheduled,
}

impl FeedKind {
    /// Feeds whose entries are positioned by binary search on `(timestamp, id)`
    /// instead of being appended or prepended at the bucket edge.
    pub fn positions_by_timestamp(self) -> bool {
        matches!(self, FeedKind::Pinned | FeedKind::Scheduled)
    }

    /// Feeds that participate in read tracking and cache preloading.
    pub fn is_conversation(self) -> bool {
        matches!(self, FeedKind::Chat | FeedKind::Discussion)
    }
}

/// Identifies one outstanding page load. At most one token per direction is
/// live in a window at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadToken {
    pub direction: Direction,
    pub generation: Generation,
    pub seq: u64,
}

impl fmt::Display for LoadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.generation, self.direction, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A new page request was issued.
    Started(LoadToken),
    /// A load for that direction is already outstanding.
    InFlight(LoadToken),
    /// The direction is already fully loaded.
    FullyLoaded,
    /// No active conversation, or nothing to anchor the load on.
    Idle,
}

impl LoadOutcome {
    pub fn token(&self) -> Option<LoadToken> {
        match self {
            LoadOutcome::Started(token) | LoadOutcome::InFlight(token) => Some(*token),
            LoadOutcome::FullyLoaded | LoadOutcome::Idle => None,
        }
    }
}
