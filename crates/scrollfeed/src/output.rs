use std::collections::HashMap;
use std::fmt::Write as _;

use comfy_table::{Cell, Color, Table};
use scrollfeed_core::feed::{FeedSnapshot, SnapshotEntry};
use scrollfeed_core::MessageId;

const PREVIEW_WIDTH: usize = 48;

/// One row per mounted entry in surface order. The first entry of each day
/// bucket carries the bucket label.
pub fn entry_table(snapshot: &FeedSnapshot, visible_only: bool) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Day").fg(Color::Green),
        Cell::new("Id").fg(Color::Green),
        Cell::new("Group").fg(Color::Green),
        Cell::new("Top").fg(Color::Green),
        Cell::new("Height").fg(Color::Green),
        Cell::new("Flags").fg(Color::Green),
        Cell::new("Preview").fg(Color::Green),
    ]);

    let labels: HashMap<MessageId, &str> = snapshot
        .buckets
        .iter()
        .filter_map(|bucket| bucket.ids.first().map(|id| (*id, bucket.label.as_str())))
        .collect();

    for entry in &snapshot.entries {
        if visible_only && !snapshot.visible.contains(&entry.id) {
            continue;
        }
        let label = labels.get(&entry.id).copied().unwrap_or_default();
        let mut id = Cell::new(entry.id);
        if entry.first_unread {
            id = id.fg(Color::Yellow);
        }
        table.add_row(vec![
            Cell::new(label),
            id,
            Cell::new(group_marker(entry)),
            Cell::new(format!("{:.0}", entry.top)),
            Cell::new(format!("{:.0}", entry.height)),
            Cell::new(flags(entry)),
            Cell::new(preview(entry)),
        ]);
    }
    table
}

/// Window-level state on a few lines.
pub fn summary(snapshot: &FeedSnapshot) -> String {
    let mut out = String::new();
    let conversation = snapshot
        .peer
        .map_or_else(|| "-".to_string(), |peer| peer.to_string());
    let _ = writeln!(
        out,
        "{} feed, peer {conversation}, phase {}",
        snapshot.kind, snapshot.phase
    );

    let range = match (snapshot.entries.first(), snapshot.entries.last()) {
        (Some(first), Some(last)) => format!("{}..={}", first.id, last.id),
        _ => "empty".to_string(),
    };
    let _ = writeln!(
        out,
        "window {range} ({} entries, {} days, {} pending)",
        snapshot.entries.len(),
        snapshot.buckets.len(),
        snapshot.pending.len()
    );
    let _ = writeln!(
        out,
        "edges: top {}, bottom {}",
        edge(snapshot.reached_top, snapshot.loading_top),
        edge(snapshot.reached_bottom, snapshot.loading_bottom)
    );
    let sticky = snapshot
        .sticky_day
        .and_then(|day| snapshot.buckets.iter().find(|b| b.day == day))
        .map_or("-", |bucket| bucket.label.as_str());
    let _ = writeln!(
        out,
        "scroll {:.0} of {:.0} (viewport {:.0}), sticky {sticky}",
        snapshot.scroll_top, snapshot.content_height, snapshot.viewport_height
    );
    let _ = write!(
        out,
        "read: inbound {}, outbound {}",
        cursor(snapshot.read_cursor.max_read_inbound),
        cursor(snapshot.read_cursor.max_read_outbound)
    );
    out
}

fn edge(reached: bool, loading: bool) -> &'static str {
    match (reached, loading) {
        (_, true) => "loading",
        (true, false) => "reached",
        (false, false) => "open",
    }
}

fn cursor(id: Option<MessageId>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.to_string())
}

fn group_marker(entry: &SnapshotEntry) -> String {
    let id = entry.group.map_or_else(String::new, |g| g.to_string());
    let shape = match (entry.position.first, entry.position.last) {
        (true, true) => "",
        (true, false) => " ┬",
        (false, false) => " │",
        (false, true) => " ┴",
    };
    format!("{id}{shape}")
}

fn flags(entry: &SnapshotEntry) -> String {
    let mut flags = Vec::new();
    if entry.outgoing {
        flags.push(if entry.read_by_peer { "out ✓✓" } else { "out ✓" }.to_string());
    }
    if entry.unread {
        flags.push("unread".to_string());
    }
    if entry.first_unread {
        flags.push("first unread".to_string());
    }
    if entry.album_size > 1 {
        flags.push(format!("album x{}", entry.album_size));
    }
    flags.join(", ")
}

fn preview(entry: &SnapshotEntry) -> String {
    let text = entry.lines.join(" ");
    if text.chars().count() <= PREVIEW_WIDTH {
        return text;
    }
    let cut: String = text.chars().take(PREVIEW_WIDTH - 1).collect();
    format!("{cut}…")
}
