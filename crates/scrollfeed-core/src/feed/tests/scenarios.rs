use super::*;
use crate::feed::FeedPhase;
use crate::types::FeedKind;
use rstest::rstest;

fn unread_after(read: i64, total: i64) -> Vec<Message> {
    (1..=total)
        .map(|id| {
            let message = inbound(id);
            if id > read {
                message.with_flags(MessageFlags::UNREAD)
            } else {
                message
            }
        })
        .collect()
}

#[test]
fn opens_at_latest_page_pinned_to_bottom() {
    let mut h = Harness::chat().with_read_history(100);
    h.open(PEER);

    assert_eq!(h.engine.phase(), FeedPhase::Ready);
    assert_eq!(h.surface(), ids(86..=100));
    assert_eq!(h.page_requests[0].anchor, None);
    assert_eq!(h.page_requests[0].count, 15);
    assert!(h.engine.is_fully_loaded(Direction::Bottom));
    assert!(!h.engine.is_fully_loaded(Direction::Top));
    assert!((h.content_height() - 512.0).abs() < f64::EPSILON);
    assert!((h.scroll_top() - 212.0).abs() < f64::EPSILON);
    assert!(h.saw(|n| matches!(n, FeedNotice::Ready)));
    assert!(h.saw(|n| matches!(
        n,
        FeedNotice::ReachedEdge {
            direction: Direction::Bottom
        }
    )));
    h.assert_consistent();
}

#[test]
fn prepend_keeps_visible_content_in_place() {
    let mut h = Harness::chat().with_read_history(100);
    h.open(PEER);
    let before = h.content_height();
    assert!((before - 512.0).abs() < f64::EPSILON);
    assert!((h.scroll_top() - 212.0).abs() < f64::EPSILON);

    // The scroll reached the top edge and pulled in an older page.
    h.scroll_to(0.0);
    assert_eq!(h.surface(), ids(46..=100));
    let request = h.page_requests.last().unwrap();
    assert_eq!(request.anchor, Some(MessageId(86)));
    assert_eq!((request.count, request.back_limit), (40, 0));

    // The page landed with the viewport at 0, so the offset grows by exactly
    // the prepended height.
    let delta = h.content_height() - before;
    assert!((delta - 40.0 * 32.0).abs() < f64::EPSILON);
    assert!((h.scroll_top() - delta).abs() < 1e-6);
    h.assert_consistent();
}

#[test]
fn pages_committed_together_keep_visible_content_in_place() {
    let mut h = Harness::chat()
        .with_messages(unread_after(50, 200))
        .read_through(PEER, 50);
    h.open(PEER);
    assert_eq!(h.surface(), ids(35..=64));

    let anchor = crate::feed::layout::visible_ids(h.engine.rows(), h.engine.viewport())[0];
    let offset = |h: &Harness| {
        h.engine
            .rows()
            .iter()
            .find(|row| row.kind == RowKind::Entry(anchor))
            .map(|row| row.top - h.scroll_top())
            .unwrap()
    };
    let before = offset(&h);

    // Both edge pages arrive before the next tick and land in one commit.
    h.hold_pages = true;
    assert!(matches!(h.load(Direction::Top), LoadOutcome::Started(_)));
    assert!(matches!(h.load(Direction::Bottom), LoadOutcome::Started(_)));
    h.hold_pages = false;
    let mut effects = Vec::new();
    for (token, request) in std::mem::take(&mut h.held) {
        let page = h.page(&request);
        effects.extend(h.engine.handle(FeedAction::PageLoaded { token, page }));
    }
    h.run(effects);

    assert_eq!(h.engine.window().first_id(), Some(MessageId(1)));
    assert!(h.engine.window().last_id() > Some(MessageId(64)));
    assert!((offset(&h) - before).abs() < 1e-6);
    h.assert_consistent();
}

#[test]
fn repeated_top_loads_evict_the_bottom() {
    let mut h = Harness::chat().with_read_history(300);
    h.open(PEER);

    for _ in 0..3 {
        h.scroll_to(0.0);
    }

    assert_eq!(h.engine.window().len(), 80);
    assert_eq!(h.engine.window().first_id(), Some(MessageId(166)));
    assert_eq!(h.engine.window().last_id(), Some(MessageId(245)));
    assert!(!h.engine.is_fully_loaded(Direction::Bottom));
    let evicted = h
        .notices
        .iter()
        .find_map(|n| match n {
            FeedNotice::Evicted { side, ids } => Some((*side, ids.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(evicted, (Direction::Bottom, ids(246..=300)));
    h.assert_consistent();

    // The bottom is reachable again by paging.
    let outcome = h.load(Direction::Bottom);
    assert!(matches!(outcome, LoadOutcome::Started(_)));
    assert_eq!(h.engine.window().last_id(), Some(MessageId(284)));
    h.assert_consistent();
}

#[test]
fn eviction_never_removes_visible_entries() {
    let mut h = Harness::chat().with_read_history(300);
    h.open(PEER);
    for _ in 0..3 {
        h.scroll_to(0.0);
        let visible = crate::feed::layout::visible_ids(h.engine.rows(), h.engine.viewport());
        for id in visible {
            assert!(h.engine.window().contains(id));
        }
    }
}

#[test]
fn opens_at_first_unread_and_marks_what_is_seen() {
    let mut h = Harness::chat()
        .with_messages(unread_after(50, 100))
        .read_through(PEER, 50);
    h.open(PEER);

    assert_eq!(h.surface(), ids(35..=64));
    assert!(!h.engine.is_fully_loaded(Direction::Bottom));
    let first_unread: Vec<MessageId> = h
        .engine
        .window()
        .entries()
        .filter(|e| e.first_unread)
        .map(|e| e.id)
        .collect();
    assert_eq!(first_unread, ids([51]));

    // Row 50 sits at 512..544 and is centred in the 300px viewport.
    assert!((h.scroll_top() - 378.0).abs() < f64::EPSILON);
    assert_eq!(
        h.mark_reads,
        vec![MarkReadRequest {
            max_id: MessageId(55),
            attempt: 0
        }]
    );

    // Scrolling to the window bottom reads the rest and pages newer history.
    let bottom = h.engine.viewport().max_offset();
    h.scroll_to(bottom);
    let marked: Vec<MessageId> = h.mark_reads.iter().map(|r| r.max_id).collect();
    assert_eq!(marked, ids([55, 64]));
    assert_eq!(h.engine.read_cursor().max_read_inbound, Some(MessageId(64)));
    assert!(h.engine.is_fully_loaded(Direction::Bottom));
    assert_eq!(h.engine.window().last_id(), Some(MessageId(100)));
    h.assert_consistent();
}

#[test]
fn failed_mark_read_is_retried_once() {
    let mut h = Harness::chat()
        .with_messages(unread_after(50, 100))
        .read_through(PEER, 50);
    h.fail_mark_reads = 5;
    h.open(PEER);

    let attempts: Vec<(MessageId, u8)> =
        h.mark_reads.iter().map(|r| (r.max_id, r.attempt)).collect();
    assert_eq!(attempts, vec![(MessageId(55), 0), (MessageId(55), 1)]);
    // The cursor advanced optimistically and does not roll back.
    assert_eq!(h.engine.read_cursor().max_read_inbound, Some(MessageId(55)));
}

#[test]
fn offline_feed_defers_read_marks() {
    let mut h = Harness::chat()
        .with_messages(unread_after(90, 100))
        .read_through(PEER, 90);
    h.dispatch(FeedAction::SetOnline(false));
    h.open(PEER);
    assert!(h.mark_reads.is_empty());

    h.dispatch(FeedAction::SetOnline(true));
    assert_eq!(h.mark_reads.len(), 1);
    assert!(h.mark_reads[0].max_id > MessageId(90));
}

#[test]
fn live_message_at_bottom_sticks_and_is_read() {
    let mut h = Harness::chat().with_read_history(100);
    h.open(PEER);

    let message = inbound(101).with_flags(MessageFlags::UNREAD);
    h.store(message.clone());
    h.ingest(FeedUpdate::NewMessages(vec![message]));

    assert_eq!(h.surface().last(), Some(&MessageId(101)));
    let viewport = h.engine.viewport();
    assert!((viewport.scroll_top - viewport.max_offset()).abs() < f64::EPSILON);
    assert_eq!(h.mark_reads.last().map(|r| r.max_id), Some(MessageId(101)));
    h.assert_consistent();
}

#[test]
fn live_message_while_scrolled_up_leaves_view_alone() {
    let mut h = Harness::chat().with_read_history(15);
    h.open(PEER);
    assert_eq!(h.surface(), ids(1..=15));

    h.scroll_to(100.0);
    assert!(h.engine.is_fully_loaded(Direction::Top));
    let height = h.content_height();

    h.ingest(FeedUpdate::NewMessages(vec![inbound(16)]));
    assert_eq!(h.surface().last(), Some(&MessageId(16)));
    assert!((h.content_height() - height - 32.0).abs() < f64::EPSILON);
    assert!((h.scroll_top() - 100.0).abs() < f64::EPSILON);
}

#[test]
fn live_message_is_left_to_paging_when_detached_from_bottom() {
    let mut h = Harness::chat()
        .with_messages(unread_after(50, 100))
        .read_through(PEER, 50);
    h.open(PEER);

    h.ingest(FeedUpdate::NewMessages(vec![inbound(101)]));
    assert!(!h.engine.window().contains(MessageId(101)));
    assert_eq!(h.engine.newest_known(), Some(MessageId(101)));
}

#[test]
fn messages_for_other_conversations_are_ignored() {
    let mut h = Harness::chat().with_read_history(10);
    h.open(PEER);

    let foreign = Message::new(MessageId(11), OTHER_PEER, SenderId(3), DAY_ONE + 700, "hi");
    h.ingest(FeedUpdate::NewMessages(vec![foreign]));
    assert_eq!(h.surface(), ids(1..=10));
}

#[test]
fn deleting_a_whole_day_drops_its_bucket() {
    let day_two = (6..=8).map(|id| {
        Message::new(MessageId(id), PEER, SenderId(7), DAY_ONE + DAY + id * 60, "later")
    });
    let mut h = Harness::chat()
        .with_messages((1..=5).map(inbound).chain(day_two))
        .read_through(PEER, 8);
    h.open(PEER);
    assert_eq!(h.separators(), 2);

    h.ingest(FeedUpdate::Deleted {
        peer: PEER,
        ids: ids(6..=8),
    });
    assert_eq!(h.separators(), 1);
    assert_eq!(h.engine.segmenter().len(), 1);
    assert_eq!(h.surface(), ids(1..=5));
    h.assert_consistent();

    h.ingest(FeedUpdate::Deleted {
        peer: PEER,
        ids: ids([999]),
    });
    assert_eq!(h.surface(), ids(1..=5));
}

#[test]
fn stale_page_from_previous_conversation_is_dropped() {
    let other = (500..=505).map(|id| {
        Message::new(MessageId(id), OTHER_PEER, SenderId(9), DAY_ONE + id * 60, "other")
    });
    let mut h = Harness::chat()
        .with_read_history(50)
        .with_messages(other)
        .read_through(OTHER_PEER, 505);
    h.hold_pages = true;

    h.open(PEER);
    h.open(OTHER_PEER);
    assert_eq!(h.held.len(), 2);

    h.release_held();
    assert_eq!(h.surface(), ids(500..=505));
    assert!(h.engine.window().entries().all(|e| e.messages[0].peer == OTHER_PEER));
    h.assert_consistent();
}

#[test]
fn concurrent_loads_share_one_request() {
    let mut h = Harness::chat().with_read_history(100);
    h.open(PEER);
    h.hold_pages = true;

    let first = h.load(Direction::Top);
    let second = h.load(Direction::Top);
    let LoadOutcome::Started(token) = first else {
        panic!("expected a started load, got {first:?}");
    };
    assert_eq!(second, LoadOutcome::InFlight(token));
    assert_eq!(h.held.len(), 1);

    h.hold_pages = false;
    h.release_held();
    assert_eq!(h.engine.window().len(), 55);
}

#[test]
fn exhausted_directions_report_fully_loaded() {
    let mut h = Harness::chat().with_read_history(10);
    h.open(PEER);

    assert_eq!(h.load(Direction::Bottom), LoadOutcome::FullyLoaded);
    assert!(matches!(h.load(Direction::Top), LoadOutcome::Started(_)));
    assert!(h.engine.is_fully_loaded(Direction::Top));
    assert_eq!(h.load(Direction::Top), LoadOutcome::FullyLoaded);
}

#[test]
fn failed_page_leaves_edge_flags_untouched() {
    let mut h = Harness::chat().with_read_history(100);
    h.open(PEER);
    h.fail_pages = 1;

    assert!(matches!(h.load(Direction::Top), LoadOutcome::Started(_)));
    assert!(h.saw(|n| matches!(
        n,
        FeedNotice::LoadFailed {
            direction: Direction::Top,
            ..
        }
    )));
    assert!(!h.engine.is_fully_loaded(Direction::Top));
    assert!(!h.engine.is_loading(Direction::Top));

    assert!(matches!(h.load(Direction::Top), LoadOutcome::Started(_)));
    assert_eq!(h.engine.window().len(), 55);
}

#[test]
fn failed_initial_page_is_retried_by_the_next_edge_request() {
    let mut h = Harness::chat().with_read_history(100);
    h.fail_pages = 1;
    h.open(PEER);

    assert_eq!(h.engine.phase(), FeedPhase::Ready);
    assert!(h.engine.window().is_empty());
    assert!(!h.saw(|n| matches!(n, FeedNotice::Ready)));

    assert!(matches!(h.load(Direction::Bottom), LoadOutcome::Started(_)));
    assert_eq!(h.page_requests.len(), 2);
    assert_eq!(h.page_requests[1], h.page_requests[0]);
    assert_eq!(h.engine.phase(), FeedPhase::Ready);
    assert_eq!(h.surface(), ids(86..=100));
    assert!(h.saw(|n| matches!(n, FeedNotice::Ready)));
    assert!(h.engine.is_fully_loaded(Direction::Bottom));
    assert!((h.scroll_top() - 212.0).abs() < f64::EPSILON);
    h.assert_consistent();
}

#[test]
fn scrolling_an_empty_feed_retries_the_initial_jump() {
    let mut h = Harness::chat()
        .with_messages(unread_after(50, 100))
        .read_through(PEER, 50);
    h.fail_pages = 2;
    h.open(PEER);
    assert!(matches!(h.load(Direction::Top), LoadOutcome::Started(_)));
    assert!(h.engine.window().is_empty());

    h.scroll_to(0.0);
    assert_eq!(h.page_requests.len(), 3);
    assert_eq!(h.page_requests[2].anchor, Some(MessageId(50)));
    assert_eq!(h.surface(), ids(35..=64));
    assert!((h.scroll_top() - 378.0).abs() < f64::EPSILON);
    h.assert_consistent();
}

#[test]
fn sent_message_keeps_its_handle() {
    let mut h = Harness::chat().with_read_history(10);
    h.open(PEER);

    h.ingest(FeedUpdate::NewMessages(vec![outgoing(1000)]));
    let handle = h.engine.window().get(MessageId(1000)).unwrap().handle.id;

    h.ingest(FeedUpdate::MessageSent {
        temp_id: MessageId(1000),
        message: outgoing(11),
    });
    assert!(!h.engine.window().contains(MessageId(1000)));
    let entry = h.engine.window().get(MessageId(11)).unwrap();
    assert_eq!(entry.handle.id, handle);
    assert_eq!(h.surface().last(), Some(&MessageId(11)));
    h.assert_consistent();
}

#[test]
fn album_renders_as_one_entry_and_shrinks_on_delete() {
    let mut h = Harness::chat()
        .with_read_history(10)
        .with_messages((11..=13).map(|id| photo(id, 77)))
        .read_through(PEER, 13);
    h.open(PEER);

    assert_eq!(h.engine.window().len(), 11);
    assert_eq!(h.engine.window().get(MessageId(12)).unwrap().id, MessageId(13));
    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.entry(MessageId(13)).unwrap().album_size, 3);

    h.ingest(FeedUpdate::Deleted {
        peer: PEER,
        ids: ids([13]),
    });
    let entry = h.engine.window().get(MessageId(11)).unwrap();
    assert_eq!(entry.id, MessageId(12));
    assert_eq!(entry.messages.len(), 2);
    assert_eq!(h.surface().last(), Some(&MessageId(12)));
    h.assert_consistent();
}

#[test]
fn album_edit_is_resolved_from_the_store() {
    let mut h = Harness::chat()
        .with_messages((1..=3).map(|id| photo(id, 5)))
        .read_through(PEER, 3);
    h.open(PEER);
    let handle = h.engine.window().get(MessageId(3)).unwrap().handle.id;

    let mut edited = photo(2, 5);
    edited.content.text = "edited caption".to_string();
    h.store(edited);
    h.ingest(FeedUpdate::AlbumEdited {
        peer: PEER,
        grouped_id: GroupedId(5),
        deleted: Vec::new(),
    });

    let entry = h.engine.window().get(MessageId(3)).unwrap();
    assert_eq!(entry.handle.id, handle);
    assert!(entry.handle.lines.iter().any(|l| l == "edited caption"));
}

#[test]
fn album_taking_over_a_mounted_id_is_rejected() {
    let mut h = Harness::chat()
        .with_messages((1..=3).map(|id| photo(id, 9)))
        .with_messages([inbound(4), inbound(5)])
        .read_through(PEER, 5);
    h.open(PEER);
    assert_eq!(h.surface(), ids([3, 4, 5]));
    let before = h.engine.snapshot();

    let mut messages: Vec<Message> = (1..=3).map(|id| photo(id, 9)).collect();
    messages.push(photo(5, 9));
    h.dispatch(FeedAction::AlbumResolved {
        generation: h.engine.generation(),
        grouped_id: GroupedId(9),
        messages,
    });

    assert_eq!(h.engine.snapshot(), before);
    let album = h.engine.window().get(MessageId(3)).unwrap();
    assert_eq!(album.messages.len(), 3);
    assert_eq!(h.engine.window().resolve(MessageId(5)), Some(MessageId(5)));
    h.assert_consistent();
}

#[test]
fn edit_rerenders_in_place() {
    let mut h = Harness::chat().with_read_history(10);
    h.open(PEER);
    let before = h.content_height();
    let handle = h.engine.window().get(MessageId(5)).unwrap().handle.id;

    let mut edited = inbound(5).with_flags(MessageFlags::EDITED);
    edited.content.text = "a considerably longer message that has to wrap onto a second line".into();
    h.ingest(FeedUpdate::Edited(edited));

    let entry = h.engine.window().get(MessageId(5)).unwrap();
    assert_eq!(entry.handle.id, handle);
    assert_eq!(entry.handle.lines.len(), 2);
    assert!((h.content_height() - before - 20.0).abs() < f64::EPSILON);
    assert_eq!(h.surface(), ids(1..=10));
}

#[test]
fn scheduled_feed_inserts_by_timestamp() {
    let config = FeedConfig {
        kind: FeedKind::Scheduled,
        ..test_config()
    };
    let at = |id: i64, offset: i64| {
        Message::new(MessageId(id), PEER, SenderId(1), DAY_ONE + offset, "later")
            .with_flags(MessageFlags::OUTGOING)
    };
    let mut h = Harness::new(config).with_messages([
        at(1, 500),
        at(2, 100),
        at(3, 300),
        at(4, 200),
        at(5, 400),
    ]);
    h.open(PEER);
    assert_eq!(h.surface(), ids([2, 4, 3, 5, 1]));

    h.ingest(FeedUpdate::NewMessages(vec![at(6, 250)]));
    assert_eq!(h.surface(), ids([2, 4, 6, 3, 5, 1]));
    assert!(h.mark_reads.is_empty());
}

#[test]
fn history_read_marks_outgoing_entries() {
    let mut h = Harness::chat()
        .with_messages((1..=5).map(outgoing))
        .read_through(PEER, 5);
    h.open(PEER);

    h.ingest(FeedUpdate::HistoryRead {
        peer: PEER,
        thread: None,
        max_inbound: None,
        max_outbound: Some(MessageId(3)),
    });
    let read: Vec<MessageId> = h
        .engine
        .window()
        .entries()
        .filter(|e| e.read_by_peer)
        .map(|e| e.id)
        .collect();
    assert_eq!(read, ids(1..=3));
    assert_eq!(h.engine.read_cursor().max_read_outbound, Some(MessageId(3)));
}

#[test]
fn jump_inside_window_only_scrolls() {
    let mut h = Harness::chat().with_read_history(100);
    h.open(PEER);
    let requests = h.page_requests.len();

    assert_eq!(h.jump(90), LoadOutcome::Idle);
    assert_eq!(h.page_requests.len(), requests);
    // Row 90 sits at 160..192.
    assert!((h.scroll_top() - 26.0).abs() < f64::EPSILON);
}

#[test]
fn jump_outside_window_reloads_around_target() {
    let mut h = Harness::chat().with_read_history(100);
    h.open(PEER);
    let generation = h.engine.generation();

    assert!(matches!(h.jump(20), LoadOutcome::Started(_)));
    assert_ne!(h.engine.generation(), generation);
    assert_eq!(h.surface(), ids(5..=34));
    assert!(!h.engine.is_fully_loaded(Direction::Bottom));
    assert_eq!(h.engine.phase(), FeedPhase::Ready);
}

#[rstest]
#[case::newest_only_unread(9, None)]
#[case::several_unread(7, Some(8))]
fn unread_delimiter_placement(#[case] read: i64, #[case] expected: Option<i64>) {
    let mut h = Harness::chat()
        .with_messages(unread_after(read, 10))
        .read_through(PEER, read);
    h.open(PEER);

    let delimiter = h
        .engine
        .window()
        .entries()
        .find(|e| e.first_unread)
        .map(|e| e.id);
    assert_eq!(delimiter, expected.map(MessageId));
}

#[test]
fn dialog_flush_empties_the_window() {
    let mut h = Harness::chat().with_read_history(20);
    h.open(PEER);

    h.ingest(FeedUpdate::DialogFlushed { peer: PEER });
    assert!(h.engine.window().is_empty());
    assert!(h.engine.rows().is_empty());
    assert!(h.engine.segmenter().is_empty());
}

#[test]
fn migrated_peer_reopens_the_feed() {
    let other = (1..=4).map(|id| {
        Message::new(MessageId(id), OTHER_PEER, SenderId(9), DAY_ONE + id * 60, "moved")
    });
    let mut h = Harness::chat()
        .with_read_history(20)
        .with_messages(other)
        .read_through(OTHER_PEER, 4);
    h.open(PEER);

    h.ingest(FeedUpdate::PeerMigrated {
        from: PEER,
        to: OTHER_PEER,
    });
    assert_eq!(h.surface(), ids(1..=4));
    assert_eq!(h.engine.snapshot().peer, Some(OTHER_PEER));
}

#[test]
fn destroyed_feed_ignores_everything() {
    let mut h = Harness::chat().with_read_history(20);
    h.open(PEER);

    h.dispatch(FeedAction::Destroy);
    assert_eq!(h.engine.phase(), FeedPhase::Destroyed);
    assert!(h.engine.window().is_empty());
    assert!(h.saw(|n| matches!(n, FeedNotice::Destroyed)));

    let effects = h.engine.handle(FeedAction::SetConversation {
        peer: PEER,
        thread: None,
        target: None,
    });
    assert!(effects.is_empty());
    assert_eq!(h.engine.phase(), FeedPhase::Destroyed);
}

#[test]
fn consecutive_senders_group_together() {
    let mut h = Harness::chat()
        .with_messages([inbound(1), inbound(2), outgoing(3), inbound(4)])
        .read_through(PEER, 4);
    h.open(PEER);

    let groups = h.engine.grouping().groups();
    assert_eq!(groups, vec![ids([1, 2]), ids([3]), ids([4])]);
    let snapshot = h.engine.snapshot();
    let first = snapshot.entry(MessageId(1)).unwrap();
    let second = snapshot.entry(MessageId(2)).unwrap();
    assert!(first.position.first && !first.position.last);
    assert!(!second.position.first && second.position.last);
}
