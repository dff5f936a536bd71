//! Sequencing queue integration tests
//!
//! Tests verify:
//! - FIFO processing, including signs added mid-run
//! - retry count and single failure report per exhausted item
//! - pause-on-error and resume
//! - cooperative pause, stop and clear
//! - inter-item delay policy and progress reporting

mod helpers;

use helpers::{drain_events, wait_for_event, Harness, RecordingHooks};
use signplay_avatar::config::QueueSettings;
use signplay_avatar::{Error, SignOptions};
use signplay_common::events::{AvatarState, QueueItemStatus, SignEvent, SpeedMode};
use std::time::Duration;
use tokio::time::Instant;

fn statuses(harness: &Harness) -> Vec<QueueItemStatus> {
    harness.queue.items().iter().map(|item| item.status).collect()
}

/// `(kind, sign)` for every SignStarted / SignCompleted event
fn sign_lifecycle(events: &[SignEvent]) -> Vec<(&'static str, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            SignEvent::SignStarted { sign_id, .. } => Some(("started", sign_id.clone())),
            SignEvent::SignCompleted { sign_id, .. } => Some(("completed", sign_id.clone())),
            _ => None,
        })
        .collect()
}

/// Time between `previous` ending and the next sign's transition out of it
fn gap_after(harness: &Harness, previous: &str) -> Duration {
    let calls = harness.hooks.calls();
    let end = calls
        .iter()
        .find(|c| c.phase == "sign_end" && c.sign_id == previous)
        .unwrap()
        .at;
    let out = calls
        .iter()
        .find(|c| c.phase == "transition_out" && c.sign_id == previous)
        .unwrap()
        .at;
    out - end
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fingerspelling_runs_in_order_and_fast() {
    let harness = Harness::new(RecordingHooks::new(), QueueSettings::default());
    let mut rx = harness.events.subscribe();

    let started = Instant::now();
    harness
        .queue
        .add_signs(&["H", "E", "L", "L", "O"], SignOptions::default())
        .unwrap();
    harness.queue.wait_until_idle().await;
    let elapsed = started.elapsed();

    let events = drain_events(&mut rx);
    let expected: Vec<(&str, String)> = ["H", "E", "L", "L", "O"]
        .iter()
        .flat_map(|s| [("started", s.to_string()), ("completed", s.to_string())])
        .collect();
    assert_eq!(sign_lifecycle(&events), expected);

    for event in &events {
        if let SignEvent::SignCompleted { speed_mode, .. } = event {
            assert!(matches!(speed_mode, SpeedMode::Instant | SpeedMode::Ultra));
        }
    }

    // normal mode: 300ms in + 1800ms hold + 250ms out per letter
    assert!(elapsed < Duration::from_millis(5 * 2350), "took {:?}", elapsed);

    assert!(matches!(events.first(), Some(SignEvent::QueueStarted { total: 5, .. })));
    let progress = events
        .iter()
        .filter(|e| matches!(e, SignEvent::Progress { .. }))
        .count();
    assert_eq!(progress, 5);
    assert!(matches!(
        events.last(),
        Some(SignEvent::QueueCompleted { counts, .. }) if counts.completed == 5
    ));
    assert_eq!(harness.machine.current_state(), AvatarState::Neutral);
}

#[tokio::test(start_paused = true)]
async fn test_signs_added_mid_run_keep_fifo_order() {
    let harness = Harness::new(RecordingHooks::new(), QueueSettings::default());
    let mut rx = harness.events.subscribe();

    harness
        .queue
        .add_signs(&["Hello", "World"], SignOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.queue.add_sign("Again", SignOptions::default()).unwrap();
    harness
        .queue
        .add_signs(&["One", "Two"], SignOptions::default())
        .unwrap();
    harness.queue.wait_until_idle().await;

    assert_eq!(
        harness.hooks.started_signs(),
        vec!["Hello", "World", "Again", "One", "Two"]
    );

    // completion of item i always precedes the start of item i+1
    let lifecycle = sign_lifecycle(&drain_events(&mut rx));
    for (position, (kind, _)) in lifecycle.iter().enumerate() {
        let expected = if position % 2 == 0 { "started" } else { "completed" };
        assert_eq!(*kind, expected);
    }
    assert_eq!(harness.hooks.max_active(), 1);
    assert!(statuses(&harness)
        .iter()
        .all(|s| *s == QueueItemStatus::Completed));
}

// ============================================================================
// Retry and failure
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failing_item_attempted_max_retries_plus_one() {
    let settings = QueueSettings {
        max_retries: 2,
        pause_on_error: false,
        ..QueueSettings::default()
    };
    let harness = Harness::new(RecordingHooks::failing(&["Bad"]), settings);
    let mut rx = harness.events.subscribe();

    harness.queue.add_sign("Bad", SignOptions::default()).unwrap();
    harness.queue.wait_until_idle().await;

    assert_eq!(harness.hooks.count("load_start", "Bad"), 3);

    let events = drain_events(&mut rx);
    let retries = events
        .iter()
        .filter(|e| matches!(e, SignEvent::SignRetrying { .. }))
        .count();
    let failures: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SignEvent::SignFailed { .. }))
        .collect();
    assert_eq!(retries, 2);
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], SignEvent::SignFailed { attempts: 3, .. }));

    let item = &harness.queue.items()[0];
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.retry_count, 2);
    assert!(item.error_message.as_deref().unwrap().contains("on_sign_start"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_retry_delay_restarts_attempts() {
    let settings = QueueSettings {
        max_retries: 2,
        pause_on_error: false,
        ..QueueSettings::default()
    };
    let harness = Harness::new(RecordingHooks::failing(&["Bad"]), settings);
    let mut rx = harness.events.subscribe();

    harness.queue.add_sign("Bad", SignOptions::default()).unwrap();
    wait_for_event(&mut rx, |e| matches!(e, SignEvent::SignRetrying { .. })).await;
    harness.queue.stop().await;

    let item = harness.queue.items()[0].clone();
    assert_eq!(item.status, QueueItemStatus::Pending);
    assert_eq!(item.retry_count, 0);
    assert!(item.start_time.is_none());
    assert!(item.error_message.is_none());
    assert_eq!(harness.hooks.count("load_start", "Bad"), 1);

    drain_events(&mut rx);
    assert!(harness.queue.start());
    harness.queue.wait_until_idle().await;

    assert_eq!(harness.hooks.count("load_start", "Bad"), 4);
    let failures: Vec<_> = drain_events(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SignEvent::SignFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], SignEvent::SignFailed { attempts: 3, .. }));

    let item = &harness.queue.items()[0];
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.retry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_pause_on_error_then_resume() {
    let harness = Harness::new(RecordingHooks::failing(&["Bad"]), QueueSettings::default());
    let mut waiter = harness.events.subscribe();
    let mut rx = harness.events.subscribe();

    harness
        .queue
        .add_signs(&["A", "Bad", "C"], SignOptions::default())
        .unwrap();
    wait_for_event(&mut waiter, |e| matches!(e, SignEvent::QueuePaused { .. })).await;

    assert_eq!(
        statuses(&harness),
        vec![
            QueueItemStatus::Completed,
            QueueItemStatus::Failed,
            QueueItemStatus::Pending
        ]
    );
    assert_eq!(harness.queue.items()[1].retry_count, 1);
    assert_eq!(harness.hooks.count("load_start", "Bad"), 2);
    assert!(harness.queue.is_paused());

    // stays put while paused
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.hooks.count("load_start", "C"), 0);

    assert!(harness.queue.resume());
    harness.queue.wait_until_idle().await;

    assert_eq!(harness.queue.items()[2].status, QueueItemStatus::Completed);
    let events = drain_events(&mut rx);
    let failures = events
        .iter()
        .filter(|e| matches!(e, SignEvent::SignFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    assert!(events.iter().any(|e| matches!(e, SignEvent::QueueResumed { .. })));
    assert!(matches!(
        events.last(),
        Some(SignEvent::QueueCompleted { counts, .. }) if counts.completed == 2 && counts.failed == 1
    ));
}

#[tokio::test(start_paused = true)]
async fn test_continue_on_error_skips_failed_item() {
    let settings = QueueSettings {
        pause_on_error: false,
        ..QueueSettings::default()
    };
    let harness = Harness::new(RecordingHooks::failing(&["Bad"]), settings);

    harness
        .queue
        .add_signs(&["A", "Bad", "C"], SignOptions::default())
        .unwrap();
    harness.queue.wait_until_idle().await;

    assert_eq!(
        statuses(&harness),
        vec![
            QueueItemStatus::Completed,
            QueueItemStatus::Failed,
            QueueItemStatus::Completed
        ]
    );
    assert!(!harness.queue.is_paused());
}

// ============================================================================
// Pause, stop, clear
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_lets_current_sign_finish() {
    let harness = Harness::new(RecordingHooks::new(), QueueSettings::default());
    let mut rx = harness.events.subscribe();

    harness
        .queue
        .add_signs(&["One", "Two", "Three", "Four"], SignOptions::default())
        .unwrap();
    wait_for_event(&mut rx, |e| {
        matches!(e, SignEvent::SignStarted { sign_id, .. } if sign_id == "Two")
    })
    .await;

    assert!(harness.queue.pause());
    assert!(!harness.queue.pause());
    wait_for_event(&mut rx, |e| {
        matches!(e, SignEvent::SignCompleted { sign_id, .. } if sign_id == "Two")
    })
    .await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.hooks.started_signs(), vec!["One", "Two"]);
    assert_eq!(harness.hooks.count("sign_end", "Two"), 1);
    assert_eq!(
        &statuses(&harness)[2..],
        &[QueueItemStatus::Pending, QueueItemStatus::Pending]
    );
    assert_eq!(harness.machine.current_state(), AvatarState::Neutral);

    assert!(harness.queue.resume());
    harness.queue.wait_until_idle().await;

    assert_eq!(
        harness.hooks.started_signs(),
        vec!["One", "Two", "Three", "Four"]
    );
    assert!(statuses(&harness)
        .iter()
        .all(|s| *s == QueueItemStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_in_flight_sign() {
    let harness = Harness::new(RecordingHooks::new(), QueueSettings::default());
    let mut rx = harness.events.subscribe();

    harness
        .queue
        .add_signs(&["One", "Two", "Three"], SignOptions::default())
        .unwrap();
    wait_for_event(&mut rx, |e| matches!(e, SignEvent::SignStarted { .. })).await;

    harness.queue.stop().await;

    let status = harness.queue.get_status();
    assert!(!status.is_running);
    assert!(!status.is_processing);
    assert_eq!(status.cursor, 1);
    assert_eq!(harness.hooks.started_signs(), vec!["One"]);
    assert_eq!(harness.hooks.count("sign_end", "One"), 1);
    assert_eq!(
        statuses(&harness),
        vec![
            QueueItemStatus::Completed,
            QueueItemStatus::Pending,
            QueueItemStatus::Pending
        ]
    );
    assert_eq!(harness.machine.current_state(), AvatarState::Neutral);
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, SignEvent::QueueStopped { position: 0, .. })));

    // restart picks up at the cursor
    assert!(harness.queue.start());
    harness.queue.wait_until_idle().await;
    assert_eq!(harness.hooks.started_signs(), vec!["One", "Two", "Three"]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_discards_items() {
    let settings = QueueSettings {
        auto_start: false,
        ..QueueSettings::default()
    };
    let harness = Harness::new(RecordingHooks::new(), settings);
    let mut rx = harness.events.subscribe();

    harness
        .queue
        .add_signs(&["One", "Two", "Three"], SignOptions::default())
        .unwrap();
    assert!(!harness.queue.is_running());

    harness.queue.clear(false).await;

    assert!(harness.queue.is_empty());
    assert_eq!(harness.queue.get_status().cursor, 0);
    assert!(!harness.queue.start());
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, SignEvent::QueueCleared { discarded: 3, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_clear_with_stop_mid_run() {
    let harness = Harness::new(RecordingHooks::new(), QueueSettings::default());
    let mut rx = harness.events.subscribe();

    harness
        .queue
        .add_signs(&["One", "Two", "Three"], SignOptions::default())
        .unwrap();
    wait_for_event(&mut rx, |e| matches!(e, SignEvent::SignStarted { .. })).await;

    harness.queue.clear(true).await;

    let status = harness.queue.get_status();
    assert!(harness.queue.is_empty());
    assert!(!status.is_running);
    assert!(!status.is_processing);
    assert_eq!(harness.hooks.started_signs(), vec!["One"]);

    harness.queue.add_sign("Again", SignOptions::default()).unwrap();
    harness.queue.wait_until_idle().await;
    assert_eq!(statuses(&harness), vec![QueueItemStatus::Completed]);
}

// ============================================================================
// Status, batches and delays
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_status_estimate_and_completion() {
    let settings = QueueSettings {
        auto_start: false,
        ..QueueSettings::default()
    };
    let harness = Harness::new(RecordingHooks::new(), settings);

    harness
        .queue
        .add_signs(&["One", "Two", "Three"], SignOptions::default())
        .unwrap();

    let status = harness.queue.get_status();
    assert_eq!(status.counts.pending, 3);
    assert_eq!(status.percentage, 0.0);
    assert_eq!(status.estimated_remaining_ms, 2400);
    assert_eq!(status.current_item.map(|i| i.sign_id), Some("One".to_string()));

    assert!(harness.queue.start());
    assert!(!harness.queue.start());
    harness.queue.wait_until_idle().await;

    let status = harness.queue.get_status();
    assert_eq!(status.counts.completed, 3);
    assert_eq!(status.percentage, 100.0);
    assert_eq!(status.estimated_remaining_ms, 0);
    assert!(harness
        .queue
        .items()
        .iter()
        .all(|item| item.duration_ms.is_some() && item.end_time.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_batch_membership() {
    let settings = QueueSettings {
        auto_start: false,
        ..QueueSettings::default()
    };
    let harness = Harness::new(RecordingHooks::new(), settings);

    let batch = harness
        .queue
        .add_signs(&["A", "B"], SignOptions::default())
        .unwrap();
    let single = harness.queue.add_sign("C", SignOptions::default()).unwrap();

    let items = harness.queue.items();
    assert_eq!(items[0].id, batch[0]);
    assert_eq!(items[2].id, single);
    assert!(items[0].batch_id.is_some());
    assert_eq!(items[0].batch_id, items[1].batch_id);
    assert_eq!(items[0].batch_size, 2);
    assert_eq!(items[0].options.batch_size, 2);
    assert_eq!(items[2].batch_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_identifiers_rejected() {
    let harness = Harness::new(RecordingHooks::new(), QueueSettings::default());

    assert!(matches!(
        harness.queue.add_sign("", SignOptions::default()),
        Err(Error::Common(_))
    ));
    assert!(harness
        .queue
        .add_signs(&["A", " "], SignOptions::default())
        .is_err());
    assert!(harness.queue.is_empty());
    assert!(!harness.queue.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_inter_item_delay_policy() {
    let harness = Harness::new(RecordingHooks::new(), QueueSettings::default());

    // distinct words: base delay
    harness.queue.add_sign("Apple", SignOptions::default()).unwrap();
    harness.queue.add_sign("Pear", SignOptions::default()).unwrap();
    // known pair: fast sequence
    harness.queue.add_sign("Thank", SignOptions::default()).unwrap();
    harness.queue.add_sign("You", SignOptions::default()).unwrap();
    // same batch: batch delay
    harness
        .queue
        .add_signs(&["Plum", "Fig"], SignOptions::default())
        .unwrap();
    harness.queue.wait_until_idle().await;

    assert!(gap_after(&harness, "Apple") >= Duration::from_millis(250));
    let pair = gap_after(&harness, "Thank");
    assert!(pair >= Duration::from_millis(20) && pair < Duration::from_millis(120));
    let batch = gap_after(&harness, "Plum");
    assert!(batch >= Duration::from_millis(120) && batch < Duration::from_millis(250));
}
