//! Session lifecycle: pending queries, activation, stalls, stop and failure.

use crate::helpers::{
    FakeBackend, FakeRelay, FakeSynthesizer, FakeTransport, Fakes, eventually, launch, settle,
    test_config, try_launch,
};
use avatar_chat::{RuntimeEvent, SessionState, WidgetError};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn queries_before_activation_are_sent_in_order_once_active() {
    let mut h = launch(test_config(), Fakes::healthy());

    for query in ["first", "second", "third"] {
        h.handle.submit(query).unwrap();
    }
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Inactive);
    assert_eq!(snapshot.pending_queries, 3);
    assert!(h.backend.queries().is_empty());

    h.start_active().await;
    eventually(|| h.backend.queries().len() == 3).await;
    assert_eq!(h.backend.queries(), ["first", "second", "third"]);

    let queued: Vec<usize> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            RuntimeEvent::QueryQueued { pending, .. } => Some(pending),
            _ => None,
        })
        .collect();
    assert_eq!(queued, [1, 2, 3]);
    assert_eq!(h.handle.snapshot().await.unwrap().pending_queries, 0);
}

#[tokio::test(start_paused = true)]
async fn backend_calls_carry_the_configured_session_id() {
    let h = launch(test_config(), Fakes::healthy());
    h.start_active().await;
    h.handle.submit("  hello  ").unwrap();
    eventually(|| !h.backend.queries().is_empty()).await;

    let calls = h.backend.queries.lock().unwrap().clone();
    assert_eq!(calls, [("test-session".to_owned(), "hello".to_owned())]);
}

#[tokio::test(start_paused = true)]
async fn blank_session_id_gets_a_generated_one() {
    let mut config = test_config();
    config.chat.session_id = String::new();
    let h = launch(config, Fakes::healthy());
    let id = h.handle.snapshot().await.unwrap().session_id;
    assert_eq!(id.len(), 36);
}

#[tokio::test(start_paused = true)]
async fn blank_input_is_ignored() {
    let mut h = launch(test_config(), Fakes::healthy());
    h.handle.submit("   ").unwrap();
    assert_eq!(h.handle.snapshot().await.unwrap().pending_queries, 0);
    assert!(h.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn activation_waits_for_video_and_settle_delay() {
    let h = launch(test_config(), Fakes::healthy());
    h.handle.start().unwrap();
    settle(Duration::from_millis(100)).await;
    assert_eq!(h.handle.state(), SessionState::Starting);
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 1);

    h.wait_for_state(SessionState::Active).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 1, "system prompt seeded on start");
}

#[tokio::test(start_paused = true)]
async fn start_is_ignored_while_a_session_is_live() {
    let h = launch(test_config(), Fakes::healthy());
    h.start_active().await;
    h.handle.start().unwrap();
    settle(Duration::from_secs(1)).await;
    assert_eq!(h.relay.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.handle.state(), SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn stalled_stream_triggers_exactly_one_reconnect() {
    let fakes = Fakes {
        transport: FakeTransport {
            freeze_first_session: true,
            ..FakeTransport::default()
        },
        ..Fakes::healthy()
    };
    let mut h = launch(test_config(), fakes);
    h.start_active().await;

    // Frozen first session: baseline tick, then a repeated sample.
    settle(Duration::from_secs(30)).await;
    assert_eq!(h.handle.state(), SessionState::Active);
    assert_eq!(h.relay.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 2);
    assert!(h.transport.closes.load(Ordering::SeqCst) >= 1);

    let events = h.drain_events();
    let reconnects = events
        .iter()
        .filter(|e| **e == RuntimeEvent::Reconnecting)
        .count();
    assert_eq!(reconnects, 1);
    assert!(events.contains(&RuntimeEvent::SessionStateChanged {
        state: SessionState::Reconnecting
    }));
}

#[tokio::test(start_paused = true)]
async fn queries_during_reconnect_are_replayed() {
    let fakes = Fakes {
        relay: FakeRelay {
            delay: Duration::from_secs(1),
            ..FakeRelay::default()
        },
        transport: FakeTransport {
            freeze_first_session: true,
            ..FakeTransport::default()
        },
        ..Fakes::healthy()
    };
    let h = launch(test_config(), fakes);
    h.start_active().await;
    h.wait_for_state(SessionState::Starting).await;

    h.handle.submit("while reconnecting").unwrap();
    assert_eq!(h.handle.snapshot().await.unwrap().pending_queries, 1);

    h.wait_for_state(SessionState::Active).await;
    eventually(|| h.backend.queries() == ["while reconnecting"]).await;
}

#[tokio::test(start_paused = true)]
async fn stop_while_starting_closes_without_draining() {
    let fakes = Fakes {
        relay: FakeRelay {
            delay: Duration::from_secs(2),
            ..FakeRelay::default()
        },
        ..Fakes::healthy()
    };
    let mut h = launch(test_config(), fakes);

    h.handle.submit("never sent").unwrap();
    h.handle.start().unwrap();
    settle(Duration::from_millis(500)).await;
    assert_eq!(h.handle.state(), SessionState::Starting);

    h.handle.stop().unwrap();
    settle(Duration::from_secs(30)).await;

    assert_eq!(h.handle.state(), SessionState::Closed);
    assert!(h.backend.queries().is_empty());
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 0);
    assert_eq!(h.handle.snapshot().await.unwrap().pending_queries, 0);

    h.drain_events();
    h.handle.submit("after close").unwrap();
    h.handle.snapshot().await.unwrap();
    assert_eq!(
        h.drain_events(),
        [RuntimeEvent::InputRejected {
            query: "after close".to_owned()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn closed_session_can_be_started_again() {
    let h = launch(test_config(), Fakes::healthy());
    h.start_active().await;
    h.handle.stop().unwrap();
    h.wait_for_state(SessionState::Closed).await;

    h.start_active().await;
    assert_eq!(h.relay.fetches.load(Ordering::SeqCst), 2);
    assert!(h.transport.closes.load(Ordering::SeqCst) >= 1);

    h.handle.submit("back again").unwrap();
    eventually(|| h.backend.queries() == ["back again"]).await;
}

#[tokio::test(start_paused = true)]
async fn missing_video_fails_startup_and_keeps_pending_queries() {
    let fakes = Fakes {
        transport: FakeTransport {
            withhold_video: true,
            ..FakeTransport::default()
        },
        ..Fakes::healthy()
    };
    let mut h = launch(test_config(), fakes);
    h.handle.submit("held").unwrap();
    h.handle.start().unwrap();

    h.wait_for_state(SessionState::Starting).await;
    h.wait_for_state(SessionState::Inactive).await;

    let events = h.drain_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::StartupFailed { .. }))
    );
    assert_eq!(h.handle.snapshot().await.unwrap().pending_queries, 1);
    assert!(h.backend.queries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unavailable_synthesizer_fails_startup() {
    let fakes = Fakes::healthy();
    fakes.synthesizer.available.store(false, Ordering::SeqCst);
    let mut h = launch(test_config(), fakes);
    h.handle.start().unwrap();

    let mut failure = None;
    for _ in 0..100 {
        failure = h.drain_events().into_iter().find_map(|e| match e {
            RuntimeEvent::StartupFailed { message } => Some(message),
            _ => None,
        });
        if failure.is_some() {
            break;
        }
        settle(Duration::from_millis(10)).await;
    }
    assert!(failure.unwrap().starts_with("speech SDK unavailable"));
    assert_eq!(h.handle.state(), SessionState::Inactive);
    assert_eq!(h.relay.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn dispose_closes_live_session() {
    let h = launch(test_config(), Fakes::healthy());
    h.start_active().await;
    let transport = h.transport.clone();
    h.handle.dispose().await;
    assert!(transport.closes.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn stop_abandons_queued_and_in_flight_backend_requests() {
    let fakes = Fakes {
        backend: FakeBackend::new(|q| Ok(format!("Answer to {q}.")))
            .with_delay(Duration::from_secs(5)),
        ..Fakes::healthy()
    };
    let h = launch(test_config(), fakes);
    h.start_active().await;
    for query in ["a", "b", "c"] {
        h.handle.submit(query).unwrap();
    }
    eventually(|| h.backend.queries() == ["a"]).await;

    h.handle.stop().unwrap();
    h.wait_for_state(SessionState::Closed).await;
    h.start_active().await;

    h.handle.submit("new").unwrap();
    settle(Duration::from_millis(100)).await;
    assert_eq!(h.backend.queries(), ["a", "new"]);

    eventually(|| h.synthesizer.spoke("Answer to new.")).await;
    assert!(!h.synthesizer.spoke("Answer to a."));
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected_at_spawn() {
    let mut config = test_config();
    config.session.health_check_interval_ms = 0;
    let err = try_launch(config, Fakes::healthy(), None).err().unwrap();
    assert!(matches!(err, WidgetError::Config(_)));
}

fn reconnecting_speaker(reply: &'static str) -> Fakes {
    Fakes {
        transport: FakeTransport {
            freeze_first_session: true,
            ..FakeTransport::default()
        },
        synthesizer: FakeSynthesizer::new(Duration::from_secs(10)),
        backend: FakeBackend::new(move |_| Ok(reply.to_owned())),
        ..Fakes::healthy()
    }
}

fn sentence_events(events: &[RuntimeEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::AssistantSentence { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn interrupted_sentence_is_repeated_after_reconnect() {
    let mut h = launch(test_config(), reconnecting_speaker("Alpha. Beta."));
    h.start_active().await;
    h.handle.submit("talk").unwrap();
    eventually(|| h.synthesizer.spoke("Alpha.")).await;

    // The stall is detected while "Alpha." is still speaking.
    eventually(|| h.synthesizer.spoken().len() == 3).await;
    let spoken = h.synthesizer.spoken();
    assert!(spoken[0].contains("Alpha."));
    assert!(spoken[1].contains("Alpha."));
    assert!(spoken[2].contains("Beta."));
    assert_eq!(h.handle.state(), SessionState::Active);
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 2);

    assert_eq!(sentence_events(&h.drain_events()), ["Alpha.", "Beta."]);
}

#[tokio::test(start_paused = true)]
async fn interrupted_sentence_is_dropped_when_repeat_is_disabled() {
    let mut config = test_config();
    config.session.repeat_speaking_sentence_after_reconnection = false;
    let mut h = launch(config, reconnecting_speaker("Alpha. Beta."));
    h.start_active().await;
    h.handle.submit("talk").unwrap();

    eventually(|| h.synthesizer.spoke("Beta.")).await;
    settle(Duration::from_secs(30)).await;
    let spoken = h.synthesizer.spoken();
    assert_eq!(spoken.len(), 2);
    assert!(spoken[0].contains("Alpha."));
    assert!(spoken[1].contains("Beta."));
    assert_eq!(h.transport.connects.load(Ordering::SeqCst), 2);

    assert_eq!(sentence_events(&h.drain_events()), ["Alpha.", "Beta."]);
}
