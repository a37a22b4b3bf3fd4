//! End-to-end call scenarios against scripted capabilities
//!
//! All tests run on tokio's paused clock, so pacing and deadlines advance
//! instantly while keeping their relative order.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parley_core::{Error, Role};
use parley_pipeline::{EngineEvent, SessionController};

use common::*;

async fn speak(session: &SessionController, loud: Duration, quiet: Duration) {
    let steps = |total: Duration| (total.as_millis() / chunk_duration().as_millis()) as usize;
    for _ in 0..steps(loud) {
        session.on_inbound_audio(tone(chunk_duration())).await.unwrap();
        tokio::time::sleep(chunk_duration()).await;
    }
    for _ in 0..steps(quiet) {
        session
            .on_inbound_audio(silence(chunk_duration()))
            .await
            .unwrap();
        tokio::time::sleep(chunk_duration()).await;
    }
}

async fn next_failure(events: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> EngineEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("no engine event")
            .expect("event channel closed");
        if matches!(
            event,
            EngineEvent::StageFailed { .. } | EngineEvent::Escalated { .. }
        ) {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_silent_call_never_transcribes() {
    let stt = ScriptedStt::new(&[]);
    let generator = ScriptedGenerator::new(vec![]);
    let transport = RecordingTransport::new();
    let session = SessionController::new(
        "MZ-silent",
        &test_settings(),
        services(stt.clone(), generator.clone(), ToneTts::new(Duration::from_millis(200))),
        transport.clone(),
    )
    .unwrap();

    speak(&session, Duration::ZERO, Duration::from_secs(10)).await;

    assert_eq!(stt.calls(), 0);
    assert_eq!(generator.calls(), 0);
    assert_eq!(session.context().len(), 1);
    assert_eq!(transport.chunks(), 0);

    session.on_disconnected().await;
}

#[tokio::test(start_paused = true)]
async fn test_greeting_then_user_turn() {
    let stt = ScriptedStt::new(&["What is a noun?"]);
    let generator = ScriptedGenerator::new(vec![
        Reply::text("Hi, I am your teacher."),
        Reply::text("A noun names a thing."),
    ]);
    let tts = ToneTts::new(Duration::from_millis(200));
    let transport = RecordingTransport::new();
    let settings = test_settings();
    let session = SessionController::new(
        "MZ-turn",
        &settings,
        services(stt.clone(), generator.clone(), tts.clone()),
        transport.clone(),
    )
    .unwrap();

    session.on_connected().await.unwrap();
    // Repeated connect notifications do not greet twice
    session.on_connected().await.unwrap();

    assert!(wait_for(|| transport.chunks() == 10, Duration::from_secs(5)).await);
    assert!(wait_for(|| !session.engine().assistant_active(), Duration::from_secs(5)).await);

    speak(&session, Duration::from_millis(600), Duration::from_secs(1)).await;
    assert!(wait_for(|| generator.calls() == 2, Duration::from_secs(5)).await);
    assert!(wait_for(|| session.context().len() == 5, Duration::from_secs(5)).await);

    let messages = session.context().snapshot();
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].content, settings.session.system_prompt);
    assert_eq!(messages[1].role, Role::System);
    assert_eq!(messages[1].content, settings.session.greeting_instruction);
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[2].content, "Hi, I am your teacher.");
    assert_eq!(messages[3].role, Role::User);
    assert_eq!(messages[3].content, "What is a noun?");
    assert_eq!(messages[4].role, Role::Assistant);

    // The second request saw the whole conversation so far
    assert_eq!(generator.requests()[1].len(), 4);
    assert_eq!(stt.calls(), 1);
    assert_eq!(transport.clears(), 0);

    session.on_disconnected().await;
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_discards_remaining_audio() {
    let stt = ScriptedStt::new(&["Can you help me?"]);
    let generator = ScriptedGenerator::new(vec![
        Reply::text("Hello there, I am your teacher for today."),
        Reply::text("Of course."),
    ]);
    // One sentence of greeting is two seconds of audio
    let tts = ToneTts::new(Duration::from_secs(2));
    let transport = RecordingTransport::new();
    let session = SessionController::new(
        "MZ-barge",
        &test_settings(),
        services(stt.clone(), generator.clone(), tts),
        transport.clone(),
    )
    .unwrap();

    session.on_connected().await.unwrap();

    // 100 ms into the greeting the caller starts talking
    while transport.chunks() < 5 {
        session
            .on_inbound_audio(silence(chunk_duration()))
            .await
            .unwrap();
        tokio::time::sleep(chunk_duration()).await;
    }
    assert!(session.engine().assistant_active());

    speak(&session, Duration::from_millis(600), Duration::from_secs(1)).await;

    assert!(wait_for(|| generator.calls() == 2, Duration::from_secs(5)).await);
    assert!(transport.clears() >= 1);

    // Debounce plus scheduling lag, far short of the 100 chunks of greeting
    let delivered = transport.chunks_before_first_clear();
    assert!(delivered >= 5);
    assert!(delivered < 40, "delivered {delivered} greeting chunks");

    // A new user turn began after the interruption
    assert!(wait_for(
        || session
            .context()
            .snapshot()
            .iter()
            .any(|m| m.role == Role::User && m.content == "Can you help me?"),
        Duration::from_secs(5)
    )
    .await);

    session.on_disconnected().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_abandons_pending_generation() {
    let dropped = Arc::new(AtomicBool::new(false));
    let generator = ScriptedGenerator::new(vec![Reply::Pending(dropped.clone())]);
    let transport = RecordingTransport::new();
    let mut settings = test_settings();
    // Deadline longer than the test so only the disconnect can end the call
    settings.pipeline.capability_deadline_ms = 60_000;

    let session = SessionController::new(
        "MZ-disconnect",
        &settings,
        services(
            ScriptedStt::new(&[]),
            generator.clone(),
            ToneTts::new(Duration::from_millis(200)),
        ),
        transport.clone(),
    )
    .unwrap();

    session.on_connected().await.unwrap();
    assert!(wait_for(|| generator.calls() == 1, Duration::from_secs(1)).await);
    assert!(!dropped.load(Ordering::SeqCst));

    let started = tokio::time::Instant::now();
    session.on_disconnected().await;
    assert!(started.elapsed() <= settings.pipeline.disconnect_grace());

    assert!(dropped.load(Ordering::SeqCst));
    assert!(session.engine().is_closed());
    assert!(wait_for(|| transport.is_closed(), Duration::from_secs(1)).await);

    // Idempotent teardown
    session.on_disconnected().await;
    assert!(!session.cancel());
    let err = session
        .on_inbound_audio(silence(chunk_duration()))
        .await
        .unwrap_err();
    assert_eq!(err, Error::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_timeouts_cancel_session() {
    let long = Duration::from_secs(10);
    let generator = ScriptedGenerator::new(vec![
        Reply::Slow(long),
        Reply::Slow(long),
        Reply::Slow(long),
    ]);
    let transport = RecordingTransport::new();
    let session = SessionController::new(
        "MZ-timeouts",
        &test_settings(),
        services(
            ScriptedStt::new(&["one", "two"]),
            generator.clone(),
            ToneTts::new(Duration::from_millis(200)),
        ),
        transport.clone(),
    )
    .unwrap();
    let mut events = session.engine().subscribe();

    session.on_connected().await.unwrap();
    match next_failure(&mut events).await {
        EngineEvent::StageFailed {
            stage,
            error,
            consecutive,
        } => {
            assert_eq!(stage, "generator");
            assert!(matches!(error, Error::CapabilityTimeout { .. }));
            assert_eq!(consecutive, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!session.is_cancelled());

    // A failed turn produces no assistant message and the call carries on
    speak(&session, Duration::from_millis(400), Duration::from_secs(1)).await;
    assert!(matches!(
        next_failure(&mut events).await,
        EngineEvent::StageFailed { consecutive: 2, .. }
    ));
    assert!(!session.is_cancelled());

    speak(&session, Duration::from_millis(400), Duration::from_secs(1)).await;
    assert!(matches!(
        next_failure(&mut events).await,
        EngineEvent::StageFailed { consecutive: 3, .. }
    ));
    assert!(matches!(
        next_failure(&mut events).await,
        EngineEvent::Escalated { failures: 3 }
    ));

    session.closed().await;
    assert!(session.is_cancelled());
    assert!(session
        .context()
        .snapshot()
        .iter()
        .all(|m| m.role != Role::Assistant));
    assert!(wait_for(|| transport.is_closed(), Duration::from_secs(1)).await);
}

#[tokio::test(start_paused = true)]
async fn test_missing_stream_id_rejected() {
    let result = SessionController::new(
        "  ",
        &test_settings(),
        services(
            ScriptedStt::new(&[]),
            ScriptedGenerator::new(vec![]),
            ToneTts::new(Duration::from_millis(200)),
        ),
        RecordingTransport::new(),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_pipeline_config_rejected() {
    let mut settings = test_settings();
    settings.pipeline.max_consecutive_failures = 0;

    let result = SessionController::new(
        "MZ-config",
        &settings,
        services(
            ScriptedStt::new(&[]),
            ScriptedGenerator::new(vec![]),
            ToneTts::new(Duration::from_millis(200)),
        ),
        RecordingTransport::new(),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}
