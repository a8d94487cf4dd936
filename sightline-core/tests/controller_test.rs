//! Async session tests on tokio's paused clock

use sightline_core::{
    Action, ActionCatalog, ActionKind, BoundingBox, EngineError, EngineEvent, EventEnvelope, FrameSink, MotionSample,
    Observation, RecognitionSession, SequenceOrigin, SightlineConfig, ViewerReport,
};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

fn museum() -> SightlineConfig {
    SightlineConfig {
        actions: ActionCatalog::new()
            .with_label("statue", vec![Action::panorama("statue.jpg"), Action::video("statue.mp4")])
            .with_spot(vec![Action::video("intro.mp4").with_duration(10.0)]),
        ..Default::default()
    }
}

fn statue() -> Vec<Observation> {
    vec![Observation::new("statue", 0.9, BoundingBox::new(0.1, 0.1, 0.5, 0.5))]
}

/// Publish the same frame every 100 ms for `millis`
async fn show(sink: &mut FrameSink, observations: Vec<Observation>, millis: u64) {
    for _ in 0..millis / 100 {
        sink.on_frame(observations.clone()).unwrap();
        sleep(Duration::from_millis(100)).await;
    }
}

fn drain(receiver: &mut broadcast::Receiver<EventEnvelope>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = receiver.try_recv() {
        events.push(envelope.event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_session_confirms_and_dispatches() {
    let session = RecognitionSession::new(museum()).unwrap();
    let mut events = session.subscribe_events();
    let mut sink = session.start().unwrap();
    assert!(session.is_running());

    show(&mut sink, statue(), 1900).await;
    let early = drain(&mut events);
    assert!(early.contains(&EngineEvent::TrackingStarted { label: "statue".to_string() }));
    assert!(!early.iter().any(|e| matches!(e, EngineEvent::Confirmed { .. })));

    show(&mut sink, statue(), 200).await;
    let confirmed = drain(&mut events);
    assert!(confirmed.contains(&EngineEvent::Confirmed { label: "statue".to_string() }));
    assert!(confirmed.iter().any(|e| matches!(
        e,
        EngineEvent::ActionRequested { index: 0, action, .. } if action.kind == ActionKind::ShowPanorama
    )));

    session.stop().await.unwrap();
    assert!(!session.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_viewer_reports_drive_sequence() {
    let session = RecognitionSession::new(museum()).unwrap();
    let mut events = session.subscribe_events();
    let mut sink = session.start().unwrap();

    show(&mut sink, statue(), 3000).await;
    drain(&mut events);

    session
        .report_viewer_closed(ViewerReport::new(ActionKind::ShowPanorama, "statue"))
        .await
        .unwrap();
    sleep(Duration::from_millis(10)).await;
    let checkpoint = session.checkpoint().await.unwrap().unwrap();
    assert_eq!(checkpoint.cursor, 1);
    assert_eq!(checkpoint.kind, ActionKind::PlayVideo);

    session
        .report_viewer_closed(ViewerReport::new(ActionKind::PlayVideo, "statue").at_index(1))
        .await
        .unwrap();
    sleep(Duration::from_millis(10)).await;
    let finished = drain(&mut events);
    assert!(finished.contains(&EngineEvent::SequenceFinished { label: "statue".to_string() }));
    assert!(finished.contains(&EngineEvent::DetectionResumed));
    assert_eq!(session.checkpoint().await.unwrap(), None);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_frames_stopping_clears_candidate() {
    let session = RecognitionSession::new(museum()).unwrap();
    let mut events = session.subscribe_events();
    let mut sink = session.start().unwrap();

    // One sighting, then the producer goes quiet
    sink.on_frame(statue()).unwrap();
    sleep(Duration::from_secs(3)).await;

    let seen = drain(&mut events);
    assert!(seen.contains(&EngineEvent::TrackingCleared { label: "statue".to_string() }));
    assert!(!seen.iter().any(|e| matches!(e, EngineEvent::Confirmed { .. })));
    assert_eq!(session.checkpoint().await.unwrap(), None);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_frames_latest_wins() {
    let session = RecognitionSession::new(museum()).unwrap();
    let mut events = session.subscribe_events();
    let mut sink = session.start().unwrap();

    // Published back to back: the controller only sees the last one
    sink.on_frame(vec![Observation::new("mural", 0.8, BoundingBox::default())]).unwrap();
    sink.on_frame(statue()).unwrap();
    sleep(Duration::from_millis(50)).await;

    let seen = drain(&mut events);
    assert!(!seen.contains(&EngineEvent::TrackingStarted { label: "mural".to_string() }));
    assert!(seen.contains(&EngineEvent::TrackingStarted { label: "statue".to_string() }));

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watchdogs_fire_on_paused_clock() {
    let session = RecognitionSession::new(museum()).unwrap();
    let mut events = session.subscribe_events();
    let _sink = session.start().unwrap();

    sleep(Duration::from_secs(10)).await;
    session.on_motion(MotionSample::new(0.0, 0.0, 0.3)).unwrap();
    sleep(Duration::from_secs(21)).await;

    let seen = drain(&mut events);
    let alerts = seen.iter().filter(|e| **e == EngineEvent::ShowMovementAlert).count();
    let help = seen.iter().filter(|e| **e == EngineEvent::ShowHelpAffordance).count();
    assert_eq!(alerts, 1);
    assert_eq!(help, 1);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_spot_trigger_with_video_end_timer() {
    let session = RecognitionSession::new(museum()).unwrap();
    let mut events = session.subscribe_events();
    let _sink = session.start().unwrap();

    session.trigger_spot().await.unwrap();
    sleep(Duration::from_millis(10)).await;
    let started = drain(&mut events);
    assert!(started.iter().any(|e| matches!(
        e,
        EngineEvent::SequenceStarted { origin: SequenceOrigin::Manual, .. }
    )));

    sleep(Duration::from_secs(11)).await;
    let finished = drain(&mut events);
    assert!(finished.contains(&EngineEvent::SequenceFinished { label: "spot".to_string() }));

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hidden_view_ignores_frames() {
    let session = RecognitionSession::new(museum()).unwrap();
    let mut events = session.subscribe_events();
    let mut sink = session.start().unwrap();

    session.set_visible(false).await.unwrap();
    sink.on_frame(statue()).unwrap();
    sleep(Duration::from_secs(40)).await;
    assert!(drain(&mut events).is_empty());

    session.set_visible(true).await.unwrap();
    show(&mut sink, statue(), 2100).await;
    assert!(drain(&mut events).contains(&EngineEvent::Confirmed { label: "statue".to_string() }));

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_resume_with_mismatched_checkpoint_fails() {
    let session = RecognitionSession::new(museum()).unwrap();
    let _sink = session.start().unwrap();

    let checkpoint = sightline_core::SequenceCheckpoint {
        label: "statue".to_string(),
        cursor: 0,
        kind: ActionKind::PlayVideo,
        origin: SequenceOrigin::AutoDetected,
    };
    let result = session.resume_after_viewer(checkpoint).await;
    assert!(matches!(result, Err(EngineError::Sequence(_))));

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_double_start_rejected() {
    let session = RecognitionSession::new(museum()).unwrap();
    let _sink = session.start().unwrap();
    assert!(matches!(session.start(), Err(EngineError::Channel(_))));
    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_commands_after_stop_fail() {
    let session = RecognitionSession::new(museum()).unwrap();
    let _sink = session.start().unwrap();
    session.stop().await.unwrap();
    // Stopping twice is fine
    session.stop().await.unwrap();

    assert!(matches!(session.trigger("statue").await, Err(EngineError::Channel(_))));
    assert!(matches!(
        session.on_motion(MotionSample::default()),
        Err(EngineError::Channel(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_envelopes_carry_session_id() {
    let session = RecognitionSession::new(museum()).unwrap();
    let mut events = session.subscribe_events();
    let mut sink = session.start().unwrap();

    sink.on_frame(statue()).unwrap();
    sleep(Duration::from_millis(10)).await;
    let envelope = events.try_recv().unwrap();
    assert_eq!(envelope.session_id, session.session_id());

    session.stop().await.unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = museum();
    config.engine.event_buffer_size = 0;
    assert!(matches!(RecognitionSession::new(config), Err(EngineError::Config(_))));
}
