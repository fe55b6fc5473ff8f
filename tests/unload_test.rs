//! Teardown persistence and the capture pipeline around it.

use std::sync::{Arc, Mutex};
use typeproof::capture::{
    BufferAccessor, CaptureEvent, CapturePipeline, EditEvent, EditKind, EditSource, KeyCategory,
    KeyEventType, KeyTimingTracker, LifecycleBus, LifecycleHooks, LifecycleSignal, SaveFn,
    UnloadPersister,
};
use typeproof::compute::DispatchMode;
use typeproof::config::{CaptureConfig, FeaturesConfig};
use typeproof::features::aggregate;

type Saved = Arc<Mutex<Vec<Vec<CaptureEvent>>>>;

fn recorder() -> (Saved, SaveFn) {
    let saved: Saved = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&saved);
    (saved, Arc::new(move |events: Vec<CaptureEvent>| sink.lock().unwrap().push(events)))
}

fn edit(ts: i64) -> CaptureEvent {
    CaptureEvent::Edit(EditEvent {
        kind: EditKind::Insert,
        length_delta: 1,
        source: EditSource::Keyboard,
        timestamp_ms: ts,
    })
}

fn fixed(events: Vec<CaptureEvent>) -> BufferAccessor {
    Arc::new(move || events.clone())
}

#[test]
fn attach_is_idempotent_and_detach_unsubscribes() {
    let bus = Arc::new(LifecycleBus::new());
    let (saved, save) = recorder();
    let hooks: Arc<dyn LifecycleHooks> = bus.clone();
    let persister = UnloadPersister::new(Some(hooks), fixed(vec![edit(1), edit(2)]), save);

    persister.attach();
    persister.attach();
    assert!(persister.is_attached());
    assert_eq!(bus.listener_count(), 1);

    bus.emit(LifecycleSignal::Hidden);
    assert_eq!(saved.lock().unwrap().len(), 1);
    assert_eq!(saved.lock().unwrap()[0].len(), 2);

    persister.detach();
    persister.detach();
    assert!(!persister.is_attached());
    assert_eq!(bus.listener_count(), 0);
    bus.emit(LifecycleSignal::Destroyed);
    assert_eq!(saved.lock().unwrap().len(), 1);
}

#[test]
fn empty_buffer_is_not_saved() {
    let bus = Arc::new(LifecycleBus::new());
    let (saved, save) = recorder();
    let persister = UnloadPersister::new(Some(bus.clone() as Arc<dyn LifecycleHooks>), fixed(Vec::new()), save);
    persister.attach();
    bus.emit(LifecycleSignal::Destroyed);
    assert!(saved.lock().unwrap().is_empty());
}

#[test]
fn without_hooks_attach_does_nothing() {
    let (saved, save) = recorder();
    let persister = UnloadPersister::new(None, fixed(vec![edit(1)]), save);
    persister.attach();
    assert!(!persister.is_attached());
    persister.detach();
    assert!(saved.lock().unwrap().is_empty());
}

#[test]
fn dropping_the_persister_unsubscribes() {
    let bus = Arc::new(LifecycleBus::new());
    let (_saved, save) = recorder();
    {
        let persister = UnloadPersister::new(Some(bus.clone() as Arc<dyn LifecycleHooks>), fixed(Vec::new()), save);
        persister.attach();
        assert_eq!(bus.listener_count(), 1);
    }
    assert_eq!(bus.listener_count(), 0);
}

#[test]
fn tracker_derives_dwell_and_flight() {
    let mut t = KeyTimingTracker::new();
    let a_down = t.record("a", KeyEventType::Keydown, 0);
    assert_eq!(a_down.flight_time_ms, None);
    assert_eq!(a_down.key_category, KeyCategory::Letter);
    // auto-repeat keeps the first press
    t.record("a", KeyEventType::Keydown, 40);
    let a_up = t.record("a", KeyEventType::Keyup, 90);
    assert_eq!(a_up.dwell_time_ms, Some(90));
    let b_down = t.record("Backspace", KeyEventType::Keydown, 250);
    assert_eq!(b_down.flight_time_ms, Some(160));
    assert_eq!(b_down.key_category, KeyCategory::Navigation);
    assert_eq!(t.held(), 1);
    // release without a press has no dwell
    assert_eq!(t.record("z", KeyEventType::Keyup, 300).dwell_time_ms, None);
}

fn inline_capture() -> CaptureConfig {
    CaptureConfig {
        background_compute: false,
        ..CaptureConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn pipeline_saves_unflushed_events_on_hide() {
    let bus = Arc::new(LifecycleBus::new());
    let (saved, save) = recorder();
    let pipeline = CapturePipeline::new(
        "sess-u",
        &inline_capture(),
        FeaturesConfig::default().live_params(),
        None,
        Some(bus.clone() as Arc<dyn LifecycleHooks>),
        save,
    );
    assert_eq!(pipeline.compute_mode(), DispatchMode::Fallback);

    for i in 0..10 {
        pipeline.record_key("a", KeyEventType::Keydown, i * 200);
        pipeline.record_key("a", KeyEventType::Keyup, i * 200 + 80);
    }
    assert_eq!(pipeline.pending(), 20);

    bus.emit(LifecycleSignal::Hidden);
    {
        let saved = saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].len(), 20);
    }
    // saving reads the buffer, it does not drain it
    assert_eq!(pipeline.pending(), 20);
    assert!(pipeline.vectors().is_empty());

    let vectors = pipeline.close().await;
    assert_eq!(vectors.len(), 1);
    assert_eq!(vectors[0].session_id, "sess-u");
    assert_eq!(vectors[0].keystroke_count, 10);
    assert_eq!(pipeline.pending(), 0);
    assert_eq!(bus.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn pipeline_tracks_edit_signature() {
    let (_saved, save) = recorder();
    let pipeline = CapturePipeline::new(
        "sess-e",
        &inline_capture(),
        FeaturesConfig::default().live_params(),
        None,
        None,
        save,
    );
    pipeline.record_edit(EditEvent { kind: EditKind::Insert, length_delta: 30, source: EditSource::Keyboard, timestamp_ms: 0 });
    pipeline.record_edit(EditEvent { kind: EditKind::Insert, length_delta: 10, source: EditSource::AiSuggestion, timestamp_ms: 5 });
    let summary = pipeline.edit_summary();
    assert_eq!(summary.edit_count, 2);
    assert_eq!(summary.ai_ratio, 0.25);
    assert_eq!(summary.paste_ratio, 0.0);

    pipeline.flush();
    assert_eq!(pipeline.pending(), 0);
    // edit-only batches produce no windows
    assert!(pipeline.close().await.is_empty());
}

/// Typing split across many small flushes must window exactly like the whole stream.
async fn windows_match_whole_stream(background_compute: bool) {
    let (_saved, save) = recorder();
    let capture = CaptureConfig {
        buffer_max_size: 7,
        background_compute,
        ..CaptureConfig::default()
    };
    let params = FeaturesConfig::default().live_params();
    let pipeline = CapturePipeline::new("sess-w", &capture, params, None, None, save);

    let mut tracker = KeyTimingTracker::new();
    let mut recorded = Vec::new();
    for i in 0..50 {
        let (down, up) = (1_000 + i * 250, 1_000 + i * 250 + 60);
        pipeline.record_key("a", KeyEventType::Keydown, down);
        pipeline.record_key("a", KeyEventType::Keyup, up);
        recorded.push(tracker.record("a", KeyEventType::Keydown, down));
        recorded.push(tracker.record("a", KeyEventType::Keyup, up));
    }

    let vectors = pipeline.close().await;
    let expected = aggregate("sess-w", &recorded, &params);
    assert_eq!(expected.len(), 3);
    assert_eq!(vectors, expected);
    assert_eq!(vectors.iter().map(|v| v.keystroke_count).sum::<u32>(), 50);
}

#[tokio::test(start_paused = true)]
async fn inline_windows_match_whole_stream() {
    windows_match_whole_stream(false).await;
}

#[tokio::test(start_paused = true)]
async fn worker_windows_match_whole_stream() {
    windows_match_whole_stream(true).await;
}
