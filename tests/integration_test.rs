//! Integration: config defaults, encrypted store, risk scoring, ingest flow.

use std::path::Path;
use std::sync::Arc;
use typeproof::calibration::{Metric, ThresholdRecommendation};
use typeproof::capture::{EditEvent, EditKind, EditSource, EditSummary, KeyCategory, KeyEvent, KeyEventType};
use typeproof::config::{AppConfig, FeaturesConfig, RiskConfig};
use typeproof::error::Error;
use typeproof::features::{aggregate, FeatureVector, StoredAggregator};
use typeproof::risk::{RiskEngine, RiskLevel, PASTE_ALERT, TIMING_ALERT};
use typeproof::server::IngestService;
use typeproof::storage::SecureStore;
use typeproof::transport::WireBatch;

fn key(event_type: KeyEventType, category: KeyCategory, ts: i64) -> KeyEvent {
    KeyEvent {
        event_type,
        key_category: category,
        timestamp_ms: ts,
        dwell_time_ms: if event_type == KeyEventType::Keyup { Some(80) } else { None },
        flight_time_ms: if event_type == KeyEventType::Keydown { Some(120) } else { None },
    }
}

/// `n` letter press/release pairs every 200 ms from `start`.
fn typing(start: i64, n: i64) -> Vec<KeyEvent> {
    (0..n)
        .flat_map(|i| {
            let t = start + i * 200;
            [
                key(KeyEventType::Keydown, KeyCategory::Letter, t),
                key(KeyEventType::Keyup, KeyCategory::Letter, t + 80),
            ]
        })
        .collect()
}

fn wpm_threshold(threshold: f64, separability: f64) -> ThresholdRecommendation {
    ThresholdRecommendation {
        metric: Metric::AvgWpm,
        threshold,
        description: String::new(),
        separability,
        genuine_above: true,
    }
}

#[test]
fn config_load_default() {
    let c = AppConfig::load(Path::new("nonexistent.json"));
    assert_eq!(c.capture.buffer_max_size, 50);
    assert_eq!(c.capture.buffer_max_interval_ms, 500);
    assert_eq!(c.features.window_ms, 5000);
    assert_eq!(c.transport.publish_interval_ms, 200);
    assert!(!c.transport.enabled);
    assert_eq!(c.features.live_params().error_category, KeyCategory::Navigation);
    assert_eq!(c.features.stored_params().error_category, KeyCategory::Modifier);
}

#[test]
fn config_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"features":{"window_ms":2000},"log":{"json":false}}"#).unwrap();
    let c = AppConfig::load(&path);
    assert_eq!(c.features.window_ms, 2000);
    assert_eq!(c.features.sub_window_ms, 1000);
    assert!(!c.log.json);
    assert_eq!(c.log.level, "info");
}

#[test]
fn risk_engine_levels() {
    let config = RiskConfig::default();
    assert_eq!(RiskLevel::from_score(0.3, &config), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(0.6, &config), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(0.9, &config), RiskLevel::High);
}

#[test]
fn risk_engine_ignores_weak_thresholds() {
    let engine = RiskEngine::new(
        RiskConfig::default(),
        vec![wpm_threshold(30.0, 0.9), wpm_threshold(1000.0, 0.4)],
    );
    assert_eq!(engine.active_thresholds(), 1);

    let slow = FeatureVector {
        keystroke_count: 3,
        avg_wpm: 5.0,
        ..Default::default()
    };
    let fast = FeatureVector {
        keystroke_count: 30,
        avg_wpm: 70.0,
        ..Default::default()
    };
    let alert = engine.evaluate(&slow).unwrap();
    assert_eq!(alert.alert_type, TIMING_ALERT);
    assert_eq!(alert.severity, RiskLevel::High);
    assert!(engine.evaluate(&fast).is_none());
    // nothing typed, nothing to judge
    assert!(engine.evaluate(&FeatureVector::default()).is_none());
}

#[test]
fn paste_dominated_edits_alert() {
    let engine = RiskEngine::new(RiskConfig::default(), Vec::new());
    let edits = vec![
        EditEvent { kind: EditKind::Insert, length_delta: 10, source: EditSource::Keyboard, timestamp_ms: 0 },
        EditEvent { kind: EditKind::Paste, length_delta: 90, source: EditSource::Paste, timestamp_ms: 5 },
        EditEvent { kind: EditKind::Delete, length_delta: -4, source: EditSource::Keyboard, timestamp_ms: 9 },
        EditEvent { kind: EditKind::CursorMove, length_delta: 0, source: EditSource::Keyboard, timestamp_ms: 12 },
    ];
    let summary = EditSummary::from_edits(&edits);
    assert_eq!(summary.inserted_chars(), 100);
    assert_eq!(summary.deleted_chars, 4);
    assert_eq!(summary.paste_ratio, 0.9);
    let alert = engine.evaluate_edits("s", &summary).unwrap();
    assert_eq!(alert.alert_type, PASTE_ALERT);
    assert_eq!(alert.severity, RiskLevel::High);

    let typed = EditSummary::from_edits(&edits[..1]);
    assert!(engine.evaluate_edits("s", &typed).is_none());
}

#[test]
fn storage_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let store = SecureStore::open(&path, b"test-secret").unwrap();
    let session = store.create_session("doc-1").unwrap();

    let first = typing(0, 3);
    let second = typing(600, 2);
    store.append_key_events(&session.id, &first).unwrap();
    store.append_key_events(&session.id, &second).unwrap();
    store.append_key_events(&session.id, &[]).unwrap();

    let loaded = store.load_key_events(&session.id).unwrap();
    assert_eq!(loaded, [first, second].concat());
    assert!(store.load_key_events("other").unwrap().is_empty());
    assert!(store.load_vectors(&session.id).unwrap().is_none());

    // payloads are not stored in the clear
    drop(store);
    let raw = std::fs::read(&path).unwrap();
    assert!(!raw.windows(b"keydown".len()).any(|w| w == b"keydown"));

    let wrong = SecureStore::open(&path, b"other-secret").unwrap();
    assert!(matches!(wrong.load_key_events(&session.id), Err(Error::Crypto(_))));
}

#[test]
fn session_lifecycle_and_counters() {
    let store = SecureStore::open_in_memory(b"k").unwrap();
    let s = store.create_session("doc").unwrap();
    store.add_counters(&s.id, 10, 2, 1).unwrap();
    store.add_counters(&s.id, 5, 0, 0).unwrap();
    let got = store.get_session(&s.id).unwrap().unwrap();
    assert_eq!((got.total_keystrokes, got.total_edits, got.anomaly_count), (15, 2, 1));
    assert!(got.is_open());

    let closed = store.close_session(&s.id).unwrap();
    assert!(!closed.is_open());
    let again = store.close_session(&s.id).unwrap();
    assert_eq!(again.closed_at, closed.closed_at);

    assert!(matches!(store.close_session("missing"), Err(Error::UnknownSession(_))));
    assert!(matches!(store.add_counters("missing", 1, 0, 0), Err(Error::UnknownSession(_))));
}

#[test]
fn stored_aggregator_matches_live_windowing() {
    let store = Arc::new(SecureStore::open_in_memory(b"k").unwrap());
    let s = store.create_session("doc").unwrap();
    let events = [typing(0, 20), typing(9000, 10)].concat();
    // arrival order differs from timestamp order
    store.append_key_events(&s.id, &events[20..]).unwrap();
    store.append_key_events(&s.id, &events[..20]).unwrap();

    let params = FeaturesConfig::default().stored_params();
    let agg = StoredAggregator::new(store.clone(), params);
    let derived = agg.derive(&s.id).unwrap();
    assert_eq!(derived, aggregate(&s.id, &events, &params));

    let materialized = agg.materialize(&s.id).unwrap();
    assert_eq!(materialized, derived);
    assert_eq!(store.load_vectors(&s.id).unwrap(), Some(derived.clone()));
    assert_eq!(agg.vectors(&s.id).unwrap(), derived);
}

#[test]
fn ingest_scores_completed_windows_once() {
    let store = Arc::new(SecureStore::open_in_memory(b"k").unwrap());
    // any window under 1000 WPM looks pasted to this engine
    let engine = RiskEngine::new(RiskConfig::default(), vec![wpm_threshold(1000.0, 0.9)]);
    let ingest = IngestService::new(store, &FeaturesConfig::default(), engine);
    let s = ingest.start_session("doc").unwrap();

    let batch = |events: Vec<KeyEvent>| WireBatch {
        session_id: s.id.clone(),
        events,
        edits: Vec::new(),
    };

    // window [0, 5000) still open
    let out = ingest.ingest(&batch(typing(0, 10))).unwrap();
    assert!(out.alerts.is_empty());
    assert_eq!(out.status.total_keystrokes, 10);

    // crossing 5000 completes the first window
    let out = ingest.ingest(&batch(typing(5200, 5))).unwrap();
    assert_eq!(out.alerts.len(), 1);
    assert_eq!(out.status.anomaly_count, 1);
    assert_eq!(out.status.total_keystrokes, 15);

    // same window is not scored again
    let out = ingest.ingest(&batch(typing(6400, 1))).unwrap();
    assert!(out.alerts.is_empty());
    assert_eq!(out.status.anomaly_count, 1);
}

#[test]
fn ingest_rejects_unknown_and_closed_sessions() {
    let store = Arc::new(SecureStore::open_in_memory(b"k").unwrap());
    let ingest = IngestService::new(store, &FeaturesConfig::default(), RiskEngine::new(RiskConfig::default(), Vec::new()));
    let unknown = WireBatch {
        session_id: "nope".to_string(),
        events: typing(0, 1),
        edits: Vec::new(),
    };
    assert!(matches!(ingest.ingest(&unknown), Err(Error::UnknownSession(_))));

    let s = ingest.start_session("doc").unwrap();
    let batch = WireBatch {
        session_id: s.id.clone(),
        events: typing(0, 30),
        edits: Vec::new(),
    };
    ingest.ingest(&batch).unwrap();
    let (closed, vectors) = ingest.close_session(&s.id).unwrap();
    assert!(!closed.is_open());
    assert_eq!(vectors.len(), 2);
    assert!(matches!(ingest.ingest(&batch), Err(Error::SessionClosed(_))));
    assert_eq!(ingest.vectors(&s.id).unwrap(), vectors);
}

#[test]
fn ingest_raises_one_paste_alert_per_session() {
    let store = Arc::new(SecureStore::open_in_memory(b"k").unwrap());
    let ingest = IngestService::new(store, &FeaturesConfig::default(), RiskEngine::new(RiskConfig::default(), Vec::new()));
    let s = ingest.start_session("doc").unwrap();
    let paste = WireBatch {
        session_id: s.id.clone(),
        events: Vec::new(),
        edits: vec![EditEvent { kind: EditKind::Paste, length_delta: 500, source: EditSource::Paste, timestamp_ms: 0 }],
    };
    let out = ingest.ingest(&paste).unwrap();
    assert_eq!(out.alerts.len(), 1);
    assert_eq!(out.alerts[0].alert_type, PASTE_ALERT);
    // a re-sent batch is not counted again
    assert!(ingest.ingest(&paste).unwrap().alerts.is_empty());
    assert_eq!(ingest.session(&s.id).unwrap().total_edits, 1);

    let another = WireBatch {
        edits: vec![EditEvent { kind: EditKind::Paste, length_delta: 300, source: EditSource::Paste, timestamp_ms: 40 }],
        ..paste
    };
    assert!(ingest.ingest(&another).unwrap().alerts.is_empty());
    assert_eq!(ingest.session(&s.id).unwrap().total_edits, 2);
}

#[test]
fn store_skips_events_already_stored() {
    let store = SecureStore::open_in_memory(b"k").unwrap();
    let s = store.create_session("doc").unwrap();
    let first = typing(0, 5);
    let second = typing(1000, 5);

    assert_eq!(store.append_key_events(&s.id, &first).unwrap(), first);
    // overlapping snapshot: only the unseen tail is new
    let overlap = [first[6..].to_vec(), second.clone()].concat();
    assert_eq!(store.append_key_events(&s.id, &overlap).unwrap(), second);
    assert!(store.append_key_events(&s.id, &first).unwrap().is_empty());
    assert_eq!(store.load_key_events(&s.id).unwrap(), [first.clone(), second].concat());

    // identical events inside one batch are kept apart
    let twin = key(KeyEventType::Keydown, KeyCategory::Other, 50_000);
    assert_eq!(store.append_key_events(&s.id, &[twin.clone(), twin.clone()]).unwrap().len(), 2);
    assert!(store.append_key_events(&s.id, &[twin.clone(), twin.clone()]).unwrap().is_empty());
    assert_eq!(store.append_key_events(&s.id, &[twin.clone(), twin.clone(), twin]).unwrap().len(), 1);

    // ids are per session
    let other = store.create_session("doc").unwrap();
    assert_eq!(store.append_key_events(&other.id, &first).unwrap(), first);
}

#[test]
fn ingesting_a_batch_twice_counts_it_once() {
    let store = Arc::new(SecureStore::open_in_memory(b"k").unwrap());
    let ingest = IngestService::new(store, &FeaturesConfig::default(), RiskEngine::new(RiskConfig::default(), Vec::new()));
    let once = ingest.start_session("doc").unwrap();
    let twice = ingest.start_session("doc").unwrap();
    let events = typing(0, 20);

    let batch = |id: &str| WireBatch {
        session_id: id.to_string(),
        events: events.clone(),
        edits: Vec::new(),
    };
    ingest.ingest(&batch(&once.id)).unwrap();
    ingest.ingest(&batch(&twice.id)).unwrap();
    let out = ingest.ingest(&batch(&twice.id)).unwrap();

    assert_eq!(out.status.total_keystrokes, 20);
    let a = ingest.derive(&once.id).unwrap();
    let b = ingest.derive(&twice.id).unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].keystroke_count, 20);
    assert_eq!(b[0].keystroke_count, a[0].keystroke_count);
    assert_eq!(b[0].avg_wpm, a[0].avg_wpm);
}

#[test]
fn ingest_drops_out_of_range_values() {
    let store = Arc::new(SecureStore::open_in_memory(b"k").unwrap());
    let ingest = IngestService::new(store, &FeaturesConfig::default(), RiskEngine::new(RiskConfig::default(), Vec::new()));
    let s = ingest.start_session("doc").unwrap();

    let mut events = typing(0, 5);
    events.push(key(KeyEventType::Keydown, KeyCategory::Letter, i64::MAX));
    events.push(key(KeyEventType::Keydown, KeyCategory::Letter, -1));
    events.push(KeyEvent {
        dwell_time_ms: Some(i64::MAX),
        ..key(KeyEventType::Keyup, KeyCategory::Letter, 1500)
    });
    let out = ingest
        .ingest(&WireBatch {
            session_id: s.id.clone(),
            events,
            edits: vec![EditEvent { kind: EditKind::Insert, length_delta: i64::MAX, source: EditSource::Keyboard, timestamp_ms: 0 }],
        })
        .unwrap();
    assert_eq!(out.status.total_keystrokes, 5);

    let stored = ingest.store().load_key_events(&s.id).unwrap();
    assert_eq!(stored.len(), 11);
    assert_eq!(stored[10].dwell_time_ms, None);
    let vectors = ingest.derive(&s.id).unwrap();
    assert_eq!(vectors.len(), 1);
    assert_eq!(vectors[0].keystroke_count, 5);
}

#[test]
fn restarted_ingest_does_not_rescore() {
    let store = Arc::new(SecureStore::open_in_memory(b"k").unwrap());
    let engine = || RiskEngine::new(RiskConfig::default(), vec![wpm_threshold(1000.0, 0.9)]);
    let ingest = IngestService::new(store.clone(), &FeaturesConfig::default(), engine());
    let s = ingest.start_session("doc").unwrap();
    let batch = |events: Vec<KeyEvent>, edits: Vec<EditEvent>| WireBatch {
        session_id: s.id.clone(),
        events,
        edits,
    };
    let paste = |ts: i64| vec![EditEvent { kind: EditKind::Paste, length_delta: 200, source: EditSource::Paste, timestamp_ms: ts }];

    ingest.ingest(&batch(typing(0, 10), paste(0))).unwrap();
    let out = ingest.ingest(&batch(typing(5200, 5), Vec::new())).unwrap();
    assert_eq!(out.status.anomaly_count, 2);

    let restarted = IngestService::new(store, &FeaturesConfig::default(), engine());
    assert_eq!(restarted.tracked_sessions(), 0);
    // the first window and the paste were already judged
    let out = restarted.ingest(&batch(typing(6400, 1), paste(9))).unwrap();
    assert!(out.alerts.is_empty());
    // the window holding the last stored event is still open and gets scored
    let out = restarted.ingest(&batch(typing(10_200, 1), Vec::new())).unwrap();
    assert_eq!(out.alerts.len(), 1);
    assert_eq!(out.alerts[0].alert_type, TIMING_ALERT);
    assert_eq!(out.status.anomaly_count, 3);
    assert_eq!(out.status.total_keystrokes, 17);
}

#[test]
fn prune_forgets_idle_sessions() {
    let store = Arc::new(SecureStore::open_in_memory(b"k").unwrap());
    let ingest = IngestService::new(store, &FeaturesConfig::default(), RiskEngine::new(RiskConfig::default(), Vec::new()));
    let s = ingest.start_session("doc").unwrap();
    ingest
        .ingest(&WireBatch {
            session_id: s.id.clone(),
            events: typing(0, 3),
            edits: Vec::new(),
        })
        .unwrap();
    assert_eq!(ingest.tracked_sessions(), 1);

    assert_eq!(ingest.prune(30).unwrap(), 0);
    assert_eq!(ingest.tracked_sessions(), 1);

    std::thread::sleep(std::time::Duration::from_millis(2));
    assert_eq!(ingest.prune(0).unwrap(), 1);
    assert_eq!(ingest.tracked_sessions(), 0);
}
