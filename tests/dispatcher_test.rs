//! Compute dispatcher: worker path, one-way fallback, no lost batches.

use std::sync::{Arc, Mutex};
use std::thread;
use typeproof::capture::{CaptureEvent, EditEvent, EditKind, EditSource, KeyCategory, KeyEvent, KeyEventType};
use typeproof::compute::{ComputeDispatcher, DispatchMode, VectorSink, WindowCompute, WORKER_THREAD_NAME};
use typeproof::features::{aggregate, FeatureVector, LiveAggregator, WindowParams};

fn key_batch(start: i64, n: i64) -> Vec<CaptureEvent> {
    (0..n)
        .map(|i| {
            CaptureEvent::Key(KeyEvent {
                event_type: KeyEventType::Keydown,
                key_category: KeyCategory::Letter,
                timestamp_ms: start + i * 100,
                dwell_time_ms: None,
                flight_time_ms: Some(90),
            })
        })
        .collect()
}

fn collecting() -> (Arc<Mutex<Vec<FeatureVector>>>, VectorSink) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink_out = Arc::clone(&out);
    let sink: VectorSink = Arc::new(move |v: FeatureVector| sink_out.lock().unwrap().push(v));
    (out, sink)
}

struct Windowing;

impl WindowCompute for Windowing {
    fn compute(&self, events: &[KeyEvent]) -> Vec<FeatureVector> {
        aggregate("s", events, &WindowParams::default())
    }
}

/// Works inline, panics on the worker thread.
struct WorkerHostile;

impl WindowCompute for WorkerHostile {
    fn compute(&self, events: &[KeyEvent]) -> Vec<FeatureVector> {
        if thread::current().name() == Some(WORKER_THREAD_NAME) {
            panic!("no compute on the worker");
        }
        aggregate("s", events, &WindowParams::default())
    }
}

#[test]
fn worker_delivers_all_vectors() {
    let (out, sink) = collecting();
    let d = ComputeDispatcher::new(Arc::new(Windowing), sink, true);
    assert_eq!(d.mode(), DispatchMode::Worker);
    d.dispatch(&key_batch(0, 10));
    d.dispatch(&key_batch(10_000, 10));
    d.shutdown();
    let starts: Vec<i64> = out.lock().unwrap().iter().map(|v| v.window_start).collect();
    assert_eq!(starts, vec![0, 10_000]);
}

#[test]
fn batches_without_keys_are_ignored() {
    let (out, sink) = collecting();
    let d = ComputeDispatcher::new(Arc::new(Windowing), sink, false);
    d.dispatch(&[CaptureEvent::Edit(EditEvent {
        kind: EditKind::Paste,
        length_delta: 40,
        source: EditSource::Paste,
        timestamp_ms: 0,
    })]);
    d.dispatch(&[]);
    assert!(out.lock().unwrap().is_empty());
}

#[test]
fn disabled_background_runs_inline() {
    let (out, sink) = collecting();
    let d = ComputeDispatcher::new(Arc::new(WorkerHostile), sink, false);
    assert_eq!(d.mode(), DispatchMode::Fallback);
    d.dispatch(&key_batch(0, 5));
    // inline delivery is synchronous
    assert_eq!(out.lock().unwrap().len(), 1);
}

#[test]
fn worker_failure_falls_back_without_loss() {
    let (out, sink) = collecting();
    let d = ComputeDispatcher::new(Arc::new(WorkerHostile), sink, true);
    assert_eq!(d.mode(), DispatchMode::Worker);

    d.dispatch(&key_batch(0, 5));
    d.dispatch(&key_batch(10_000, 5));
    d.dispatch(&key_batch(20_000, 5));

    // wait for the worker to hand the first batch back
    for _ in 0..200 {
        d.poll();
        if d.mode() == DispatchMode::Fallback {
            break;
        }
        thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(d.mode(), DispatchMode::Fallback);

    d.dispatch(&key_batch(30_000, 5));
    d.shutdown();
    let starts: Vec<i64> = out.lock().unwrap().iter().map(|v| v.window_start).collect();
    assert_eq!(starts, vec![0, 10_000, 20_000, 30_000]);

    // never flaps back
    assert_eq!(d.mode(), DispatchMode::Fallback);
}

#[test]
fn delivery_panic_on_worker_falls_back_without_loss() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink_out = Arc::clone(&out);
    let sink: VectorSink = Arc::new(move |v: FeatureVector| {
        if thread::current().name() == Some(WORKER_THREAD_NAME) {
            panic!("receiver gone");
        }
        sink_out.lock().unwrap().push(v.window_start);
    });
    let d = ComputeDispatcher::new(Arc::new(Windowing), sink, true);

    d.dispatch(&key_batch(0, 5));
    d.dispatch(&key_batch(10_000, 5));
    d.shutdown();

    assert_eq!(*out.lock().unwrap(), vec![0, 10_000]);
    assert_eq!(d.mode(), DispatchMode::Fallback);
}

#[test]
fn shutdown_delivers_open_windows() {
    let (out, sink) = collecting();
    let live = Arc::new(LiveAggregator::new("s", WindowParams::default()));
    let d = ComputeDispatcher::new(live, sink, true);

    d.dispatch(&key_batch(0, 10));
    d.dispatch(&key_batch(1_000, 10));
    d.dispatch(&key_batch(6_000, 3));
    d.shutdown();

    let got = out.lock().unwrap().clone();
    let mut all: Vec<KeyEvent> = Vec::new();
    for batch in [key_batch(0, 10), key_batch(1_000, 10), key_batch(6_000, 3)] {
        all.extend(batch.iter().filter_map(|e| e.as_key().cloned()));
    }
    assert_eq!(got, aggregate("s", &all, &WindowParams::default()));
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].keystroke_count, 20);
}
