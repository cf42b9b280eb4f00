use std::time::{Duration, Instant};

use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::analysis::{StrokeEvent, StrokeMeasurement};
use crate::audio::backend::{FixtureAccess, FixtureBackend, FixtureFeeder};
use crate::config::ProcessingPath;

const SR: u32 = 48_000;
const BLOCK: usize = 240;
const QUIET: f32 = 0.001;
const MEDIUM: f32 = 0.01;

fn app_config(path: ProcessingPath) -> AppConfig {
    let mut config = AppConfig::default();
    config.detector.telemetry_probability = 0.0;
    config.audio.processing_path = path;
    // Manual feeding can outrun the fallback worker; keep every block.
    config.audio.buffer_pool_size = 1024;
    config
}

fn manual_engine(path: ProcessingPath) -> (DetectionEngine, FixtureFeeder, Arc<FixtureBackend>) {
    let (backend, feeder) = FixtureBackend::manual(SR);
    let backend = Arc::new(backend);
    let engine = DetectionEngine::new(backend.clone(), &app_config(path));
    (engine, feeder, backend)
}

fn drain(rx: &mut broadcast::Receiver<DetectionEvent>) -> Vec<DetectionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn strokes(events: &[DetectionEvent]) -> Vec<StrokeEvent> {
    events.iter().filter_map(|e| e.as_stroke().copied()).collect()
}

fn measurements(events: &[DetectionEvent]) -> Vec<StrokeMeasurement> {
    events
        .iter()
        .filter_map(|e| e.as_measurement().copied())
        .collect()
}

fn wait_for_blocks(engine: &DetectionEngine, blocks: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.stats().map(|s| s.blocks).unwrap_or(0) < blocks {
        assert!(Instant::now() < deadline, "worker did not catch up");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Two seconds of quiet noise with a loud hit every 300 ms.
fn hit_track(seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let total = SR as usize * 2;
    let hit_every_blocks = SR as usize * 3 / 10 / BLOCK;
    (0..total)
        .map(|i| {
            let block = i / BLOCK;
            if block > 0 && block % hit_every_blocks == 0 {
                0.5
            } else {
                rng.gen_range(-0.002..0.002)
            }
        })
        .collect()
}

#[test]
fn stop_is_idempotent_from_every_state() {
    let (mut engine, feeder, _backend) = manual_engine(ProcessingPath::Auto);
    engine.stop();
    assert_eq!(engine.status(), EngineStatus::Idle);

    engine.start(None).unwrap();
    assert!(feeder.is_open());
    engine.stop();
    engine.stop();
    assert_eq!(engine.status(), EngineStatus::Idle);
    assert!(!feeder.is_open());
    assert_eq!(engine.current_run(), None);
}

#[test]
fn start_while_running_keeps_the_current_run() {
    let (mut engine, _feeder, _backend) = manual_engine(ProcessingPath::Auto);
    let first = engine.start(None).unwrap();
    let second = engine.start(Some(DetectorConfigPatch::sensitivity(4.0))).unwrap();
    assert_eq!(first, second);
    // Ignored start must not touch the config either.
    assert_eq!(engine.config().sensitivity, 2.0);
    engine.stop();
}

#[test]
fn denied_permission_enters_error_and_retry_recovers() {
    let (mut engine, feeder, backend) = manual_engine(ProcessingPath::Auto);
    backend.set_access(FixtureAccess::PermissionDenied);

    let err = engine.start(None).unwrap_err();
    assert_eq!(err, AudioError::PermissionDenied);
    assert_eq!(engine.status(), EngineStatus::Error);
    assert_eq!(engine.last_error(), Some(&AudioError::PermissionDenied));
    assert!(!feeder.is_open());

    backend.set_access(FixtureAccess::Granted);
    engine.start(None).unwrap();
    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(engine.last_error(), None);
    engine.stop();
}

#[test]
fn missing_device_is_reported_distinctly() {
    let (mut engine, _feeder, backend) = manual_engine(ProcessingPath::Auto);
    backend.set_access(FixtureAccess::NoInputDevice);
    assert_eq!(engine.start(None).unwrap_err(), AudioError::NoInputDevice);
    assert_eq!(engine.status(), EngineStatus::Error);

    engine.stop();
    assert_eq!(engine.status(), EngineStatus::Idle);
}

fn open_failure_releases_the_path(path: ProcessingPath) {
    let (mut engine, feeder, backend) = manual_engine(path);
    let mut rx = engine.subscribe();
    backend.set_access(FixtureAccess::OpenFails);

    let err = engine.start(None).unwrap_err();
    assert!(matches!(err, AudioError::StreamOpenFailed { .. }));
    assert_eq!(engine.status(), EngineStatus::Error);
    assert_eq!(engine.last_error(), Some(&err));
    assert_eq!(engine.current_run(), None);
    assert_eq!(engine.active_path(), None);
    assert!(engine.stats().is_none());
    assert!(!feeder.is_open());

    backend.set_access(FixtureAccess::Granted);
    let run_id = engine.start(None).unwrap();
    assert_eq!(engine.status(), EngineStatus::Running);
    assert!(feeder.feed(&[0.5; BLOCK]));
    engine.stop();

    // Nothing from the abandoned attempt leaks into the retried run.
    let found = strokes(&drain(&mut rx));
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].run_id, found[0].sequence_id), (run_id, 1));
}

#[test]
fn open_failure_releases_the_realtime_path() {
    open_failure_releases_the_path(ProcessingPath::Realtime);
}

#[test]
fn open_failure_releases_the_fallback_path() {
    open_failure_releases_the_path(ProcessingPath::Fallback);
}

#[test]
fn auto_falls_back_without_isolated_processing() {
    let (backend, _feeder) = FixtureBackend::manual(SR);
    let backend = Arc::new(backend.with_isolated_processing(false));
    let mut engine = DetectionEngine::new(backend, &app_config(ProcessingPath::Auto));
    engine.start(None).unwrap();
    assert_eq!(engine.active_path(), Some(PathKind::Fallback));
    engine.stop();
    assert_eq!(engine.active_path(), None);
}

#[test]
fn auto_uses_realtime_when_isolated() {
    let (mut engine, _feeder, _backend) = manual_engine(ProcessingPath::Auto);
    engine.start(None).unwrap();
    assert_eq!(engine.active_path(), Some(PathKind::Realtime));
    assert_eq!(engine.sample_rate(), Some(SR));
    engine.stop();
}

fn config_change_applies_on_next_block(path: ProcessingPath) {
    let (mut engine, feeder, _backend) = manual_engine(path);
    let mut rx = engine.subscribe();
    engine.start(None).unwrap();

    let quiet = vec![QUIET; BLOCK];
    let medium = vec![MEDIUM; BLOCK];
    for _ in 0..200 {
        assert!(feeder.feed(&quiet));
    }
    wait_for_blocks(&engine, 200);

    // Medium hit sits roughly 17 dB over the floor: rejected at 5, accepted at 2.
    engine.update_config(DetectorConfigPatch::sensitivity(5.0));
    assert!(feeder.feed(&medium));
    for _ in 0..60 {
        assert!(feeder.feed(&quiet));
    }
    wait_for_blocks(&engine, 261);

    engine.update_config(DetectorConfigPatch::sensitivity(2.0));
    assert!(feeder.feed(&medium));
    wait_for_blocks(&engine, 262);
    engine.stop();

    let found = strokes(&drain(&mut rx));
    assert_eq!(found.len(), 1, "only the second medium hit is a stroke");
    let expected_ms = 261.0 * BLOCK as f64 * 1000.0 / SR as f64;
    assert!((found[0].occurred_at_ms - expected_ms).abs() < 1e-6);
}

#[test]
fn config_change_applies_on_next_block_realtime() {
    config_change_applies_on_next_block(ProcessingPath::Realtime);
}

#[test]
fn config_change_applies_on_next_block_fallback() {
    config_change_applies_on_next_block(ProcessingPath::Fallback);
}

fn config_burst_keeps_final_value(path: ProcessingPath) {
    let (mut engine, feeder, _backend) = manual_engine(path);
    let mut rx = engine.subscribe();
    engine.start(None).unwrap();

    let quiet = vec![QUIET; BLOCK];
    for _ in 0..400 {
        assert!(feeder.feed(&quiet));
    }
    wait_for_blocks(&engine, 400);

    // A slider drag while capture is stalled: many updates, no blocks.
    for _ in 0..20 {
        engine.update_config(DetectorConfigPatch::sensitivity(30.0));
    }
    engine.update_config(DetectorConfigPatch::sensitivity(1.0));
    assert_eq!(engine.config().sensitivity, 1.0);

    assert!(feeder.feed(&[0.5; BLOCK]));
    wait_for_blocks(&engine, 401);
    engine.stop();

    assert_eq!(strokes(&drain(&mut rx)).len(), 1);
}

#[test]
fn config_burst_keeps_final_value_realtime() {
    config_burst_keeps_final_value(ProcessingPath::Realtime);
}

#[test]
fn config_burst_keeps_final_value_fallback() {
    config_burst_keeps_final_value(ProcessingPath::Fallback);
}

fn run_track(path: ProcessingPath, samples: Vec<f32>) -> (RunId, Vec<DetectionEvent>) {
    let backend = Arc::new(FixtureBackend::streaming(samples, SR, BLOCK));
    let progress = backend.progress().unwrap();
    let mut config = app_config(path);
    // Enough buffers to hold the whole track if the worker never gets scheduled.
    config.audio.buffer_pool_size = 512;
    config.audio.buffer_size = 256;

    let mut engine = DetectionEngine::new(backend, &config);
    let mut rx = engine.subscribe();
    let run_id = engine.start(None).unwrap();
    assert!(progress.wait(Duration::from_secs(10)));
    engine.stop();
    (run_id, drain(&mut rx))
}

#[test]
fn both_paths_report_identical_strokes() {
    let track = hit_track(11);
    let (rt_run, rt_events) = run_track(ProcessingPath::Realtime, track.clone());
    let (fb_run, fb_events) = run_track(ProcessingPath::Fallback, track);
    assert_ne!(rt_run, fb_run);

    let strip = |mut stroke: StrokeEvent| {
        stroke.run_id = RunId(0);
        stroke
    };
    let rt_strokes: Vec<_> = strokes(&rt_events).into_iter().map(strip).collect();
    let fb_strokes: Vec<_> = strokes(&fb_events).into_iter().map(strip).collect();
    assert_eq!(rt_strokes.len(), 6);
    assert_eq!(rt_strokes, fb_strokes);

    let rt_refined: Vec<_> = measurements(&rt_events)
        .iter()
        .map(|m| (m.sequence_id, m.refined_rms))
        .collect();
    let fb_refined: Vec<_> = measurements(&fb_events)
        .iter()
        .map(|m| (m.sequence_id, m.refined_rms))
        .collect();
    assert_eq!(rt_refined, fb_refined);
}

#[test]
fn events_of_a_run_carry_its_id_and_sequence() {
    let (run_id, events) = run_track(ProcessingPath::Realtime, hit_track(3));
    assert!(events.iter().all(|event| event.run_id() == run_id));

    let ids: Vec<u64> = strokes(&events).iter().map(|s| s.sequence_id).collect();
    let expected: Vec<u64> = (1..=ids.len() as u64).collect();
    assert_eq!(ids, expected);

    // Every measurement refers to a stroke already seen.
    let mut seen = std::collections::HashSet::new();
    for event in &events {
        match event {
            DetectionEvent::Stroke(stroke) => {
                seen.insert(stroke.sequence_id);
            }
            DetectionEvent::Measurement(m) => assert!(seen.contains(&m.sequence_id)),
            DetectionEvent::Telemetry(_) => {}
        }
    }
}

#[test]
fn restart_mints_a_new_run_and_restarts_sequence() {
    let (mut engine, feeder, _backend) = manual_engine(ProcessingPath::Realtime);
    let mut rx = engine.subscribe();
    let loud = vec![0.5; BLOCK];

    let first = engine.start(None).unwrap();
    feeder.feed(&loud);
    engine.stop();
    let second = engine.start(None).unwrap();
    feeder.feed(&loud);
    engine.stop();

    assert_ne!(first, second);
    let found = strokes(&drain(&mut rx));
    assert_eq!(found.len(), 2);
    assert_eq!((found[0].run_id, found[0].sequence_id), (first, 1));
    assert_eq!((found[1].run_id, found[1].sequence_id), (second, 1));
    assert_eq!(found[1].occurred_at_ms, 0.0);
}

#[test]
fn stats_are_only_available_while_running() {
    let (mut engine, feeder, _backend) = manual_engine(ProcessingPath::Realtime);
    assert!(engine.stats().is_none());
    engine.start(None).unwrap();
    feeder.feed(&[QUIET; BLOCK]);
    feeder.feed(&[]);
    let stats = engine.stats().unwrap();
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.samples, BLOCK as u64);
    let run_id = engine.current_run().unwrap();
    engine.stop();
    assert!(engine.stats().is_none());
    assert_eq!(engine.last_run_stats(), Some((run_id, stats)));
}

#[tokio::test]
async fn event_stream_yields_published_strokes() {
    let (mut engine, feeder, _backend) = manual_engine(ProcessingPath::Realtime);
    let stream = engine.event_stream();
    tokio::pin!(stream);

    let run_id = engine.start(None).unwrap();
    feeder.feed(&[0.5; BLOCK]);

    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream timed out")
        .expect("stream ended");
    let stroke = first.as_stroke().copied().expect("first event is a stroke");
    assert_eq!(stroke.run_id, run_id);
    assert_eq!(stroke.sequence_id, 1);
    engine.stop();
}
