use std::f32::consts::PI;

use siren_looper::analysis::detect_loops;
use siren_looper::audio::WaveformBuffer;
use siren_looper::render::render;
use siren_looper::session::{MemorySource, Session};
use siren_looper::workflow::WorkflowState;
use siren_looper::{LoopError, LoopSettings, RenderRequest, RenderSettings, SampleId};

const SR: u32 = 44_100;
const PERIOD: usize = 11_025;

/// Two partials that both repeat every quarter second.
fn siren(secs: f32) -> WaveformBuffer {
    let frames = (secs * SR as f32) as usize;
    let samples = (0..frames)
        .map(|i| {
            let phase = (i % PERIOD) as f32 / PERIOD as f32;
            0.5 * (2.0 * PI * 3.0 * phase).sin() + 0.3 * (2.0 * PI * 7.0 * phase + 0.4).sin()
        })
        .collect();
    WaveformBuffer::from_mono(samples, SR).unwrap()
}

fn settings() -> LoopSettings {
    let mut settings = LoopSettings::default();
    settings.detector.min_loop_secs = 0.2;
    settings.detector.max_loop_secs = Some(1.5);
    settings
}

fn session_with(buffer: WaveformBuffer) -> Session<MemorySource> {
    let source = MemorySource::new().with(SampleId::new("siren.wav"), buffer);
    Session::open(source, settings())
}

fn max_step(samples: &[f32]) -> f32 {
    samples
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0, f32::max)
}

#[test]
fn two_second_sample_yields_bounded_candidates_and_an_hour_long_loop() {
    let mut session = session_with(siren(2.0));
    let candidates = session.detect(&SampleId::new("siren.wav")).unwrap().clone();

    assert!(!candidates.is_empty());
    assert!(candidates
        .iter()
        .all(|c| (8_820..=66_150).contains(&c.segment_frames())));
    assert!(candidates
        .as_slice()
        .windows(2)
        .all(|w| w[0].score <= w[1].score));

    session.choose(None).unwrap();
    let rendered = session.submit_duration(3_600.0).unwrap();
    assert_eq!(rendered.frame_count(), 3_600 * SR as usize);

    let (provenance, stream) = rendered.into_parts();
    assert_eq!(provenance.total_frames, 3_600 * SR as usize);
    assert_eq!(stream.len(), 3_600 * SR as usize);
    assert!(matches!(session.state(), WorkflowState::OutputReady { .. }));
}

#[test]
fn too_short_duration_is_rejected_and_keeps_the_state() {
    let mut session = session_with(siren(2.0));
    session.detect(&SampleId::new("siren.wav")).unwrap();
    session.choose(None).unwrap();

    let err = session.submit_duration(0.05).unwrap_err();
    assert!(matches!(err, LoopError::InvalidDurationRequest { requested_secs, .. } if requested_secs == 0.05));
    assert!(matches!(session.state(), WorkflowState::DurationEntry { rank: 0, .. }));

    // A valid duration still goes through afterwards.
    assert!(session.submit_duration(5.0).is_ok());
}

#[test]
fn sample_shorter_than_two_minimum_loops_is_refused() {
    let mut session = session_with(siren(0.1));
    let err = session.detect(&SampleId::new("siren.wav")).unwrap_err();
    assert_eq!(
        err,
        LoopError::InsufficientBufferLength {
            frames: 4_410,
            required: 17_640
        }
    );
    assert!(matches!(session.state(), WorkflowState::InputSelect { .. }));
}

#[test]
fn detection_is_deterministic() {
    let buffer = siren(2.0);
    let settings = settings();
    let a = detect_loops(&buffer, &settings.detector).unwrap();
    let b = detect_loops(&buffer, &settings.detector).unwrap();
    assert_eq!(a, b);
}

#[test]
fn best_loop_of_a_periodic_sample_plays_without_clicks() {
    let buffer = siren(2.0);
    let settings = settings();
    let candidates = detect_loops(&buffer, &settings.detector).unwrap();
    let best = *candidates.best();
    assert_eq!(best.segment_frames() % PERIOD, 0, "{best:?}");

    let secs = 3.0 * best.segment_frames() as f64 / SR as f64;
    let request = RenderRequest::new(0, best, secs, &buffer).unwrap();
    let out = render(&buffer, SampleId::new("siren.wav"), &request, &RenderSettings::default()).into_samples();
    assert!(max_step(&out) <= max_step(buffer.samples()) + 1e-3);
}
