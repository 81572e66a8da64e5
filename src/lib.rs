pub mod audio;
pub mod error;
pub mod scoring;
pub mod analysis;
pub mod render;
pub mod workflow;
pub mod session;
pub mod library;
pub mod logging;
pub mod export;
pub mod player;
pub mod gui;

use std::fmt;

pub use error::LoopError;

/// Identifies one input sample as listed by a [`session::SampleSource`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without its extension, used when naming rendered loops.
    pub fn stem(&self) -> &str {
        match self.0.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.0,
        }
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scored loop point. Jumping from `end_frame` back to `start_frame` should be inaudible;
/// lower scores are more seamless.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopCandidate {
    pub start_frame: usize,
    pub end_frame: usize,
    pub score: f32,
}

impl LoopCandidate {
    pub fn segment_frames(&self) -> usize {
        self.end_frame - self.start_frame
    }

    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.segment_frames() as f64 / sample_rate as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confidence {
    High,
    Low, // best score is above the sanity threshold
}

/// Ranked result of one detection run. Never empty, sorted ascending by score.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateSet {
    candidates: Vec<LoopCandidate>,
    confidence: Confidence,
}

impl CandidateSet {
    /// Sorts the candidates into rank order. Returns `None` for an empty list so a
    /// set can never exist without a best candidate.
    pub fn from_unranked(mut candidates: Vec<LoopCandidate>, confidence: Confidence) -> Option<Self> {
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then(a.start_frame.cmp(&b.start_frame))
                .then(a.end_frame.cmp(&b.end_frame))
        });
        Some(Self { candidates, confidence })
    }

    pub fn best(&self) -> &LoopCandidate {
        &self.candidates[0]
    }

    pub fn get(&self, rank: usize) -> Option<&LoopCandidate> {
        self.candidates.get(rank)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoopCandidate> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[LoopCandidate] {
        &self.candidates
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }
}

/// A validated request to render `candidate` for `target_duration_secs`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderRequest {
    pub rank: usize,
    pub candidate: LoopCandidate,
    pub target_duration_secs: f64,
}

impl RenderRequest {
    /// Rejects non-positive durations, durations shorter than one segment and outputs too
    /// large for a WAV file in the buffer's format.
    pub fn new(
        rank: usize,
        candidate: LoopCandidate,
        target_duration_secs: f64,
        buffer: &audio::WaveformBuffer,
    ) -> Result<Self, LoopError> {
        let sample_rate = buffer.sample_rate() as f64;
        let max_frames = export::max_wav_frames(buffer.channels(), buffer.bits_per_sample());
        let invalid = || LoopError::InvalidDurationRequest {
            requested_secs: target_duration_secs,
            minimum_secs: candidate.duration_secs(buffer.sample_rate()),
            maximum_secs: max_frames as f64 / sample_rate,
        };

        if !target_duration_secs.is_finite() || target_duration_secs <= 0.0 {
            return Err(invalid());
        }
        let frames = (target_duration_secs * sample_rate).round();
        if frames < candidate.segment_frames() as f64 || frames > max_frames as f64 {
            return Err(invalid());
        }
        Ok(Self {
            rank,
            candidate,
            target_duration_secs,
        })
    }

    pub fn total_frames(&self, sample_rate: u32) -> usize {
        (self.target_duration_secs * sample_rate as f64).round() as usize
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ScoringStrategy {
    Waveform,
    Spectral,
    Blended { spectral_weight: f32 },
}

#[derive(Clone, Debug)]
pub struct DetectorSettings {
    pub min_loop_secs: f32,
    pub max_loop_secs: Option<f32>, // None: bounded only by the buffer
    pub window_frames: usize,     // frames compared on each side of a loop point
    pub max_candidates: usize,
    pub max_anchors: usize,       // cap on zero crossings considered as loop points
    pub slope_weight: f32,        // weight of the boundary value/slope term
    pub boundary_emphasis: f32,   // weight of the splice-adjacent sample relative to the deepest one
    pub refine_radius: usize,     // frames searched around each end point after the coarse pass
    pub dedup_tolerance_secs: f32,
    pub confidence_threshold: f32,
    pub scoring: ScoringStrategy,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_loop_secs: 0.1,
            max_loop_secs: None,
            window_frames: 256,
            max_candidates: 5,
            max_anchors: 384,
            slope_weight: 1.0,
            boundary_emphasis: 4.0,
            refine_radius: 24,
            dedup_tolerance_secs: 0.01,
            confidence_threshold: 0.25,
            scoring: ScoringStrategy::Waveform,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum FadeCurve {
    Linear,
    EqualPower,
}

#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub crossfade_secs: f32,
    pub fade_curve: FadeCurve,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            crossfade_secs: 0.015,
            fade_curve: FadeCurve::Linear,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoopSettings {
    pub detector: DetectorSettings,
    pub render: RenderSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(start: usize, end: usize, score: f32) -> LoopCandidate {
        LoopCandidate { start_frame: start, end_frame: end, score }
    }

    #[test]
    fn candidate_set_ranks_by_score_then_offsets() {
        let set = CandidateSet::from_unranked(
            vec![candidate(10, 90, 0.5), candidate(20, 80, 0.1), candidate(5, 80, 0.1)],
            Confidence::High,
        )
        .unwrap();
        assert_eq!(set.best(), &candidate(5, 80, 0.1));
        assert_eq!(set.get(1), Some(&candidate(20, 80, 0.1)));
        assert_eq!(set.get(2).unwrap().score, 0.5);
    }

    #[test]
    fn empty_candidate_list_is_not_a_set() {
        assert!(CandidateSet::from_unranked(Vec::new(), Confidence::Low).is_none());
    }

    #[test]
    fn render_request_requires_a_full_segment() {
        let buffer = audio::WaveformBuffer::from_mono(vec![0.0; 88_200], 44_100).unwrap();
        let c = candidate(0, 44_100, 0.0);
        assert!(RenderRequest::new(0, c, 1.0, &buffer).is_ok());
        assert!(matches!(
            RenderRequest::new(0, c, 0.5, &buffer),
            Err(LoopError::InvalidDurationRequest { .. })
        ));
        assert!(RenderRequest::new(0, c, -3.0, &buffer).is_err());
        assert!(RenderRequest::new(0, c, f64::NAN, &buffer).is_err());
    }

    #[test]
    fn render_request_must_fit_in_a_wav_file() {
        let stereo = audio::WaveformBuffer::new(vec![0.0; 20_000], 44_100, 2, 16).unwrap();
        let c = candidate(1_000, 5_000, 0.0);
        let err = RenderRequest::new(0, c, 1e20, &stereo).unwrap_err();
        let LoopError::InvalidDurationRequest { maximum_secs, .. } = err else {
            panic!("unexpected error {err:?}");
        };
        // 16-bit stereo is four bytes a frame.
        let expected = export::max_wav_frames(2, 16) as f64 / 44_100.0;
        assert_eq!(maximum_secs, expected);
        assert!(maximum_secs > 3.0 * 3_600.0);
        assert!(RenderRequest::new(0, c, maximum_secs + 1.0, &stereo).is_err());
        assert!(RenderRequest::new(0, c, 3_600.0, &stereo).is_ok());
    }

    #[test]
    fn sample_id_stem_drops_extension() {
        assert_eq!(SampleId::new("siren.wav").stem(), "siren");
        assert_eq!(SampleId::new("air.raid.flac").stem(), "air.raid");
        assert_eq!(SampleId::new("noext").stem(), "noext");
    }
}
