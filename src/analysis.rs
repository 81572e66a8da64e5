use crate::audio::WaveformBuffer;
use crate::scoring::{Scorer, StrategyScorer};
use crate::{CandidateSet, Confidence, DetectorSettings, LoopCandidate, LoopError};

/// Frame bounds of one detection run, resolved from [`DetectorSettings`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchBounds {
    pub min_len: usize,
    pub max_len: usize,
    pub window: usize,
}

impl SearchBounds {
    pub fn resolve(settings: &DetectorSettings, sample_rate: u32, frame_count: usize) -> Result<Self, LoopError> {
        let to_frames = |secs: f32| (secs.max(0.0) as f64 * sample_rate as f64).round() as usize;

        let min_len = to_frames(settings.min_loop_secs).max(2);
        let required = min_len * 2;
        if frame_count < required {
            return Err(LoopError::InsufficientBufferLength {
                frames: frame_count,
                required,
            });
        }

        // A window never reaches back past the shortest loop, so (window, window + min_len) fits.
        let window = settings.window_frames.clamp(1, min_len - 1);
        let longest_fit = frame_count - 1 - window;
        let max_len = settings
            .max_loop_secs
            .map(to_frames)
            .unwrap_or(usize::MAX)
            .min(longest_fit)
            .max(min_len);

        Ok(Self { min_len, max_len, window })
    }
}

/// Score components of one loop point pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PairScore {
    pub boundary: f32,
    pub window: f32,
}

impl PairScore {
    pub fn total(&self) -> f32 {
        self.boundary + self.window
    }
}

/// Mono, DC-free view of a buffer prepared for loop point search.
pub struct LoopSignal {
    mono: Vec<f32>,
    bounds: SearchBounds,
    inv_rms: f32,
    slope_weight: f32,
}

impl LoopSignal {
    pub fn prepare(buffer: &WaveformBuffer, settings: &DetectorSettings) -> Result<Self, LoopError> {
        let bounds = SearchBounds::resolve(settings, buffer.sample_rate(), buffer.frame_count())?;

        let mut mono = buffer.mono();
        let mean = mono.iter().sum::<f32>() / mono.len() as f32;
        mono.iter_mut().for_each(|s| *s -= mean);

        let rms = calculate_rms(&mono);
        Ok(Self {
            mono,
            bounds,
            inv_rms: 1.0 / rms.max(1e-6),
            slope_weight: settings.slope_weight.max(0.0),
        })
    }

    pub fn bounds(&self) -> SearchBounds {
        self.bounds
    }

    pub fn mono(&self) -> &[f32] {
        &self.mono
    }

    /// Value and slope mismatch between the sample the jump skips (`end`) and the one it
    /// lands on (`start`).
    pub fn boundary_term(&self, start: usize, end: usize) -> f32 {
        let x = &self.mono;
        let value = (x[start] - x[end]).abs();
        let slope = ((x[start] - x[start - 1]) - (x[end] - x[end - 1])).abs();
        self.slope_weight * (value + slope) * self.inv_rms
    }

    pub fn score_pair<S: Scorer>(&self, scorer: &S, start: usize, end: usize) -> PairScore {
        let w = self.bounds.window;
        PairScore {
            boundary: self.boundary_term(start, end),
            window: scorer.score(&self.mono[start - w..start], &self.mono[end - w..end]),
        }
    }

    fn fits(&self, start: usize, end: usize) -> bool {
        let b = self.bounds;
        start >= b.window
            && end < self.mono.len()
            && end > start
            && (b.min_len..=b.max_len).contains(&(end - start))
    }

    /// Positions eligible as loop points: rising zero crossings, or an even grid when the
    /// signal has too few of them. At most `max_anchors`, ascending.
    pub fn anchors(&self, max_anchors: usize) -> Vec<usize> {
        let lo = self.bounds.window;
        let hi = self.mono.len() - 1;
        let max_anchors = max_anchors.max(2);

        let crossings: Vec<usize> = (lo.max(1)..=hi)
            .filter(|&p| self.mono[p - 1] < 0.0 && self.mono[p] >= 0.0)
            .collect();

        let positions = if crossings.len() >= 2 {
            crossings
        } else {
            let span = hi - lo;
            let count = max_anchors.min(span + 1);
            let mut grid: Vec<usize> = (0..count).map(|k| lo + k * span / (count - 1)).collect();
            grid.dedup();
            grid
        };

        if positions.len() <= max_anchors {
            return positions;
        }
        let last = positions.len() - 1;
        (0..max_anchors)
            .map(|k| positions[k * last / (max_anchors - 1)])
            .collect()
    }
}

fn calculate_rms(data: &[f32]) -> f32 {
    let sum_sq: f32 = data.iter().map(|x| x * x).sum();
    (sum_sq / (data.len() as f32 + 1e-9)).sqrt()
}

/// Bounded set of the lowest-scoring pairs seen so far.
struct CandidatePool {
    capacity: usize,
    entries: Vec<LoopCandidate>,
    worst: usize,
}

impl CandidatePool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::with_capacity(capacity),
            worst: 0,
        }
    }

    /// Score a pair must beat to enter the pool.
    fn threshold(&self) -> f32 {
        if self.entries.len() < self.capacity {
            f32::INFINITY
        } else {
            self.entries[self.worst].score
        }
    }

    fn offer(&mut self, candidate: LoopCandidate) {
        if self.entries.len() < self.capacity {
            self.entries.push(candidate);
        } else if candidate.score < self.entries[self.worst].score {
            self.entries[self.worst] = candidate;
        } else {
            return;
        }
        self.worst = self
            .entries
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.score.total_cmp(&b.1.score))
            .map(|(i, _)| i)
            .unwrap_or(0);
    }
}

pub fn detect_loops(buffer: &WaveformBuffer, settings: &DetectorSettings) -> Result<CandidateSet, LoopError> {
    let window = settings.window_frames.max(1);
    let scorer = StrategyScorer::new(settings.scoring, window, settings.boundary_emphasis);
    detect_loops_with(buffer, settings, &scorer)
}

/// Ranked loop points of `buffer` under an arbitrary window scorer.
pub fn detect_loops_with<S: Scorer>(
    buffer: &WaveformBuffer,
    settings: &DetectorSettings,
    scorer: &S,
) -> Result<CandidateSet, LoopError> {
    let signal = LoopSignal::prepare(buffer, settings)?;
    let bounds = signal.bounds();
    let anchors = signal.anchors(settings.max_anchors);
    let max_candidates = settings.max_candidates.max(1);

    // 1. Coarse pass over anchor pairs
    let mut pool = CandidatePool::new(max_candidates * 8);
    let mut scored = 0usize;
    let mut pruned = 0usize;
    for (i, &start) in anchors.iter().enumerate() {
        if start < bounds.window {
            continue;
        }
        let rest = &anchors[i + 1..];
        let first = rest.partition_point(|&end| end - start < bounds.min_len);
        for &end in &rest[first..] {
            if end - start > bounds.max_len {
                break;
            }
            let boundary = signal.boundary_term(start, end);
            if boundary >= pool.threshold() {
                pruned += 1;
                continue;
            }
            scored += 1;
            let score = signal.score_pair(scorer, start, end).total();
            pool.offer(LoopCandidate {
                start_frame: start,
                end_frame: end,
                score,
            });
        }
    }
    log::debug!(
        "{} anchors, {} pairs scored, {} pruned by boundary mismatch",
        anchors.len(),
        scored,
        pruned
    );

    // 2. Refine each end point sample by sample
    let radius = settings.refine_radius;
    let mut refined: Vec<LoopCandidate> = pool
        .entries
        .iter()
        .map(|c| {
            let lo = c.end_frame.saturating_sub(radius);
            let hi = c.end_frame + radius;
            let mut best = *c;
            for end in lo..=hi {
                if end == c.end_frame || !signal.fits(c.start_frame, end) {
                    continue;
                }
                let score = signal.score_pair(scorer, c.start_frame, end).total();
                if score < best.score {
                    best = LoopCandidate {
                        start_frame: c.start_frame,
                        end_frame: end,
                        score,
                    };
                }
            }
            best
        })
        .collect();

    if refined.is_empty() {
        let (start, end) = (bounds.window, bounds.window + bounds.min_len);
        log::debug!("no anchor pair within bounds, falling back to {start}..{end}");
        refined.push(LoopCandidate {
            start_frame: start,
            end_frame: end,
            score: signal.score_pair(scorer, start, end).total(),
        });
    }

    // 3. Drop near-duplicates, keeping the better-scored of each cluster
    refined.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then(a.start_frame.cmp(&b.start_frame))
            .then(a.end_frame.cmp(&b.end_frame))
    });
    let tolerance = (settings.dedup_tolerance_secs.max(0.0) as f64 * buffer.sample_rate() as f64).round() as usize;
    let mut kept: Vec<LoopCandidate> = Vec::with_capacity(max_candidates);
    for candidate in refined {
        let duplicate = kept.iter().any(|k| {
            k.start_frame.abs_diff(candidate.start_frame) <= tolerance
                && k.end_frame.abs_diff(candidate.end_frame) <= tolerance
        });
        if !duplicate {
            kept.push(candidate);
        }
        if kept.len() == max_candidates {
            break;
        }
    }

    let best_score = kept.first().map(|c| c.score).unwrap_or(f32::INFINITY);
    let confidence = if best_score > settings.confidence_threshold {
        log::warn!(
            "best loop score {:.4} is above the {:.4} threshold",
            best_score,
            settings.confidence_threshold
        );
        Confidence::Low
    } else {
        Confidence::High
    };
    log::info!(
        "found {} loop candidate(s), best score {:.4}",
        kept.len(),
        best_score
    );

    CandidateSet::from_unranked(kept, confidence).ok_or(LoopError::InsufficientBufferLength {
        frames: buffer.frame_count(),
        required: bounds.min_len * 2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 44_100;

    fn periodic(period: usize, frames: usize) -> WaveformBuffer {
        let samples = (0..frames)
            .map(|i| 0.8 * (2.0 * PI * (i % period) as f32 / period as f32 + 0.3).sin())
            .collect();
        WaveformBuffer::from_mono(samples, SR).unwrap()
    }

    fn noise(frames: usize, seed: u32) -> WaveformBuffer {
        let mut state = seed.max(1);
        let samples = (0..frames)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect();
        WaveformBuffer::from_mono(samples, SR).unwrap()
    }

    fn settings(min: f32, max: Option<f32>) -> DetectorSettings {
        DetectorSettings {
            min_loop_secs: min,
            max_loop_secs: max,
            ..Default::default()
        }
    }

    fn assert_well_formed(set: &CandidateSet, bounds: SearchBounds, frames: usize) {
        assert!(!set.is_empty());
        for pair in set.as_slice().windows(2) {
            assert!(pair[0].score <= pair[1].score);
        }
        for c in set.iter() {
            assert!(c.start_frame < c.end_frame && c.end_frame <= frames);
            assert!(c.score >= 0.0);
            assert!((bounds.min_len..=bounds.max_len).contains(&c.segment_frames()));
        }
    }

    #[test]
    fn periodic_signal_loops_on_whole_periods() {
        let buffer = periodic(100, SR as usize / 2);
        let set = detect_loops(&buffer, &settings(0.05, None)).unwrap();
        let best = set.best();
        assert_eq!(best.segment_frames() % 100, 0, "{best:?}");
        assert!(best.score < 1e-3, "{best:?}");
        assert_eq!(set.confidence(), Confidence::High);
    }

    #[test]
    fn candidates_respect_bounds_for_various_lengths() {
        let s = settings(0.01, Some(0.03));
        for (frames, seed) in [(882usize, 1u32), (2_000, 7), (5_513, 99), (20_000, 1234)] {
            let buffer = noise(frames, seed);
            let bounds = SearchBounds::resolve(&s, SR, frames).unwrap();
            let set = detect_loops(&buffer, &s).unwrap();
            assert_well_formed(&set, bounds, frames);
            assert!(set.len() <= s.max_candidates);
        }
    }

    #[test]
    fn too_short_buffer_is_rejected() {
        let buffer = periodic(100, 4_410);
        let err = detect_loops(&buffer, &settings(0.2, None)).unwrap_err();
        assert_eq!(
            err,
            LoopError::InsufficientBufferLength {
                frames: 4_410,
                required: 17_640
            }
        );
    }

    #[test]
    fn detection_is_deterministic() {
        let buffer = noise(30_000, 42);
        let s = settings(0.1, Some(0.5));
        assert_eq!(detect_loops(&buffer, &s).unwrap(), detect_loops(&buffer, &s).unwrap());
    }

    #[test]
    fn silence_falls_back_to_a_grid_and_still_answers() {
        let buffer = WaveformBuffer::from_mono(vec![0.0; 10_000], SR).unwrap();
        let s = settings(0.05, None);
        let set = detect_loops(&buffer, &s).unwrap();
        let bounds = SearchBounds::resolve(&s, SR, 10_000).unwrap();
        assert_well_formed(&set, bounds, 10_000);
        assert_eq!(set.best().score, 0.0);
    }

    #[test]
    fn near_duplicates_are_collapsed() {
        let buffer = periodic(100, SR as usize / 2);
        let s = DetectorSettings {
            dedup_tolerance_secs: 0.01,
            ..settings(0.05, None)
        };
        let set = detect_loops(&buffer, &s).unwrap();
        let tol = 441;
        for (i, a) in set.iter().enumerate() {
            for b in set.iter().skip(i + 1) {
                assert!(
                    a.start_frame.abs_diff(b.start_frame) > tol || a.end_frame.abs_diff(b.end_frame) > tol,
                    "{a:?} and {b:?} are near-identical"
                );
            }
        }
    }

    #[test]
    fn noise_is_flagged_low_confidence() {
        let buffer = noise(20_000, 5);
        let s = DetectorSettings {
            confidence_threshold: 0.01,
            ..settings(0.05, None)
        };
        let set = detect_loops(&buffer, &s).unwrap();
        assert_eq!(set.confidence(), Confidence::Low);
    }

    #[test]
    fn window_shrinks_to_fit_tiny_loops() {
        let bounds = SearchBounds::resolve(&settings(0.0001, None), SR, 100).unwrap();
        assert_eq!(bounds.min_len, 4);
        assert_eq!(bounds.window, 3);
        assert!(bounds.max_len <= 100 - 1 - 3);
    }

    #[test]
    fn custom_scorer_is_used() {
        struct Flat;
        impl Scorer for Flat {
            fn score(&self, _: &[f32], _: &[f32]) -> f32 {
                0.0
            }
        }
        let buffer = noise(10_000, 3);
        let s = DetectorSettings {
            slope_weight: 0.0,
            ..settings(0.05, None)
        };
        let set = detect_loops_with(&buffer, &s, &Flat).unwrap();
        assert!(set.iter().all(|c| c.score == 0.0));
    }
}
