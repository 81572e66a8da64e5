//! Window dissimilarity metrics used by the loop detector.
//!
//! Both windows passed to a [`Scorer`] end at a splice point: the last sample of each is the
//! one played right before the jump. Windows of different lengths are compared over their
//! common tail. Every scorer is pure and symmetric in its two arguments.

use std::sync::Arc;

use num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::ScoringStrategy;

pub trait Scorer {
    /// Non-negative dissimilarity, 0 for identical windows.
    fn score(&self, a: &[f32], b: &[f32]) -> f32;
}

fn common_tail<'a>(a: &'a [f32], b: &'a [f32]) -> (&'a [f32], &'a [f32]) {
    let n = a.len().min(b.len());
    (&a[a.len() - n..], &b[b.len() - n..])
}

/// Boundary-weighted squared difference normalised by window energy.
#[derive(Clone, Debug)]
pub struct WaveformScorer {
    boundary_emphasis: f32,
}

impl WaveformScorer {
    pub fn new(boundary_emphasis: f32) -> Self {
        Self {
            boundary_emphasis: boundary_emphasis.max(1.0),
        }
    }

    fn weight(&self, i: usize, n: usize) -> f32 {
        if n < 2 {
            return self.boundary_emphasis;
        }
        1.0 + (self.boundary_emphasis - 1.0) * i as f32 / (n - 1) as f32
    }
}

impl Default for WaveformScorer {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl Scorer for WaveformScorer {
    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let (a, b) = common_tail(a, b);
        let n = a.len();
        if n == 0 {
            return 0.0;
        }

        let mut diff = 0.0f32;
        let mut energy = 0.0f32;
        for i in 0..n {
            let w = self.weight(i, n);
            let d = a[i] - b[i];
            diff += w * d * d;
            energy += w * 0.5 * (a[i] * a[i] + b[i] * b[i]);
        }
        diff / (energy + 1e-9)
    }
}

/// Compares Hann-windowed log-magnitude spectra. Blind to phase, so it is meant to be
/// blended with [`WaveformScorer`] rather than used alone on tonal material.
#[derive(Clone)]
pub struct SpectralScorer {
    fft: Arc<dyn RealToComplex<f32>>,
    hann: Vec<f32>,
}

impl SpectralScorer {
    pub fn new(window_frames: usize) -> Self {
        let len = window_frames.max(2);
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(len);
        let hann = (0..len)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (len - 1) as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();
        Self { fft, hann }
    }

    fn log_spectrum(&self, window: &[f32]) -> Option<Vec<f32>> {
        let mut input = self.fft.make_input_vec();
        // Short windows are left-padded so the splice side stays aligned.
        let last = input.len() - 1;
        for (i, &s) in window.iter().rev().take(input.len()).enumerate() {
            input[last - i] = s * self.hann[last - i];
        }
        let mut spectrum: Vec<Complex<f32>> = self.fft.make_output_vec();
        if let Err(e) = self.fft.process(&mut input, &mut spectrum) {
            log::error!("spectral scoring failed: {e}");
            return None;
        }
        Some(spectrum.iter().map(|c| c.norm().ln_1p()).collect())
    }
}

impl Scorer for SpectralScorer {
    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let (a, b) = common_tail(a, b);
        if a.is_empty() {
            return 0.0;
        }
        let (Some(sa), Some(sb)) = (self.log_spectrum(a), self.log_spectrum(b)) else {
            return f32::MAX;
        };
        let mut distance = 0.0f32;
        let mut mass = 0.0f32;
        for (x, y) in sa.iter().zip(&sb) {
            distance += (x - y).abs();
            mass += 0.5 * (x + y);
        }
        distance / (mass + 1e-9)
    }
}

/// The scorer selected by [`ScoringStrategy`].
#[derive(Clone)]
pub enum StrategyScorer {
    Waveform(WaveformScorer),
    Spectral(SpectralScorer),
    Blended {
        waveform: WaveformScorer,
        spectral: SpectralScorer,
        spectral_weight: f32,
    },
}

impl StrategyScorer {
    pub fn new(strategy: ScoringStrategy, window_frames: usize, boundary_emphasis: f32) -> Self {
        match strategy {
            ScoringStrategy::Waveform => Self::Waveform(WaveformScorer::new(boundary_emphasis)),
            ScoringStrategy::Spectral => Self::Spectral(SpectralScorer::new(window_frames)),
            ScoringStrategy::Blended { spectral_weight } => Self::Blended {
                waveform: WaveformScorer::new(boundary_emphasis),
                spectral: SpectralScorer::new(window_frames),
                spectral_weight: spectral_weight.max(0.0),
            },
        }
    }
}

impl Scorer for StrategyScorer {
    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Waveform(s) => s.score(a, b),
            Self::Spectral(s) => s.score(a, b),
            Self::Blended {
                waveform,
                spectral,
                spectral_weight,
            } => waveform.score(a, b) + spectral_weight * spectral.score(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, phase: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / 8_000.0 + phase).sin())
            .collect()
    }

    #[test]
    fn identical_windows_score_zero() {
        let w = sine(440.0, 0.0, 256);
        assert_eq!(WaveformScorer::default().score(&w, &w), 0.0);
        assert!(SpectralScorer::new(256).score(&w, &w) < 1e-6);
    }

    #[test]
    fn waveform_score_is_pure_and_symmetric() {
        let scorer = WaveformScorer::default();
        let a = sine(440.0, 0.0, 256);
        let b = sine(440.0, 0.7, 256);
        let first = scorer.score(&a, &b);
        assert_eq!(first, scorer.score(&a, &b));
        assert_eq!(first, scorer.score(&b, &a));
        assert!(first > 0.0);
    }

    #[test]
    fn phase_mismatch_scores_worse_than_small_drift() {
        let scorer = WaveformScorer::default();
        let a = sine(440.0, 0.0, 256);
        let near = sine(440.0, 0.05, 256);
        let far = sine(440.0, std::f32::consts::PI, 256);
        assert!(scorer.score(&a, &near) < scorer.score(&a, &far));
    }

    #[test]
    fn mismatch_at_the_splice_weighs_more_than_deep_mismatch() {
        let scorer = WaveformScorer::new(4.0);
        let base = vec![0.5f32; 64];
        let mut deep = base.clone();
        deep[0] = -0.5;
        let mut splice = base.clone();
        splice[63] = -0.5;
        assert!(scorer.score(&base, &splice) > scorer.score(&base, &deep));
    }

    #[test]
    fn silence_against_silence_is_seamless() {
        let silent = vec![0.0f32; 128];
        assert_eq!(WaveformScorer::default().score(&silent, &silent), 0.0);
        assert_eq!(SpectralScorer::new(128).score(&silent, &silent), 0.0);
    }

    #[test]
    fn spectral_scorer_separates_pitches() {
        let scorer = SpectralScorer::new(256);
        let a = sine(440.0, 0.0, 256);
        let shifted = sine(440.0, 1.0, 256);
        let other = sine(1_800.0, 0.0, 256);
        assert!(scorer.score(&a, &shifted) < scorer.score(&a, &other));
    }

    #[test]
    fn blended_adds_weighted_spectral_term() {
        let a = sine(440.0, 0.0, 256);
        let b = sine(900.0, 0.3, 256);
        let waveform = StrategyScorer::new(ScoringStrategy::Waveform, 256, 4.0).score(&a, &b);
        let spectral = StrategyScorer::new(ScoringStrategy::Spectral, 256, 4.0).score(&a, &b);
        let blended = StrategyScorer::new(ScoringStrategy::Blended { spectral_weight: 0.5 }, 256, 4.0)
            .score(&a, &b);
        approx::assert_relative_eq!(blended, waveform + 0.5 * spectral, max_relative = 1e-5);
    }

    #[test]
    fn unequal_windows_compare_their_common_tail() {
        let scorer = WaveformScorer::default();
        let long = sine(440.0, 0.0, 300);
        let tail = long[100..].to_vec();
        assert_eq!(scorer.score(&long, &tail), 0.0);
    }
}
