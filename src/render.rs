use std::time::Duration;

use rodio::Source;

use crate::audio::WaveformBuffer;
use crate::{FadeCurve, RenderRequest, RenderSettings, SampleId};

/// Where a rendered loop came from. Used for naming and logging only.
#[derive(Clone, Debug, PartialEq)]
pub struct Provenance {
    pub sample: SampleId,
    pub rank: usize,
    pub start_frame: usize,
    pub end_frame: usize,
    pub duration_secs: f64,
    pub total_frames: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// Repetitions of one loop segment, synthesised on demand as interleaved samples.
///
/// Frame `t` plays offset `t % L` of repetition `t / L`. The last `F` frames of every
/// repetition that is followed by another one fade from the segment tail into the `F`
/// source frames preceding the loop start, so the next repetition continues the
/// original signal.
#[derive(Clone, Debug)]
pub struct LoopStream {
    segment: Vec<f32>,
    pre_roll: Vec<f32>,
    fade_in: Vec<f32>,
    fade_out: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    segment_frames: usize,
    total_frames: usize,
    cursor: usize,
}

impl LoopStream {
    pub fn frame_count(&self) -> usize {
        self.total_frames
    }

    pub fn crossfade_frames(&self) -> usize {
        self.fade_in.len()
    }

    fn sample_at(&self, index: usize) -> f32 {
        let frame = index / self.channels;
        let ch = index % self.channels;
        let repetition = frame / self.segment_frames;
        let offset = frame % self.segment_frames;
        let fade = self.fade_in.len();
        let fade_start = self.segment_frames - fade;

        let dry = self.segment[offset * self.channels + ch];
        let followed = (repetition + 1) * self.segment_frames < self.total_frames;
        if fade > 0 && offset >= fade_start && followed {
            let j = offset - fade_start;
            dry * self.fade_out[j] + self.pre_roll[j * self.channels + ch] * self.fade_in[j]
        } else {
            dry
        }
    }
}

impl Iterator for LoopStream {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.total_frames * self.channels {
            return None;
        }
        let sample = self.sample_at(self.cursor);
        self.cursor += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_frames * self.channels - self.cursor;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LoopStream {}

impl Source for LoopStream {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels as u16
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(
            self.total_frames as f64 / self.sample_rate as f64,
        ))
    }
}

/// Output of one render: the stream plus its provenance.
#[derive(Clone, Debug)]
pub struct RenderedLoop {
    provenance: Provenance,
    stream: LoopStream,
}

impl RenderedLoop {
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn frame_count(&self) -> usize {
        self.stream.frame_count()
    }

    pub fn stream(&self) -> &LoopStream {
        &self.stream
    }

    pub fn into_parts(self) -> (Provenance, LoopStream) {
        (self.provenance, self.stream)
    }

    /// Materialises the whole stream. Hour-long loops are better consumed lazily.
    pub fn into_samples(self) -> Vec<f32> {
        self.stream.collect()
    }
}

fn fade_gains(frames: usize, curve: FadeCurve) -> (Vec<f32>, Vec<f32>) {
    (0..frames)
        .map(|j| {
            let p = (j + 1) as f32 / (frames + 1) as f32;
            match curve {
                FadeCurve::Linear => (p, 1.0 - p),
                FadeCurve::EqualPower => {
                    let angle = p * std::f32::consts::FRAC_PI_2;
                    (angle.sin(), angle.cos())
                }
            }
        })
        .unzip()
}

/// Builds the loop stream for an already validated request. The segment and its
/// crossfade pre-roll are copied out of `buffer`.
pub fn render(
    buffer: &WaveformBuffer,
    sample: SampleId,
    request: &RenderRequest,
    settings: &RenderSettings,
) -> RenderedLoop {
    let sample_rate = buffer.sample_rate();
    let channels = buffer.channels() as usize;
    let candidate = request.candidate;
    let start = candidate.start_frame.min(buffer.frame_count());

    let mut segment = buffer.frames(start..candidate.end_frame).to_vec();
    if segment.is_empty() {
        // Unreachable through the workflow; keeps the stream well defined.
        segment = vec![0.0; channels];
    }
    let segment_frames = segment.len() / channels;

    let wanted = (settings.crossfade_secs.max(0.0) as f64 * sample_rate as f64).round() as usize;
    let fade = wanted.min(segment_frames / 2).min(start);
    let pre_roll = buffer.frames(start - fade..start).to_vec();
    let (fade_in, fade_out) = fade_gains(fade, settings.fade_curve);

    let total_frames = request.total_frames(sample_rate);
    log::info!(
        "rendering {} frames from segment {}..{} ({} frames, {} repetitions, {} frame crossfade)",
        total_frames,
        start,
        start + segment_frames,
        segment_frames,
        total_frames.div_ceil(segment_frames),
        fade
    );

    RenderedLoop {
        provenance: Provenance {
            sample,
            rank: request.rank,
            start_frame: start,
            end_frame: start + segment_frames,
            duration_secs: request.target_duration_secs,
            total_frames,
            sample_rate,
            channels: buffer.channels(),
            bits_per_sample: buffer.bits_per_sample(),
        },
        stream: LoopStream {
            segment,
            pre_roll,
            fade_in,
            fade_out,
            channels,
            sample_rate,
            segment_frames,
            total_frames,
            cursor: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoopCandidate;
    use std::f32::consts::PI;

    const SR: u32 = 44_100;

    fn periodic(period: usize, frames: usize) -> WaveformBuffer {
        let samples = (0..frames)
            .map(|i| 0.8 * (2.0 * PI * (i % period) as f32 / period as f32 + 0.3).sin())
            .collect();
        WaveformBuffer::from_mono(samples, SR).unwrap()
    }

    fn request(buffer: &WaveformBuffer, start: usize, end: usize, secs: f64) -> RenderRequest {
        let candidate = LoopCandidate {
            start_frame: start,
            end_frame: end,
            score: 0.0,
        };
        RenderRequest::new(0, candidate, secs, buffer).unwrap()
    }

    fn max_step(samples: &[f32]) -> f32 {
        samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn output_length_matches_requested_duration() {
        let buffer = periodic(100, 44_100);
        for secs in [0.1, 0.25, 1.0, 1.00001, 2.5] {
            let rendered = render(
                &buffer,
                SampleId::new("tone.wav"),
                &request(&buffer, 596, 596 + 4_000, secs),
                &RenderSettings::default(),
            );
            let expected = (secs * SR as f64).round() as usize;
            assert_eq!(rendered.frame_count(), expected);
            assert_eq!(rendered.into_samples().len(), expected);
        }
    }

    #[test]
    fn perfect_loop_without_fade_repeats_the_segment_verbatim() {
        let buffer = periodic(100, 10_000);
        let settings = RenderSettings {
            crossfade_secs: 0.0,
            ..Default::default()
        };
        let out = render(&buffer, SampleId::new("a"), &request(&buffer, 200, 1_200, 3_000.0 / SR as f64), &settings)
            .into_samples();
        let segment = buffer.frames(200..1_200);
        assert_eq!(&out[..1_000], segment);
        assert_eq!(&out[1_000..2_000], segment);
        assert_eq!(&out[2_000..], segment);
    }

    #[test]
    fn crossfade_removes_the_click_of_an_imperfect_loop() {
        let buffer = periodic(100, 10_000);
        let source_step = max_step(buffer.samples());
        // 2025 frames lands the splice a quarter period off, on a peak.
        let req = request(&buffer, 596, 596 + 2_025, 3.0 * 2_025.0 / SR as f64);

        let no_fade = RenderSettings {
            crossfade_secs: 0.0,
            ..Default::default()
        };
        let hard = render(&buffer, SampleId::new("a"), &req, &no_fade).into_samples();
        assert!(max_step(&hard) > source_step * 4.0);

        let smooth = render(&buffer, SampleId::new("a"), &req, &RenderSettings::default()).into_samples();
        assert_eq!(smooth.len(), hard.len());
        assert!(max_step(&smooth) <= source_step + 0.01, "{} vs {}", max_step(&smooth), source_step);
        assert!((smooth[2_025] - smooth[2_024]).abs() <= source_step + 0.01);
    }

    #[test]
    fn final_repetition_is_not_faded() {
        let buffer = periodic(100, 10_000);
        let req = request(&buffer, 596, 596 + 1_000, 1_500.0 / SR as f64);
        let out = render(&buffer, SampleId::new("a"), &req, &RenderSettings::default()).into_samples();
        assert_eq!(&out[1_000..], &buffer.frames(596..1_096)[..]);
    }

    #[test]
    fn crossfade_never_exceeds_half_the_segment_or_the_pre_roll() {
        let buffer = periodic(100, 10_000);
        let settings = RenderSettings {
            crossfade_secs: 1.0,
            fade_curve: FadeCurve::EqualPower,
        };
        let (_, stream) = render(&buffer, SampleId::new("a"), &request(&buffer, 300, 5_300, 0.5), &settings).into_parts();
        assert_eq!(stream.crossfade_frames(), 300);
        let (_, stream) = render(&buffer, SampleId::new("a"), &request(&buffer, 4_000, 4_400, 0.5), &settings).into_parts();
        assert_eq!(stream.crossfade_frames(), 200);
    }

    #[test]
    fn stereo_frames_stay_interleaved() {
        let samples: Vec<f32> = (0..2_000).flat_map(|i| [i as f32, -(i as f32)]).collect();
        let buffer = WaveformBuffer::new(samples, SR, 2, 32).unwrap();
        let settings = RenderSettings {
            crossfade_secs: 0.0,
            ..Default::default()
        };
        let rendered = render(&buffer, SampleId::new("s"), &request(&buffer, 100, 200, 250.0 / SR as f64), &settings);
        assert_eq!(rendered.provenance().channels, 2);
        let out = rendered.into_samples();
        assert_eq!(out.len(), 500);
        assert_eq!(&out[..4], &[100.0, -100.0, 101.0, -101.0]);
        assert_eq!(&out[200..202], &[100.0, -100.0]);
    }

    #[test]
    fn provenance_records_the_request() {
        let buffer = periodic(100, 10_000);
        let req = RenderRequest::new(
            2,
            LoopCandidate { start_frame: 500, end_frame: 1_500, score: 0.1 },
            60.0,
            &buffer,
        )
        .unwrap();
        let rendered = render(&buffer, SampleId::new("siren.wav"), &req, &RenderSettings::default());
        let p = rendered.provenance();
        assert_eq!(p.sample, SampleId::new("siren.wav"));
        assert_eq!((p.rank, p.start_frame, p.end_frame), (2, 500, 1_500));
        assert_eq!(p.total_frames, 60 * SR as usize);
        assert_eq!(p.bits_per_sample, 32);
    }
}
