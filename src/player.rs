use std::ops::Range;
use std::time::Duration;

use anyhow::{Context, Result};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};

use crate::audio::WaveformBuffer;
use crate::render::LoopStream;

/// Plays a copied frame range of a buffer, `repeats` times or forever.
#[derive(Clone, Debug)]
pub struct SegmentSource {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    cursor: usize,
    played: u32,
    repeats: Option<u32>, // None loops forever
}

impl SegmentSource {
    pub fn new(buffer: &WaveformBuffer, frames: Range<usize>, repeats: Option<u32>) -> Self {
        Self {
            samples: buffer.frames(frames).to_vec(),
            channels: buffer.channels(),
            sample_rate: buffer.sample_rate(),
            cursor: 0,
            played: 0,
            repeats,
        }
    }
}

impl Iterator for SegmentSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.samples.is_empty() {
            return None;
        }
        if self.cursor == self.samples.len() {
            self.played += 1;
            if self.repeats.is_some_and(|max| self.played >= max) {
                return None;
            }
            self.cursor = 0;
        }
        let sample = self.samples[self.cursor];
        self.cursor += 1;
        Some(sample)
    }
}

impl Source for SegmentSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        let repeats = self.repeats?;
        let frames = self.samples.len() / self.channels.max(1) as usize;
        Some(Duration::from_secs_f64(
            frames as f64 * repeats as f64 / self.sample_rate as f64,
        ))
    }
}

/// Audio preview on the default output device. Starting a new preview stops the previous one.
pub struct Previewer {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
}

impl Previewer {
    pub fn try_default() -> Result<Self> {
        let (stream, handle) = OutputStream::try_default().context("No audio output device")?;
        Ok(Self {
            _stream: stream,
            handle,
            sink: None,
        })
    }

    pub fn play_range(&mut self, buffer: &WaveformBuffer, frames: Range<usize>, repeats: Option<u32>) -> Result<()> {
        log::debug!("previewing frames {}..{} ({:?} repeats)", frames.start, frames.end, repeats);
        self.play(SegmentSource::new(buffer, frames, repeats))
    }

    pub fn play_stream(&mut self, stream: LoopStream) -> Result<()> {
        self.play(stream)
    }

    fn play<S>(&mut self, source: S) -> Result<()>
    where
        S: Source<Item = f32> + Send + 'static,
    {
        self.stop();
        let sink = Sink::try_new(&self.handle).context("Failed to open audio sink")?;
        sink.append(source);
        self.sink = Some(sink);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.sink.as_ref().is_some_and(|s| !s.empty())
    }

    /// Blocks until the current preview has finished.
    pub fn wait(&self) {
        if let Some(sink) = &self.sink {
            sink.sleep_until_end();
        }
    }
}
