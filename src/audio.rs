use anyhow::{bail, Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use std::fs::File;
use std::io::Cursor;
use std::ops::Range;
use std::path::Path;

use crate::LoopError;

/// Decoded PCM, interleaved. Immutable once constructed.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
}

impl WaveformBuffer {
    pub fn new(
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
    ) -> Result<Self, LoopError> {
        if sample_rate == 0 || channels == 0 {
            return Err(LoopError::DecodeFailure(format!(
                "invalid stream parameters: {sample_rate} Hz, {channels} channels"
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(LoopError::DecodeFailure(format!(
                "{} samples do not divide into {channels}-channel frames",
                samples.len()
            )));
        }
        if samples.len() < channels as usize {
            return Err(LoopError::EmptyBuffer);
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
            bits_per_sample,
        })
    }

    /// Mono 32-bit float buffer; handy for synthesised material.
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, LoopError> {
        Self::new(samples, sample_rate, 1, 32)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Interleaved samples of the frames in `range`, clamped to the buffer.
    pub fn frames(&self, range: Range<usize>) -> &[f32] {
        let channels = self.channels as usize;
        let end = range.end.min(self.frame_count());
        let start = range.start.min(end);
        &self.samples[start * channels..end * channels]
    }

    /// Channel mean per frame. Scoring works on this so it stays channel agnostic.
    pub fn mono(&self) -> Vec<f32> {
        let channels = self.channels as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

pub fn load_audio_from_source(source: Box<dyn MediaSource>, hint: &Hint) -> Result<WaveformBuffer> {
    let mss = MediaSourceStream::new(source, Default::default());

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = symphonia::default::get_probe()
        .format(hint, mss, &fmt_opts, &meta_opts)
        .context("unsupported format")?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("no supported audio track")?;

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &dec_opts)
        .context("unsupported codec")?;

    let track_id = track.id;
    // Lossy codecs report no depth; those are treated as float sources.
    let bits_per_sample = track.codec_params.bits_per_sample.unwrap_or(32) as u16;
    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = 0;
    let mut channels = 0;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break, // end of stream
            Err(Error::ResetRequired) => break,
            Err(e) => return Err(e).context("failed to read packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_rate == 0 {
                    let spec = decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;
                }
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec())
                });
                if buf.capacity() < decoded.capacity() * decoded.spec().channels.count() {
                    *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                }
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(Error::DecodeError(e)) => log::warn!("skipping corrupt packet: {e}"),
            Err(e) => return Err(e).context("decoder failed"),
        }
    }

    if samples.is_empty() {
        bail!("stream decoded to no samples");
    }
    log::info!(
        "decoded {} frames at {} Hz, {} channel(s), {} bit",
        samples.len() / channels.max(1) as usize,
        sample_rate,
        channels,
        bits_per_sample
    );

    Ok(WaveformBuffer::new(samples, sample_rate, channels, bits_per_sample)?)
}

pub fn load_audio_file<P: AsRef<Path>>(path: P) -> Result<WaveformBuffer> {
    let src = File::open(&path)
        .with_context(|| format!("failed to open audio file {}", path.as_ref().display()))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.as_ref().extension() {
        if let Some(ext_str) = ext.to_str() {
            hint.with_extension(ext_str);
        }
    }

    load_audio_from_source(Box::new(src), &hint)
}

pub fn load_audio_from_bytes(data: Vec<u8>, extension_hint: Option<&str>) -> Result<WaveformBuffer> {
    let src = Cursor::new(data);

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    load_audio_from_source(Box::new(src), &hint)
}
