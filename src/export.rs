use std::io::{Cursor, Seek, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::render::{Provenance, RenderedLoop};

/// File name for a rendered loop: `<stem>_loop<rank>_<secs>s.wav`, rank counted from one.
pub fn output_file_name(provenance: &Provenance) -> String {
    format!(
        "{}_loop{}_{}s.wav",
        provenance.sample.stem(),
        provenance.rank + 1,
        provenance.duration_secs as u64
    )
}

// Room left in the 32-bit RIFF sizes for the header chunks.
const HEADER_ALLOWANCE: u64 = 1024;

fn output_format(source_bits: u16) -> (u16, hound::SampleFormat) {
    match source_bits {
        16 => (16, hound::SampleFormat::Int),
        24 => (24, hound::SampleFormat::Int),
        _ => (32, hound::SampleFormat::Float),
    }
}

/// Most frames a WAV file can hold for a source with this layout.
pub fn max_wav_frames(channels: u16, source_bits: u16) -> usize {
    let (bits, _) = output_format(source_bits);
    let frame_bytes = channels.max(1) as u64 * (bits as u64 / 8);
    ((u32::MAX as u64 - HEADER_ALLOWANCE) / frame_bytes) as usize
}

fn wav_spec(provenance: &Provenance) -> hound::WavSpec {
    let (bits_per_sample, sample_format) = output_format(provenance.bits_per_sample);
    hound::WavSpec {
        channels: provenance.channels,
        sample_rate: provenance.sample_rate,
        bits_per_sample,
        sample_format,
    }
}

fn write_stream<W: Write + Seek>(mut writer: hound::WavWriter<W>, rendered: RenderedLoop) -> Result<()> {
    let spec = writer.spec();
    let (_, stream) = rendered.into_parts();

    // Samples are pulled straight from the stream so long loops never sit in memory.
    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            for sample in stream {
                writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)?;
            }
        }
        (hound::SampleFormat::Int, _) => {
            let max = ((1i32 << (spec.bits_per_sample - 1)) - 1) as f32;
            for sample in stream {
                writer.write_sample((sample.clamp(-1.0, 1.0) * max).round() as i32)?;
            }
        }
        (hound::SampleFormat::Float, _) => {
            for sample in stream {
                writer.write_sample(sample)?;
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Writes the loop to `path` as a WAV file matching the source bit depth.
pub fn write_wav<P: AsRef<Path>>(path: P, rendered: RenderedLoop) -> Result<()> {
    let path = path.as_ref();
    let spec = wav_spec(rendered.provenance());
    let writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_stream(writer, rendered).with_context(|| format!("Failed to write {}", path.display()))
}

/// Encodes the loop into an in-memory WAV file.
pub fn encode_wav(rendered: RenderedLoop) -> Result<Vec<u8>> {
    let spec = wav_spec(rendered.provenance());
    let mut buffer = Cursor::new(Vec::new());
    let writer = hound::WavWriter::new(&mut buffer, spec)?;
    write_stream(writer, rendered)?;
    Ok(buffer.into_inner())
}
