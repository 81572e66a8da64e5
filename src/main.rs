use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use flexi_logger::Duplicate;
use siren_looper::audio::{self, WaveformBuffer};
use siren_looper::library::{self, SoundFolders};
use siren_looper::player::Previewer;
use siren_looper::session::{SampleSource, Session};
use siren_looper::{
    export, gui, logging, Confidence, FadeCurve, LoopError, LoopSettings, SampleId, ScoringStrategy,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScorerArg {
    Waveform,
    Spectral,
    Blended,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FadeArg {
    Linear,
    EqualPower,
}

/// Finds seamless loop points in short sound samples and renders long loops from them.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Audio file to process headless; starts the GUI when omitted
    input: Option<PathBuf>,
    /// Render a loop of this many seconds
    #[arg(short, long)]
    target: Option<f64>,
    /// Candidate to preview or render, 1 being the best
    #[arg(short, long, default_value_t = 1)]
    candidate: usize,
    #[arg(long, default_value_t = 0.1)]
    min_loop: f32,
    #[arg(long)]
    max_loop: Option<f32>,
    /// Number of candidates to keep
    #[arg(long, default_value_t = 5)]
    candidates: usize,
    /// Frames compared on each side of a loop point
    #[arg(long, default_value_t = 256)]
    window: usize,
    #[arg(long, value_enum, default_value_t = ScorerArg::Waveform)]
    scorer: ScorerArg,
    #[arg(long, default_value_t = 15.0)]
    crossfade_ms: f32,
    #[arg(long, value_enum, default_value_t = FadeArg::Linear)]
    fade: FadeArg,
    /// Folder holding sound/input and sound/output
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Write the rendered loop here instead of the output folder
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Play the chosen candidate a few times before rendering
    #[arg(long)]
    preview: bool,
    #[arg(long)]
    gui: bool,
    /// Log file, rotated at 10 MiB [default: <data-dir>/logs/app.log]
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> LoopSettings {
        let mut settings = LoopSettings::default();
        let detector = &mut settings.detector;
        detector.min_loop_secs = self.min_loop;
        detector.max_loop_secs = self.max_loop;
        detector.max_candidates = self.candidates.max(1);
        detector.window_frames = self.window;
        detector.scoring = match self.scorer {
            ScorerArg::Waveform => ScoringStrategy::Waveform,
            ScorerArg::Spectral => ScoringStrategy::Spectral,
            ScorerArg::Blended => ScoringStrategy::Blended { spectral_weight: 0.5 },
        };
        settings.render.crossfade_secs = self.crossfade_ms.max(0.0) / 1000.0;
        settings.render.fade_curve = match self.fade {
            FadeArg::Linear => FadeCurve::Linear,
            FadeArg::EqualPower => FadeCurve::EqualPower,
        };
        settings
    }
}

/// A single file given on the command line.
struct FileSource {
    path: PathBuf,
    id: SampleId,
}

impl SampleSource for FileSource {
    fn list(&self) -> Result<Vec<SampleId>, LoopError> {
        Ok(vec![self.id.clone()])
    }

    fn load(&self, sample: &SampleId) -> Result<WaveformBuffer, LoopError> {
        if sample != &self.id {
            return Err(LoopError::UnknownSample(sample.to_string()));
        }
        audio::load_audio_file(&self.path).map_err(|e| LoopError::DecodeFailure(format!("{e:#}")))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| library::log_dir(&cli.data_dir).join("app.log"));
    let _logger = logging::start(&log_file, Duplicate::Warn)?;
    let settings = cli.settings();

    let input = match (&cli.input, cli.gui) {
        (Some(input), false) => input.clone(),
        _ => {
            let folders = SoundFolders::open(&cli.data_dir)?;
            if let Some(input) = &cli.input {
                folders.import(input)?;
            }
            return gui::run(settings, folders);
        }
    };

    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} is not a file", input.display()))?;
    let id = SampleId::new(name);
    let mut session = Session::open(
        FileSource {
            path: input.clone(),
            id: id.clone(),
        },
        settings,
    );

    println!("Detecting loop points in {}...", input.display());
    let candidates = session.detect(&id)?.clone();
    let buffer = session.buffer().context("Detection finished without a buffer")?.clone();
    let sr = buffer.sample_rate();
    println!(
        "{} Hz, {} channel(s), {:.2} s",
        sr,
        buffer.channels(),
        buffer.duration_secs()
    );

    println!("{:>4} {:>10} {:>10} {:>10} {:>10}", "#", "start (s)", "end (s)", "length (s)", "score");
    for (rank, c) in candidates.iter().enumerate() {
        println!(
            "{:>4} {:>10.3} {:>10.3} {:>10.3} {:>10.5}",
            rank + 1,
            c.start_frame as f64 / sr as f64,
            c.end_frame as f64 / sr as f64,
            c.duration_secs(sr),
            c.score
        );
    }
    if candidates.confidence() == Confidence::Low {
        if let Some(notice) = session.notice() {
            println!("Warning: {notice}");
        }
    }

    let rank = cli.candidate.saturating_sub(1);
    let chosen = *candidates.get(rank).ok_or(LoopError::CandidateOutOfRange {
        rank,
        available: candidates.len(),
    })?;

    if cli.preview {
        println!("Previewing candidate #{}...", rank + 1);
        let mut previewer = Previewer::try_default()?;
        previewer.play_range(&buffer, chosen.start_frame..chosen.end_frame, Some(4))?;
        previewer.wait();
    }

    let Some(target) = cli.target else {
        if cli.output.is_some() {
            bail!("--output needs --target");
        }
        return Ok(());
    };

    session.choose(Some(rank))?;
    let rendered = session.submit_duration(target)?;
    println!("Rendering {:.2} s ({} frames)...", target, rendered.frame_count());
    let path = match &cli.output {
        Some(path) => {
            export::write_wav(path, rendered)?;
            path.clone()
        }
        None => SoundFolders::open(&cli.data_dir)?.save(rendered)?,
    };
    println!("Saved {}", path.display());

    Ok(())
}
