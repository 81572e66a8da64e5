use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use siren_looper::analysis::{self, LoopSignal};
use siren_looper::audio;
use siren_looper::scoring::StrategyScorer;
use siren_looper::DetectorSettings;

/// Prints what the loop detector sees in a file, for tuning the detector settings.
#[derive(Parser)]
struct Args {
    input: PathBuf,
    #[arg(long, default_value_t = 0.1)]
    min_loop: f32,
    #[arg(long)]
    max_loop: Option<f32>,
    #[arg(long, default_value_t = 256)]
    window: usize,
    #[arg(long, default_value_t = 10)]
    candidates: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    let args = Args::parse();

    let buffer = audio::load_audio_file(&args.input)?;
    let sr = buffer.sample_rate();
    println!(
        "Loaded {}: {} Hz, {} ch, {}-bit, {} frames ({:.3} s)",
        args.input.display(),
        sr,
        buffer.channels(),
        buffer.bits_per_sample(),
        buffer.frame_count(),
        buffer.duration_secs()
    );

    let settings = DetectorSettings {
        min_loop_secs: args.min_loop,
        max_loop_secs: args.max_loop,
        window_frames: args.window,
        max_candidates: args.candidates,
        ..Default::default()
    };

    let signal = LoopSignal::prepare(&buffer, &settings)?;
    let bounds = signal.bounds();
    println!(
        "Bounds: loop length {}..={} frames, window {} frames",
        bounds.min_len, bounds.max_len, bounds.window
    );

    let anchors = signal.anchors(settings.max_anchors);
    let preview: Vec<String> = anchors.iter().take(12).map(|a| a.to_string()).collect();
    println!("Anchors: {} (first: {})", anchors.len(), preview.join(", "));

    let candidates = analysis::detect_loops(&buffer, &settings)?;
    println!("Confidence: {:?}", candidates.confidence());

    let scorer = StrategyScorer::new(settings.scoring, settings.window_frames.max(1), settings.boundary_emphasis);
    println!(
        "{:>3} {:>9} {:>9} {:>9} {:>10} {:>10} {:>10}",
        "#", "start", "end", "len (s)", "boundary", "window", "total"
    );
    for (rank, c) in candidates.iter().enumerate() {
        let parts = signal.score_pair(&scorer, c.start_frame, c.end_frame);
        println!(
            "{:>3} {:>9} {:>9} {:>9.4} {:>10.5} {:>10.5} {:>10.5}",
            rank + 1,
            c.start_frame,
            c.end_frame,
            c.duration_secs(sr),
            parts.boundary,
            parts.window,
            parts.total()
        );
    }

    Ok(())
}
