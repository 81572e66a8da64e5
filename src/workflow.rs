//! The candidate selection workflow as a plain state machine.
//!
//! Each [`WorkflowState`] variant owns exactly the payload it needs; a [`Command`] moves the
//! workflow along and may hand work back to the caller as an [`Effect`]. Illegal
//! combinations are refused with [`LoopError::TransitionNotPermitted`] and leave the state
//! as it was.

use std::mem;

use crate::analysis;
use crate::audio::WaveformBuffer;
use crate::render::{self, Provenance, RenderedLoop};
use crate::{CandidateSet, Confidence, DetectorSettings, LoopError, LoopSettings, RenderRequest, SampleId};

/// A loaded sample together with the candidates detected in it.
#[derive(Debug)]
pub struct Analyzed {
    pub sample: SampleId,
    pub buffer: WaveformBuffer,
    pub candidates: CandidateSet,
}

#[derive(Debug)]
pub enum WorkflowState {
    InputSelect {
        available: Vec<SampleId>,
    },
    Detecting {
        sample: SampleId,
        run: u64,
    },
    CandidateReview {
        analyzed: Analyzed,
    },
    DurationEntry {
        analyzed: Analyzed,
        rank: usize,
    },
    Rendering {
        analyzed: Analyzed,
        request: RenderRequest,
    },
    OutputReady {
        provenance: Provenance,
    },
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InputSelect { .. } => "selecting input",
            Self::Detecting { .. } => "detecting",
            Self::CandidateReview { .. } => "reviewing candidates",
            Self::DurationEntry { .. } => "entering duration",
            Self::Rendering { .. } => "rendering",
            Self::OutputReady { .. } => "output ready",
        }
    }

    /// The loaded sample and its candidates, in the states that hold them.
    pub fn analyzed(&self) -> Option<&Analyzed> {
        match self {
            Self::CandidateReview { analyzed }
            | Self::DurationEntry { analyzed, .. }
            | Self::Rendering { analyzed, .. } => Some(analyzed),
            _ => None,
        }
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::InputSelect {
            available: Vec::new(),
        }
    }
}

/// Detection work detached from the workflow so it can run on any thread.
/// The buffer travels with the job and comes back in the outcome.
#[derive(Debug)]
pub struct DetectionJob {
    run: u64,
    sample: SampleId,
    buffer: WaveformBuffer,
    settings: DetectorSettings,
}

impl DetectionJob {
    pub fn run_id(&self) -> u64 {
        self.run
    }

    pub fn run(self) -> DetectionOutcome {
        log::info!("detecting loop points in {} (run {})", self.sample, self.run);
        let result = analysis::detect_loops(&self.buffer, &self.settings);
        DetectionOutcome {
            run: self.run,
            sample: self.sample,
            buffer: self.buffer,
            result,
        }
    }
}

#[derive(Debug)]
pub struct DetectionOutcome {
    run: u64,
    sample: SampleId,
    buffer: WaveformBuffer,
    result: Result<CandidateSet, LoopError>,
}

impl DetectionOutcome {
    pub fn run_id(&self) -> u64 {
        self.run
    }
}

#[derive(Debug)]
pub enum Command {
    Refresh(Vec<SampleId>),
    Select { sample: SampleId, buffer: WaveformBuffer },
    DetectionFinished(DetectionOutcome),
    Choose(Option<usize>),
    Back,
    EnterDuration(f64),
    Render,
    Reset,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Refresh(_) => "refresh",
            Self::Select { .. } => "select",
            Self::DetectionFinished(_) => "detection result",
            Self::Choose(_) => "choose",
            Self::Back => "back",
            Self::EnterDuration(_) => "enter duration",
            Self::Render => "render",
            Self::Reset => "reset",
        }
    }
}

/// Work a transition hands back to the caller.
#[derive(Debug)]
pub enum Effect {
    None,
    Detect(DetectionJob),
    Output(RenderedLoop),
}

/// One selection session: the current state, the latest notice and the settings used
/// for detection and rendering.
#[derive(Debug, Default)]
pub struct Workflow {
    state: WorkflowState,
    notice: Option<LoopError>,
    runs: u64,
    settings: LoopSettings,
}

impl Workflow {
    pub fn new(settings: LoopSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Latest error or warning, kept until the next successful transition.
    pub fn notice(&self) -> Option<&LoopError> {
        self.notice.as_ref()
    }

    /// Attaches an error raised outside the state machine, such as a failed decode.
    pub fn report(&mut self, err: LoopError) {
        log::warn!("{err}");
        self.notice = Some(err);
    }

    pub fn apply(&mut self, command: Command) -> Result<Effect, LoopError> {
        let state = mem::take(&mut self.state);
        let (next, outcome) = self.transition(state, command);
        self.state = next;
        match &outcome {
            Ok(_) => {}
            Err(e) if matches!(e, LoopError::TransitionNotPermitted { .. }) => {
                log::debug!("{e}");
            }
            Err(e) => log::warn!("{e}"),
        }
        outcome
    }

    fn transition(&mut self, state: WorkflowState, command: Command) -> (WorkflowState, Result<Effect, LoopError>) {
        use WorkflowState::*;

        match (state, command) {
            (_, Command::Reset) => {
                self.notice = None;
                (WorkflowState::default(), Ok(Effect::None))
            }

            (InputSelect { .. }, Command::Refresh(available)) => (InputSelect { available }, Ok(Effect::None)),

            (InputSelect { available }, Command::Select { sample, buffer }) => {
                if !available.contains(&sample) {
                    let err = LoopError::UnknownSample(sample.to_string());
                    self.notice = Some(err.clone());
                    return (InputSelect { available }, Err(err));
                }
                self.runs += 1;
                self.notice = None;
                let job = DetectionJob {
                    run: self.runs,
                    sample: sample.clone(),
                    buffer,
                    settings: self.settings.detector.clone(),
                };
                (Detecting { sample, run: self.runs }, Ok(Effect::Detect(job)))
            }

            (Detecting { sample, run }, Command::DetectionFinished(outcome)) => {
                if outcome.run != run {
                    log::debug!("dropping result of cancelled run {}", outcome.run);
                    return (Detecting { sample, run }, Ok(Effect::None));
                }
                match outcome.result {
                    Ok(candidates) => {
                        self.notice = match candidates.confidence() {
                            Confidence::High => None,
                            Confidence::Low => Some(LoopError::NoViableCandidate {
                                best_score: candidates.best().score,
                                threshold: self.settings.detector.confidence_threshold,
                            }),
                        };
                        let analyzed = Analyzed {
                            sample: outcome.sample,
                            buffer: outcome.buffer,
                            candidates,
                        };
                        (CandidateReview { analyzed }, Ok(Effect::None))
                    }
                    Err(err) => {
                        self.notice = Some(err.clone());
                        (WorkflowState::default(), Err(err))
                    }
                }
            }

            // A finished run that was cancelled before it reported back.
            (state, Command::DetectionFinished(outcome)) => {
                log::debug!("dropping result of run {} while {}", outcome.run, state.name());
                (state, Ok(Effect::None))
            }

            (CandidateReview { analyzed }, Command::Choose(rank)) => {
                let rank = rank.unwrap_or(0);
                if rank >= analyzed.candidates.len() {
                    let err = LoopError::CandidateOutOfRange {
                        rank,
                        available: analyzed.candidates.len(),
                    };
                    self.notice = Some(err.clone());
                    return (CandidateReview { analyzed }, Err(err));
                }
                self.notice = None;
                (DurationEntry { analyzed, rank }, Ok(Effect::None))
            }

            (CandidateReview { .. }, Command::Back) => {
                self.notice = None;
                (WorkflowState::default(), Ok(Effect::None))
            }

            (DurationEntry { analyzed, .. }, Command::Back) => {
                self.notice = None;
                (CandidateReview { analyzed }, Ok(Effect::None))
            }

            (DurationEntry { analyzed, rank }, Command::EnterDuration(secs)) => {
                let candidate = match analyzed.candidates.get(rank) {
                    Some(c) => *c,
                    None => {
                        let err = LoopError::CandidateOutOfRange {
                            rank,
                            available: analyzed.candidates.len(),
                        };
                        return (DurationEntry { analyzed, rank }, Err(err));
                    }
                };
                match RenderRequest::new(rank, candidate, secs, &analyzed.buffer) {
                    Ok(request) => {
                        self.notice = None;
                        (Rendering { analyzed, request }, Ok(Effect::None))
                    }
                    Err(err) => {
                        self.notice = Some(err.clone());
                        (DurationEntry { analyzed, rank }, Err(err))
                    }
                }
            }

            (Rendering { analyzed, request }, Command::Render) => {
                let rendered = render::render(&analyzed.buffer, analyzed.sample, &request, &self.settings.render);
                let provenance = rendered.provenance().clone();
                self.notice = None;
                // The buffer is dropped here; the rendered loop owns its own copy of the segment.
                (OutputReady { provenance }, Ok(Effect::Output(rendered)))
            }

            (state, command) => {
                let err = LoopError::TransitionNotPermitted {
                    command: command.name(),
                    state: state.name(),
                };
                (state, Err(err))
            }
        }
    }
}
