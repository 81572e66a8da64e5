use std::collections::BTreeMap;

use crate::audio::WaveformBuffer;
use crate::render::RenderedLoop;
use crate::workflow::{Command, DetectionJob, DetectionOutcome, Effect, Workflow, WorkflowState};
use crate::{CandidateSet, LoopError, LoopSettings, SampleId};

/// Supplies the samples a session can pick from.
pub trait SampleSource {
    fn list(&self) -> Result<Vec<SampleId>, LoopError>;
    fn load(&self, sample: &SampleId) -> Result<WaveformBuffer, LoopError>;
}

/// Pre-decoded buffers held in memory, e.g. generated test material.
#[derive(Default)]
pub struct MemorySource {
    buffers: BTreeMap<SampleId, WaveformBuffer>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sample: SampleId, buffer: WaveformBuffer) -> Self {
        self.buffers.insert(sample, buffer);
        self
    }
}

impl SampleSource for MemorySource {
    fn list(&self) -> Result<Vec<SampleId>, LoopError> {
        Ok(self.buffers.keys().cloned().collect())
    }

    fn load(&self, sample: &SampleId) -> Result<WaveformBuffer, LoopError> {
        self.buffers
            .get(sample)
            .cloned()
            .ok_or_else(|| LoopError::UnknownSample(sample.to_string()))
    }
}

/// A workflow bound to the source it reads samples from. Whenever the workflow lands back
/// in input selection the list of available samples is refreshed.
pub struct Session<S: SampleSource> {
    source: S,
    workflow: Workflow,
}

impl<S: SampleSource> Session<S> {
    pub fn open(source: S, settings: LoopSettings) -> Self {
        let mut session = Self {
            source,
            workflow: Workflow::new(settings),
        };
        if let Err(e) = session.refresh() {
            session.workflow.report(e);
        }
        session
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn state(&self) -> &WorkflowState {
        self.workflow.state()
    }

    pub fn notice(&self) -> Option<&LoopError> {
        self.workflow.notice()
    }

    pub fn available(&self) -> &[SampleId] {
        match self.workflow.state() {
            WorkflowState::InputSelect { available } => available,
            _ => &[],
        }
    }

    pub fn candidates(&self) -> Option<&CandidateSet> {
        self.workflow.state().analyzed().map(|a| &a.candidates)
    }

    pub fn buffer(&self) -> Option<&WaveformBuffer> {
        self.workflow.state().analyzed().map(|a| &a.buffer)
    }

    pub fn refresh(&mut self) -> Result<(), LoopError> {
        let available = self.source.list()?;
        self.workflow.apply(Command::Refresh(available)).map(|_| ())
    }

    /// Loads `sample` and hands back the detection job; run it inline or on a worker and
    /// feed the outcome to [`Session::finish_detection`].
    pub fn begin_detection(&mut self, sample: &SampleId) -> Result<DetectionJob, LoopError> {
        if !matches!(self.workflow.state(), WorkflowState::InputSelect { .. }) {
            return Err(LoopError::TransitionNotPermitted {
                command: "select",
                state: self.workflow.state().name(),
            });
        }
        let buffer = match self.source.load(sample) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.workflow.report(e.clone());
                return Err(e);
            }
        };
        match self.workflow.apply(Command::Select {
            sample: sample.clone(),
            buffer,
        })? {
            Effect::Detect(job) => Ok(job),
            _ => Err(LoopError::TransitionNotPermitted {
                command: "select",
                state: self.workflow.state().name(),
            }),
        }
    }

    pub fn finish_detection(&mut self, outcome: DetectionOutcome) -> Result<(), LoopError> {
        let result = self.workflow.apply(Command::DetectionFinished(outcome)).map(|_| ());
        self.refresh_if_idle();
        result
    }

    /// Selects and detects in one go on the calling thread.
    pub fn detect(&mut self, sample: &SampleId) -> Result<&CandidateSet, LoopError> {
        let job = self.begin_detection(sample)?;
        self.finish_detection(job.run())?;
        self.candidates().ok_or(LoopError::TransitionNotPermitted {
            command: "detect",
            state: self.workflow.state().name(),
        })
    }

    pub fn choose(&mut self, rank: Option<usize>) -> Result<(), LoopError> {
        self.workflow.apply(Command::Choose(rank)).map(|_| ())
    }

    pub fn back(&mut self) -> Result<(), LoopError> {
        let result = self.workflow.apply(Command::Back).map(|_| ());
        self.refresh_if_idle();
        result
    }

    /// Validates the duration and renders; the loop is handed straight to the caller.
    pub fn submit_duration(&mut self, secs: f64) -> Result<RenderedLoop, LoopError> {
        self.workflow.apply(Command::EnterDuration(secs))?;
        match self.workflow.apply(Command::Render)? {
            Effect::Output(rendered) => Ok(rendered),
            _ => Err(LoopError::TransitionNotPermitted {
                command: "render",
                state: self.workflow.state().name(),
            }),
        }
    }

    pub fn reset(&mut self) -> Result<(), LoopError> {
        self.workflow.apply(Command::Reset)?;
        self.refresh()
    }

    /// Relists the available samples when the workflow sits in input selection; a no-op
    /// everywhere else.
    pub fn refresh_if_idle(&mut self) {
        if matches!(self.workflow.state(), WorkflowState::InputSelect { .. }) {
            if let Err(e) = self.refresh() {
                self.workflow.report(e);
            }
        }
    }
}
