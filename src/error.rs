use thiserror::Error;

/// Everything the looping core can report. Cheap to clone so the workflow can keep the
/// latest one around as a notice for the front end.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoopError {
    #[error("audio buffer contains no complete frames")]
    EmptyBuffer,

    #[error("recording too short to search for loop points: {frames} frames, need at least {required}")]
    InsufficientBufferLength { frames: usize, required: usize },

    #[error("no seamless loop found (best score {best_score:.3} above {threshold:.3}); results are best effort")]
    NoViableCandidate { best_score: f32, threshold: f32 },

    #[error("invalid target duration {requested_secs}s: must lie between {minimum_secs:.3}s and {maximum_secs:.0}s")]
    InvalidDurationRequest {
        requested_secs: f64,
        minimum_secs: f64,
        maximum_secs: f64,
    },

    #[error("candidate {rank} does not exist ({available} available)")]
    CandidateOutOfRange { rank: usize, available: usize },

    #[error("unknown sample: {0}")]
    UnknownSample(String),

    #[error("{command} is not permitted while {state}")]
    TransitionNotPermitted {
        command: &'static str,
        state: &'static str,
    },

    #[error("could not decode audio: {0}")]
    DecodeFailure(String),

    #[error("could not write output: {0}")]
    OutputFailure(String),

    #[error("could not list samples: {0}")]
    SourceUnavailable(String),
}

impl LoopError {
    /// Warnings accompany usable results; everything else blocked the request.
    pub fn is_warning(&self) -> bool {
        matches!(self, LoopError::NoViableCandidate { .. })
    }
}
