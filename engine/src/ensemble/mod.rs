//! Consensus voting over specialist answers.
//!
//! ```text
//! SpecialistResult ──► VotingEngine::ballot ──► Ballot ──┐
//!                     (length + repetition)              ├─► BallotBox ──► VotingEngine::fuse ──► FusedAnswer
//! SpecialistResult ──► VotingEngine::ballot ──► Ballot ──┘
//! ```

pub mod fusion;
pub mod quality;
pub mod voting;

pub use fusion::{Contribution, FusedAnswer};
pub use quality::is_repetitive;
pub use voting::{
    Ballot, BallotBox, LengthPenalty, SpecialistResult, VotingEngine, VotingError, VotingResult,
};
