pub mod batch;
pub mod certification;
pub mod cli;
pub mod commands;
pub mod config;
pub mod election;
pub mod error;
pub mod models;
pub mod registry;
pub mod replay;

// Main entry point
pub mod cli_main;

// Re-export commonly used items
pub use certification::{CertificationConfig, CertificationMode, Certifier, Tally};
pub use election::{ElectionReport, ElectionSettings, Ensemble};
pub use error::{CongressError, InvalidValue};
pub use models::{Candidate, ClassId, Cutout, Prediction, Verdict, VerdictStatus, VoteRecord, NO_CONSENSUS};
pub use registry::{Voter, VoterRegistry};
