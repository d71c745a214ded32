//! Training backends.
//!
//! The backend-agnostic types live in `cxr-training`. This module contains
//! the Burn implementation used by the `cxr` binary.

pub mod burn_trainer;

pub use burn_trainer::{BurnTrainer, BurnTrainerConfig, CheckpointState, ResumeState};
