//! Batch rotation: plan, per-batch file ownership, progress ledger and the control loop.

mod ledger;
mod manifest;
mod orchestrator;
mod plan;

pub use ledger::RotationLedger;
pub use manifest::BatchManifest;
pub use orchestrator::{BatchOrchestrator, BatchOutcome, BatchReport, RotationOptions, RotationReport};
pub use plan::{ArchiveLink, BatchGroup, BatchPlan};
