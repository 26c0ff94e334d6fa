//! Shared components for the update-client resilience harness.
//!
//! The harness exercises an external, black-box update client by:
//! - generating before/after fixture trees and a signed manifest,
//! - serving the fixture tree through a fault-injection proxy,
//! - launching the client under test against the generated trees,
//! - managing auxiliary processes that simulate locked/in-use files,
//! - verifying the resulting tree and the crash-report side channel.

pub mod config;
pub mod fixtures;
pub mod harness;
pub mod launcher;
pub mod manifest;
pub mod origin;
pub mod process;
pub mod proxy;
pub mod reporter;
pub mod verify;

use std::path::PathBuf;

/// Error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("fixture generation failed for {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest generation failed: {0}")]
    Manifest(String),

    #[error("server failed to start: {0}")]
    ServerStartFailed(String),

    #[error("process failed to start: {0}")]
    ProcessStartFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

pub use config::{
    BlockerOptions, ClientOptions, ExpectedOutcome, FaultOptions, FileSpec, FixtureDirs, Ports,
    ScenarioConfig, SizeClass, TransitionKind,
};
pub use harness::{run_scenario, ScenarioOutcome};
pub use process::{AuxiliaryHandle, BlockerKind, ProcessManager};
pub use proxy::{FaultDice, FaultMode, FaultProxy, RandomDice, ScriptedDice};
pub use reporter::ReportReceiver;
pub use verify::{DiffEntry, DiffState, TreeComparison, Verification};
