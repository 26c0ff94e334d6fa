//! The scenario table.
//!
//! Each entry is the stock configuration plus targeted overrides; the
//! defaults live in `ScenarioConfig::named`, so a scenario spells out only
//! what makes it different.

use std::path::PathBuf;

use uth_common::{ExpectedOutcome, ScenarioConfig};

/// Harness-wide options applied to every scenario in the table.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Root directory under which each scenario keeps its fixture trees.
    pub root: PathBuf,
    /// Path to the update client under test.
    pub updater: PathBuf,
    /// Path to the prebuilt blocker executable.
    pub blocker: PathBuf,
    /// Leave fixtures on disk after each scenario.
    pub keep_files: bool,
}

/// Build the full suite.
pub fn scenario_table(opts: &HarnessOptions) -> Vec<ScenarioConfig> {
    let base = |number: u32, name: &str| {
        ScenarioConfig::named(number, name, &opts.root).with(|c| {
            c.client.updater = opts.updater.clone();
            c.blockers.executable = opts.blocker.clone();
            c.keep_files = opts.keep_files;
        })
    };

    vec![
        // A reachable server, a correct manifest, and nothing in the way.
        base(1, "good_update"),
        // Same, with extra large files to stress concurrent transfers.
        base(2, "big_files").with(|c| c.more_big_files = true),
        // The client must retry through scattered 404 responses.
        base(3, "recover_404").with(|c| {
            c.more_big_files = true;
            c.faults.not_found = true;
        }),
        // The client must retry through dropped connections.
        base(4, "recover_drop").with(|c| {
            c.more_big_files = true;
            c.faults.drop = true;
        }),
        // The client must reject mismatched response headers and retry.
        base(5, "recover_wrong_header").with(|c| {
            c.more_big_files = true;
            c.faults.wrong_header = true;
        }),
        // A slow server must not trip the client's own timeouts.
        base(6, "slow_5sec").with(|c| {
            c.faults.delay_moderate = true;
            c.client.interactive = true;
        }),
        base(7, "slow_15sec").with(|c| c.faults.delay_severe = true),
        // No server at all: the tree must come through untouched.
        base(8, "no_server").with(|c| {
            c.server_started = false;
            c.expected = ExpectedOutcome::FilesNotChanged;
        }),
        // A server without a manifest is not an update source.
        base(9, "no_manifest").with(|c| {
            c.manifest_generated = false;
            c.expected = ExpectedOutcome::FilesNotChanged;
        }),
        // A bogus manifest line must not cause any file to change.
        base(10, "manifest_wrong_file").with(|c| {
            c.manifest_wrong_file = true;
            c.expected = ExpectedOutcome::FilesNotChanged;
        }),
        // One path permanently 404s: the client must roll back cleanly.
        base(11, "blocked_file_404").with(|c| {
            c.faults.not_found = true;
            c.faults.block_one_file = true;
            c.expected = ExpectedOutcome::FilesNotChanged;
        }),
        // Blocker processes keep their files busy while the client runs.
        base(12, "self_blocking_files").with(|c| {
            c.blockers.self_blockers_count = 2;
            c.blockers.self_blocking_file = true;
            c.client.wait_on_blockers = true;
            c.expected = ExpectedOutcome::FilesNotChanged;
        }),
        base(13, "self_locking_files").with(|c| {
            c.blockers.self_blockers_count = 2;
            c.blockers.self_locking_file = true;
            c.expected = ExpectedOutcome::FilesNotChanged;
        }),
    ]
}
