//! Fixture generation.
//!
//! Builds the three on-disk trees for a scenario — served content, the
//! client's starting state, and the expected end state — from one shared
//! `FileSpec` list. Each tree applies a different content rule per
//! transition kind, so the same list drives all three roles.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::config::{ExpectedOutcome, ScenarioConfig, SizeClass, TransitionKind};
use crate::manifest;
use crate::process::{BlockerKind, ProcessManager};
use crate::{HarnessError, HarnessResult};

/// Lines written per generated file.
const LINE_COUNT: usize = 1000;

/// Multiplier applied to line count and marker length for `SizeClass::Large`.
const LARGE_FACTOR: usize = 8;

/// Number of synthetic large files added by `more_big_files`.
const MORE_BIG_FILES_COUNT: usize = 6;

/// Marker for baseline ("A") content.
const MARKER_ORIGINAL: &str = " original payload";

/// Marker for updated ("B") content.
const MARKER_UPDATED: &str = " updated payload";

/// Which tree a generation pass is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeRole {
    Server,
    Initial,
    Result,
}

/// Per-file outcome of the transition table for one tree role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Absent,
    Empty,
    /// Baseline content.
    VariantA,
    /// Updated content.
    VariantB,
}

/// The transition table: what each tree contains for a given kind.
pub fn plan(kind: TransitionKind, role: TreeRole) -> Presence {
    use Presence::*;
    use TransitionKind::*;
    use TreeRole::*;
    match (kind, role) {
        (Unchanged, _) => VariantA,
        (UnchangedEmpty, _) => Empty,
        (ContentChanged, Initial) => VariantA,
        (ContentChanged, Server | Result) => VariantB,
        (Emptied, Initial) => VariantA,
        (Emptied, Server | Result) => Empty,
        (FilledFromEmpty, Initial) => Empty,
        (FilledFromEmpty, Server | Result) => VariantA,
        (Created, Initial) => Absent,
        (Created, Server | Result) => VariantA,
        (CreatedEmpty, Initial) => Absent,
        (CreatedEmpty, Server | Result) => Empty,
        (Deleted, Initial) => VariantA,
        (Deleted, Server | Result) => Absent,
        (DeletedEmpty, Initial) => Empty,
        (DeletedEmpty, Server | Result) => Absent,
        (DeletedExempt, Server) => Absent,
        (DeletedExempt, Initial | Result) => VariantA,
    }
}

/// Render the payload for one file.
pub fn render_content(name: &str, presence: Presence, size: SizeClass) -> Option<Vec<u8>> {
    let marker = match presence {
        Presence::Absent => return None,
        Presence::Empty => return Some(Vec::new()),
        Presence::VariantA => MARKER_ORIGINAL,
        Presence::VariantB => MARKER_UPDATED,
    };
    let (lines, marker) = match size {
        SizeClass::Normal => (LINE_COUNT, marker.to_string()),
        SizeClass::Large => (LINE_COUNT * LARGE_FACTOR, marker.repeat(LARGE_FACTOR)),
    };
    let line = format!("{name}{marker}\n");
    let mut buf = Vec::with_capacity(line.len() * lines);
    for _ in 0..lines {
        buf.extend_from_slice(line.as_bytes());
    }
    Some(buf)
}

/// Write one file with a scoped handle; the buffer is flushed before the
/// handle closes, and any I/O error aborts the whole tree (fail-fast).
fn write_file(root: &Path, name: &str, content: &[u8]) -> HarnessResult<()> {
    let path = root.join(name);
    let wrap = |source| HarnessError::Fixture {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    let file = File::create(&path).map_err(wrap)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(content).map_err(wrap)?;
    writer.flush().map_err(wrap)?;
    Ok(())
}

fn tree_root(cfg: &ScenarioConfig, role: TreeRole) -> std::path::PathBuf {
    match role {
        TreeRole::Server => cfg.version_dir(),
        TreeRole::Initial => cfg.dirs.initial.clone(),
        TreeRole::Result => cfg.dirs.result.clone(),
    }
}

/// Generate one tree from the scenario's file list.
pub fn generate_tree(cfg: &ScenarioConfig, role: TreeRole) -> HarnessResult<()> {
    let root = tree_root(cfg, role);
    fs::create_dir_all(&root).map_err(|source| HarnessError::Fixture {
        path: root.clone(),
        source,
    })?;

    for spec in &cfg.files {
        if let Some(content) = render_content(&spec.name, plan(spec.transition, role), spec.size) {
            write_file(&root, &spec.name, &content)?;
        }
    }

    if cfg.more_big_files {
        for i in 0..MORE_BIG_FILES_COUNT {
            let name = format!("bigfile{i}.bin");
            let content = render_content(&name, Presence::VariantA, SizeClass::Large)
                .expect("variant content is always present");
            write_file(&root, &name, &content)?;
        }
    }

    debug!(tree = ?role, root = %root.display(), "fixture tree generated");
    Ok(())
}

/// Copy the blocker executable into the initial and expected trees under a
/// deterministic per-index name, and launch the in-use simulators.
fn install_blockers(cfg: &ScenarioConfig, procs: &mut ProcessManager) -> HarnessResult<()> {
    for i in 0..cfg.blockers.self_blockers_count {
        let name = format!("blocker{i}.exe");
        for root in [&cfg.dirs.initial, &cfg.dirs.result] {
            let dest = root.join(&name);
            fs::copy(&cfg.blockers.executable, &dest).map_err(|source| HarnessError::Fixture {
                path: dest.clone(),
                source,
            })?;
        }

        let copy = cfg.dirs.initial.join(&name);
        let hold_secs = cfg.blockers.hold.as_secs().to_string();
        if cfg.blockers.self_locking_file {
            // Holds an open handle on its own image for the hold duration.
            let args = vec![
                "--hold".to_string(),
                copy.display().to_string(),
                "--duration".to_string(),
                format!("{hold_secs}s"),
            ];
            procs.spawn(&copy, &args, BlockerKind::LockHolding, &cfg.name)?;
        } else if cfg.blockers.self_blocking_file {
            // Merely running keeps the image busy until it exits on its own.
            let args = vec!["--duration".to_string(), format!("{hold_secs}s")];
            procs.spawn(&copy, &args, BlockerKind::SelfExiting, &cfg.name)?;
        }
    }
    Ok(())
}

/// Remove every fixture tree for this scenario. Also used before generation
/// so regenerating the same scenario never layers onto stale files.
pub fn clean_all(cfg: &ScenarioConfig) -> HarnessResult<()> {
    for dir in [
        &cfg.dirs.server,
        &cfg.dirs.initial,
        &cfg.dirs.result,
        &cfg.dirs.crash_reports,
    ] {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
    }
    debug!(scenario = %cfg.name, "fixture trees cleaned");
    Ok(())
}

/// Build all trees for a scenario: server content, the initial state, the
/// expected result, the manifest artifact, and any blocker processes.
///
/// All files are fully flushed before this returns, so the caller may start
/// the proxy and launch the client without racing generation.
pub fn generate_all(cfg: &ScenarioConfig, procs: &mut ProcessManager) -> HarnessResult<()> {
    clean_all(cfg)?;

    generate_tree(cfg, TreeRole::Server)?;
    generate_tree(cfg, TreeRole::Initial)?;
    // The expected tree mirrors the initial tree when no change is expected.
    match cfg.expected {
        ExpectedOutcome::FilesUpdated => generate_tree(cfg, TreeRole::Result)?,
        ExpectedOutcome::FilesNotChanged => {
            let saved = cfg.dirs.result.clone();
            let mut mirror = cfg.clone();
            mirror.dirs.initial = saved;
            generate_tree(&mirror, TreeRole::Initial)?;
        }
    }

    if cfg.blockers.self_blockers_count > 0 {
        install_blockers(cfg, procs)?;
    }

    if cfg.manifest_generated {
        manifest::write_manifest(cfg)?;
    }

    info!(scenario = %cfg.name, "fixtures generated");
    Ok(())
}
