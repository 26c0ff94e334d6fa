//! Scenario configuration.
//!
//! One `ScenarioConfig` describes a full harness run: the fixture trees to
//! generate, the fault policy to apply at the proxy, the auxiliary blocker
//! processes to launch, and the expected end state. Configurations are
//! created fresh per scenario from `ScenarioConfig::named` and adjusted with
//! `with`, replacing the zoo of near-duplicate builder functions the suite
//! accumulated over time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

/// Version label used by the stock scenario table.
pub const DEFAULT_VERSION: &str = "0.11.9-preview.1";

/// Suffix appended to the version label to form the manifest file name.
pub const MANIFEST_SUFFIX: &str = ".sha256";

/// How a file moves between the initial and the expected-result tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    /// Present everywhere with identical content.
    Unchanged,
    /// Present everywhere, zero bytes.
    UnchangedEmpty,
    /// Served content differs from the initial content.
    ContentChanged,
    /// Initial content replaced by an empty served file.
    Emptied,
    /// Initially empty, filled by the update.
    FilledFromEmpty,
    /// Absent initially, created by the update.
    Created,
    /// Absent initially, created empty by the update.
    CreatedEmpty,
    /// Present initially, removed by the update.
    Deleted,
    /// Present empty initially, removed by the update.
    DeletedEmpty,
    /// Present initially, absent from the server, and the client must leave
    /// it untouched (e.g. its own uninstaller).
    DeletedExempt,
}

/// Payload size class for a generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Normal,
    /// Multiplies line count and marker length to exercise chunked-transfer
    /// code paths in the client.
    Large,
}

/// One file in the fixture trees.
#[derive(Debug, Clone)]
pub struct FileSpec {
    /// Path relative to the tree root, forward separators.
    pub name: String,
    pub size: SizeClass,
    pub transition: TransitionKind,
}

impl FileSpec {
    pub fn new(name: &str, transition: TransitionKind) -> Self {
        Self {
            name: name.to_string(),
            size: SizeClass::Normal,
            transition,
        }
    }

    pub fn large(name: &str, transition: TransitionKind) -> Self {
        Self {
            name: name.to_string(),
            size: SizeClass::Large,
            transition,
        }
    }
}

/// Expected end state of the initial tree after the client ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    /// The update applies and the tree matches the server content.
    FilesUpdated,
    /// The update fails (or never starts) and the tree is untouched.
    FilesNotChanged,
}

/// On-disk locations for one scenario's fixtures.
#[derive(Debug, Clone)]
pub struct FixtureDirs {
    /// Served content: `server/<version>/...` plus the manifest artifact.
    pub server: PathBuf,
    /// The client's starting state, mutated by the client under test.
    pub initial: PathBuf,
    /// The tree the mutated initial tree must match.
    pub result: PathBuf,
    /// Where the report receiver persists posted crash reports.
    pub crash_reports: PathBuf,
}

impl FixtureDirs {
    /// Standard layout under one scenario root directory.
    pub fn under(root: &Path) -> Self {
        Self {
            server: root.join("server"),
            initial: root.join("initial"),
            result: root.join("result"),
            crash_reports: root.join("crash_reports"),
        }
    }
}

/// Fault policy parameters consumed by the proxy.
#[derive(Debug, Clone)]
pub struct FaultOptions {
    /// Respond 404 with an arbitrary body.
    pub not_found: bool,
    /// Close the connection without any response.
    pub drop: bool,
    /// Respond 200 with a mismatched content type and body.
    pub wrong_header: bool,
    /// Replace the baseline jitter with a ~5s delay, then forward.
    pub delay_moderate: bool,
    /// Replace the baseline jitter with a ~15s delay, then forward.
    pub delay_severe: bool,
    /// Sticky-select one path that stays fault-eligible for the whole run.
    pub block_one_file: bool,
    /// Make the manifest path fault-eligible (once, or persistently when
    /// combined with `block_one_file`).
    pub block_manifest: bool,
    /// Maximum number of faults one proxy instance may inject.
    pub trouble_budget: u32,
    /// A request is randomly eligible when the [0,100) draw exceeds this.
    pub eligibility_threshold: u8,
    /// Serve count after which the next request is sticky-selected.
    pub sticky_after: u64,
}

impl Default for FaultOptions {
    fn default() -> Self {
        Self {
            not_found: false,
            drop: false,
            wrong_header: false,
            delay_moderate: false,
            delay_severe: false,
            block_one_file: false,
            block_manifest: false,
            trouble_budget: 7,
            eligibility_threshold: 90,
            sticky_after: 4,
        }
    }
}

/// Auxiliary blocker process parameters.
#[derive(Debug, Clone)]
pub struct BlockerOptions {
    /// Number of blocker executables copied into the trees.
    pub self_blockers_count: u32,
    /// Launch each blocker so it holds its own file open.
    pub self_locking_file: bool,
    /// Launch each blocker so it keeps running for the hold duration.
    pub self_blocking_file: bool,
    /// Prebuilt blocker executable to copy into the trees.
    pub executable: PathBuf,
    /// How long launched blockers keep their file in use.
    pub hold: Duration,
}

impl Default for BlockerOptions {
    fn default() -> Self {
        Self {
            self_blockers_count: 0,
            self_locking_file: false,
            self_blocking_file: false,
            executable: PathBuf::from("uth-blocker"),
            hold: Duration::from_secs(30),
        }
    }
}

/// Arguments for the client under test.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Path to the update client executable.
    pub updater: PathBuf,
    /// Value passed as `--interactive`.
    pub interactive: bool,
    /// Pass `--force-temp`.
    pub force_temp: bool,
    /// Pass each launched blocker PID as `-p <pid>`.
    pub wait_on_blockers: bool,
    /// Echo the assembled argument list before spawning.
    pub more_log_output: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            updater: PathBuf::from("updater"),
            interactive: false,
            force_temp: true,
            wait_on_blockers: false,
            more_log_output: false,
        }
    }
}

/// Listen ports for the scenario's servers. Port 0 binds ephemerally, which
/// is what the test suite uses to run scenarios concurrently.
#[derive(Debug, Clone, Copy)]
pub struct Ports {
    pub proxy: u16,
    pub origin: u16,
    pub reporter: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            proxy: 8443,
            origin: 8444,
            reporter: 9443,
        }
    }
}

/// Immutable per-run configuration for one scenario.
///
/// The proxy's counters (requests served, trouble budget, sticky blocked
/// path) deliberately live in the proxy instance, not here; a config can be
/// reused to describe a scenario without carrying run state across runs.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub number: u32,
    pub name: String,
    pub dirs: FixtureDirs,
    pub version: String,
    pub files: Vec<FileSpec>,
    pub faults: FaultOptions,
    pub blockers: BlockerOptions,
    pub client: ClientOptions,
    pub ports: Ports,
    pub expected: ExpectedOutcome,
    /// A crash report must be present iff this is set.
    pub expect_crash_report: bool,
    pub server_started: bool,
    pub manifest_generated: bool,
    /// Append one well-formed but bogus manifest entry.
    pub manifest_wrong_file: bool,
    pub skip_client_launch: bool,
    /// Add a fixed set of synthetic large files to all trees.
    pub more_big_files: bool,
    /// Leave fixtures on disk at teardown.
    pub keep_files: bool,
}

impl ScenarioConfig {
    /// A scenario with stock defaults, rooted at `root/<name>`.
    pub fn named(number: u32, name: &str, root: &Path) -> Self {
        Self {
            number,
            name: name.to_string(),
            dirs: FixtureDirs::under(&root.join(name)),
            version: DEFAULT_VERSION.to_string(),
            files: Self::default_files(),
            faults: FaultOptions::default(),
            blockers: BlockerOptions::default(),
            client: ClientOptions::default(),
            ports: Ports::default(),
            expected: ExpectedOutcome::FilesUpdated,
            expect_crash_report: false,
            server_started: true,
            manifest_generated: true,
            manifest_wrong_file: false,
            skip_client_launch: false,
            more_big_files: false,
            keep_files: false,
        }
    }

    /// Apply scenario-specific overrides in place of a dedicated builder.
    pub fn with(mut self, adjust: impl FnOnce(&mut Self)) -> Self {
        adjust(&mut self);
        self
    }

    /// The stock fixture set: a changed file, untouched files, freshly
    /// created files, files the update empties or fills, and files absent
    /// from the server that the client must leave alone.
    pub fn default_files() -> Vec<FileSpec> {
        vec![
            FileSpec::new("test2.txt", TransitionKind::ContentChanged),
            FileSpec::new("file2.jpeg", TransitionKind::Unchanged),
            FileSpec::new("file4.log.txt", TransitionKind::Created),
            FileSpec::large("file5.1", TransitionKind::Created),
            FileSpec::new("file 1.txt", TransitionKind::Created),
            FileSpec::new("dir/file6.ept", TransitionKind::CreatedEmpty),
            FileSpec::new("file7.dat", TransitionKind::Emptied),
            FileSpec::new("file8.bin", TransitionKind::FilledFromEmpty),
            FileSpec::new("filea.exe", TransitionKind::DeletedExempt),
            FileSpec::new("file1.exe", TransitionKind::DeletedExempt),
            FileSpec::new("file2.txt", TransitionKind::DeletedExempt),
            FileSpec::new("dir/file3.zip", TransitionKind::DeletedExempt),
        ]
    }

    /// File name of the manifest artifact, e.g. `0.11.9-preview.1.sha256`.
    pub fn manifest_name(&self) -> String {
        format!("{}{}", self.version, MANIFEST_SUFFIX)
    }

    /// Request path under which the manifest is served.
    pub fn manifest_request_path(&self) -> String {
        format!("/{}", self.manifest_name())
    }

    /// Directory holding the served files for this version.
    pub fn version_dir(&self) -> PathBuf {
        self.dirs.server.join(&self.version)
    }

    /// Base URL handed to the client when the proxy uses the fixed port.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.ports.proxy)
    }
}
