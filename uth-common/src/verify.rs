//! Result verification.
//!
//! After the client under test exits, the initial tree (now mutated by the
//! client) is compared recursively against the expected-result tree using
//! size and byte-content equality, and the crash-report side channel is
//! checked against the scenario's expectation. Every differing path is
//! logged with its classification so a failing scenario is diagnosable
//! from the log alone.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::ScenarioConfig;
use crate::reporter::CRASH_REPORT_FILE;
use crate::HarnessResult;

/// Classification of one differing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffState {
    /// Present only in the left (actual) tree.
    OnlyLeft,
    /// Present only in the right (expected) tree.
    OnlyRight,
    /// Present in both with differing size or content.
    Distinct,
}

impl DiffState {
    fn glyph(self) -> &'static str {
        match self {
            Self::OnlyLeft => "->",
            Self::OnlyRight => "<-",
            Self::Distinct => "<>",
        }
    }
}

/// One differing path, relative to the tree roots.
#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub path: PathBuf,
    pub state: DiffState,
}

/// Outcome of one recursive tree comparison.
#[derive(Debug, Clone, Default)]
pub struct TreeComparison {
    /// Paths present in both trees with equal content.
    pub equal: usize,
    pub entries: Vec<DiffEntry>,
}

impl TreeComparison {
    /// True when the trees match exactly.
    pub fn clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, state: DiffState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }
}

/// Collect every regular file under `root`, as root-relative paths.
fn collect_relative(root: &Path) -> HarnessResult<BTreeSet<PathBuf>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeSet<PathBuf>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            } else {
                out.insert(path.strip_prefix(root).expect("walk stays under root").to_path_buf());
            }
        }
        Ok(())
    }

    let mut out = BTreeSet::new();
    if root.exists() {
        walk(root, root, &mut out)?;
    }
    Ok(out)
}

/// Compare two trees recursively: presence, size, then byte content.
pub fn compare_trees(left: &Path, right: &Path) -> HarnessResult<TreeComparison> {
    let left_files = collect_relative(left)?;
    let right_files = collect_relative(right)?;

    let mut comparison = TreeComparison::default();

    for path in left_files.union(&right_files) {
        match (left_files.contains(path), right_files.contains(path)) {
            (true, false) => comparison.entries.push(DiffEntry {
                path: path.clone(),
                state: DiffState::OnlyLeft,
            }),
            (false, true) => comparison.entries.push(DiffEntry {
                path: path.clone(),
                state: DiffState::OnlyRight,
            }),
            (true, true) => {
                let left_path = left.join(path);
                let right_path = right.join(path);
                let same_size =
                    fs::metadata(&left_path)?.len() == fs::metadata(&right_path)?.len();
                if same_size && fs::read(&left_path)? == fs::read(&right_path)? {
                    comparison.equal += 1;
                } else {
                    comparison.entries.push(DiffEntry {
                        path: path.clone(),
                        state: DiffState::Distinct,
                    });
                }
            }
            (false, false) => unreachable!("path came from one of the sets"),
        }
    }

    Ok(comparison)
}

/// True when the crash-report file's presence matches the expectation.
pub fn check_crash_report(dir: &Path, expected: bool) -> bool {
    dir.join(CRASH_REPORT_FILE).is_file() == expected
}

/// Combined verification result for one scenario.
#[derive(Debug, Clone)]
pub struct Verification {
    pub tree: TreeComparison,
    pub crash_report_ok: bool,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.tree.clean() && self.crash_report_ok
    }
}

/// Verify the mutated initial tree and the crash-report channel.
pub fn verify_scenario(cfg: &ScenarioConfig) -> HarnessResult<Verification> {
    let tree = compare_trees(&cfg.dirs.initial, &cfg.dirs.result)?;

    info!(
        scenario = %cfg.name,
        equal = tree.equal,
        only_left = tree.count(DiffState::OnlyLeft),
        only_right = tree.count(DiffState::OnlyRight),
        distinct = tree.count(DiffState::Distinct),
        "tree comparison finished"
    );
    for entry in &tree.entries {
        warn!(
            scenario = %cfg.name,
            "tree diff: {} {}",
            entry.state.glyph(),
            entry.path.display()
        );
    }

    let crash_report_ok = check_crash_report(&cfg.dirs.crash_reports, cfg.expect_crash_report);
    if !crash_report_ok {
        warn!(
            scenario = %cfg.name,
            expected = cfg.expect_crash_report,
            "crash-report presence does not match expectation"
        );
    }

    Ok(Verification {
        tree,
        crash_report_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_equal_trees_are_clean() {
        let tmp = TempDir::new().unwrap();
        let (left, right) = (tmp.path().join("l"), tmp.path().join("r"));
        for root in [&left, &right] {
            write(root, "a.txt", b"same");
            write(root, "sub/b.txt", b"nested");
        }

        let cmp = compare_trees(&left, &right).unwrap();
        assert!(cmp.clean());
        assert_eq!(cmp.equal, 2);
    }

    #[test]
    fn test_classifies_one_sided_paths() {
        let tmp = TempDir::new().unwrap();
        let (left, right) = (tmp.path().join("l"), tmp.path().join("r"));
        write(&left, "only_left.txt", b"l");
        write(&right, "only_right.txt", b"r");

        let cmp = compare_trees(&left, &right).unwrap();
        assert_eq!(cmp.count(DiffState::OnlyLeft), 1);
        assert_eq!(cmp.count(DiffState::OnlyRight), 1);
        assert_eq!(cmp.count(DiffState::Distinct), 0);
        assert!(!cmp.clean());
    }

    #[test]
    fn test_same_size_different_bytes_is_distinct() {
        let tmp = TempDir::new().unwrap();
        let (left, right) = (tmp.path().join("l"), tmp.path().join("r"));
        write(&left, "f.bin", b"aaaa");
        write(&right, "f.bin", b"aaab");

        let cmp = compare_trees(&left, &right).unwrap();
        assert_eq!(cmp.count(DiffState::Distinct), 1);
    }

    #[test]
    fn test_size_mismatch_is_distinct() {
        let tmp = TempDir::new().unwrap();
        let (left, right) = (tmp.path().join("l"), tmp.path().join("r"));
        write(&left, "f.bin", b"short");
        write(&right, "f.bin", b"much longer content");

        let cmp = compare_trees(&left, &right).unwrap();
        assert_eq!(cmp.count(DiffState::Distinct), 1);
    }

    #[test]
    fn test_missing_roots_compare_empty() {
        let tmp = TempDir::new().unwrap();
        let cmp =
            compare_trees(&tmp.path().join("absent_l"), &tmp.path().join("absent_r")).unwrap();
        assert!(cmp.clean());
        assert_eq!(cmp.equal, 0);
    }

    #[test]
    fn test_crash_report_expectation() {
        let tmp = TempDir::new().unwrap();
        assert!(check_crash_report(tmp.path(), false));
        assert!(!check_crash_report(tmp.path(), true));

        fs::write(tmp.path().join(CRASH_REPORT_FILE), b"{}").unwrap();
        assert!(check_crash_report(tmp.path(), true));
        assert!(!check_crash_report(tmp.path(), false));
    }
}
