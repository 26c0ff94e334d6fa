//! Manifest generation for the served tree.
//!
//! The manifest is a plain text artifact named `<version>.sha256` next to
//! the version directory: one `<digest-hex> <relative-path>` line per served
//! file, paths rooted at the version directory with forward separators.
//! Every listed file also gets a gzip sibling (`<name>.gz`) alongside it,
//! simulating a server that offers compressed transfer.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ScenarioConfig;
use crate::{HarnessError, HarnessResult};

/// Digest paired with a nonexistent path when `manifest_wrong_file` is set.
/// Well-formed, so the client's parser accepts the line; bogus, so its
/// validation must reject the entry.
pub const BOGUS_DIGEST: &str = "e980fe14384b38340fad866a92f2cbe4aeef268fac3368274bcb0b8e2cd32702";

/// Path of the deliberately invalid manifest entry.
pub const BOGUS_PATH: &str = "/missing_file5.1";

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub digest_hex: String,
    pub relative_path: String,
}

/// SHA-256 of a file's raw bytes, hex-encoded.
pub fn digest_file(path: &Path) -> HarnessResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Collect regular files under `dir` in filesystem enumeration order.
/// No sort is imposed; clients must not depend on manifest ordering.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Path relative to the version directory, forward separators, leading `/`.
fn manifest_path_for(file: &Path, version_root: &Path) -> Option<String> {
    let rel = file.strip_prefix(version_root).ok()?;
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Some(format!("/{joined}"))
}

fn write_gzip_sibling(path: &Path) -> HarnessResult<()> {
    let sibling = PathBuf::from(format!("{}.gz", path.display()));
    let input = fs::read(path)?;
    let file = File::create(&sibling)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Write the manifest artifact and the gzip siblings for the server tree.
///
/// Listing skips the manifest itself and any `.gz` artifact, so a listed
/// entry always describes an original payload file.
pub fn write_manifest(cfg: &ScenarioConfig) -> HarnessResult<PathBuf> {
    let manifest_path = cfg.dirs.server.join(cfg.manifest_name());
    let version_root = cfg.version_dir();

    let mut files = Vec::new();
    collect_files(&cfg.dirs.server, &mut files)?;
    files.retain(|f| *f != manifest_path && f.extension().is_none_or(|e| e != "gz"));

    let out = File::create(&manifest_path)?;
    let mut writer = BufWriter::new(out);
    for file in &files {
        let digest = digest_file(file)?;
        let rel = manifest_path_for(file, &version_root).ok_or_else(|| {
            HarnessError::Manifest(format!(
                "served file {} is outside the version directory",
                file.display()
            ))
        })?;
        writeln!(writer, "{digest} {rel}")?;
    }
    if cfg.manifest_wrong_file {
        writeln!(writer, "{BOGUS_DIGEST} {BOGUS_PATH}")?;
    }
    writer.flush()?;

    for file in &files {
        write_gzip_sibling(file)?;
    }

    debug!(
        manifest = %manifest_path.display(),
        entries = files.len(),
        "manifest written"
    );
    Ok(manifest_path)
}

/// Parse a manifest artifact back into entries.
pub fn read_manifest(path: &Path) -> HarnessResult<Vec<ManifestEntry>> {
    let text = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in text.lines() {
        let Some((digest, rel)) = line.split_once(' ') else {
            return Err(HarnessError::Manifest(format!("malformed line: {line}")));
        };
        entries.push(ManifestEntry {
            digest_hex: digest.to_string(),
            relative_path: rel.to_string(),
        });
    }
    Ok(entries)
}
