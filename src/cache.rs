//! Stage caching - content-hash keys and completion records.
//!
//! A stage that finishes successfully writes a JSON record keyed by its
//! cache key. A later run whose key matches (and whose artifacts still
//! exist) skips the stage and replays the recorded artifacts. Records
//! are written to a temp file and renamed into place so a concurrent
//! reader never observes a partial write.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::Artifact;

/// Compute SHA-256 over multiple files concatenated.
/// Returns None if any file doesn't exist or can't be read.
pub fn hash_files(paths: &[&Path]) -> Option<String> {
    let mut hasher = Sha256::new();
    for path in paths {
        match fs::read(path) {
            Ok(content) => hasher.update(&content),
            Err(_) => return None,
        }
    }
    Some(format!("{:x}", hasher.finalize()))
}

/// Compute SHA-256 over a list of strings (versions, URLs).
pub fn hash_strings(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Streaming SHA-256 of one file, with its size.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    use std::io::Read;
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Completion record for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub cache_key: String,
    pub artifacts: Vec<Artifact>,
}

fn record_path(cache_dir: &Path, stage: &str) -> PathBuf {
    cache_dir.join("stages").join(format!("{stage}.json"))
}

/// Load a stage record, if one exists and parses.
pub fn load_record(cache_dir: &Path, stage: &str) -> Option<StageRecord> {
    let path = record_path(cache_dir, stage);
    let bytes = fs::read(&path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            eprintln!(
                "  [WARN] Ignoring unreadable stage record {}: {}",
                path.display(),
                e
            );
            None
        }
    }
}

/// Persist a stage record atomically (temp file + rename).
pub fn store_record(cache_dir: &Path, record: &StageRecord) -> Result<()> {
    let path = record_path(cache_dir, &record.stage);
    let parent = path.parent().context("stage record path has no parent")?;
    fs::create_dir_all(parent)?;

    let tmp = path.with_extension(format!("json.tmp.{}", std::process::id()));
    let bytes = serde_json::to_vec_pretty(record)?;
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to move stage record into {}", path.display()))?;
    Ok(())
}

/// Drop a stage record (used by `clean cache`).
pub fn remove_record(cache_dir: &Path, stage: &str) {
    let _ = fs::remove_file(record_path(cache_dir, stage));
}
