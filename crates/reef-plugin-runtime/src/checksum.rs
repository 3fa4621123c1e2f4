//! Content checksum of a plugin's script files

use crate::error::ChecksumError;
use reef_scripting::sandbox::SCRIPT_EXTENSION;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Per-pass ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumLimits {
    /// Maximum number of script files
    pub max_files: usize,
    /// Maximum total script bytes
    pub max_bytes: u64,
}

impl Default for ChecksumLimits {
    fn default() -> Self {
        Self {
            max_files: 100,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// SHA-256 over the names and contents of the plugin's script files
///
/// Only regular, non-symlink files with the script extension directly under
/// `root` count. Files are hashed in name order, each as its name, a zero
/// byte, its length and its contents, so renames change the digest.
pub fn plugin_checksum(root: &Path, limits: ChecksumLimits) -> Result<String, ChecksumError> {
    let mut files = Vec::new();
    let mut total: u64 = 0;

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        // file_type() does not follow symlinks
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
            continue;
        }

        if files.len() == limits.max_files {
            return Err(ChecksumError::TooManyFiles {
                limit: limits.max_files,
            });
        }
        total += entry.metadata()?.len();
        if total > limits.max_bytes {
            return Err(ChecksumError::TooLarge {
                limit: limits.max_bytes,
            });
        }
        files.push((entry.file_name(), path));
    }

    files.sort();
    digest_files(&files, limits.max_bytes)
}

/// [`plugin_checksum`] on the blocking thread pool
pub async fn plugin_checksum_blocking(
    root: PathBuf,
    limits: ChecksumLimits,
) -> Result<String, ChecksumError> {
    tokio::task::spawn_blocking(move || plugin_checksum(&root, limits))
        .await
        .map_err(|e| ChecksumError::Io(std::io::Error::other(e)))?
}

// Files may grow after they were listed, so the ceiling is enforced on the
// bytes actually read as well.
fn digest_files(files: &[(OsString, PathBuf)], max_bytes: u64) -> Result<String, ChecksumError> {
    let mut hasher = Sha256::new();
    let mut read_total: u64 = 0;

    for (name, path) in files {
        let mut contents = Vec::new();
        let remaining = max_bytes.saturating_sub(read_total);
        File::open(path)?
            .take(remaining.saturating_add(1))
            .read_to_end(&mut contents)?;

        read_total += contents.len() as u64;
        if read_total > max_bytes {
            return Err(ChecksumError::TooLarge { limit: max_bytes });
        }

        hasher.update(name.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update((contents.len() as u64).to_le_bytes());
        hasher.update(&contents);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
