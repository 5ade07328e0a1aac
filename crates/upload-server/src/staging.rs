//! On-disk staging of chunk parts.
//!
//! Layout: `{storage_root}/.chunks/{callerId}/{key}/{originalName}.{index}.part`
//! where `key` is the first 16 hex digits of SHA-256 over the upload id and
//! the normalized destination path. Parts are written to a unique temporary
//! name and renamed into place, so a reader only ever sees a complete part.
//!
//! Once a session is assembled its directory keeps only an empty
//! `.assembled` marker until the stale sweep removes it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Directory under the storage root that holds all staged parts.
pub const STAGING_DIR: &str = ".chunks";

const PART_SUFFIX: &str = ".part";
const TEMP_MARKER: &str = ".tmp-";
const ASSEMBLED_MARKER: &str = ".assembled";

/// Identifies the parts of one upload session of one caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartKey {
    pub caller_id: String,
    pub upload_id: String,
    /// Normalized destination path relative to the caller's root.
    pub destination: String,
    pub original_name: String,
}

impl PartKey {
    pub fn new(
        caller_id: impl Into<String>,
        upload_id: impl Into<String>,
        destination: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            upload_id: upload_id.into(),
            destination: destination.into(),
            original_name: original_name.into(),
        }
    }

    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.upload_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.destination.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(16);
        digest
    }
}

/// Per-caller, per-destination part storage.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            root: storage_root.join(STAGING_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the parts for `key`.
    pub fn part_dir(&self, key: &PartKey) -> PathBuf {
        self.root.join(&key.caller_id).join(key.digest())
    }

    pub fn part_path(&self, key: &PartKey, index: u32) -> PathBuf {
        self.part_dir(key)
            .join(format!("{}.{index}{PART_SUFFIX}", key.original_name))
    }

    /// Writes part `index`, replacing any earlier copy.
    pub fn write_part(&self, key: &PartKey, index: u32, data: &[u8]) -> std::io::Result<PathBuf> {
        let dir = self.part_dir(key);
        fs::create_dir_all(&dir)?;

        let final_path = self.part_path(key, index);
        let temp_path = dir.join(format!(
            "{}.{index}{TEMP_MARKER}{}",
            key.original_name,
            uuid::Uuid::new_v4().simple()
        ));

        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        debug!(
            caller = %key.caller_id,
            destination = %key.destination,
            index,
            bytes = data.len(),
            "part staged"
        );
        Ok(final_path)
    }

    pub fn part_exists(&self, key: &PartKey, index: u32) -> bool {
        self.part_path(key, index).is_file()
    }

    /// Indices in `0..total_chunks` with no staged part.
    pub fn missing_parts(&self, key: &PartKey, total_chunks: u32) -> Vec<u32> {
        (0..total_chunks)
            .filter(|&index| !self.part_exists(key, index))
            .collect()
    }

    /// Records that the session behind `key` produced its final file.
    pub fn mark_assembled(&self, key: &PartKey) -> std::io::Result<()> {
        let dir = self.part_dir(key);
        fs::create_dir_all(&dir)?;
        fs::File::create(dir.join(ASSEMBLED_MARKER))?.sync_all()
    }

    pub fn is_assembled(&self, key: &PartKey) -> bool {
        self.part_dir(key).join(ASSEMBLED_MARKER).is_file()
    }

    /// Deletes parts `0..total_chunks` and the key directory if it is empty.
    pub fn remove_parts(&self, key: &PartKey, total_chunks: u32) -> std::io::Result<()> {
        for index in 0..total_chunks {
            match fs::remove_file(self.part_path(key, index)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        // Fails harmlessly while another upload to the same key is staging.
        let _ = fs::remove_dir(self.part_dir(key));
        Ok(())
    }

    /// Removes part and temporary files not modified within `ttl`, then any
    /// directories left empty. Returns the number of files removed.
    pub fn sweep_stale(&self, ttl: Duration) -> std::io::Result<usize> {
        if !self.root.is_dir() {
            return Ok(0);
        }
        let now = SystemTime::now();
        let removed = sweep_dir(&self.root, now, ttl)?;
        if removed > 0 {
            info!(removed, root = %self.root.display(), "stale parts swept");
        }
        Ok(removed)
    }
}

fn sweep_dir(dir: &Path, now: SystemTime, ttl: Duration) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            removed += sweep_dir(&path, now, ttl)?;
            let _ = fs::remove_dir(&path);
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let sweepable =
            name.ends_with(PART_SUFFIX) || name.contains(TEMP_MARKER) || name == ASSEMBLED_MARKER;
        if !sweepable {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age >= ttl {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to sweep part"),
            }
        }
    }
    Ok(removed)
}
