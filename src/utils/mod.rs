pub mod fmt;
pub mod path_sanitize;
pub mod security_patterns;
pub mod subprocess;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Write `content` to `path` atomically: write to a sibling temp file, then
/// rename into place, so readers never observe a half-written file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .context("path has no parent directory")?;
    fs::create_dir_all(dir).with_context(|| format!("failed to create dir {}", dir.display()))?;
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("file"),
        fastrand::u64(..)
    ));
    fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename into place: {}", path.display()))?;
    Ok(())
}
