use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

/// Resolve `requested` against `workspace`, rejecting absolute paths and
/// requiring the canonicalised result to stay lexically within the
/// workspace.
///
/// Returns the canonical path on success. The caller decides whether the
/// path must already exist (`file_read`/`file_list`) or may be new
/// (`file_write`, where the parent must exist or be creatable).
pub fn resolve_in_workspace(workspace: &Path, requested: &str) -> Result<PathBuf> {
    if Path::new(requested).is_absolute() {
        bail!("absolute paths are not allowed: {}", requested);
    }
    let workspace = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());
    let joined = workspace.join(requested);
    let resolved = canonicalize_best_effort(&joined);
    ensure_within(&workspace, &resolved)?;
    Ok(resolved)
}

/// Canonicalise if the path exists; otherwise normalise lexically so a
/// not-yet-created file (e.g. for `file_write`) can still be checked.
fn canonicalize_best_effort(path: &Path) -> PathBuf {
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                if matches!(components.last(), Some(std::path::Component::Normal(_))) {
                    components.pop();
                }
            }
            std::path::Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

fn ensure_within(workspace: &Path, resolved: &Path) -> Result<()> {
    let ws_str = workspace.to_string_lossy();
    let resolved_str = resolved.to_string_lossy();
    let within = resolved_str.as_ref() == ws_str.as_ref()
        || resolved_str.starts_with(&format!("{}{}", ws_str, std::path::MAIN_SEPARATOR));
    if !within {
        bail!(
            "path '{}' escapes the workspace '{}'",
            resolved.display(),
            workspace.display()
        );
    }
    Ok(())
}
