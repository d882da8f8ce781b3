use std::path::{Path, PathBuf};

/// Loads `SKILL.md`-style workspace files so the model can discover and
/// read them through the `read_skill` tool. Resolves a single
/// workspace-relative `skills/` directory (no built-in skills directory —
/// this crate carries no bundled skill content).
pub struct SkillsLoader {
    skills_dir: PathBuf,
}

impl SkillsLoader {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self { skills_dir: workspace.as_ref().join("skills") }
    }

    /// Lists skill names: immediate subdirectories of `skills/` containing
    /// a `SKILL.md` file.
    pub fn list_skills(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.skills_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().join("SKILL.md").is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    pub fn load_skill(&self, name: &str) -> Option<String> {
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        std::fs::read_to_string(self.skills_dir.join(name).join("SKILL.md")).ok()
    }
}
