use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Narrative context read from the conversation session. The studio only
/// ever reads it; callers hand in a fresh value on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub character_rules: String,
    #[serde(default)]
    pub scene_descriptions: Vec<String>,
    #[serde(default)]
    pub current_scene_index: usize,
    #[serde(default)]
    pub continuity_summary: String,
}

impl SessionContext {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid session context JSON in {}", path.display()))
    }

    /// Scene descriptions up to and including the active scene.
    pub fn scenes_so_far(&self) -> &[String] {
        if self.scene_descriptions.is_empty() {
            return &[];
        }
        let end = self
            .current_scene_index
            .saturating_add(1)
            .min(self.scene_descriptions.len());
        &self.scene_descriptions[..end]
    }
}
