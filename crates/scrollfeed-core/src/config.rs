use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{FeedError, Result};
use crate::types::FeedKind;

const APP_DIR: &str = "scrollfeed";
const CONFIG_FILE: &str = "config.toml";

/// Tunables of a feed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub kind: FeedKind,
    /// Estimated height of one entry, used only to size the first page.
    pub row_height_hint: f64,
    pub max_initial_page: usize,
    pub min_extend_page: usize,
    /// Consecutive same-direction loads tolerated before the far end is trimmed.
    pub eviction_after_loads: u32,
    pub eviction_page_multiplier: usize,
    pub group_proximity_secs: i64,
    pub media_ready_cap_ms: u64,
    pub commit_tick_ms: u64,
    pub mark_read_retries: u8,
    pub separator_height: f64,
    /// Distance from an edge at which a scroll triggers the next page.
    pub edge_threshold: f64,
    /// Anchor the viewport on append-only batches too.
    pub anchor_appends: bool,
    pub preload_after_load: bool,
    /// Fixed UTC offset for day boundaries. `None` uses the local zone.
    pub utc_offset_secs: Option<i32>,
    /// Wrap width handed to the renderer.
    pub render_width: u16,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: FeedKind::Chat,
            row_height_hint: 38.0,
            max_initial_page: 30,
            min_extend_page: 40,
            eviction_after_loads: 2,
            eviction_page_multiplier: 2,
            group_proximity_secs: 121,
            media_ready_cap_ms: 1500,
            commit_tick_ms: 0,
            mark_read_retries: 1,
            separator_height: 32.0,
            edge_threshold: 300.0,
            anchor_appends: false,
            preload_after_load: true,
            utc_offset_secs: None,
            render_width: 60,
        }
    }
}

impl FeedConfig {
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            FeedError::Configuration("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the user config directory, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Ok(Self::load_from(&path))
    }

    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(
                    target: "feed.config",
                    "Failed to read feed config at {}: {e}. Using defaults.",
                    path.display()
                );
                return Self::default();
            }
        };

        match toml::from_str::<Self>(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    target: "feed.config",
                    "Failed to parse feed config at {}: {e}. Using defaults.",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn media_ready_cap(&self) -> Duration {
        Duration::from_millis(self.media_ready_cap_ms)
    }

    pub fn commit_tick(&self) -> Duration {
        Duration::from_millis(self.commit_tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = FeedConfig::load_from(&dir.path().join("absent.toml"));
        assert_eq!(config, FeedConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "kind = \"scheduled\"\ngroup_proximity_secs = 60\n").unwrap();

        let config = FeedConfig::load_from(&path);
        assert_eq!(config.kind, FeedKind::Scheduled);
        assert_eq!(config.group_proximity_secs, 60);
        assert_eq!(config.min_extend_page, 40);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "kind = [").unwrap();

        assert_eq!(FeedConfig::load_from(&path), FeedConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = FeedConfig {
            kind: FeedKind::Pinned,
            utc_offset_secs: Some(3600),
            ..FeedConfig::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(FeedConfig::load_from(&path), config);
    }
}
