/// Board session configuration.
/// Read from a JSON file; anything missing or unreadable falls back to defaults.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::types::{default_lists, ListDef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardConfig {
    /// Fixed lists of every board, in display order.
    #[serde(default = "default_lists")]
    pub lists: Vec<ListDef>,
    /// Buffer size of the notice broadcast channel.
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
    #[serde(default = "default_record_activity")]
    pub record_activity: bool,
}

fn default_notice_capacity() -> usize {
    64
}

fn default_record_activity() -> bool {
    true
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            lists: default_lists(),
            notice_capacity: default_notice_capacity(),
            record_activity: default_record_activity(),
        }
    }
}

impl BoardConfig {
    /// Repair values a session cannot run with.
    fn sanitized(mut self, path: &Path) -> Self {
        if self.lists.is_empty() {
            log::warn!(
                "[corkboard.config] No lists in {}, using the default lists",
                path.display()
            );
            self.lists = default_lists();
        }
        let mut seen = std::collections::HashSet::new();
        self.lists.retain(|list| seen.insert(list.id.clone()));
        self.notice_capacity = self.notice_capacity.max(1);
        self
    }
}

/// Load config from path. Returns defaults if the file doesn't exist or is invalid.
pub fn load_config(path: &Path) -> BoardConfig {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<BoardConfig>(&content) {
            Ok(config) => config.sanitized(path),
            Err(e) => {
                log::warn!(
                    "[corkboard.config] Failed to parse config {}: {}",
                    path.display(),
                    e
                );
                BoardConfig::default()
            }
        },
        Err(_) => {
            log::info!(
                "[corkboard.config] No config at {}, using defaults",
                path.display()
            );
            BoardConfig::default()
        }
    }
}

pub fn save_config(path: &Path, config: &BoardConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
