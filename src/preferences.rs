use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Reviewer preferences stored in `<config>/open-plan-annotator/preferences.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    /// Close the review tab automatically after approve/deny.
    #[serde(default)]
    pub auto_close_on_submit: bool,
}

impl UserPreferences {
    /// Load preferences, falling back to defaults when the file is missing
    /// or malformed. Preferences are a convenience and must never block a
    /// review session.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                debug!("ignoring malformed preferences {}: {err}", path.display());
                Self::default()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                debug!("failed to read preferences {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Persist preferences as pretty-printed JSON. The config directory may
    /// not exist yet: try the write, create the directory, retry once.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let mut json =
            serde_json::to_string_pretty(self).context("serializing preferences")?;
        json.push('\n');
        if fs::write(path, &json).is_ok() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(path, &json).with_context(|| format!("writing {}", path.display()))
    }
}
