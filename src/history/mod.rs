use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::types::HistoryKeySource;


// ===================================================================
// Key derivation
// ===================================================================

/// Derive the stable identity under which a session's plan versions are
/// stored. Candidate fields are tried in priority order; the first usable one
/// wins, and a composite of weaker fields backs the whole thing so every
/// session gets a key.
pub fn resolve_history_key(source: &HistoryKeySource) -> String {
    let candidates = [
        ("transcript_path", source.transcript_path.as_deref()),
        (
            "opencode_conversation_id",
            source.opencode_conversation_id.as_deref(),
        ),
        ("opencode_session_id", source.opencode_session_id.as_deref()),
        ("session_id", source.session_id.as_deref()),
    ];
    for (tag, value) in candidates {
        if let Some(material) = usable(value) {
            return hashed_key(&format!("{tag}:{material}"));
        }
    }

    // Composite fallback. Absent parts collapse to empty strings so the key
    // stays a total function of the source.
    let cwd = usable(source.cwd.as_deref()).unwrap_or_default();
    let hook_event_name = usable(source.hook_event_name.as_deref()).unwrap_or_default();
    let tool_name = usable(source.tool_name.as_deref()).unwrap_or_default();
    hashed_key(&format!("composite:{cwd}|{hook_event_name}|{tool_name}"))
}

/// Normalize key material: NFKC, newlines collapsed to `\n`, trimmed.
/// Visually identical inputs from different hosts must hash identically.
fn normalize_key_material(value: &str) -> String {
    let composed: String = value.nfkc().collect();
    composed
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim()
        .to_string()
}

fn usable(value: Option<&str>) -> Option<String> {
    let normalized = normalize_key_material(value?);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn hashed_key(material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("history_{}", &hex[..32])
}

// ===================================================================
// Version store
// ===================================================================

/// Prior plan versions for one session, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanHistory {
    pub prior_versions: Vec<String>,
    pub next_version: u32,
}

/// Flat-file store holding one directory of `v<N>.md` files per session key.
#[derive(Debug)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn open(history_root: &Path, key: &str) -> Self {
        Self {
            dir: history_root.join(key),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load stored versions in modification-time order. History is a
    /// convenience layer: any read error degrades to "no history".
    pub fn load(&self) -> PlanHistory {
        let prior_versions = self.read_versions().unwrap_or_else(|err| {
            debug!("no plan history loaded from {}: {err}", self.dir.display());
            Vec::new()
        });
        PlanHistory {
            next_version: prior_versions.len() as u32 + 1,
            prior_versions,
        }
    }

    fn read_versions(&self) -> io::Result<Vec<String>> {
        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            files.push((modified, path));
        }
        files.sort_by_key(|&(modified, _)| modified);
        files
            .into_iter()
            .map(|(_, path)| fs::read_to_string(path))
            .collect()
    }

    /// Record the plan text as `v<version>.md`. The session directory
    /// usually does not exist on a first submission: try the write, create
    /// the directory, then retry once.
    pub fn append(&self, version: u32, text: &str) -> io::Result<()> {
        let path = self.dir.join(format!("v{version}.md"));
        match fs::write(&path, text) {
            Ok(()) => Ok(()),
            Err(_) => {
                fs::create_dir_all(&self.dir)?;
                fs::write(&path, text)
            }
        }
    }

    /// Remove the session's version directory once the plan is approved.
    /// Denied plans keep their history so the next round can show it.
    /// Removal failures affect disk hygiene only and are not propagated.
    pub fn cleanup(&self, approved: bool) {
        if !approved {
            return;
        }
        if let Err(err) = remove_dir_if_exists(&self.dir) {
            warn!(
                "failed to remove plan history {}: {err}",
                self.dir.display()
            );
        }
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
