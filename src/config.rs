use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::adapter::AdapterKind;

/// Environment variable that pins the host adapter regardless of stdin shape.
pub const HOST_ENV: &str = "OPEN_PLAN_ANNOTATOR_HOST";
/// Environment variable naming the package manager used in update hints.
pub const PKG_MANAGER_ENV: &str = "OPEN_PLAN_PKG_MANAGER";

const APP_DIR: &str = "open-plan-annotator";
const SHUTDOWN_DELAY_MS: u64 = 1200;

/// Fixed port used in development mode so the UI dev server can proxy to it.
pub const DEV_PORT: u16 = 3847;

// ===================================================================
// Runtime configuration
// ===================================================================

/// Process-wide settings, resolved from the environment exactly once at
/// startup. Everything downstream takes this struct instead of reading
/// environment variables itself.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Forced adapter choice from `OPEN_PLAN_ANNOTATOR_HOST`, if recognized.
    pub host_override: Option<AdapterKind>,
    /// Package manager named in the fallback update command.
    pub package_manager: String,
    /// True when `NODE_ENV=development`: canned plan, fixed port, no
    /// history writes, no browser launch.
    pub dev_mode: bool,
    /// Pause between emitting the decision and stopping the listener.
    pub shutdown_delay: Duration,
    /// `<config base>/open-plan-annotator`.
    pub config_dir: PathBuf,
    /// Root directory for per-session plan history.
    pub history_root: PathBuf,
    /// Reviewer preferences file.
    pub preferences_path: PathBuf,
    /// Cached update-check result.
    pub update_cache_path: PathBuf,
    /// Directory scanned for plan files when a hook event carries no plan.
    pub plans_fallback_dir: PathBuf,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        let home = dirs::home_dir().context("resolving home directory")?;

        // XDG_CONFIG_HOME wins over ~/.config on every platform.
        let config_base = env_string("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config"));
        let config_dir = config_base.join(APP_DIR);

        let host_override = env_string(HOST_ENV).and_then(|value| {
            match value.to_lowercase().as_str() {
                "claude" => Some(AdapterKind::Claude),
                "opencode" => Some(AdapterKind::Opencode),
                _ => None,
            }
        });

        let package_manager =
            env_string(PKG_MANAGER_ENV).unwrap_or_else(|| "npm".to_string());
        let dev_mode = env_string("NODE_ENV").as_deref() == Some("development");

        Ok(Self {
            host_override,
            package_manager,
            dev_mode,
            shutdown_delay: Duration::from_millis(SHUTDOWN_DELAY_MS),
            history_root: config_dir.join("history"),
            preferences_path: config_dir.join("preferences.json"),
            update_cache_path: config_dir.join("update-check.json"),
            plans_fallback_dir: home.join(".claude").join("plans"),
            config_dir,
        })
    }

    /// Port to bind: fixed in development, ephemeral otherwise.
    pub fn port(&self) -> u16 {
        if self.dev_mode { DEV_PORT } else { 0 }
    }
}

/// Read an environment variable, treating blank values as absent.
fn env_string(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
