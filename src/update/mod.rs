use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::config::RuntimeConfig;


pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GitHub repository releases are fetched from.
pub const REPO: &str = "ndom91/open-plan-annotator";

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "open-plan-annotator-update";
const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const BINARY_NAME: &str = "open-plan-annotator";
const RELEASE_PAGE_SIZE: usize = 30;
const CACHE_TTL_MS: u64 = 4 * 60 * 60 * 1000;
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

// ===================================================================
// Errors
// ===================================================================

/// Failures in the update flow. During a background check these are logged
/// and degrade to "no update"; the update subcommand surfaces them.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("GitHub API responded with {0}")]
    FeedStatus(u16),

    #[error("release feed contains no stable release")]
    NoStableRelease,

    #[error("Unsupported platform {0}")]
    UnsupportedPlatform(String),

    #[error("Release v{version} is missing asset {asset}")]
    MissingAsset { version: String, asset: String },

    #[error("Release v{version} does not contain a checksum manifest asset. open-plan-annotator requires release checksum/sha256sum availability and will not install without verification.")]
    MissingChecksumManifest { version: String },

    #[error("Checksum manifest does not contain {0}. open-plan-annotator requires release checksum/sha256sum availability and will not install without verification.")]
    ChecksumEntryMissing(String),

    #[error("Checksum verification failed for {asset} (expected {expected}, got {actual}). open-plan-annotator requires release checksum/sha256sum availability and will not install without verification.")]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },

    #[error("Download failed: HTTP {0}")]
    DownloadFailed(u16),

    #[error("Binary 'open-plan-annotator' not found in archive")]
    BinaryNotFound,

    #[error("self-update already in progress")]
    AlreadyInProgress,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

// ===================================================================
// Wire types
// ===================================================================

/// Update-check result, served verbatim to the UI and the update subcommand.
/// `asset_url`/`asset_sha256` are populated only when a self-update is
/// actually possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    pub self_update_possible: bool,
    pub asset_url: Option<String>,
    pub asset_sha256: Option<String>,
    pub update_command: String,
}

/// On-disk cache of the last release lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCache {
    pub latest_version: String,
    /// Unix milliseconds of the lookup.
    pub checked_at: u64,
    #[serde(default)]
    pub asset_url: Option<String>,
    #[serde(default)]
    pub asset_sha256: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

struct ReleaseLookup {
    version: String,
    asset_url: Option<String>,
    asset_sha256: Option<String>,
}

// ===================================================================
// Pure helpers
// ===================================================================

/// Full semver comparison, including prerelease precedence. Unparsable
/// versions never count as newer.
pub fn is_newer_version(current: &str, latest: &str) -> bool {
    match (Version::parse(current), Version::parse(latest)) {
        (Ok(current), Ok(latest)) => latest > current,
        _ => false,
    }
}

fn release_version(release: &Release) -> Option<Version> {
    let tag = release
        .tag_name
        .strip_prefix('v')
        .unwrap_or(&release.tag_name);
    Version::parse(tag).ok()
}

/// Best stable release on a page: highest semver, ties broken by the most
/// recent `created_at`, then the lexically greatest tag. Drafts,
/// prereleases, and unparsable tags are discarded.
pub fn select_latest_release(releases: &[Release]) -> Option<&Release> {
    releases
        .iter()
        .filter(|release| !release.draft && !release.prerelease)
        .filter_map(|release| release_version(release).map(|version| (version, release)))
        .max_by(|(a_version, a), (b_version, b)| {
            a_version
                .cmp(b_version)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.tag_name.cmp(&b.tag_name))
        })
        .map(|(_, release)| release)
}

pub fn platform_key() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{os}-{arch}")
}

/// Archive name published for a platform, or `None` when no release asset
/// exists for it.
pub fn platform_asset_archive_name(key: &str) -> Option<String> {
    match key {
        "darwin-arm64" | "darwin-x64" | "linux-x64" | "linux-arm64" => {
            Some(format!("{BINARY_NAME}-{key}.tar.gz"))
        }
        _ => None,
    }
}

/// Pick the checksum manifest among release assets: the name must mention
/// sha256 or checksum and carry a manifest-ish extension. Sorted by name so
/// the choice is deterministic when several match.
pub fn select_checksum_asset(assets: &[ReleaseAsset]) -> Option<&ReleaseAsset> {
    let mut candidates: Vec<&ReleaseAsset> = assets
        .iter()
        .filter(|asset| {
            let name = asset.name.to_lowercase();
            (name.contains("sha256") || name.contains("checksum"))
                && (name.ends_with(".txt")
                    || name.ends_with(".sha256")
                    || name.ends_with(".sha256sum")
                    || name.ends_with(".sha256sums"))
        })
        .collect();
    candidates.sort_by(|a, b| a.name.cmp(&b.name));
    candidates.into_iter().next()
}

/// Parse a checksum manifest in GNU (`<hash>  <name>`, optional `*` binary
/// marker) or BSD (`SHA256 (<name>) = <hash>`) style. Blank lines, comments,
/// and unrecognized lines are skipped; hashes are lowercased.
pub fn parse_checksum_manifest(text: &str) -> HashMap<String, String> {
    let mut checksums = HashMap::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((name, hash)) = parse_bsd_line(line).or_else(|| parse_gnu_line(line)) {
            checksums.insert(name, hash.to_lowercase());
        }
    }
    checksums
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_bsd_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("SHA256")?.trim_start();
    let rest = rest.strip_prefix('(')?;
    let close = rest.find(')')?;
    let name = rest[..close].trim();
    let rest = rest[close + 1..].trim_start();
    let hash = rest.strip_prefix('=')?.trim();
    if name.is_empty() || !is_sha256_hex(hash) {
        return None;
    }
    Some((name.to_string(), hash.to_string()))
}

fn parse_gnu_line(line: &str) -> Option<(String, String)> {
    let hash = line.get(..64)?;
    if !is_sha256_hex(hash) {
        return None;
    }
    let rest = line.get(64..)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    let name = rest.strip_prefix('*').unwrap_or(rest).trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), hash.to_string()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Scan a classic tar stream for the release binary. Headers are fixed
/// 512-byte records with the name at bytes 0..100 and the octal size at
/// 124..136. PAX extended headers and GNU long names are not understood;
/// release archives are produced with classic headers.
pub fn extract_binary_from_tar(tar: &[u8]) -> Result<Vec<u8>, UpdateError> {
    let mut offset = 0usize;
    while offset + 512 <= tar.len() {
        let header = &tar[offset..offset + 512];
        offset += 512;

        let name = nul_trimmed(&header[0..100]);
        let size = match usize::from_str_radix(nul_trimmed(&header[124..136]).trim(), 8) {
            Ok(size) if !name.is_empty() => size,
            _ => break,
        };

        if name == BINARY_NAME || name.ends_with(&format!("/{BINARY_NAME}")) {
            let end = (offset + size).min(tar.len());
            return Ok(tar[offset..end].to_vec());
        }
        offset += size.div_ceil(512) * 512;
    }
    Err(UpdateError::BinaryNotFound)
}

fn nul_trimmed(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Probe whether `dir` accepts the operations the swap needs by creating and
/// renaming a zero-byte file. Permission bits alone can lie on read-only
/// mounts.
fn dir_writable(dir: &Path) -> bool {
    let pid = std::process::id();
    let probe = dir.join(format!(".{BINARY_NAME}-probe-{pid}"));
    let renamed = dir.join(format!(".{BINARY_NAME}-probe-{pid}-renamed"));
    let writable = fs::write(&probe, b"").is_ok() && fs::rename(&probe, &renamed).is_ok();
    let _ = fs::remove_file(&probe);
    let _ = fs::remove_file(&renamed);
    writable
}

fn current_exe_dir_writable() -> bool {
    match std::env::current_exe() {
        Ok(exe) => exe.parent().is_some_and(dir_writable),
        Err(_) => false,
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

// ===================================================================
// In-flight guard
// ===================================================================

static UPDATE_IN_FLIGHT: AtomicBool = AtomicBool::new(false);

struct InFlightGuard;

impl InFlightGuard {
    fn acquire() -> Result<Self, UpdateError> {
        if UPDATE_IN_FLIGHT
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(InFlightGuard)
        } else {
            Err(UpdateError::AlreadyInProgress)
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        UPDATE_IN_FLIGHT.store(false, Ordering::SeqCst);
    }
}

// ===================================================================
// Update checker
// ===================================================================

pub struct UpdateChecker {
    client: reqwest::Client,
    api_base: String,
    cache_path: PathBuf,
    package_manager: String,
}

impl UpdateChecker {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        Self::with_api_base(
            config.update_cache_path.clone(),
            config.package_manager.clone(),
            GITHUB_API_BASE,
        )
    }

    /// Constructor with an explicit API base, so tests can point the checker
    /// at a local mock server.
    pub fn with_api_base(
        cache_path: PathBuf,
        package_manager: String,
        api_base: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(CHECK_TIMEOUT)
            .build()
            .context("building update HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            cache_path,
            package_manager,
        })
    }

    fn update_command(&self) -> String {
        format!("{} update {BINARY_NAME}", self.package_manager)
    }

    fn no_update_result(&self) -> UpdateInfo {
        UpdateInfo {
            current_version: VERSION.to_string(),
            latest_version: None,
            update_available: false,
            self_update_possible: false,
            asset_url: None,
            asset_sha256: None,
            update_command: self.update_command(),
        }
    }

    /// Background-check entry point: never fails, reporting "no update"
    /// when the lookup does.
    pub async fn check_for_update(&self) -> UpdateInfo {
        match self.try_check_for_update().await {
            Ok(info) => info,
            Err(err) => {
                debug!("update check failed: {err}");
                self.no_update_result()
            }
        }
    }

    /// Check with errors surfaced, for the update subcommand.
    pub async fn try_check_for_update(&self) -> Result<UpdateInfo, UpdateError> {
        let now = unix_millis();
        let (latest_version, asset_url, asset_sha256) = match self.read_cache() {
            Some(cache) if now.saturating_sub(cache.checked_at) < CACHE_TTL_MS => {
                (cache.latest_version, cache.asset_url, cache.asset_sha256)
            }
            _ => {
                let lookup = self.lookup_latest().await?;
                self.write_cache(&UpdateCache {
                    latest_version: lookup.version.clone(),
                    checked_at: now,
                    asset_url: lookup.asset_url.clone(),
                    asset_sha256: lookup.asset_sha256.clone(),
                });
                (lookup.version, lookup.asset_url, lookup.asset_sha256)
            }
        };

        let update_available = is_newer_version(VERSION, &latest_version);
        let self_update_possible = update_available
            && asset_url.is_some()
            && asset_sha256.is_some()
            && current_exe_dir_writable();
        Ok(UpdateInfo {
            current_version: VERSION.to_string(),
            latest_version: Some(latest_version),
            update_available,
            self_update_possible,
            asset_url: if self_update_possible { asset_url } else { None },
            asset_sha256: if self_update_possible {
                asset_sha256
            } else {
                None
            },
            update_command: self.update_command(),
        })
    }

    async fn lookup_latest(&self) -> Result<ReleaseLookup, UpdateError> {
        let release = self
            .fetch_latest_stable_release()
            .await?
            .ok_or(UpdateError::NoStableRelease)?;
        let version = release
            .tag_name
            .strip_prefix('v')
            .unwrap_or(&release.tag_name)
            .to_string();

        // A release without a verifiable platform asset still reports its
        // version; only the self-update capability degrades.
        let (asset_url, asset_sha256) = match self.resolve_verified_asset(&release, &version).await
        {
            Ok((url, sha)) => (Some(url), Some(sha)),
            Err(err) => {
                debug!("release v{version} has no verifiable asset: {err}");
                (None, None)
            }
        };
        Ok(ReleaseLookup {
            version,
            asset_url,
            asset_sha256,
        })
    }

    /// Walk the release listing page by page until a page contains a stable
    /// release or the listing runs out.
    async fn fetch_latest_stable_release(&self) -> Result<Option<Release>, UpdateError> {
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/repos/{REPO}/releases?per_page={RELEASE_PAGE_SIZE}&page={page}",
                self.api_base
            );
            let response = self
                .client
                .get(&url)
                .header(reqwest::header::ACCEPT, GITHUB_ACCEPT)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(UpdateError::FeedStatus(response.status().as_u16()));
            }
            let releases: Vec<Release> = response.json().await?;
            let full_page = releases.len() >= RELEASE_PAGE_SIZE;

            if let Some(best) = select_latest_release(&releases) {
                return Ok(Some(best.clone()));
            }
            if !full_page {
                return Ok(None);
            }
            page += 1;
        }
    }

    async fn resolve_verified_asset(
        &self,
        release: &Release,
        version: &str,
    ) -> Result<(String, String), UpdateError> {
        let key = platform_key();
        let asset_name =
            platform_asset_archive_name(&key).ok_or(UpdateError::UnsupportedPlatform(key))?;
        let asset = release
            .assets
            .iter()
            .find(|asset| asset.name == asset_name)
            .ok_or_else(|| UpdateError::MissingAsset {
                version: version.to_string(),
                asset: asset_name.clone(),
            })?;

        let manifest_asset = select_checksum_asset(&release.assets).ok_or_else(|| {
            UpdateError::MissingChecksumManifest {
                version: version.to_string(),
            }
        })?;
        let manifest = self
            .client
            .get(&manifest_asset.browser_download_url)
            .send()
            .await?
            .text()
            .await?;
        let checksums = parse_checksum_manifest(&manifest);
        let expected = checksums
            .get(&asset_name)
            .ok_or_else(|| UpdateError::ChecksumEntryMissing(asset_name.clone()))?;

        Ok((asset.browser_download_url.clone(), expected.clone()))
    }

    fn read_cache(&self) -> Option<UpdateCache> {
        let contents = fs::read_to_string(&self.cache_path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Cache writes are best-effort: a failure never fails the check.
    fn write_cache(&self, cache: &UpdateCache) {
        let json = match serde_json::to_string_pretty(cache) {
            Ok(json) => json,
            Err(_) => return,
        };
        if fs::write(&self.cache_path, &json).is_ok() {
            return;
        }
        if let Some(parent) = self.cache_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(&self.cache_path, &json) {
            debug!(
                "failed to write update cache {}: {err}",
                self.cache_path.display()
            );
        }
    }

    // ---------------------------------------------------------------
    // Self-update
    // ---------------------------------------------------------------

    /// Download the release archive, verify it against the expected digest,
    /// and atomically swap the running executable. At most one self-update
    /// may be in flight per process.
    pub async fn perform_self_update(
        &self,
        asset_url: &str,
        expected_sha256: &str,
    ) -> Result<(), UpdateError> {
        let _guard = InFlightGuard::acquire()?;

        let response = self
            .client
            .get(asset_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(UpdateError::DownloadFailed(response.status().as_u16()));
        }
        let archive = response.bytes().await?;

        let actual = sha256_hex(&archive);
        let expected = expected_sha256.trim().to_lowercase();
        if actual != expected {
            let asset = asset_url.rsplit('/').next().unwrap_or(asset_url);
            return Err(UpdateError::ChecksumMismatch {
                asset: asset.to_string(),
                expected,
                actual,
            });
        }

        let mut decoder = GzDecoder::new(&archive[..]);
        let mut tar = Vec::new();
        decoder.read_to_end(&mut tar)?;
        let binary = extract_binary_from_tar(&tar)?;

        replace_current_exe(&binary)
    }
}

/// Write the new binary beside the running executable and rename it into
/// place, so the swap is atomic on the same filesystem. The temp file is
/// removed when any step fails.
fn replace_current_exe(binary: &[u8]) -> Result<(), UpdateError> {
    let exe = std::env::current_exe()?;
    let mut temp_name = exe.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(format!(".tmp-{}-{}", std::process::id(), unix_millis()));
    let temp = exe.with_file_name(temp_name);

    let swapped = write_and_rename(&temp, &exe, binary);
    if swapped.is_err() {
        let _ = fs::remove_file(&temp);
    }
    swapped.map_err(UpdateError::from)
}

fn write_and_rename(temp: &Path, exe: &Path, binary: &[u8]) -> io::Result<()> {
    fs::write(temp, binary)?;
    set_executable(temp)?;
    fs::rename(temp, exe)?;
    set_executable(exe)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

// ===================================================================
// Update subcommand console flow
// ===================================================================

impl UpdateChecker {
    /// Console conversation for `open-plan-annotator update`. Returns the
    /// process exit code.
    pub async fn run_cli_update(&self) -> i32 {
        let info = match self.try_check_for_update().await {
            Ok(info) => info,
            Err(err) => {
                eprintln!("Failed to check for updates: {err}");
                return 1;
            }
        };

        if !info.update_available {
            println!("Already up to date (v{VERSION})");
            return 0;
        }

        let latest = info.latest_version.as_deref().unwrap_or("unknown");
        println!("Update available: v{} → v{latest}", info.current_version);

        let verified = match (
            info.self_update_possible,
            info.asset_url.as_deref(),
            info.asset_sha256.as_deref(),
        ) {
            (true, Some(url), Some(sha)) => Some((url, sha)),
            _ => None,
        };
        let Some((asset_url, asset_sha256)) = verified else {
            println!("Self-update is not possible (binary directory may not be writable).");
            println!("Run: {}", info.update_command);
            return 1;
        };

        println!("Downloading...");
        if let Err(err) = self.perform_self_update(asset_url, asset_sha256).await {
            eprintln!("Update failed: {err}");
            return 1;
        }
        println!("Updated v{} → v{latest}", info.current_version);
        0
    }
}
