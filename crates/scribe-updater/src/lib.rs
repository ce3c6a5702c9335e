// scribe-updater: Self-update for the Scribe agent.
//
// Checks the collector's update endpoint for new versions, downloads the
// replacement binary to a sibling staging path, verifies its SHA-256, and
// swaps it in with a rename protocol that can roll back.
//
// # Update protocol
// 1. GET `updates/check?current_version=&platform=&arch=` -> `UpdateInfo`
// 2. Download to `<exe>.new` ("scribe.new" next to the running binary)
// 3. Verify hex SHA-256 (constant-time compare); mismatch deletes the
//    download and aborts.  An empty checksum is tolerated for legacy
//    collectors, with a warning.
// 4. chmod +x (non-Windows)
// 5. Rename current -> `<exe>.old`, staged -> current; a failure of the
//    second rename rolls the first one back.
// 6. Spawn the new binary, exit 0.

use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use scribe_protocol::UpdateInfo;

/// How often the agent checks for updates.
pub const CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);
/// Delay before the first check after startup.
pub const FIRST_CHECK_DELAY: std::time::Duration = std::time::Duration::from_secs(60);
/// Per-request timeout for check and download calls.
pub const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Outcome of one check/apply cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    UpToDate,
    Available { version: String },
    Staged { version: String },
    Failed { error: String },
}

/// Error type for update operations.
#[derive(Debug)]
pub enum UpdateError {
    Http(String),
    Io(String),
    ChecksumMismatch { expected: String, actual: String },
    BadVersion(String),
    Swap(String),
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateError::Http(s) => write!(f, "HTTP error: {}", s),
            UpdateError::Io(s) => write!(f, "IO error: {}", s),
            UpdateError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {}, got {}", expected, actual)
            }
            UpdateError::BadVersion(s) => write!(f, "bad version: {}", s),
            UpdateError::Swap(s) => write!(f, "binary swap failed: {}", s),
        }
    }
}

impl std::error::Error for UpdateError {}

// ---------------------------------------------------------------------------
// UpdateChecker
// ---------------------------------------------------------------------------

/// Checks for, downloads, verifies, and applies agent updates.
pub struct UpdateChecker {
    base_url: String,
    current_version: Version,
    client: reqwest::Client,
}

impl UpdateChecker {
    /// `base_url` is the collector's HTTP root, e.g. `https://host`.
    ///
    /// # Errors
    ///
    /// Returns an error if `current_version_str` is not valid semver.
    pub fn new(
        base_url: impl Into<String>,
        current_version_str: &str,
    ) -> Result<Self, semver::Error> {
        let current_version = Version::parse(current_version_str)?;
        Ok(Self {
            base_url: base_url.into(),
            current_version,
            client: reqwest::Client::new(),
        })
    }

    pub fn check_url(&self) -> String {
        format!(
            "{}/api/agents/updates/check?current_version={}&platform={}&arch={}",
            self.base_url,
            self.current_version,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }

    /// Ask the collector whether a newer build exists.
    pub async fn check(&self) -> Result<UpdateStatus, UpdateError> {
        let info: UpdateInfo = self
            .client
            .get(self.check_url())
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| UpdateError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))?;

        if !info.available {
            return Ok(UpdateStatus::UpToDate);
        }
        let advertised =
            Version::parse(&info.version).map_err(|e| UpdateError::BadVersion(e.to_string()))?;
        if advertised <= self.current_version {
            return Ok(UpdateStatus::UpToDate);
        }
        info!(latest = %advertised, current = %self.current_version, "update available");
        Ok(UpdateStatus::Available {
            version: info.version,
        })
    }

    /// Fetch full update metadata (for the download step).
    pub async fn fetch_info(&self) -> Result<UpdateInfo, UpdateError> {
        self.client
            .get(self.check_url())
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| UpdateError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))
    }

    /// Download the advertised binary to `<current_exe>.new` and verify it.
    ///
    /// Returns the staged path.  On checksum mismatch the download is
    /// deleted and an error returned; nothing on disk changes.
    pub async fn download_and_stage(
        &self,
        info: &UpdateInfo,
        current_exe: &Path,
    ) -> Result<PathBuf, UpdateError> {
        let staged = staged_path(current_exe);

        info!(url = %info.url, path = %staged.display(), "downloading update");
        let bytes = self
            .client
            .get(&info.url)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| UpdateError::Http(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| UpdateError::Http(e.to_string()))?;

        tokio::fs::write(&staged, &bytes)
            .await
            .map_err(|e| UpdateError::Io(e.to_string()))?;

        if let Err(e) = verify_checksum(&bytes, &info.checksum) {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| UpdateError::Io(e.to_string()))?;
        }

        info!(version = %info.version, "update staged and verified");
        Ok(staged)
    }

    /// Swap the staged binary in, spawn it, and exit the current process.
    ///
    /// Only returns on error; on success the process is replaced.
    pub fn apply_and_restart(current_exe: &Path, staged: &Path) -> Result<(), UpdateError> {
        swap_binaries(current_exe, staged)?;

        info!(path = %current_exe.display(), "respawning updated binary");
        std::process::Command::new(current_exe)
            .args(std::env::args().skip(1))
            .spawn()
            .map_err(|e| UpdateError::Io(e.to_string()))?;
        std::process::exit(0);
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verify `bytes` against a hex SHA-256 `expected` checksum.
///
/// An empty checksum is tolerated (legacy collectors omit it) with a
/// warning; this is a tracked gap, not an endorsement.
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), UpdateError> {
    if expected.is_empty() {
        warn!("collector advertised no checksum; skipping verification");
        return Ok(());
    }
    let actual = hex::encode(Sha256::digest(bytes));
    if !constant_time_eq(actual.as_bytes(), expected.to_lowercase().as_bytes()) {
        return Err(UpdateError::ChecksumMismatch {
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(())
}

/// Byte-wise comparison without data-dependent early exit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ---------------------------------------------------------------------------
// Binary swap
// ---------------------------------------------------------------------------

fn staged_path(current_exe: &Path) -> PathBuf {
    let mut name = current_exe
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scribe".to_owned());
    name.push_str(".new");
    current_exe.with_file_name(name)
}

fn backup_path(current_exe: &Path) -> PathBuf {
    let mut name = current_exe
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scribe".to_owned());
    name.push_str(".old");
    current_exe.with_file_name(name)
}

/// Rename current -> `.old`, staged -> current.
///
/// If the second rename fails, the first is rolled back so the original
/// binary stays in place.
pub fn swap_binaries(current_exe: &Path, staged: &Path) -> Result<(), UpdateError> {
    let backup = backup_path(current_exe);

    std::fs::rename(current_exe, &backup)
        .map_err(|e| UpdateError::Swap(format!("backup rename: {}", e)))?;

    if let Err(e) = std::fs::rename(staged, current_exe) {
        // Roll back so the agent keeps a runnable binary.
        let rollback = std::fs::rename(&backup, current_exe);
        return Err(UpdateError::Swap(format!(
            "install rename: {} (rollback {})",
            e,
            match rollback {
                Ok(()) => "succeeded".to_owned(),
                Err(re) => format!("failed: {}", re),
            }
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
