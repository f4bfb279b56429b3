use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::device_code::DeviceAuthorizationState;
use super::error::AuthError;
use super::token::Session;

const SNAPSHOT_FILE_VERSION: u32 = 1;

/// Durable storage for the controller's snapshots.
///
/// The controller is the only writer; writes are last-write-wins.
pub trait SessionStore: Send + Sync {
    fn load_session(&self) -> Result<Option<Session>, AuthError>;
    fn save_session(&self, session: &Session) -> Result<(), AuthError>;
    fn clear_session(&self) -> Result<(), AuthError>;
    fn load_device_authorization(&self) -> Result<Option<DeviceAuthorizationState>, AuthError>;
    fn save_device_authorization(&self, state: &DeviceAuthorizationState)
        -> Result<(), AuthError>;
    fn clear_device_authorization(&self) -> Result<(), AuthError>;
}

/// Configuration for file-backed snapshot storage.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_dir: PathBuf,
    pub profile: String,
}

impl StoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            profile: "default".to_string(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn default_dir() -> PathBuf {
        default_langchef_dir()
    }
}

/// File-backed store writing one JSON envelope per snapshot kind.
///
/// Files are replaced atomically and restricted to the current user.
///
/// # Example
/// ```no_run
/// use langchef_auth::auth::{FileSessionStore, SessionStore, StoreConfig};
///
/// let store = FileSessionStore::new(StoreConfig::new(std::path::PathBuf::from("/tmp/langchef")));
/// assert!(store.load_session()?.is_none());
/// # Ok::<(), langchef_auth::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    base_dir: PathBuf,
    profile: String,
}

impl FileSessionStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            base_dir: config.base_dir,
            profile: normalize_label(&config.profile),
        }
    }

    pub fn new_default() -> Self {
        Self::new(StoreConfig::new(default_langchef_dir()))
    }

    fn snapshot_path(&self, kind: &str) -> PathBuf {
        let name = if self.profile == "default" {
            format!("{kind}.json")
        } else {
            format!("{kind}.{}.json", self.profile)
        };
        self.base_dir.join(name)
    }

    fn load<T: DeserializeOwned>(&self, kind: &str) -> Result<Option<T>, AuthError> {
        let path = self.snapshot_path(kind);
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: SnapshotFile<T> = serde_json::from_str(&raw)?;
        if file.version != SNAPSHOT_FILE_VERSION {
            return Err(AuthError::Serialization(format!(
                "Unsupported snapshot version {} at {}",
                file.version,
                path.display()
            )));
        }
        Ok(Some(file.data))
    }

    fn save<T: Serialize>(&self, kind: &str, data: &T) -> Result<(), AuthError> {
        let file = SnapshotFile {
            version: SNAPSHOT_FILE_VERSION,
            profile: self.profile.clone(),
            saved_at: Utc::now(),
            data,
        };
        let serialized = serde_json::to_vec_pretty(&file)?;
        atomic_write(&self.snapshot_path(kind), &serialized)
    }

    fn clear(&self, kind: &str) -> Result<(), AuthError> {
        match fs::remove_file(self.snapshot_path(kind)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }
}

const SESSION: &str = "session";
const DEVICE_AUTHORIZATION: &str = "device_authorization";

impl SessionStore for FileSessionStore {
    fn load_session(&self) -> Result<Option<Session>, AuthError> {
        self.load(SESSION)
    }

    fn save_session(&self, session: &Session) -> Result<(), AuthError> {
        self.save(SESSION, session)
    }

    fn clear_session(&self) -> Result<(), AuthError> {
        self.clear(SESSION)
    }

    fn load_device_authorization(&self) -> Result<Option<DeviceAuthorizationState>, AuthError> {
        self.load(DEVICE_AUTHORIZATION)
    }

    fn save_device_authorization(
        &self,
        state: &DeviceAuthorizationState,
    ) -> Result<(), AuthError> {
        self.save(DEVICE_AUTHORIZATION, state)
    }

    fn clear_device_authorization(&self) -> Result<(), AuthError> {
        self.clear(DEVICE_AUTHORIZATION)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile<T> {
    version: u32,
    profile: String,
    saved_at: DateTime<Utc>,
    data: T,
}

fn default_langchef_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".langchef"))
        .unwrap_or_else(|| PathBuf::from(".langchef"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| AuthError::Io(format!("Snapshot path {} has no file name", path.display())))?;
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_path = path.with_file_name(format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
