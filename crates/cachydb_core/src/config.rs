//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// On-disk format used when persisting collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Compressed framed binary records plus an offset index.
    Binary,
    /// Legacy plain-JSON document array.
    Json,
}

/// Configuration for opening an [`Engine`](crate::Engine).
///
/// Defaults live in code; the only environment integration is the explicit
/// [`Config::from_env`] constructor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding all databases and the WAL.
    pub root_dir: PathBuf,

    /// Name of the default database, created at open if missing.
    pub db_name: String,

    /// Format used when writing collection files.
    pub format: StorageFormat,

    /// Maximum size of a single WAL file before rotation.
    pub wal_max_size: u64,

    /// Number of WAL files kept after rotation.
    pub wal_retention: usize,

    /// Number of buffered entries that forces a WAL batch flush.
    pub wal_batch_size: usize,

    /// Interval of the background WAL batch flusher.
    pub wal_flush_interval: Duration,

    /// Interval of the background dirty-collection flusher.
    pub sync_interval: Duration,

    /// On WAL corruption during replay, truncate at the first bad entry and
    /// continue instead of failing the open.
    pub recover_corrupt_wal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            db_name: "main".to_string(),
            format: StorageFormat::Binary,
            wal_max_size: 64 * 1024 * 1024, // 64 MiB
            wal_retention: 2,
            wal_batch_size: 100,
            wal_flush_interval: Duration::from_millis(100),
            sync_interval: Duration::from_secs(5),
            recover_corrupt_wal: false,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from the recognized environment options.
    ///
    /// `ROOT_DIR` overrides the root directory (default `<home>/.cachydb`)
    /// and `DB_NAME` the default database name (default `main`). Everything
    /// else keeps its coded default.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = std::env::var_os("ROOT_DIR").filter(|v| !v.is_empty()) {
            config.root_dir = PathBuf::from(root);
        }
        if let Ok(name) = std::env::var("DB_NAME") {
            if !name.is_empty() {
                config.db_name = name;
            }
        }
        config
    }

    /// Sets the root directory.
    #[must_use]
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_dir = path.into();
        self
    }

    /// Sets the default database name.
    #[must_use]
    pub fn db_name(mut self, name: impl Into<String>) -> Self {
        self.db_name = name.into();
        self
    }

    /// Sets the collection storage format.
    #[must_use]
    pub const fn format(mut self, format: StorageFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the WAL rotation threshold.
    #[must_use]
    pub const fn wal_max_size(mut self, size: u64) -> Self {
        self.wal_max_size = size;
        self
    }

    /// Sets how many WAL files are retained after rotation.
    #[must_use]
    pub const fn wal_retention(mut self, count: usize) -> Self {
        self.wal_retention = count;
        self
    }

    /// Sets the background flush interval for dirty collections.
    #[must_use]
    pub const fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets whether a corrupt WAL tail is truncated instead of failing open.
    #[must_use]
    pub const fn recover_corrupt_wal(mut self, value: bool) -> Self {
        self.recover_corrupt_wal = value;
        self
    }
}

/// `<home>/.cachydb`, falling back to the current directory when no home
/// directory can be determined.
fn default_root_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".cachydb")
}

/// Returns true for directory entries that belong to the WAL rather than a
/// database.
pub(crate) fn is_wal_artifact(name: &str) -> bool {
    name.starts_with(crate::wal::WAL_FILE_PREFIX) || name == crate::wal::CHECKPOINT_FILE
}

/// Validates a database, collection, or index name.
///
/// Names become file system paths, so path separators, traversal components,
/// and names colliding with engine files are rejected.
pub(crate) fn validate_name(kind: &str, name: &str) -> crate::Result<()> {
    use crate::DbError;

    if name.is_empty() {
        return Err(DbError::invalid_argument(format!(
            "{kind} name must not be empty"
        )));
    }
    if name.starts_with('.') {
        return Err(DbError::invalid_argument(format!(
            "{kind} name '{name}' must not start with '.'"
        )));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || std::path::is_separator(c))
    {
        return Err(DbError::invalid_argument(format!(
            "{kind} name '{name}' contains a path separator"
        )));
    }
    if is_wal_artifact(name) {
        return Err(DbError::invalid_argument(format!(
            "{kind} name '{name}' collides with a reserved file name"
        )));
    }
    Ok(())
}
