use std::env;
use std::path::PathBuf;

/// Where loop snapshots are written.
///
/// Reads from the `RATCHET_STATE_FILE` environment variable, falling back to
/// `<data dir>/ratchet/state.json` when unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the JSON snapshot file.
    pub state_file: PathBuf,
}

impl StoreConfig {
    /// File name used under the data directory.
    pub const DEFAULT_FILE_NAME: &str = "state.json";

    /// Build a config from the environment.
    ///
    /// Priority: `RATCHET_STATE_FILE` env var, then the platform data
    /// directory, then the current directory.
    pub fn from_env() -> Self {
        let state_file = env::var_os("RATCHET_STATE_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path);
        Self { state_file }
    }

    /// Build a config from an explicit path (useful for tests and CLI flags).
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    /// `<data dir>/ratchet/state.json`, or `./state.json` when the platform
    /// has no data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("ratchet").join(Self::DEFAULT_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_FILE_NAME))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
