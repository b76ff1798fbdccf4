//! Runtime configuration.
//!
//! Everything that would otherwise live in a global (socket addresses,
//! plugin search paths, the standby start key) is collected into one
//! record passed to the application root at construction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default request/reply endpoint.
pub const DEFAULT_REPLY_ADDRESS: &str = "ipc:///tmp/reyer-rep.sock";

/// Default publish/subscribe endpoint.
pub const DEFAULT_PUBLISH_ADDRESS: &str = "ipc:///tmp/reyer-pub.sock";

/// Dataset file extension.
pub const DATASET_EXTENSION: &str = "reyd";

/// Application identifier for per-user data directories.
pub const APP_ID: &str = "reyer";

/// Configuration record for one runtime instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Request/reply socket address.
    pub reply_address: String,
    /// Broadcast socket address.
    pub publish_address: String,
    /// Directories scanned for plugins (each entry is a directory of
    /// plugin directories).
    pub plugin_paths: Vec<PathBuf>,
    /// Directory dataset files are written into.
    pub data_dir: PathBuf,
    /// Key that starts a loaded protocol from the standby screen.
    pub start_key: char,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reply_address: DEFAULT_REPLY_ADDRESS.to_string(),
            publish_address: DEFAULT_PUBLISH_ADDRESS.to_string(),
            plugin_paths: default_plugin_paths(),
            data_dir: std::env::temp_dir(),
            start_key: 's',
        }
    }
}

/// The default plugin search path: `<exe_dir>/plugins` plus the per-user
/// data directory.
pub fn default_plugin_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            paths.push(dir.join("plugins"));
        }
    }
    if let Some(data) = dirs_next::data_dir() {
        paths.push(data.join(APP_ID).join("plugins"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addresses() {
        let config = RuntimeConfig::default();
        assert_eq!(config.reply_address, "ipc:///tmp/reyer-rep.sock");
        assert_eq!(config.publish_address, "ipc:///tmp/reyer-pub.sock");
        assert_eq!(config.start_key, 's');
    }

    #[test]
    fn test_config_round_trip() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.reply_address, config.reply_address);
        assert_eq!(back.plugin_paths, config.plugin_paths);
    }
}
