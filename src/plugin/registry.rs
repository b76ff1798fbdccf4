//! Plugin discovery and lookup.
//!
//! The registry scans plugin roots two levels deep (a root is a
//! directory of plugin directories, each holding one shared library),
//! records per-path load failures without aborting the scan, and serves
//! capability-filtered listings. Reads share; loads and unloads are
//! exclusive.

use crate::error::{Result, RtError};
use crate::plugin::{loader, Plugin};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Plugin>>,
    load_errors: Mutex<Vec<(PathBuf, RtError)>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            load_errors: Mutex::new(Vec::new()),
        }
    }

    /// Scan every root and load what it finds. Failures are recorded in
    /// [`PluginRegistry::load_errors`] and do not abort the scan.
    pub fn scan(&self, roots: &[PathBuf]) {
        for root in roots {
            self.scan_root(root);
        }
    }

    fn scan_root(&self, root: &Path) {
        if !root.is_dir() {
            tracing::warn!("plugin root does not exist: {}", root.display());
            return;
        }

        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("cannot read plugin root {}: {e}", root.display());
                return;
            }
        };

        for entry in entries.flatten() {
            let subdir = entry.path();
            if !subdir.is_dir() {
                continue;
            }
            let Ok(files) = std::fs::read_dir(&subdir) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if !path.is_file() || !loader::is_plugin_library(&path) {
                    continue;
                }
                match self.load_library(&path) {
                    Ok(name) => tracing::info!("loaded plugin \"{name}\" from {}", path.display()),
                    Err(e) => {
                        tracing::warn!("failed to load plugin {}: {e}", path.display());
                        self.load_errors
                            .lock()
                            .expect("load errors poisoned")
                            .push((path, e));
                    }
                }
            }
        }
    }

    /// Load one library and register its module. Returns the plugin name.
    pub fn load_library(&self, path: &Path) -> Result<String> {
        let plugin = loader::load(path)?;
        let name = plugin.name().to_string();
        self.insert(plugin);
        Ok(name)
    }

    /// Register a module. On a name collision the first registration
    /// wins, keeping startup deterministic. Returns false when ignored.
    pub fn insert(&self, plugin: Plugin) -> bool {
        let mut plugins = self.plugins.write().expect("registry poisoned");
        match plugins.entry(plugin.name().to_string()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(plugin);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Plugin> {
        self.plugins
            .read()
            .expect("registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| RtError::NotFound(format!("plugin \"{name}\"")))
    }

    pub fn unload(&self, name: &str) -> Result<()> {
        let mut plugins = self.plugins.write().expect("registry poisoned");
        plugins
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RtError::NotFound(format!("plugin \"{name}\"")))
    }

    /// Snapshot of every registered plugin.
    pub fn plugins(&self) -> Vec<Plugin> {
        let mut all: Vec<Plugin> = self
            .plugins
            .read()
            .expect("registry poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    fn names_with(&self, has: impl Fn(&Plugin) -> bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .plugins
            .read()
            .expect("registry poisoned")
            .values()
            .filter(|p| has(p))
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn sources(&self) -> Vec<String> {
        self.names_with(|p| p.as_source().is_some())
    }

    pub fn stages(&self) -> Vec<String> {
        self.names_with(|p| p.as_stage().is_some())
    }

    pub fn sinks(&self) -> Vec<String> {
        self.names_with(|p| p.as_sink().is_some())
    }

    pub fn tasks(&self) -> Vec<String> {
        self.names_with(|p| p.as_render().is_some())
    }

    pub fn calibrations(&self) -> Vec<String> {
        self.names_with(|p| p.as_calibration().is_some())
    }

    /// Per-path failures recorded during scans.
    pub fn load_errors(&self) -> Vec<(PathBuf, String)> {
        self.load_errors
            .lock()
            .expect("load errors poisoned")
            .iter()
            .map(|(path, e)| (path.clone(), e.to_string()))
            .collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
