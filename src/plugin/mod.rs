//! Dynamic plugin modules and their registry.
//!
//! A [`Plugin`] is a cheap shared handle over one loaded module. The
//! backing library (when the module came from disk) is unloaded only
//! after the last handle is dropped, which the registry and every
//! subsystem rely on for lifetime safety: a thread holding a handle can
//! never outlive the code it points into.

pub mod api;
pub mod builtin;
pub mod loader;
pub mod registry;

pub use api::{
    Calibration, Configurable, InterfaceId, Lifecycle, PluginModule, RenderTask, SampleSink,
    SampleSource, SampleStage,
};
pub use loader::{decode_version, encode_version, ABI_VERSION};
pub use registry::PluginRegistry;

use libloading::Library;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata reported by a plugin's entry symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub author: String,
    pub description: String,
    /// Encoded `0xMMmmpppp`; see [`encode_version`].
    pub version: u32,
}

struct PluginCell {
    // Declaration order is drop order: the module must go before the
    // library whose code it executes.
    module: Box<dyn PluginModule>,
    info: PluginInfo,
    path: PathBuf,
    #[allow(dead_code)]
    library: Option<Arc<Library>>,
}

/// Shared ownership handle over one plugin module.
#[derive(Clone)]
pub struct Plugin {
    cell: Arc<PluginCell>,
}

impl Plugin {
    /// Wrap a host-constructed module (builtin plugins, tests).
    pub fn from_module(module: Box<dyn PluginModule>, info: PluginInfo) -> Self {
        Self {
            cell: Arc::new(PluginCell {
                module,
                info,
                path: PathBuf::new(),
                library: None,
            }),
        }
    }

    pub(crate) fn from_library(
        module: Box<dyn PluginModule>,
        info: PluginInfo,
        path: PathBuf,
        library: Arc<Library>,
    ) -> Self {
        Self {
            cell: Arc::new(PluginCell {
                module,
                info,
                path,
                library: Some(library),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.cell.info.name
    }

    pub fn author(&self) -> &str {
        &self.cell.info.author
    }

    pub fn description(&self) -> &str {
        &self.cell.info.description
    }

    pub fn version(&self) -> u32 {
        self.cell.info.version
    }

    pub fn info(&self) -> &PluginInfo {
        &self.cell.info
    }

    /// On-disk location of the backing library. Empty for host modules.
    pub fn path(&self) -> &Path {
        &self.cell.path
    }

    /// Whether two handles share the same underlying module.
    pub fn same_module(&self, other: &Plugin) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn as_lifecycle(&self) -> Option<&dyn Lifecycle> {
        self.cell.module.as_lifecycle()
    }

    pub fn as_configurable(&self) -> Option<&dyn Configurable> {
        self.cell.module.as_configurable()
    }

    pub fn as_source(&self) -> Option<&dyn SampleSource> {
        self.cell.module.as_source()
    }

    pub fn as_stage(&self) -> Option<&dyn SampleStage> {
        self.cell.module.as_stage()
    }

    pub fn as_sink(&self) -> Option<&dyn SampleSink> {
        self.cell.module.as_sink()
    }

    pub fn as_calibration(&self) -> Option<&dyn Calibration> {
        self.cell.module.as_calibration()
    }

    pub fn as_render(&self) -> Option<&dyn RenderTask> {
        self.cell.module.as_render()
    }

    pub fn query_interface(&self, id: InterfaceId) -> bool {
        self.cell.module.query_interface(id)
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.cell.info.name)
            .field("version", &self.cell.info.version)
            .field("path", &self.cell.path)
            .finish()
    }
}
