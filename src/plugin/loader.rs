//! Dynamic library loading.
//!
//! Each plugin library exports six entry symbols:
//!
//! | symbol        | type                                  |
//! |---------------|---------------------------------------|
//! | `create`      | `extern "C" fn() -> *mut PluginEntry` |
//! | `destroy`     | `extern "C" fn(*mut PluginEntry)`     |
//! | `name`        | `extern "C" fn() -> *const c_char`    |
//! | `author`      | `extern "C" fn() -> *const c_char`    |
//! | `description` | `extern "C" fn() -> *const c_char`    |
//! | `version`     | `extern "C" fn() -> u32`              |
//!
//! plus an optional `abi_version` returning [`ABI_VERSION`], rejected on
//! mismatch. `create`/`destroy` transfer a [`PluginEntry`]; host and
//! plugin are built against the same crate, so the boxed trait object
//! inside stays within one Rust ABI. The [`export_plugin!`] macro emits
//! all of this for plugin authors.

use crate::error::{Result, RtError};
use crate::plugin::api::PluginModule;
use crate::plugin::{Plugin, PluginInfo};
use libloading::Library;
use std::ffi::{c_char, CStr};
use std::path::Path;
use std::sync::Arc;

/// Host/plugin contract revision. Bumped whenever the capability traits
/// or [`PluginEntry`] change shape.
pub const ABI_VERSION: u32 = 1;

/// Encode major.minor.patch as `0xMMmmpppp`.
pub const fn encode_version(major: u8, minor: u8, patch: u16) -> u32 {
    ((major as u32) << 24) | ((minor as u32) << 16) | patch as u32
}

/// Split an encoded version back into major.minor.patch.
pub const fn decode_version(version: u32) -> (u8, u8, u16) {
    ((version >> 24) as u8, (version >> 16) as u8, version as u16)
}

/// The object transferred across the library boundary by `create`.
pub struct PluginEntry {
    pub module: Box<dyn PluginModule>,
}

type CreateFn = unsafe extern "C" fn() -> *mut PluginEntry;
type DestroyFn = unsafe extern "C" fn(*mut PluginEntry);
type TextFn = unsafe extern "C" fn() -> *const c_char;
type VersionFn = unsafe extern "C" fn() -> u32;

/// Emit the entry symbols for a plugin crate.
///
/// ```ignore
/// reyer_rt::export_plugin!(SaccadeFilter::new, "SaccadeFilter", "lab", "FOAW velocity filter", 0x0001_0000);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($ctor:expr, $name:literal, $author:literal, $description:literal, $version:expr) => {
        #[no_mangle]
        pub extern "C" fn abi_version() -> u32 {
            $crate::plugin::ABI_VERSION
        }

        #[no_mangle]
        pub extern "C" fn create() -> *mut $crate::plugin::loader::PluginEntry {
            Box::into_raw(Box::new($crate::plugin::loader::PluginEntry {
                module: Box::new($ctor()),
            }))
        }

        /// # Safety
        /// `entry` must be a pointer previously returned by `create`.
        #[no_mangle]
        pub unsafe extern "C" fn destroy(entry: *mut $crate::plugin::loader::PluginEntry) {
            if !entry.is_null() {
                drop(Box::from_raw(entry));
            }
        }

        #[no_mangle]
        pub extern "C" fn name() -> *const std::ffi::c_char {
            concat!($name, "\0").as_ptr() as *const std::ffi::c_char
        }

        #[no_mangle]
        pub extern "C" fn author() -> *const std::ffi::c_char {
            concat!($author, "\0").as_ptr() as *const std::ffi::c_char
        }

        #[no_mangle]
        pub extern "C" fn description() -> *const std::ffi::c_char {
            concat!($description, "\0").as_ptr() as *const std::ffi::c_char
        }

        #[no_mangle]
        pub extern "C" fn version() -> u32 {
            $version
        }
    };
}

/// Module wrapper that routes destruction back through the library's
/// `destroy` symbol.
struct DylibModule {
    entry: *mut PluginEntry,
    destroy: DestroyFn,
}

// The inner module is Send + Sync by trait bound; the raw pointer is an
// owning pointer used exclusively through &self.
unsafe impl Send for DylibModule {}
unsafe impl Sync for DylibModule {}

impl DylibModule {
    fn module(&self) -> &dyn PluginModule {
        unsafe { (*self.entry).module.as_ref() }
    }
}

impl PluginModule for DylibModule {
    fn as_lifecycle(&self) -> Option<&dyn crate::plugin::Lifecycle> {
        self.module().as_lifecycle()
    }
    fn as_configurable(&self) -> Option<&dyn crate::plugin::Configurable> {
        self.module().as_configurable()
    }
    fn as_source(&self) -> Option<&dyn crate::plugin::SampleSource> {
        self.module().as_source()
    }
    fn as_stage(&self) -> Option<&dyn crate::plugin::SampleStage> {
        self.module().as_stage()
    }
    fn as_sink(&self) -> Option<&dyn crate::plugin::SampleSink> {
        self.module().as_sink()
    }
    fn as_calibration(&self) -> Option<&dyn crate::plugin::Calibration> {
        self.module().as_calibration()
    }
    fn as_render(&self) -> Option<&dyn crate::plugin::RenderTask> {
        self.module().as_render()
    }
}

impl Drop for DylibModule {
    fn drop(&mut self) {
        unsafe { (self.destroy)(self.entry) };
    }
}

/// Whether a file looks like a loadable plugin library on this platform.
pub fn is_plugin_library(path: &Path) -> bool {
    let extension = path.extension().and_then(|e| e.to_str());
    match extension {
        Some("so") => cfg!(target_os = "linux"),
        Some("dylib") => cfg!(target_os = "macos"),
        Some("dll") => cfg!(target_os = "windows"),
        _ => false,
    }
}

/// Load one plugin library and instantiate its module.
pub fn load(path: &Path) -> Result<Plugin> {
    if !path.exists() {
        return Err(RtError::NotFound(format!(
            "plugin library {} does not exist",
            path.display()
        )));
    }

    let library = unsafe { Library::new(path) }.map_err(|e| {
        RtError::ExecutableFormat(format!("failed to load {}: {e}", path.display()))
    })?;

    let resolve_failure = |symbol: &str, e: libloading::Error| {
        RtError::ExecutableFormat(format!(
            "{}: missing entry symbol `{symbol}`: {e}",
            path.display()
        ))
    };

    unsafe {
        if let Ok(abi) = library.get::<VersionFn>(b"abi_version\0") {
            let found = abi();
            if found != ABI_VERSION {
                return Err(RtError::ExecutableFormat(format!(
                    "{}: ABI revision {found} does not match host revision {ABI_VERSION}",
                    path.display()
                )));
            }
        }

        let create = *library
            .get::<CreateFn>(b"create\0")
            .map_err(|e| resolve_failure("create", e))?;
        let destroy = *library
            .get::<DestroyFn>(b"destroy\0")
            .map_err(|e| resolve_failure("destroy", e))?;
        let name = *library
            .get::<TextFn>(b"name\0")
            .map_err(|e| resolve_failure("name", e))?;
        let author = *library
            .get::<TextFn>(b"author\0")
            .map_err(|e| resolve_failure("author", e))?;
        let description = *library
            .get::<TextFn>(b"description\0")
            .map_err(|e| resolve_failure("description", e))?;
        let version = *library
            .get::<VersionFn>(b"version\0")
            .map_err(|e| resolve_failure("version", e))?;

        let info = PluginInfo {
            name: text_symbol(name(), path)?,
            author: text_symbol(author(), path)?,
            description: text_symbol(description(), path)?,
            version: version(),
        };

        let entry = create();
        if entry.is_null() {
            return Err(RtError::ExecutableFormat(format!(
                "{}: create() returned null",
                path.display()
            )));
        }

        let module = Box::new(DylibModule { entry, destroy });
        Ok(Plugin::from_library(
            module,
            info,
            path.to_path_buf(),
            Arc::new(library),
        ))
    }
}

unsafe fn text_symbol(ptr: *const c_char, path: &Path) -> Result<String> {
    if ptr.is_null() {
        return Err(RtError::ExecutableFormat(format!(
            "{}: metadata symbol returned null",
            path.display()
        )));
    }
    Ok(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}
