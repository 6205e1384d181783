//! Dynamic loader - open images, resolve symbols, read the error state
//!
//! Every operation runs inside a `PinnedContext` and clears the thread's
//! error state first. A failed operation returns its error and also leaves
//! it readable once through `last_error`. Symbol lookups are decided by the
//! error read after `dlsym`, never by a null check: a symbol may legitimately
//! resolve to address zero.
//!
//! Architecture:
//! - `mode.rs` - load mode bit set and host translation
//! - `scope.rs` - NEXT / DEFAULT / SELF / MAIN_ONLY pseudo-handles
//! - `last_error.rs` - read-and-clear error channel
//! - `rtld.rs` - `dl*` wrappers

mod last_error;
mod mode;
mod rtld;
mod scope;

pub use last_error::last_error;
pub use mode::Mode;
pub use scope::Scope;

use crate::config::LoaderConfig;
use crate::error::{Error, Result};
use crate::interop::{self, cstr, Arg, Out, PinnedContext};
use crate::logging::{self, perf};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};

struct LoaderSettings {
    default_mode: Mode,
    search_paths: Vec<PathBuf>,
}

static SETTINGS: Lazy<RwLock<LoaderSettings>> = Lazy::new(|| {
    RwLock::new(LoaderSettings {
        default_mode: Mode::LAZY | Mode::GLOBAL,
        search_paths: Vec::new(),
    })
});

/// Images opened through this crate and not yet closed, by native handle
static OPEN_IMAGES: Lazy<DashMap<usize, ImageRecord>> = Lazy::new(DashMap::new);

/// Apply the `[loader]` configuration section
pub fn init(config: &LoaderConfig) {
    let mut settings = SETTINGS.write();
    settings.default_mode = Mode::from_flags(&config.default_mode);
    settings.search_paths = config.search_paths.clone();
}

/// Mode used by `Image::open_default`
pub fn default_mode() -> Mode {
    SETTINGS.read().default_mode
}

/// Diagnostics entry for one open native handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub path: String,
    pub handle: usize,
    /// Opens through this crate not yet matched by a close
    pub references: usize,
}

/// Snapshot of the images currently held open through this crate
pub fn open_images() -> Vec<ImageRecord> {
    let mut images: Vec<_> = OPEN_IMAGES.iter().map(|e| e.value().clone()).collect();
    images.sort_by(|a, b| a.path.cmp(&b.path));
    images
}

fn register_open(handle: usize, path: &str) {
    OPEN_IMAGES
        .entry(handle)
        .and_modify(|r| r.references += 1)
        .or_insert_with(|| ImageRecord {
            path: path.to_string(),
            handle,
            references: 1,
        });
}

fn register_close(handle: usize) {
    OPEN_IMAGES.remove_if_mut(&handle, |_, r| {
        r.references = r.references.saturating_sub(1);
        r.references == 0
    });
}

/// Candidate paths for `path`: configured search directories first for
/// bare names, then the name itself for the system search
fn candidates(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    if !path.contains('/') {
        for dir in SETTINGS.read().search_paths.iter() {
            let full = dir.join(path);
            if full.is_file() {
                out.push(full.to_string_lossy().into_owned());
            }
        }
    }
    out.push(path.to_string());
    out
}

fn fail(op: &str, err: Error) -> Error {
    logging::log_loader_error(op, &err.to_string());
    last_error::record(err)
}

/// An open native image
///
/// Closed when dropped; `close` does the same but reports failure.
pub struct Image {
    handle: usize,
    path: String,
}

impl Image {
    /// Open the image at `path`
    ///
    /// Bare names are looked up in the configured search directories first.
    /// When every candidate fails, the message of the first one is reported.
    /// Fails with the loader's message if the file is missing or
    /// incompatible, or if `mode` contains `NO_LOAD` and the image is not
    /// loaded yet.
    pub fn open(path: &str, mode: Mode) -> Result<Self> {
        let _perf = perf::track("loader.open");
        let _ctx = PinnedContext::acquire();
        last_error::reset();
        logging::log_loader_op("open", path);

        let native_mode = mode.to_native();
        let mut failure = None;
        for candidate in candidates(path) {
            let c_path = cstr::to_c_string(&candidate)?;
            // SAFETY: the path is NUL-terminated and outlives the call
            let handle = unsafe { rtld::dlopen(Some(&c_path), native_mode) };
            if handle != 0 {
                // Stale messages from earlier candidates are not this open's
                last_error::take_native();
                register_open(handle, &candidate);
                interop::record_library_loaded();
                return Ok(Self {
                    handle,
                    path: candidate,
                });
            }
            // The first candidate's message is the most specific one
            let msg = last_error::take_native();
            failure = failure.or(msg);
        }

        let msg = failure.unwrap_or_else(|| format!("{}: cannot open image", path));
        Err(fail("open", Error::Native(msg)))
    }

    /// Open with the configured default mode
    pub fn open_default(path: &str) -> Result<Self> {
        Self::open(path, default_mode())
    }

    /// Path the image was opened with
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Native handle
    #[inline]
    pub fn handle(&self) -> usize {
        self.handle
    }

    /// Resolve `name` in this image and its dependencies
    pub fn lookup(&self, name: &str) -> Result<Symbol<'_>> {
        let c_name = cstr::to_c_string(name)?;
        let _ctx = PinnedContext::acquire();
        last_error::reset();
        logging::log_loader_op("lookup", name);

        // SAFETY: the handle is open for as long as `self` exists
        let addr = unsafe { rtld::dlsym(self.handle, &c_name) };
        match last_error::take_native() {
            Some(msg) => Err(fail("lookup", Error::Native(msg))),
            None => Ok(Symbol {
                origin: Origin::Image(self),
                name: name.to_string(),
                addr,
            }),
        }
    }

    /// Release this reference to the image
    ///
    /// The image is unloaded once the loader's reference count drops to
    /// zero, so other holders may keep it mapped.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let handle = std::mem::replace(&mut self.handle, 0);
        if handle == 0 {
            return Ok(());
        }
        let _ctx = PinnedContext::acquire();
        last_error::reset();
        logging::log_loader_op("close", &self.path);

        register_close(handle);
        // SAFETY: each `Image` owns one reference and releases it once
        let rc = unsafe { rtld::dlclose(handle) };
        let native = last_error::take_native();
        if rc != 0 {
            let msg = native.unwrap_or_else(|| format!("{}: cannot close image", self.path));
            return Err(fail("close", Error::Native(msg)));
        }
        Ok(())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        // Failure stays readable through last_error
        let _ = self.release();
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("path", &self.path)
            .field("handle", &(self.handle as *const ()))
            .finish()
    }
}

impl Scope {
    /// Resolve `name` within this scope
    pub fn lookup(self, name: &str) -> Result<Symbol<'static>> {
        let c_name = cstr::to_c_string(name)?;
        let _ctx = PinnedContext::acquire();
        last_error::reset();
        logging::log_loader_op(self.name(), name);

        // SAFETY: name is NUL-terminated; scope handles are always valid
        match unsafe { scope::resolve(self, &c_name) } {
            Ok(addr) => Ok(Symbol {
                origin: Origin::Scope(self),
                name: name.to_string(),
                addr,
            }),
            Err(err) => Err(fail("lookup", err)),
        }
    }
}

/// Resolve `name` in the `DEFAULT` scope
pub fn lookup(name: &str) -> Result<Symbol<'static>> {
    Scope::Default.lookup(name)
}

/// Resolve `name` in the `NEXT` scope
pub fn lookup_next(name: &str) -> Result<Symbol<'static>> {
    Scope::Next.lookup(name)
}

/// Resolve `name` in the `SELF` scope
pub fn lookup_self(name: &str) -> Result<Symbol<'static>> {
    Scope::SelfImage.lookup(name)
}

/// Resolve `name` in the `MAIN_ONLY` scope
pub fn lookup_main(name: &str) -> Result<Symbol<'static>> {
    Scope::MainOnly.lookup(name)
}

#[derive(Debug, Clone, Copy)]
enum Origin<'a> {
    Image(&'a Image),
    Scope(Scope),
}

/// A resolved symbol
///
/// Borrows the image it came from, so it cannot outlive a close.
#[derive(Debug, Clone)]
pub struct Symbol<'a> {
    origin: Origin<'a>,
    name: String,
    addr: usize,
}

impl<'a> Symbol<'a> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved address; zero is a valid result
    #[inline]
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Image the symbol was looked up in, if not a scope
    #[inline]
    pub fn image(&self) -> Option<&'a Image> {
        match self.origin {
            Origin::Image(image) => Some(image),
            Origin::Scope(_) => None,
        }
    }

    /// Scope the symbol was looked up in, if not an image
    #[inline]
    pub fn scope(&self) -> Option<Scope> {
        match self.origin {
            Origin::Scope(scope) => Some(scope),
            Origin::Image(_) => None,
        }
    }

    /// Call the symbol as a function with the default convention
    ///
    /// # Safety
    /// See `FunctionCall::invoke`.
    pub unsafe fn call(&self, out: Out<'_>, args: &[Arg<'_>]) -> Result<()> {
        interop::call(self.addr, out, args)
    }
}

/// What `addr` reports about an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    /// Path of the owning image
    pub image_path: Option<String>,
    /// Load address of the owning image
    pub image_base: usize,
    /// Nearest symbol at or below the address
    pub symbol_name: Option<String>,
    pub symbol_addr: usize,
}

/// Find the image owning `address`
pub fn addr(address: usize) -> Result<AddrInfo> {
    let _ctx = PinnedContext::acquire();
    last_error::reset();

    match rtld::dladdr(address) {
        Some(info) => Ok(AddrInfo {
            image_path: info.fname,
            image_base: info.fbase,
            symbol_name: info.sname,
            symbol_addr: info.saddr,
        }),
        None => Err(last_error::record(Error::NotFound)),
    }
}

/// Check whether the image at `path` could be opened, without keeping it
/// loaded; the loader's message on failure
pub fn preflight(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref().to_string_lossy();
    let c_path = cstr::to_c_string(&path)?;
    let _ctx = PinnedContext::acquire();
    last_error::reset();
    logging::log_loader_op("preflight", &path);

    // SAFETY: the path is NUL-terminated and outlives the call
    if unsafe { rtld::preflight(&c_path) } {
        return Ok(());
    }
    let msg = last_error::take_native()
        .unwrap_or_else(|| format!("{}: image cannot be loaded", path));
    Err(fail("preflight", Error::Native(msg)))
}

/// `preflight` as a yes/no answer
pub fn is_loadable(path: impl AsRef<Path>) -> bool {
    preflight(path).is_ok()
}
