//! Interoperability - call native functions and get called back
//!
//! Design: frames are built by a pure allocator from a convention
//! descriptor, then executed by an inline-assembly trampoline.
//!
//! Architecture:
//! - `types.rs` - argument and output sum types (Arg, Out, ArgKind)
//! - `abi.rs` - convention descriptors, register allocation, frames
//! - `marshal.rs` - Rust values ↔ register words
//! - `context.rs` - pinned execution context, foreign-call state
//! - `call.rs` - the native invoker
//! - `callback.rs` - reverse crossing from native code
//! - `cstr.rs` - NUL-terminated string helpers

mod types;
mod abi;
mod marshal;
mod call;
pub mod context;
pub mod callback;
pub mod cstr;

pub use types::{Arg, ArgKind, Out, RegisterClass};
pub use abi::{ConventionDescriptor, Frame, RegisterAllocator, Slot, SpillPolicy, MAX_REGISTER_SLOTS};
pub use marshal::{decode, encode, ReturnRegisters};
pub use call::{call, invoke_frame, FunctionCall};
pub use context::{ExecutionHooks, PinnedContext};
pub use callback::{CallbackContext, Event, EventPath, NativeStream, PayloadFlags, SourceRef, Subscription};

use crate::config::{InvokeConfig, SpillMode};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

static DEFAULT_CONVENTION: Lazy<RwLock<ConventionDescriptor>> =
    Lazy::new(|| RwLock::new(ConventionDescriptor::host()));

static CALLS_MADE: AtomicUsize = AtomicUsize::new(0);
static CALLBACKS_DISPATCHED: AtomicUsize = AtomicUsize::new(0);
static LIBRARIES_LOADED: AtomicUsize = AtomicUsize::new(0);
static LOADER_ERRORS: AtomicUsize = AtomicUsize::new(0);

/// Initialize interop subsystem from configuration
pub fn init(config: &InvokeConfig) -> Result<()> {
    let descriptor = ConventionDescriptor::by_name(&config.convention).ok_or_else(|| {
        Error::invalid(format!("unknown calling convention '{}'", config.convention))
    })?;
    let spill = match config.spill {
        SpillMode::Stack => SpillPolicy::Stack,
        SpillMode::Reject => SpillPolicy::Reject,
    };
    set_default_convention(descriptor.with_spill(spill));
    Ok(())
}

/// Convention used by `call` and `FunctionCall::new`
#[inline]
pub fn default_convention() -> ConventionDescriptor {
    *DEFAULT_CONVENTION.read()
}

pub fn set_default_convention(descriptor: ConventionDescriptor) {
    *DEFAULT_CONVENTION.write() = descriptor;
}

#[inline]
pub(crate) fn record_call() {
    CALLS_MADE.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_callback() {
    CALLBACKS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_library_loaded() {
    LIBRARIES_LOADED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_loader_error() {
    LOADER_ERRORS.fetch_add(1, Ordering::Relaxed);
}

/// Get interop statistics
pub fn stats() -> InteropStats {
    InteropStats {
        calls_made: CALLS_MADE.load(Ordering::Relaxed),
        callbacks_dispatched: CALLBACKS_DISPATCHED.load(Ordering::Relaxed),
        libraries_loaded: LIBRARIES_LOADED.load(Ordering::Relaxed),
        loader_errors: LOADER_ERRORS.load(Ordering::Relaxed),
    }
}

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteropStats {
    pub calls_made: usize,
    pub callbacks_dispatched: usize,
    pub libraries_loaded: usize,
    pub loader_errors: usize,
}

#[cfg(test)]
mod tests;
