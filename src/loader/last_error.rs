//! Per-thread, read-and-clear loader error state
//!
//! The native loader keeps one error message per OS thread and clears it on
//! every read. Failures detected by the engine itself (emulated scope
//! lookups, failed closes) sit in a pending slot next to it with the same
//! semantics, so callers see one channel.

use super::rtld;
use crate::error::Error;
use crate::interop::PinnedContext;
use core::cell::RefCell;

thread_local! {
    static PENDING: RefCell<Option<Error>> = const { RefCell::new(None) };
}

/// Read and clear the last loader failure of the calling thread
///
/// A second read with no loader operation in between always returns `None`.
pub fn last_error() -> Option<Error> {
    let _ctx = PinnedContext::acquire();
    let pending = take_pending();
    let native = rtld::dlerror().map(Error::Native);
    pending.or(native)
}

/// Discard stale state before an operation whose outcome is decided by the
/// error read afterwards
pub(crate) fn reset() {
    take_pending();
    rtld::dlerror();
}

/// Consume the native message left by the operation that just ran
pub(crate) fn take_native() -> Option<String> {
    rtld::dlerror()
}

/// Record `err` as the thread's last failure and hand it back for returning
pub(crate) fn record(err: Error) -> Error {
    crate::interop::record_loader_error();
    PENDING.with(|p| *p.borrow_mut() = Some(err.clone()));
    err
}

fn take_pending() -> Option<Error> {
    PENDING.with(|p| p.borrow_mut().take())
}
