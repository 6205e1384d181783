//! Execution-context bookkeeping around native calls
//!
//! Loader error state and other C library thread-locals belong to the OS
//! thread, so every native call and every loader operation holds a
//! `PinnedContext` for its whole duration. The guard is `!Send`: it cannot
//! migrate to another thread while held.
//!
//! While control is inside native code the context is also marked as being
//! in a foreign call. A cooperative scheduler that multiplexes logical
//! threads onto OS threads can observe both transitions through
//! `ExecutionHooks` and compensate, for example by starting a replacement
//! worker, without breaking the pinning.

use core::cell::Cell;
use core::marker::PhantomData;
use once_cell::sync::OnceCell;
use std::thread::{self, ThreadId};

/// Scheduler notifications
///
/// Pin and unpin are reported only for the outermost pin on a thread;
/// nested pins are counted.
pub trait ExecutionHooks: Send + Sync + 'static {
    fn pin(&self) {}
    fn unpin(&self) {}
    fn enter_foreign(&self) {}
    fn exit_foreign(&self) {}
}

static HOOKS: OnceCell<Box<dyn ExecutionHooks>> = OnceCell::new();

thread_local! {
    static PIN_DEPTH: Cell<usize> = const { Cell::new(0) };
    static IN_FOREIGN: Cell<bool> = const { Cell::new(false) };
}

/// Install process-wide scheduler hooks. Can only be done once; the hooks
/// are handed back if some were already installed.
pub fn install_hooks(hooks: Box<dyn ExecutionHooks>) -> Result<(), Box<dyn ExecutionHooks>> {
    HOOKS.set(hooks)
}

#[inline]
fn hooks() -> Option<&'static dyn ExecutionHooks> {
    HOOKS.get().map(|h| h.as_ref())
}

/// Whether the current thread holds at least one pinned context
#[inline]
pub fn is_pinned() -> bool {
    PIN_DEPTH.with(|d| d.get() > 0)
}

/// Whether the current thread is executing native code on behalf of a call
#[inline]
pub fn in_foreign_call() -> bool {
    IN_FOREIGN.with(|f| f.get())
}

/// Calling thread pinned to its OS thread
pub struct PinnedContext {
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl PinnedContext {
    /// Pin the calling thread until the guard drops
    pub fn acquire() -> Self {
        let depth = PIN_DEPTH.with(|d| {
            let depth = d.get();
            d.set(depth + 1);
            depth
        });
        if depth == 0 {
            if let Some(h) = hooks() {
                h.pin();
            }
        }
        Self {
            thread: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    /// Thread this context is pinned to
    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Mark the context as inside a native call until the guard drops
    pub fn enter_foreign(&self) -> ForeignCall<'_> {
        let was = IN_FOREIGN.with(|f| f.replace(true));
        if !was {
            if let Some(h) = hooks() {
                h.enter_foreign();
            }
        }
        ForeignCall { _ctx: self, was }
    }
}

impl Drop for PinnedContext {
    fn drop(&mut self) {
        let depth = PIN_DEPTH.with(|d| {
            let depth = d.get() - 1;
            d.set(depth);
            depth
        });
        if depth == 0 {
            if let Some(h) = hooks() {
                h.unpin();
            }
        }
    }
}

/// Foreign-call state for the lifetime of a crossing into native code
pub struct ForeignCall<'a> {
    _ctx: &'a PinnedContext,
    was: bool,
}

impl Drop for ForeignCall<'_> {
    fn drop(&mut self) {
        IN_FOREIGN.with(|f| f.set(self.was));
        if !self.was {
            if let Some(h) = hooks() {
                h.exit_foreign();
            }
        }
    }
}

/// Temporarily leave the foreign-call state while native code calls back
/// into Rust on this thread. A no-op on threads not inside a native call.
pub fn reenter_managed() -> ManagedSection {
    let was = IN_FOREIGN.with(|f| f.replace(false));
    if was {
        if let Some(h) = hooks() {
            h.exit_foreign();
        }
    }
    ManagedSection {
        was,
        _not_send: PhantomData,
    }
}

/// Managed execution nested inside a native call
pub struct ManagedSection {
    was: bool,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ManagedSection {
    fn drop(&mut self) {
        if self.was {
            IN_FOREIGN.with(|f| f.set(true));
            if let Some(h) = hooks() {
                h.enter_foreign();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_nesting() {
        assert!(!is_pinned());
        let outer = PinnedContext::acquire();
        {
            let _inner = PinnedContext::acquire();
            assert!(is_pinned());
        }
        assert!(is_pinned());
        assert_eq!(outer.thread(), thread::current().id());
        drop(outer);
        assert!(!is_pinned());
    }

    #[test]
    fn test_foreign_state_restored() {
        let ctx = PinnedContext::acquire();
        assert!(!in_foreign_call());
        {
            let _call = ctx.enter_foreign();
            assert!(in_foreign_call());
            {
                let _managed = reenter_managed();
                assert!(!in_foreign_call());
            }
            assert!(in_foreign_call());
        }
        assert!(!in_foreign_call());
    }

    #[test]
    fn test_released_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let ctx = PinnedContext::acquire();
            let _call = ctx.enter_foreign();
            panic!("unwinding through a pinned context");
        });
        assert!(result.is_err());
        assert!(!is_pinned());
        assert!(!in_foreign_call());
    }

    #[test]
    fn test_state_is_per_thread() {
        let _ctx = PinnedContext::acquire();
        let other = thread::spawn(is_pinned).join().unwrap();
        assert!(!other);
    }
}
