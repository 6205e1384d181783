//! Reverse crossing - native code calling back into Rust
//!
//! Native event APIs take a function pointer plus an opaque context pointer
//! and later call `fn(source, context, count, paths, flags, ids)`, often from
//! a thread of their own. `CallbackContext::trampoline` is such a function:
//! it collects its arguments into a fixed-layout `EventBlock`, recovers the
//! long-lived `CallbackContext` from the context pointer, and dispatches all
//! events of the crossing to the registered closure in one call, in the order
//! native code supplied them.
//!
//! The context is owned by the `Subscription` representing the native
//! stream. Native code holds only a raw pointer to it, so the subscription
//! tears the stream down before the context can be released.

use super::context;
use super::cstr;
use crate::error::{Error, Result};
use crate::logging;
use core::ffi::{c_char, c_void};
use std::fmt;
use std::ops::BitOr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Opaque reference to the native object that raised the events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceRef(*const c_void);

impl SourceRef {
    #[inline]
    pub fn as_ptr(self) -> *const c_void {
        self.0
    }
}

/// Arguments of one crossing, as native code passed them
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EventBlock {
    pub source: *const c_void,
    /// Pointer registered alongside the trampoline
    pub context: *const c_void,
    pub count: usize,
    /// `const char*[count]`, or one opaque object when the payload uses
    /// object references
    pub paths: *const c_void,
    /// `u32[count]`
    pub flags: *const u32,
    /// `u64[count]`
    pub ids: *const u64,
}

/// Signature of the native-callable entry point
pub type EntryPoint = unsafe extern "C" fn(
    source: *const c_void,
    context: *const c_void,
    count: usize,
    paths: *const c_void,
    flags: *const u32,
    ids: *const u64,
);

/// Flags describing the payload layout of a subscription
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PayloadFlags(u32);

impl PayloadFlags {
    /// Paths are an array of `const char*`
    pub const NONE: Self = Self(0);
    /// Paths are a single opaque container object instead of C strings
    pub const OBJECT_REFS: Self = Self(0x1);
    /// Each path entry carries extended data; implies `OBJECT_REFS`
    pub const EXTENDED_DATA: Self = Self(0x40);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    fn uses_object_refs(self) -> bool {
        self.contains(Self::OBJECT_REFS) || self.contains(Self::EXTENDED_DATA)
    }
}

impl BitOr for PayloadFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for PayloadFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadFlags({:#x})", self.0)
    }
}

/// Path of one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPath {
    Text(String),
    /// Entry `index` of the opaque container at address `container`
    Object { container: usize, index: usize },
    Missing,
}

/// One decoded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: u64,
    pub flags: u32,
    pub path: EventPath,
}

type CallbackFn<U> = dyn Fn(SourceRef, &U, &[Event]) + Send + Sync + 'static;

/// Callback, user info and payload flags for one subscription
pub struct CallbackContext<U> {
    callback: Box<CallbackFn<U>>,
    info: U,
    flags: PayloadFlags,
}

impl<U: Send + Sync + 'static> CallbackContext<U> {
    pub fn new<F>(callback: F, info: U, flags: PayloadFlags) -> Arc<Self>
    where
        F: Fn(SourceRef, &U, &[Event]) + Send + Sync + 'static,
    {
        Arc::new(Self {
            callback: Box::new(callback),
            info,
            flags,
        })
    }

    #[inline]
    pub fn info(&self) -> &U {
        &self.info
    }

    #[inline]
    pub fn flags(&self) -> PayloadFlags {
        self.flags
    }

    /// Address of the native-callable entry point for this user-info type
    #[inline]
    pub fn trampoline() -> usize {
        entry::<U> as EntryPoint as usize
    }

    /// Context pointer to register with native code next to the trampoline.
    /// Valid for as long as the `Arc` is alive.
    #[inline]
    pub fn context_ptr(this: &Arc<Self>) -> *const c_void {
        Arc::as_ptr(this) as *const c_void
    }
}

unsafe extern "C" fn entry<U: Send + Sync + 'static>(
    source: *const c_void,
    context: *const c_void,
    count: usize,
    paths: *const c_void,
    flags: *const u32,
    ids: *const u64,
) {
    let block = EventBlock {
        source,
        context,
        count,
        paths,
        flags,
        ids,
    };
    dispatch::<U>(&block);
}

/// Recover the context from `block` and run its callback
///
/// # Safety
/// `block.context` must be null or the context pointer of a live
/// `CallbackContext<U>`, and the payload arrays must hold `block.count`
/// entries each (or be null).
pub unsafe fn dispatch<U: Send + Sync + 'static>(block: &EventBlock) {
    if block.context.is_null() {
        logging::log_callback_error("null context pointer");
        return;
    }
    let ctx = &*(block.context as *const CallbackContext<U>);
    let _managed = context::reenter_managed();

    // Nothing below may unwind into native code
    let source = SourceRef(block.source);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let events = decode_events(block, ctx.flags);
        logging::log_callback_dispatch(block.source as usize, events.len());
        (ctx.callback)(source, &ctx.info, &events)
    }));
    super::record_callback();

    if let Err(payload) = result {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        logging::log_callback_error(&msg);
    }
}

unsafe fn decode_events(block: &EventBlock, flags: PayloadFlags) -> Vec<Event> {
    let mut events = Vec::with_capacity(block.count);
    for i in 0..block.count {
        let path = if block.paths.is_null() {
            EventPath::Missing
        } else if flags.uses_object_refs() {
            EventPath::Object {
                container: block.paths as usize,
                index: i,
            }
        } else {
            let p = *(block.paths as *const *const c_char).add(i);
            match cstr::string_from_ptr(p) {
                Some(s) => EventPath::Text(s),
                None => EventPath::Missing,
            }
        };

        let event_flags = if block.flags.is_null() { 0 } else { *block.flags.add(i) };
        let id = if block.ids.is_null() { 0 } else { *block.ids.add(i) };

        events.push(Event {
            id,
            flags: event_flags,
            path,
        });
    }
    events
}

/// Native stream or subscription that references a callback context
pub trait NativeStream {
    /// Stop delivering events and release the native object. After this
    /// returns native code must no longer call the trampoline.
    fn teardown(&mut self);
}

/// A native stream coupled with the callback context it references
pub struct Subscription<S: NativeStream, U: Send + Sync + 'static> {
    stream: Option<S>,
    context: Arc<CallbackContext<U>>,
}

impl<S: NativeStream, U: Send + Sync + 'static> Subscription<S, U> {
    /// Create the native stream. `create` receives the trampoline address
    /// and the context pointer to hand to the native API, and returns the
    /// stream, or `None` if the native API failed.
    pub fn create<F>(context: Arc<CallbackContext<U>>, create: F) -> Result<Self>
    where
        F: FnOnce(usize, *const c_void) -> Option<S>,
    {
        let trampoline = CallbackContext::<U>::trampoline();
        let ctx_ptr = CallbackContext::context_ptr(&context);
        match create(trampoline, ctx_ptr) {
            Some(stream) => Ok(Self {
                stream: Some(stream),
                context,
            }),
            None => Err(Error::Native("native stream creation failed".into())),
        }
    }

    #[inline]
    pub fn stream(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    #[inline]
    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    #[inline]
    pub fn context(&self) -> &Arc<CallbackContext<U>> {
        &self.context
    }

    /// Tear the stream down now; equivalent to dropping
    pub fn close(self) {}
}

impl<S: NativeStream, U: Send + Sync + 'static> Drop for Subscription<S, U> {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.teardown();
        }
        // The context is released when the fields drop, after teardown
    }
}
