//! Thin wrappers over the host's `dl*` entry points
//!
//! Callers hold a `PinnedContext`: `dlerror` state is per OS thread.

use core::ffi::{c_int, c_void};
use std::ffi::CStr;

use crate::interop::cstr;

/// Information `dladdr` reports for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawAddrInfo {
    pub fname: Option<String>,
    pub fbase: usize,
    pub sname: Option<String>,
    pub saddr: usize,
}

#[inline]
pub(crate) unsafe fn dlopen(path: Option<&CStr>, mode: c_int) -> usize {
    let p = path.map_or(core::ptr::null(), |p| p.as_ptr());
    libc::dlopen(p, mode) as usize
}

#[inline]
pub(crate) unsafe fn dlsym(handle: usize, name: &CStr) -> usize {
    libc::dlsym(handle as *mut c_void, name.as_ptr()) as usize
}

#[inline]
pub(crate) unsafe fn dlclose(handle: usize) -> c_int {
    libc::dlclose(handle as *mut c_void)
}

/// Read and clear the native error message
pub(crate) fn dlerror() -> Option<String> {
    // SAFETY: dlerror returns null or a thread-local NUL-terminated string
    // that stays valid until the next dl* call on this thread
    unsafe { cstr::string_from_ptr(libc::dlerror()) }
}

/// Resolve the image and nearest symbol containing `addr`; `None` when no
/// loaded image owns it
pub(crate) fn dladdr(addr: usize) -> Option<RawAddrInfo> {
    let mut info = core::mem::MaybeUninit::<libc::Dl_info>::zeroed();
    // SAFETY: dladdr only inspects the loader's own tables; `info` is
    // written before a non-zero return
    let info = unsafe {
        if libc::dladdr(addr as *const c_void, info.as_mut_ptr()) == 0 {
            return None;
        }
        info.assume_init()
    };
    // SAFETY: names point into loader-owned storage of a loaded image
    unsafe {
        Some(RawAddrInfo {
            fname: cstr::string_from_ptr(info.dli_fname),
            fbase: info.dli_fbase as usize,
            sname: cstr::string_from_ptr(info.dli_sname),
            saddr: info.dli_saddr as usize,
        })
    }
}

/// Check that `path` could be opened, without keeping it loaded
#[cfg(target_vendor = "apple")]
pub(crate) unsafe fn preflight(path: &CStr) -> bool {
    extern "C" {
        fn dlopen_preflight(path: *const core::ffi::c_char) -> bool;
    }
    dlopen_preflight(path.as_ptr())
}

/// Check that `path` could be opened, without keeping it loaded. Already
/// loaded images are reported without touching their reference count.
#[cfg(not(target_vendor = "apple"))]
pub(crate) unsafe fn preflight(path: &CStr) -> bool {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let handle = dlopen(Some(path), libc::RTLD_LAZY | libc::RTLD_NOLOAD);
        if handle != 0 {
            dlclose(handle);
            return true;
        }
        // NO_LOAD failure is expected here; the trial open reports the real error
        dlerror();
    }
    let handle = dlopen(Some(path), libc::RTLD_LAZY | libc::RTLD_LOCAL);
    if handle == 0 {
        return false;
    }
    dlclose(handle);
    true
}
