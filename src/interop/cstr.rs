//! Helpers for native functions that take or return NUL-terminated strings

use crate::error::Result;
use core::ffi::c_char;
use std::ffi::{CStr, CString};

/// Copy of `s` with a terminator appended. Fails with `InvalidArgument` if
/// `s` already contains a NUL byte.
#[inline]
pub fn to_c_string(s: &str) -> Result<CString> {
    Ok(CString::new(s)?)
}

/// Copy a NUL-terminated string out of unmanaged memory. Returns `None` for
/// a null pointer; invalid UTF-8 is replaced.
///
/// # Safety
/// `p` must be null or point to a NUL-terminated string.
pub unsafe fn string_from_ptr(p: *const c_char) -> Option<String> {
    if p.is_null() {
        return None;
    }
    Some(CStr::from_ptr(p).to_string_lossy().into_owned())
}
