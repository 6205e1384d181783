//! Symbol scopes: pseudo-handles that search a set of images instead of one
//!
//! Apple loaders implement all four scopes natively through sentinel
//! handles. On Linux `DEFAULT` and `NEXT` are native, while `SELF` and
//! `MAIN_ONLY` are resolved through a real handle and then checked against
//! the image `dladdr` reports as owning the address.

use super::last_error;
use super::rtld;
use crate::error::{Error, Result};
use std::ffi::CStr;
use std::fmt;

/// Sentinel lookup target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Images loaded after the caller's image
    Next,
    /// Every non-local image, in load order
    Default,
    /// The caller's own image, then `Next`
    SelfImage,
    /// The main executable only
    MainOnly,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::Next, Scope::Default, Scope::SelfImage, Scope::MainOnly];

    /// Darwin sentinel handle value
    #[inline]
    pub const fn sentinel(self) -> usize {
        match self {
            Self::Next => !0,
            Self::Default => !1,
            Self::SelfImage => !2,
            Self::MainOnly => !4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Next => "NEXT",
            Self::Default => "DEFAULT",
            Self::SelfImage => "SELF",
            Self::MainOnly => "MAIN_ONLY",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `dlsym` on a real or sentinel handle; the error read decides the outcome
unsafe fn sym(handle: usize, name: &CStr) -> Result<usize> {
    let addr = rtld::dlsym(handle, name);
    match last_error::take_native() {
        Some(msg) => Err(Error::Native(msg)),
        None => Ok(addr),
    }
}

/// Resolve `name` in `scope`. The caller holds a pinned context and has
/// reset the error state.
#[cfg(target_vendor = "apple")]
pub(super) unsafe fn resolve(scope: Scope, name: &CStr) -> Result<usize> {
    sym(scope.sentinel(), name)
}

#[cfg(target_os = "linux")]
pub(super) unsafe fn resolve(scope: Scope, name: &CStr) -> Result<usize> {
    match scope {
        Scope::Next => sym(libc::RTLD_NEXT as usize, name),
        Scope::Default => sym(libc::RTLD_DEFAULT as usize, name),
        Scope::SelfImage => emulated::resolve_self(name),
        Scope::MainOnly => emulated::resolve_main(name),
    }
}

#[cfg(not(any(target_vendor = "apple", target_os = "linux")))]
pub(super) unsafe fn resolve(_scope: Scope, _name: &CStr) -> Result<usize> {
    Err(Error::UnsupportedArchitecture("symbol scopes on this platform"))
}

#[cfg(target_os = "linux")]
mod emulated {
    use super::*;
    use std::ffi::CString;

    /// Base address of the image containing `addr`
    fn owner(addr: usize) -> Option<usize> {
        rtld::dladdr(addr).map(|info| info.fbase)
    }

    fn main_base() -> Result<usize> {
        // SAFETY: getauxval has no preconditions
        let phdr = unsafe { libc::getauxval(libc::AT_PHDR) } as usize;
        owner(phdr).ok_or_else(|| Error::Native("cannot locate the main executable".into()))
    }

    /// Base and path of the image this crate is linked into
    fn this_image() -> Result<(usize, Option<String>)> {
        let anchor = main_base as fn() -> Result<usize> as usize;
        rtld::dladdr(anchor)
            .map(|info| (info.fbase, info.fname))
            .ok_or_else(|| Error::Native("cannot locate the calling image".into()))
    }

    /// Open a handle on `path`, or on the main program for `None`, look
    /// `name` up in it and close it again
    unsafe fn sym_in(path: Option<&CStr>, no_load: bool, name: &CStr) -> Result<usize> {
        let mut mode = libc::RTLD_LAZY;
        if no_load {
            mode |= libc::RTLD_NOLOAD;
        }
        let handle = rtld::dlopen(path, mode);
        if handle == 0 {
            let msg = last_error::take_native()
                .unwrap_or_else(|| "cannot open a handle on the image".to_string());
            return Err(Error::Native(msg));
        }
        let found = sym(handle, name);
        rtld::dlclose(handle);
        last_error::take_native();
        found
    }

    pub(super) unsafe fn resolve_self(name: &CStr) -> Result<usize> {
        let main = main_base()?;
        let (base, fname) = this_image()?;

        let found = if base == main {
            sym_in(None, false, name)
        } else {
            match fname {
                Some(fname) => {
                    let path = CString::new(fname)?;
                    sym_in(Some(&path), true, name)
                }
                None => Err(Error::Native("calling image has no path".into())),
            }
        };

        match found {
            Ok(addr) if addr == 0 || owner(addr) == Some(base) => Ok(addr),
            _ => sym(libc::RTLD_NEXT as usize, name),
        }
    }

    pub(super) unsafe fn resolve_main(name: &CStr) -> Result<usize> {
        let main = main_base()?;
        let addr = sym_in(None, false, name)?;
        if addr == 0 || owner(addr) == Some(main) {
            Ok(addr)
        } else {
            Err(Error::Native(format!(
                "{}: symbol not found in the main executable",
                name.to_string_lossy()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert_eq!(Scope::Next.sentinel(), usize::MAX);
        assert_eq!(Scope::Default.sentinel() as isize, -2);
        assert_eq!(Scope::SelfImage.sentinel() as isize, -3);
        assert_eq!(Scope::MainOnly.sentinel() as isize, -5);
        assert_eq!(Scope::SelfImage.to_string(), "SELF");
    }
}
