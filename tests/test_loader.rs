//! Symbol scopes against a symbol defined in this test executable
//!
//! `build.rs` links integration tests with `--export-dynamic` on Linux so
//! the marker below lands in the dynamic symbol table.

#![cfg(any(target_os = "linux", target_vendor = "apple"))]

use crosscall::loader::{self, Image, Mode, Scope};
use crosscall::Error;

#[no_mangle]
pub extern "C" fn crosscall_test_marker() -> u32 {
    0x5eed
}

fn marker_addr() -> usize {
    crosscall_test_marker as extern "C" fn() -> u32 as usize
}

#[test]
fn test_self_finds_own_symbol() {
    let sym = loader::lookup_self("crosscall_test_marker").unwrap();
    assert_eq!(sym.addr(), marker_addr());
    assert_eq!(sym.scope(), Some(Scope::SelfImage));
}

#[test]
fn test_next_skips_own_image() {
    let err = loader::lookup_next("crosscall_test_marker").unwrap_err();
    assert!(err.is_native());
    assert_eq!(loader::last_error(), Some(err));
    assert_eq!(loader::last_error(), None);
}

#[test]
fn test_default_finds_loaded_symbol() {
    let sym = loader::lookup("crosscall_test_marker").unwrap();
    assert_eq!(sym.addr(), marker_addr());
}

#[test]
fn test_main_only_finds_executable_symbol() {
    let sym = loader::lookup_main("crosscall_test_marker").unwrap();
    assert_eq!(sym.addr(), marker_addr());

    assert!(loader::lookup_main("crosscall_no_such_symbol_91c2").is_err());
    assert!(loader::last_error().is_some());
}

#[test]
fn test_self_falls_through_to_next() {
    let via_self = loader::lookup_self("getpid").unwrap();
    let via_next = loader::lookup_next("getpid").unwrap();
    assert_eq!(via_self.addr(), via_next.addr());
}

#[test]
fn test_every_scope_is_usable_without_open() {
    for scope in Scope::ALL {
        let result = scope.lookup("crosscall_no_such_symbol_91c2");
        assert!(matches!(result, Err(Error::Native(_))), "{}", scope);
        assert!(loader::last_error().is_some());
        assert_eq!(loader::last_error(), None);
    }
}

#[test]
fn test_addr_names_exported_symbol() {
    let info = loader::addr(marker_addr()).unwrap();
    assert_eq!(info.symbol_name.as_deref(), Some("crosscall_test_marker"));
    assert_eq!(info.symbol_addr, marker_addr());
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_call_resolved_marker() {
    let sym = loader::lookup_self("crosscall_test_marker").unwrap();
    let mut r = 0u32;
    unsafe { sym.call(crosscall::Out::U32(&mut r), &[]).unwrap() };
    assert_eq!(r, 0x5eed);
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn test_open_lookup_call_close() {
    let libc = Image::open("libc.so.6", Mode::NOW | Mode::LOCAL).unwrap();
    let strlen = libc.lookup("strlen").unwrap();
    assert_ne!(strlen.addr(), 0);

    #[cfg(target_arch = "x86_64")]
    {
        let mut len = 0usize;
        unsafe {
            strlen
                .call(crosscall::Out::Usize(&mut len), &[crosscall::Arg::Bytes(b"abc\0")])
                .unwrap()
        };
        assert_eq!(len, 3);
    }

    drop(strlen);
    libc.close().unwrap();
    assert_eq!(loader::last_error(), None);
}

/// An image the test executable does not link against, so each step below
/// starts from a state the test controls
#[cfg(all(target_os = "linux", target_env = "gnu"))]
const ZLIB: &str = "libz.so.1";

#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn test_visibility_of_local_and_global_opens() {
    assert!(Image::open(ZLIB, Mode::NO_LOAD | Mode::LAZY).is_err());
    assert!(loader::last_error().is_some());

    // Trial open and unload
    loader::preflight(ZLIB).unwrap();
    assert!(Image::open(ZLIB, Mode::NO_LOAD | Mode::LAZY).is_err());
    assert!(loader::last_error().is_some());

    let local = Image::open(ZLIB, Mode::NOW | Mode::LOCAL).unwrap();
    let version = local.lookup("zlibVersion").unwrap();
    assert_ne!(version.addr(), 0);
    assert!(loader::lookup("zlibVersion").is_err());
    assert!(loader::last_error().is_some());

    let global = Image::open(ZLIB, Mode::GLOBAL).unwrap();
    assert_eq!(global.handle(), local.handle());
    let found = loader::lookup("zlibVersion").unwrap();
    assert_eq!(found.addr(), version.addr());

    drop(version);
    global.close().unwrap();
    local.close().unwrap();
    assert_eq!(loader::last_error(), None);
}

#[test]
fn test_no_load_never_yields_handle() {
    for _ in 0..3 {
        let result = Image::open("libcrosscall-absent.so", Mode::NO_LOAD | Mode::LAZY);
        assert!(matches!(result, Err(Error::Native(_))));
        assert!(loader::last_error().is_some());
    }
}
