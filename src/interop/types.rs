//! Type definitions for native calls
//!
//! `Arg` and `Out` are closed sum types: one case per supported category,
//! matched exhaustively when frames are assembled and results decoded.
//!
//! | Kind      | Rust            | C                      | Usage   |
//! |-----------|-----------------|------------------------|---------|
//! | Void      |                 | void                   |     Out |
//! | Pointer   | `*mut c_void`   | T*                     | Arg Out |
//! | Address   | `usize`         | uintptr_t              | Arg Out |
//! | Str       | `&str`          | const char* (no NUL)   | Arg     |
//! | Bytes     | `&[u8]`         | const char* / void*    | Arg     |
//! | Bool      | `bool`          | _Bool                  | Arg Out |
//! | Isize     | `isize`         | long / ssize_t         | Arg Out |
//! | I8..I64   | `i8`..`i64`     | char .. long long      | Arg Out |
//! | Usize     | `usize`         | unsigned long / size_t | Arg Out |
//! | U8..U64   | `u8`..`u64`     | unsigned char .. ull   | Arg Out |
//! | F32       | `f32`           | float                  | Arg Out |
//! | F64       | `f64`           | double                 | Arg Out |
//!
//! `long` is LP64 here; the engine only targets LP64 Unix conventions.

use core::ffi::c_void;
use std::ffi::CStr;
use std::fmt;

/// Register class an argument is passed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterClass {
    /// Integer, pointer and boolean arguments
    General,
    /// Floating-point arguments
    Float,
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => f.write_str("general-purpose"),
            Self::Float => f.write_str("floating-point"),
        }
    }
}

/// Discriminant of an argument or output value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArgKind {
    Void,
    Pointer,
    Address,
    Str,
    Bytes,
    Bool,
    Isize,
    I8,
    I16,
    I32,
    I64,
    Usize,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ArgKind {
    /// Size of the native value in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Pointer | Self::Address | Self::Str | Self::Bytes | Self::Isize | Self::Usize => {
                core::mem::size_of::<usize>()
            }
        }
    }

    /// Register class, `None` for `Void`
    #[inline]
    pub const fn class(self) -> Option<RegisterClass> {
        match self {
            Self::Void => None,
            Self::F32 | Self::F64 => Some(RegisterClass::Float),
            _ => Some(RegisterClass::General),
        }
    }

    /// C spelling, for diagnostics
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Pointer => "void*",
            Self::Address => "uintptr_t",
            Self::Str | Self::Bytes => "const char*",
            Self::Bool => "_Bool",
            Self::Isize => "long",
            Self::I8 => "signed char",
            Self::I16 => "short",
            Self::I32 => "int",
            Self::I64 => "long long",
            Self::Usize => "unsigned long",
            Self::U8 => "unsigned char",
            Self::U16 => "unsigned short",
            Self::U32 => "unsigned int",
            Self::U64 => "unsigned long long",
            Self::F32 => "float",
            Self::F64 => "double",
        }
    }
}

/// Function call argument
///
/// `Str` and `Bytes` borrow the caller's data: only its address is passed,
/// nothing is copied and no terminator is appended. The borrow lasts at
/// least as long as any frame built from the argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    Pointer(*mut c_void),
    Address(usize),
    Str(&'a str),
    Bytes(&'a [u8]),
    Bool(bool),
    Isize(isize),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Usize(usize),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl<'a> Arg<'a> {
    /// Pointer argument from any raw pointer
    #[inline]
    pub fn ptr<T>(p: *const T) -> Self {
        Self::Pointer(p as *mut c_void)
    }

    /// Pointer argument from a mutable reference to caller-owned storage
    #[inline]
    pub fn out_ptr<T>(p: &'a mut T) -> Self {
        Self::Pointer(p as *mut T as *mut c_void)
    }

    /// Null-terminated string, passed without copying
    #[inline]
    pub fn c_str(s: &'a CStr) -> Self {
        Self::Bytes(s.to_bytes_with_nul())
    }

    /// Discriminant of this argument
    pub const fn kind(&self) -> ArgKind {
        match self {
            Self::Pointer(_) => ArgKind::Pointer,
            Self::Address(_) => ArgKind::Address,
            Self::Str(_) => ArgKind::Str,
            Self::Bytes(_) => ArgKind::Bytes,
            Self::Bool(_) => ArgKind::Bool,
            Self::Isize(_) => ArgKind::Isize,
            Self::I8(_) => ArgKind::I8,
            Self::I16(_) => ArgKind::I16,
            Self::I32(_) => ArgKind::I32,
            Self::I64(_) => ArgKind::I64,
            Self::Usize(_) => ArgKind::Usize,
            Self::U8(_) => ArgKind::U8,
            Self::U16(_) => ArgKind::U16,
            Self::U32(_) => ArgKind::U32,
            Self::U64(_) => ArgKind::U64,
            Self::F32(_) => ArgKind::F32,
            Self::F64(_) => ArgKind::F64,
        }
    }

    /// Register class this argument is passed in
    #[inline]
    pub const fn class(&self) -> RegisterClass {
        match self.kind().class() {
            Some(class) => class,
            None => RegisterClass::General,
        }
    }
}

/// Function call output value
///
/// Points at caller-owned storage that receives the decoded return value.
/// Strings and buffers are not supported as outputs: ownership of returned
/// native memory is for the caller to define, so such functions should be
/// declared with a `Pointer` or `Address` output instead.
#[derive(Debug)]
pub enum Out<'a> {
    Void,
    Pointer(&'a mut *mut c_void),
    Address(&'a mut usize),
    Bool(&'a mut bool),
    Isize(&'a mut isize),
    I8(&'a mut i8),
    I16(&'a mut i16),
    I32(&'a mut i32),
    I64(&'a mut i64),
    Usize(&'a mut usize),
    U8(&'a mut u8),
    U16(&'a mut u16),
    U32(&'a mut u32),
    U64(&'a mut u64),
    F32(&'a mut f32),
    F64(&'a mut f64),
}

impl Out<'_> {
    /// Discriminant of this output
    pub const fn kind(&self) -> ArgKind {
        match self {
            Self::Void => ArgKind::Void,
            Self::Pointer(_) => ArgKind::Pointer,
            Self::Address(_) => ArgKind::Address,
            Self::Bool(_) => ArgKind::Bool,
            Self::Isize(_) => ArgKind::Isize,
            Self::I8(_) => ArgKind::I8,
            Self::I16(_) => ArgKind::I16,
            Self::I32(_) => ArgKind::I32,
            Self::I64(_) => ArgKind::I64,
            Self::Usize(_) => ArgKind::Usize,
            Self::U8(_) => ArgKind::U8,
            Self::U16(_) => ArgKind::U16,
            Self::U32(_) => ArgKind::U32,
            Self::U64(_) => ArgKind::U64,
            Self::F32(_) => ArgKind::F32,
            Self::F64(_) => ArgKind::F64,
        }
    }
}
