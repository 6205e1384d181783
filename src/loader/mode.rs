//! Load mode bit set

use crate::config::ModeFlag;
use core::ffi::c_int;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Binding, visibility and auxiliary policies for `Image::open`
///
/// Bit values follow the Darwin loader; `to_native` translates them for the
/// host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode(u32);

impl Mode {
    /// Bind external references on first use
    pub const LAZY: Self = Self(0x1);
    /// Bind all external references at open
    pub const NOW: Self = Self(0x2);
    /// Symbols are not available to images loaded later
    pub const LOCAL: Self = Self(0x4);
    /// Symbols are available to images loaded later
    pub const GLOBAL: Self = Self(0x8);
    /// Only succeed if the image is already loaded
    pub const NO_LOAD: Self = Self(0x10);
    /// Never unload the image
    pub const NO_DELETE: Self = Self(0x80);
    /// Lookups on the handle search only the image itself
    pub const LOOKUP_FIRST: Self = Self(0x100);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::LAZY, "LAZY"),
        (Self::NOW, "NOW"),
        (Self::LOCAL, "LOCAL"),
        (Self::GLOBAL, "GLOBAL"),
        (Self::NO_LOAD, "NO_LOAD"),
        (Self::NO_DELETE, "NO_DELETE"),
        (Self::LOOKUP_FIRST, "LOOKUP_FIRST"),
    ];

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

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
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Combine the flag names of a `[loader] default_mode` list
    pub fn from_flags(flags: &[ModeFlag]) -> Self {
        flags.iter().fold(Self::empty(), |mode, flag| {
            mode | match flag {
                ModeFlag::Lazy => Self::LAZY,
                ModeFlag::Now => Self::NOW,
                ModeFlag::Local => Self::LOCAL,
                ModeFlag::Global => Self::GLOBAL,
                ModeFlag::NoLoad => Self::NO_LOAD,
                ModeFlag::NoDelete => Self::NO_DELETE,
                ModeFlag::LookupFirst => Self::LOOKUP_FIRST,
            }
        })
    }

    /// Flag value understood by the host's `dlopen`
    #[cfg(target_vendor = "apple")]
    pub(crate) fn to_native(self) -> c_int {
        self.0 as c_int
    }

    /// Flag value understood by the host's `dlopen`. Binding defaults to
    /// lazy and visibility to global when the mode leaves them unset.
    #[cfg(not(target_vendor = "apple"))]
    pub(crate) fn to_native(self) -> c_int {
        let mut native = 0;

        if self.contains(Self::NOW) {
            native |= libc::RTLD_NOW;
        } else {
            native |= libc::RTLD_LAZY;
        }

        if self.contains(Self::LOCAL) && !self.contains(Self::GLOBAL) {
            native |= libc::RTLD_LOCAL;
        } else {
            native |= libc::RTLD_GLOBAL;
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            if self.contains(Self::NO_LOAD) {
                native |= libc::RTLD_NOLOAD;
            }
            if self.contains(Self::NO_DELETE) {
                native |= libc::RTLD_NODELETE;
            }
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            if self.contains(Self::NO_LOAD) || self.contains(Self::NO_DELETE) {
                tracing::debug!(target: "loader", mode = ?self, "NO_LOAD and NO_DELETE are not translated on this host");
            }
        }
        if self.contains(Self::LOOKUP_FIRST) {
            tracing::debug!(target: "loader", mode = ?self, "LOOKUP_FIRST has no equivalent on this host, ignored");
        }

        native
    }
}

impl BitOr for Mode {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Mode {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("Mode(empty)");
        }
        f.write_str("Mode(")?;
        let mut first = true;
        let mut rest = self.0;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
                rest &= !flag.0;
            }
        }
        if rest != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{:#x}", rest)?;
        }
        f.write_str(")")
    }
}
