//! Type marshaling - Rust values ↔ register words
//!
//! Design: one 64-bit word per argument. Integers are sign- or zero-extended
//! to the full register, floats keep their IEEE bits in the low part of the
//! word, strings and buffers contribute only their data address.

use super::types::{Arg, Out};

/// Raw contents of the return registers after a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReturnRegisters {
    /// Integer return register (RAX on AMD64)
    pub gp: u64,
    /// Vector return register bits (XMM0 on AMD64)
    pub fp: u64,
}

/// Encode an argument into the word placed in its register or stack slot
#[inline]
pub fn encode(arg: &Arg<'_>) -> u64 {
    match *arg {
        Arg::Pointer(p) => p as usize as u64,
        Arg::Address(v) => v as u64,
        Arg::Str(s) => s.as_ptr() as usize as u64,
        Arg::Bytes(b) => b.as_ptr() as usize as u64,
        Arg::Bool(v) => v as u64,
        Arg::Isize(v) => v as i64 as u64,
        Arg::I8(v) => v as i64 as u64,
        Arg::I16(v) => v as i64 as u64,
        Arg::I32(v) => v as i64 as u64,
        Arg::I64(v) => v as u64,
        Arg::Usize(v) => v as u64,
        Arg::U8(v) => v as u64,
        Arg::U16(v) => v as u64,
        Arg::U32(v) => v as u64,
        Arg::U64(v) => v,
        Arg::F32(v) => v.to_bits() as u64,
        Arg::F64(v) => v.to_bits(),
    }
}

/// Decode the return registers into the caller's output storage
///
/// Narrow integer results only define their low bits, so each case
/// truncates before converting.
pub fn decode(ret: ReturnRegisters, out: Out<'_>) {
    let gp = ret.gp;
    match out {
        Out::Void => {}
        Out::Pointer(p) => *p = gp as usize as *mut core::ffi::c_void,
        Out::Address(p) => *p = gp as usize,
        Out::Bool(p) => *p = (gp as u8) != 0,
        Out::Isize(p) => *p = gp as i64 as isize,
        Out::I8(p) => *p = gp as i8,
        Out::I16(p) => *p = gp as i16,
        Out::I32(p) => *p = gp as i32,
        Out::I64(p) => *p = gp as i64,
        Out::Usize(p) => *p = gp as usize,
        Out::U8(p) => *p = gp as u8,
        Out::U16(p) => *p = gp as u16,
        Out::U32(p) => *p = gp as u32,
        Out::U64(p) => *p = gp,
        Out::F32(p) => *p = f32::from_bits(ret.fp as u32),
        Out::F64(p) => *p = f64::from_bits(ret.fp),
    }
}
