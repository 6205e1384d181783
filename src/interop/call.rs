//! Dynamic function calling
//!
//! Builds a frame for the descriptor, pins the execution context, crosses
//! into native code with inline assembly and decodes the return registers.

use super::abi::{ConventionDescriptor, Frame};
use super::context::PinnedContext;
use super::marshal::{self, ReturnRegisters};
use super::types::{Arg, Out};
use crate::error::{Error, Result};
use crate::logging;

/// Function call descriptor
#[derive(Debug, Clone, Copy)]
pub struct FunctionCall {
    addr: usize,
    convention: ConventionDescriptor,
}

impl FunctionCall {
    /// Call descriptor for `addr` using the configured default convention
    #[inline]
    pub fn new(addr: usize) -> Self {
        Self {
            addr,
            convention: super::default_convention(),
        }
    }

    #[inline]
    pub fn with_convention(mut self, convention: ConventionDescriptor) -> Self {
        self.convention = convention;
        self
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.addr
    }

    #[inline]
    pub fn convention(&self) -> &ConventionDescriptor {
        &self.convention
    }

    /// Call function with arguments
    ///
    /// # Safety
    /// Caller must ensure:
    /// - The address is a function following the descriptor's convention
    /// - Arguments and output match the function's declared signature
    /// - Pointer arguments are valid for whatever the function does with them
    pub unsafe fn invoke(&self, out: Out<'_>, args: &[Arg<'_>]) -> Result<()> {
        let frame = Frame::build(&self.convention, args)?;
        invoke_frame(self.addr, &frame, out)
    }
}

/// Invoke `addr` with the given output and arguments, using the default
/// convention
///
/// # Safety
/// See `FunctionCall::invoke`.
#[inline]
pub unsafe fn call(addr: usize, out: Out<'_>, args: &[Arg<'_>]) -> Result<()> {
    FunctionCall::new(addr).invoke(out, args)
}

/// Perform the crossing for an already built frame
///
/// # Safety
/// See `FunctionCall::invoke`.
pub unsafe fn invoke_frame(addr: usize, frame: &Frame<'_>, out: Out<'_>) -> Result<()> {
    if addr == 0 {
        return Err(Error::invalid("null function address"));
    }
    if !frame.convention().is_executable() {
        return Err(Error::UnsupportedArchitecture(frame.convention().name));
    }

    let ctx = PinnedContext::acquire();
    logging::log_native_call(addr, frame.gp_used(), frame.float_count(), frame.stack().len());

    let ret = {
        let _foreign = ctx.enter_foreign();
        raw::call(addr, frame)
    };

    logging::log_native_return(addr, out.kind());
    marshal::decode(ret, out);
    super::record_call();
    Ok(())
}

#[cfg(all(target_arch = "x86_64", unix))]
mod raw {
    use super::*;

    /// Register image read by the trampoline. Offsets are hardcoded in the
    /// assembly below.
    #[repr(C)]
    struct RawFrame {
        gp: [u64; 6],       // 0
        fp: [u64; 8],       // 48
        stack: *const u64,  // 112
        stack_words: usize, // 120
        fp_count: u64,      // 128
    }

    const _: () = assert!(core::mem::size_of::<RawFrame>() == 136);

    pub(super) unsafe fn call(addr: usize, frame: &Frame<'_>) -> ReturnRegisters {
        let mut image = RawFrame {
            gp: [0; 6],
            fp: [0; 8],
            stack: frame.stack().as_ptr(),
            stack_words: frame.stack().len(),
            fp_count: frame.float_count() as u64,
        };
        image.gp.copy_from_slice(frame.gp_registers());
        image.fp.copy_from_slice(frame.fp_registers());

        let rax: u64;
        let xmm0: f64;

        // System V x86-64 calling convention
        // Args in: RDI, RSI, RDX, RCX, R8, R9 / XMM0-XMM7, then stack
        // AL: number of vector registers used (variadic callees)
        // Return in: RAX (int) or XMM0 (float)
        //
        // RSP is 16-byte aligned on entry since `nostack` is not given; the
        // argument area is padded to 16 bytes so it stays aligned at `call`.
        core::arch::asm!(
            "mov r13, rsp",
            "mov rcx, qword ptr [r12 + 120]",
            "lea rax, [rcx * 8 + 15]",
            "and rax, -16",
            "sub rsp, rax",
            "mov rsi, qword ptr [r12 + 112]",
            "mov rdi, rsp",
            "cld",
            "rep movsq",
            "movq xmm0, qword ptr [r12 + 48]",
            "movq xmm1, qword ptr [r12 + 56]",
            "movq xmm2, qword ptr [r12 + 64]",
            "movq xmm3, qword ptr [r12 + 72]",
            "movq xmm4, qword ptr [r12 + 80]",
            "movq xmm5, qword ptr [r12 + 88]",
            "movq xmm6, qword ptr [r12 + 96]",
            "movq xmm7, qword ptr [r12 + 104]",
            "mov rdi, qword ptr [r12]",
            "mov rsi, qword ptr [r12 + 8]",
            "mov rdx, qword ptr [r12 + 16]",
            "mov rcx, qword ptr [r12 + 24]",
            "mov r8, qword ptr [r12 + 32]",
            "mov r9, qword ptr [r12 + 40]",
            "mov rax, qword ptr [r12 + 128]",
            "call r14",
            "mov rsp, r13",
            in("r12") &image as *const RawFrame,
            in("r14") addr,
            out("r13") _,
            lateout("rax") rax,
            lateout("xmm0") xmm0,
            clobber_abi("C"),
        );

        ReturnRegisters {
            gp: rax,
            fp: xmm0.to_bits(),
        }
    }
}

#[cfg(not(all(target_arch = "x86_64", unix)))]
mod raw {
    use super::*;

    pub(super) unsafe fn call(_addr: usize, _frame: &Frame<'_>) -> ReturnRegisters {
        // invoke_frame rejects every descriptor on hosts without a trampoline
        unreachable!("no native trampoline for this architecture")
    }
}
