//! ABI (Application Binary Interface) handling
//!
//! A calling convention is described by an explicit, versioned
//! `ConventionDescriptor` that is injected into the frame builder. The
//! builder itself is pure: given a descriptor and an argument list it
//! produces a deterministic register/stack assignment.

use super::marshal;
use super::types::{Arg, RegisterClass};
use crate::error::{Error, Result};
use core::marker::PhantomData;
use smallvec::SmallVec;

/// Upper bound on register slots per class for any supported descriptor
pub const MAX_REGISTER_SLOTS: usize = 16;

/// What to do with an argument once its register class is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpillPolicy {
    /// Pass it in the stack argument area, in declared order
    Stack,
    /// Fail the frame build with `Error::UnsupportedFrame`
    Reject,
}

/// Calling convention descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConventionDescriptor {
    pub name: &'static str,
    pub version: u32,
    /// General-purpose argument registers
    pub gp_slots: usize,
    /// Floating-point argument registers
    pub fp_slots: usize,
    /// Size of one stack argument slot in bytes
    pub stack_slot_size: usize,
    /// Stack alignment required at the call instruction
    pub stack_alignment: usize,
    /// Whether the number of vector registers used must be passed in a
    /// dedicated register (variadic callees read it)
    pub float_count_register: bool,
    pub spill: SpillPolicy,
}

impl ConventionDescriptor {
    /// System V AMD64: RDI, RSI, RDX, RCX, R8, R9 and XMM0-XMM7, float
    /// register count in AL, stack slots of 8 bytes growing upwards from
    /// RSP, which is 16-byte aligned at the call.
    pub const SYSV_AMD64: Self = Self::builtin("sysv-amd64", 6, 8, true);

    /// AAPCS64: X0-X7 and V0-V7, no float register count.
    pub const AAPCS64: Self = Self::builtin("aapcs64", 8, 8, false);

    const fn builtin(
        name: &'static str,
        gp_slots: usize,
        fp_slots: usize,
        float_count_register: bool,
    ) -> Self {
        Self {
            name,
            version: 1,
            gp_slots,
            fp_slots,
            stack_slot_size: 8,
            stack_alignment: 16,
            float_count_register,
            spill: SpillPolicy::Stack,
        }
    }

    /// Descriptor for another convention, for frame planning
    ///
    /// Fails with `InvalidArgument` when a register class exceeds
    /// `MAX_REGISTER_SLOTS`, the stack slot size is not 8 bytes, or the
    /// alignment is not a power of two at least one slot wide.
    pub fn new(
        name: &'static str,
        version: u32,
        gp_slots: usize,
        fp_slots: usize,
        stack_slot_size: usize,
        stack_alignment: usize,
        float_count_register: bool,
    ) -> Result<Self> {
        if gp_slots > MAX_REGISTER_SLOTS || fp_slots > MAX_REGISTER_SLOTS {
            return Err(Error::invalid(format!(
                "{}: {} general and {} float registers, at most {} per class are supported",
                name, gp_slots, fp_slots, MAX_REGISTER_SLOTS
            )));
        }
        if stack_slot_size != 8 {
            return Err(Error::invalid(format!(
                "{}: stack slots of {} bytes, only 8 is supported",
                name, stack_slot_size
            )));
        }
        if !stack_alignment.is_power_of_two() || stack_alignment < stack_slot_size {
            return Err(Error::invalid(format!(
                "{}: stack alignment {} is not a power of two of at least one slot",
                name, stack_alignment
            )));
        }
        Ok(Self {
            name,
            version,
            gp_slots,
            fp_slots,
            stack_slot_size,
            stack_alignment,
            float_count_register,
            spill: SpillPolicy::Stack,
        })
    }

    /// Same descriptor with another spill policy
    #[inline]
    pub const fn with_spill(mut self, spill: SpillPolicy) -> Self {
        self.spill = spill;
        self
    }

    /// Look a descriptor up by name
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "sysv-amd64" | "sysv" => Some(Self::SYSV_AMD64),
            "aapcs64" | "aarch64" => Some(Self::AAPCS64),
            _ => None,
        }
    }

    /// Platform default for planning frames
    #[inline]
    pub const fn host() -> Self {
        #[cfg(target_arch = "aarch64")]
        return Self::AAPCS64;

        #[cfg(not(target_arch = "aarch64"))]
        return Self::SYSV_AMD64;
    }

    /// Register capacity for a class
    #[inline]
    pub const fn capacity(&self, class: RegisterClass) -> usize {
        match class {
            RegisterClass::General => self.gp_slots,
            RegisterClass::Float => self.fp_slots,
        }
    }

    /// Whether the native invoker can execute frames built for this
    /// descriptor on the current host
    #[inline]
    pub fn is_executable(&self) -> bool {
        cfg!(all(target_arch = "x86_64", unix))
            && self.with_spill(SpillPolicy::Stack) == Self::SYSV_AMD64
    }
}

impl Default for ConventionDescriptor {
    #[inline]
    fn default() -> Self {
        Self::host()
    }
}

/// Where one argument ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Register { class: RegisterClass, index: usize },
    /// Index of the 8-byte word in the stack argument area
    Stack { index: usize },
}

/// Register allocation state for one call
pub struct RegisterAllocator {
    convention: ConventionDescriptor,
    int_regs_used: usize,
    fp_regs_used: usize,
    stack_slots_used: usize,
}

impl RegisterAllocator {
    /// Create allocator for a calling convention
    #[inline]
    pub const fn new(convention: ConventionDescriptor) -> Self {
        Self {
            convention,
            int_regs_used: 0,
            fp_regs_used: 0,
            stack_slots_used: 0,
        }
    }

    /// Check if next arg of this class goes in a register
    #[inline]
    pub fn can_use_register(&self, class: RegisterClass) -> bool {
        self.used(class) < self.convention.capacity(class)
    }

    #[inline]
    fn used(&self, class: RegisterClass) -> usize {
        match class {
            RegisterClass::General => self.int_regs_used,
            RegisterClass::Float => self.fp_regs_used,
        }
    }

    /// Assign the next slot for an argument of `class` at `position`
    pub fn allocate(&mut self, class: RegisterClass, position: usize) -> Result<Slot> {
        if self.can_use_register(class) {
            let counter = match class {
                RegisterClass::General => &mut self.int_regs_used,
                RegisterClass::Float => &mut self.fp_regs_used,
            };
            let index = *counter;
            *counter += 1;
            return Ok(Slot::Register { class, index });
        }

        match self.convention.spill {
            SpillPolicy::Stack => {
                let index = self.stack_slots_used;
                self.stack_slots_used += 1;
                Ok(Slot::Stack { index })
            }
            SpillPolicy::Reject => Err(Error::UnsupportedFrame {
                class,
                capacity: self.convention.capacity(class),
                position,
            }),
        }
    }

    /// Number of general-purpose registers handed out
    #[inline]
    pub fn gp_used(&self) -> usize {
        self.int_regs_used
    }

    /// Number of floating-point registers handed out
    #[inline]
    pub fn fp_used(&self) -> usize {
        self.fp_regs_used
    }

    /// Reset for new call
    #[inline]
    pub fn reset(&mut self) {
        self.int_regs_used = 0;
        self.fp_regs_used = 0;
        self.stack_slots_used = 0;
    }
}

/// Register and stack layout for one native call
///
/// The lifetime ties the frame to the arguments it was built from: words
/// holding addresses of borrowed strings and buffers stay valid for as long
/// as the frame exists.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    convention: ConventionDescriptor,
    gp: [u64; MAX_REGISTER_SLOTS],
    fp: [u64; MAX_REGISTER_SLOTS],
    gp_used: usize,
    fp_used: usize,
    stack: SmallVec<[u64; 8]>,
    slots: SmallVec<[Slot; 8]>,
    _args: PhantomData<&'a ()>,
}

impl<'a> Frame<'a> {
    /// Assign every argument to a register or stack slot, in order
    pub fn build(convention: &ConventionDescriptor, args: &[Arg<'a>]) -> Result<Self> {
        let mut allocator = RegisterAllocator::new(*convention);
        let mut frame = Self {
            convention: *convention,
            gp: [0; MAX_REGISTER_SLOTS],
            fp: [0; MAX_REGISTER_SLOTS],
            gp_used: 0,
            fp_used: 0,
            stack: SmallVec::new(),
            slots: SmallVec::with_capacity(args.len()),
            _args: PhantomData,
        };

        for (position, arg) in args.iter().enumerate() {
            let word = marshal::encode(arg);
            let slot = allocator.allocate(arg.class(), position)?;
            match slot {
                Slot::Register { class: RegisterClass::General, index } => frame.gp[index] = word,
                Slot::Register { class: RegisterClass::Float, index } => frame.fp[index] = word,
                Slot::Stack { index } => {
                    debug_assert_eq!(index, frame.stack.len());
                    frame.stack.push(word);
                }
            }
            frame.slots.push(slot);
        }

        frame.gp_used = allocator.gp_used();
        frame.fp_used = allocator.fp_used();
        Ok(frame)
    }

    #[inline]
    pub fn convention(&self) -> &ConventionDescriptor {
        &self.convention
    }

    /// General-purpose register contents; unused slots are zero
    #[inline]
    pub fn gp_registers(&self) -> &[u64] {
        &self.gp[..self.convention.gp_slots]
    }

    /// Floating-point register contents (raw bits); unused slots are zero
    #[inline]
    pub fn fp_registers(&self) -> &[u64] {
        &self.fp[..self.convention.fp_slots]
    }

    #[inline]
    pub fn gp_used(&self) -> usize {
        self.gp_used
    }

    /// Number of vector registers carrying arguments. On conventions with a
    /// float count register this is the value the callee receives there.
    #[inline]
    pub fn float_count(&self) -> usize {
        self.fp_used
    }

    /// Stack argument area, lowest address first
    #[inline]
    pub fn stack(&self) -> &[u64] {
        &self.stack
    }

    /// Bytes reserved below the stack pointer for the argument area,
    /// rounded up to the convention's alignment
    #[inline]
    pub fn stack_bytes(&self) -> usize {
        let raw = self.stack.len() * self.convention.stack_slot_size;
        let align = self.convention.stack_alignment;
        (raw + align - 1) & !(align - 1)
    }

    /// Placement of every argument, in declared order
    #[inline]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// True when no argument spilled to the stack
    #[inline]
    pub fn is_register_only(&self) -> bool {
        self.stack.is_empty()
    }
}
