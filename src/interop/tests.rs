use super::{
    call, init, marshal, stats, Arg, ArgKind, CallbackContext, ConventionDescriptor, Event,
    EventPath, Frame, FunctionCall, Out, PayloadFlags, RegisterAllocator, RegisterClass, Slot,
    SpillPolicy, MAX_REGISTER_SLOTS,
};
use crate::error::Error;
use proptest::prelude::*;

const SYSV: ConventionDescriptor = ConventionDescriptor::SYSV_AMD64;

fn gp(n: usize) -> Vec<Arg<'static>> {
    (0..n).map(|i| Arg::I64(i as i64)).collect()
}

fn fp(n: usize) -> Vec<Arg<'static>> {
    (0..n).map(|i| Arg::F64(i as f64)).collect()
}

// ============================================================================
// Frame builder
// ============================================================================

#[test]
fn test_frame_register_only() {
    let mut args = gp(6);
    args.extend(fp(8));
    let frame = Frame::build(&SYSV, &args).unwrap();

    assert!(frame.is_register_only());
    assert_eq!(frame.gp_used(), 6);
    assert_eq!(frame.float_count(), 8);
    assert_eq!(frame.gp_registers(), &[0, 1, 2, 3, 4, 5]);
    assert_eq!(frame.fp_registers()[7], 7.0f64.to_bits());
    assert_eq!(frame.stack_bytes(), 0);
}

#[test]
fn test_frame_interleaved_classes() {
    let args = [Arg::F64(1.5), Arg::I32(-1), Arg::F32(2.0), Arg::Bool(true)];
    let frame = Frame::build(&SYSV, &args).unwrap();

    assert_eq!(
        frame.slots(),
        &[
            Slot::Register { class: RegisterClass::Float, index: 0 },
            Slot::Register { class: RegisterClass::General, index: 0 },
            Slot::Register { class: RegisterClass::Float, index: 1 },
            Slot::Register { class: RegisterClass::General, index: 1 },
        ]
    );
    assert_eq!(frame.gp_registers()[0], u64::MAX);
    assert_eq!(frame.gp_registers()[1], 1);
    assert_eq!(frame.fp_registers()[1], 2.0f32.to_bits() as u64);
    assert_eq!(frame.float_count(), 2);
}

#[test]
fn test_frame_spills_in_order() {
    let mut args = gp(9);
    args.push(Arg::F64(0.5));
    let frame = Frame::build(&SYSV, &args).unwrap();

    assert!(!frame.is_register_only());
    assert_eq!(frame.stack(), &[6, 7, 8]);
    assert_eq!(frame.stack_bytes(), 32);
    assert_eq!(frame.slots()[8], Slot::Stack { index: 2 });
    assert_eq!(frame.slots()[9], Slot::Register { class: RegisterClass::Float, index: 0 });
}

#[test]
fn test_frame_reject_policy() {
    let reject = SYSV.with_spill(SpillPolicy::Reject);
    let mut args = fp(8);
    args.extend(gp(3));
    args.push(Arg::F32(9.0));

    assert_eq!(
        Frame::build(&reject, &args).unwrap_err(),
        Error::UnsupportedFrame {
            class: RegisterClass::Float,
            capacity: 8,
            position: 11,
        }
    );
}

#[test]
fn test_aapcs64_capacity() {
    let frame = Frame::build(&ConventionDescriptor::AAPCS64, &gp(8)).unwrap();
    assert!(frame.is_register_only());
    assert_eq!(frame.gp_registers().len(), 8);
    assert!(!ConventionDescriptor::AAPCS64.is_executable());
}

#[test]
fn test_descriptor_lookup() {
    assert_eq!(ConventionDescriptor::by_name("sysv"), Some(SYSV));
    assert_eq!(
        ConventionDescriptor::by_name("aarch64"),
        Some(ConventionDescriptor::AAPCS64)
    );
    assert_eq!(ConventionDescriptor::by_name("win64"), None);
    assert_eq!(ConventionDescriptor::default(), ConventionDescriptor::host());
}

#[test]
fn test_custom_descriptor_beyond_eight_registers() {
    // PPC64 ELFv2 style: r3-r10 and f1-f13
    let ppc = ConventionDescriptor::new("ppc64-elfv2", 1, 8, 13, 8, 16, false).unwrap();
    let frame = Frame::build(&ppc, &fp(13)).unwrap();
    assert!(frame.is_register_only());
    assert_eq!(frame.fp_registers().len(), 13);
    assert_eq!(frame.fp_registers()[12], 12.0f64.to_bits());
    assert!(!ppc.is_executable());

    let spilled = Frame::build(&ppc, &fp(14)).unwrap();
    assert_eq!(spilled.stack(), &[13.0f64.to_bits()]);
}

#[test]
fn test_invalid_descriptor_is_an_error() {
    assert!(matches!(
        ConventionDescriptor::new("wide", 1, 6, MAX_REGISTER_SLOTS + 1, 8, 16, false),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ConventionDescriptor::new("narrow-slots", 1, 6, 8, 4, 16, false),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ConventionDescriptor::new("odd-align", 1, 6, 8, 8, 12, false),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(
        ConventionDescriptor::new("sysv-amd64", 1, 6, 8, 8, 16, true),
        Ok(SYSV)
    );
}

#[test]
fn test_arg_kind_class_and_size() {
    assert_eq!(Arg::F32(1.0).class(), RegisterClass::Float);
    assert_eq!(Arg::Bool(true).class(), RegisterClass::General);
    assert_eq!(Arg::Str("x").kind().size(), core::mem::size_of::<usize>());
    assert_eq!(ArgKind::U16.size(), 2);
    assert_eq!(ArgKind::Void.class(), None);
    assert_eq!(ArgKind::Void.size(), 0);
}

#[test]
fn test_allocator_reset() {
    let mut alloc = RegisterAllocator::new(SYSV);
    for i in 0..6 {
        alloc.allocate(RegisterClass::General, i).unwrap();
    }
    assert!(!alloc.can_use_register(RegisterClass::General));
    assert!(alloc.can_use_register(RegisterClass::Float));
    alloc.reset();
    assert_eq!(alloc.gp_used(), 0);
    assert_eq!(
        alloc.allocate(RegisterClass::General, 0).unwrap(),
        Slot::Register { class: RegisterClass::General, index: 0 }
    );
}

#[test]
fn test_init_rejects_unknown_convention() {
    let config = crate::config::InvokeConfig {
        convention: "fastcall".into(),
        spill: crate::config::SpillMode::Stack,
    };
    assert!(matches!(init(&config), Err(Error::InvalidArgument(_))));
}

fn to_args(classes: &[bool]) -> Vec<Arg<'static>> {
    classes
        .iter()
        .enumerate()
        .map(|(i, &float)| if float { Arg::F64(i as f64) } else { Arg::I64(i as i64) })
        .collect()
}

proptest! {
    #[test]
    fn prop_register_only_within_bounds(gp_n in 0usize..=6, fp_n in 0usize..=8, seed in any::<u64>()) {
        // Interleave the two classes in a seed-dependent order
        let mut classes = vec![false; gp_n];
        classes.extend(std::iter::repeat(true).take(fp_n));
        let len = classes.len().max(1);
        classes.rotate_left((seed as usize) % len);

        let frame = Frame::build(&SYSV, &to_args(&classes)).unwrap();
        prop_assert!(frame.is_register_only());
        prop_assert_eq!(frame.gp_used(), gp_n);
        prop_assert_eq!(frame.float_count(), fp_n);
    }

    #[test]
    fn prop_overflow_spills_in_declared_order(classes in prop::collection::vec(any::<bool>(), 0..24)) {
        let args = to_args(&classes);
        let frame = Frame::build(&SYSV, &args).unwrap();

        let mut gp_seen = 0;
        let mut fp_seen = 0;
        let mut expected = Vec::new();
        for (arg, &float) in args.iter().zip(&classes) {
            let seen = if float { &mut fp_seen } else { &mut gp_seen };
            let capacity = if float { 8 } else { 6 };
            if *seen >= capacity {
                expected.push(marshal::encode(arg));
            }
            *seen += 1;
        }

        prop_assert_eq!(frame.slots().len(), args.len());
        prop_assert_eq!(frame.stack(), expected.as_slice());
        prop_assert_eq!(frame.stack_bytes() % 16, 0);
        prop_assert!(frame.stack_bytes() >= frame.stack().len() * 8);
    }

    #[test]
    fn prop_reject_fails_exactly_on_overflow(classes in prop::collection::vec(any::<bool>(), 0..24)) {
        let reject = SYSV.with_spill(SpillPolicy::Reject);
        let gp_n = classes.iter().filter(|f| !**f).count();
        let fp_n = classes.len() - gp_n;

        match Frame::build(&reject, &to_args(&classes)) {
            Ok(frame) => {
                prop_assert!(gp_n <= 6 && fp_n <= 8);
                prop_assert!(frame.is_register_only());
            }
            Err(Error::UnsupportedFrame { class, position, .. }) => {
                prop_assert!(gp_n > 6 || fp_n > 8);
                let float = classes[position];
                prop_assert_eq!(class == RegisterClass::Float, float);
                let before = classes[..position].iter().filter(|f| **f == float).count();
                prop_assert_eq!(before, if float { 8 } else { 6 });
            }
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }
}

// ============================================================================
// Native invocation
// ============================================================================

#[cfg(all(target_arch = "x86_64", unix))]
mod native {
    use super::*;
    use core::ffi::c_void;

    macro_rules! echo {
        ($($name:ident: $t:ty),* $(,)?) => {
            $(extern "C" fn $name(v: $t) -> $t { v })*
        };
    }

    echo! {
        echo_i8: i8, echo_i16: i16, echo_i32: i32, echo_i64: i64, echo_isize: isize,
        echo_u8: u8, echo_u16: u16, echo_u32: u32, echo_u64: u64, echo_usize: usize,
        echo_f32: f32, echo_f64: f64, echo_ptr: *mut c_void,
    }

    extern "C" fn negate_bool(v: bool) -> bool {
        !v
    }

    extern "C" fn weighted_gp(a: i64, b: i64, c: i64, d: i64, e: i64, f: i64, g: i64, h: i64, i: i64) -> i64 {
        a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * f + 7 * g + 8 * h + 9 * i
    }

    extern "C" fn weighted_fp(
        a: f64, b: f64, c: f64, d: f64, e: f64, f: f64, g: f64, h: f64, i: f64, j: f64,
    ) -> f64 {
        a + 2.0 * b + 3.0 * c + 4.0 * d + 5.0 * e + 6.0 * f + 7.0 * g + 8.0 * h + 9.0 * i + 10.0 * j
    }

    extern "C" fn byte_sum(p: *const u8, n: usize) -> u32 {
        let bytes = unsafe { core::slice::from_raw_parts(p, n) };
        bytes.iter().map(|&b| b as u32).sum()
    }

    fn invoke(addr: usize, out: Out<'_>, args: &[Arg<'_>]) {
        unsafe { FunctionCall::new(addr).with_convention(SYSV).invoke(out, args).unwrap() }
    }

    #[test]
    fn test_echo_integers() {
        let mut i8v = 0i8;
        invoke(echo_i8 as usize, Out::I8(&mut i8v), &[Arg::I8(-128)]);
        assert_eq!(i8v, -128);

        let mut i16v = 0i16;
        invoke(echo_i16 as usize, Out::I16(&mut i16v), &[Arg::I16(-12345)]);
        assert_eq!(i16v, -12345);

        let mut i32v = 0i32;
        invoke(echo_i32 as usize, Out::I32(&mut i32v), &[Arg::I32(i32::MIN)]);
        assert_eq!(i32v, i32::MIN);

        let mut i64v = 0i64;
        invoke(echo_i64 as usize, Out::I64(&mut i64v), &[Arg::I64(-1 << 40)]);
        assert_eq!(i64v, -1 << 40);

        let mut isv = 0isize;
        invoke(echo_isize as usize, Out::Isize(&mut isv), &[Arg::Isize(-7)]);
        assert_eq!(isv, -7);

        let mut u8v = 0u8;
        invoke(echo_u8 as usize, Out::U8(&mut u8v), &[Arg::U8(255)]);
        assert_eq!(u8v, 255);

        let mut u16v = 0u16;
        invoke(echo_u16 as usize, Out::U16(&mut u16v), &[Arg::U16(65535)]);
        assert_eq!(u16v, 65535);

        let mut u32v = 0u32;
        invoke(echo_u32 as usize, Out::U32(&mut u32v), &[Arg::U32(u32::MAX)]);
        assert_eq!(u32v, u32::MAX);

        let mut u64v = 0u64;
        invoke(echo_u64 as usize, Out::U64(&mut u64v), &[Arg::U64(u64::MAX - 1)]);
        assert_eq!(u64v, u64::MAX - 1);

        let mut usv = 0usize;
        invoke(echo_usize as usize, Out::Usize(&mut usv), &[Arg::Usize(usize::MAX)]);
        assert_eq!(usv, usize::MAX);

        let mut addr = 0usize;
        invoke(echo_usize as usize, Out::Address(&mut addr), &[Arg::Address(0xdead_beef)]);
        assert_eq!(addr, 0xdead_beef);
    }

    #[test]
    fn test_echo_floats_and_bool() {
        let mut f = 0f32;
        invoke(echo_f32 as usize, Out::F32(&mut f), &[Arg::F32(-3.25)]);
        assert_eq!(f, -3.25);

        let mut d = 0f64;
        invoke(echo_f64 as usize, Out::F64(&mut d), &[Arg::F64(core::f64::consts::PI)]);
        assert_eq!(d, core::f64::consts::PI);

        let mut b = true;
        invoke(negate_bool as usize, Out::Bool(&mut b), &[Arg::Bool(true)]);
        assert!(!b);
        invoke(negate_bool as usize, Out::Bool(&mut b), &[Arg::Bool(false)]);
        assert!(b);
    }

    #[test]
    fn test_echo_pointer() {
        let mut target = 5u32;
        let mut p = core::ptr::null_mut();
        invoke(echo_ptr as usize, Out::Pointer(&mut p), &[Arg::out_ptr(&mut target)]);
        assert_eq!(p as *const u32, &target as *const u32);
    }

    #[test]
    fn test_spilled_gp_arguments() {
        let args: Vec<_> = (1..=9).map(Arg::I64).collect();
        let mut r = 0i64;
        invoke(weighted_gp as usize, Out::I64(&mut r), &args);
        assert_eq!(r, (1..=9).map(|i| i * i).sum::<i64>());
    }

    #[test]
    fn test_spilled_fp_arguments() {
        let args: Vec<_> = (1..=10).map(|i| Arg::F64(i as f64)).collect();
        let mut r = 0f64;
        invoke(weighted_fp as usize, Out::F64(&mut r), &args);
        assert_eq!(r, (1..=10).map(|i| (i * i) as f64).sum::<f64>());
    }

    #[test]
    fn test_borrowed_buffer_argument() {
        let data = [1u8, 2, 3, 250];
        let mut sum = 0u32;
        invoke(
            byte_sum as usize,
            Out::U32(&mut sum),
            &[Arg::Bytes(&data), Arg::Usize(data.len())],
        );
        assert_eq!(sum, 256);

        invoke(byte_sum as usize, Out::U32(&mut sum), &[Arg::Str("AB"), Arg::Usize(2)]);
        assert_eq!(sum, 65 + 66);
    }

    #[test]
    fn test_null_address_rejected() {
        let r = unsafe { call(0, Out::Void, &[]) };
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_non_executable_convention_rejected() {
        let r = unsafe {
            FunctionCall::new(echo_i32 as usize)
                .with_convention(ConventionDescriptor::AAPCS64)
                .invoke(Out::Void, &[Arg::I32(1)])
        };
        assert_eq!(r, Err(Error::UnsupportedArchitecture("aapcs64")));
    }

    #[test]
    fn test_calls_are_counted() {
        let before = stats().calls_made;
        invoke(echo_i32 as usize, Out::Void, &[Arg::I32(1)]);
        assert!(stats().calls_made > before);
    }
}

// ============================================================================
// Callback dispatch
// ============================================================================

mod reverse {
    use super::*;
    use crate::interop::callback::{dispatch, EventBlock};
    use core::ffi::{c_char, c_void};
    use parking_lot::Mutex;
    use std::ffi::CString;
    use std::sync::Arc;

    #[test]
    fn test_dispatch_decodes_all_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = CallbackContext::new(
            move |_src, info: &String, events: &[Event]| {
                sink.lock().push((info.clone(), events.to_vec()));
            },
            "watch".to_string(),
            PayloadFlags::NONE,
        );

        let paths: Vec<CString> = ["/a", "/b", "/c"].iter().map(|p| CString::new(*p).unwrap()).collect();
        let ptrs: Vec<*const c_char> = paths.iter().map(|p| p.as_ptr()).collect();
        let flags = [1u32, 2, 4];
        let ids = [10u64, 11, 12];

        let block = EventBlock {
            source: 0x1000 as *const c_void,
            context: CallbackContext::context_ptr(&ctx),
            count: 3,
            paths: ptrs.as_ptr() as *const c_void,
            flags: flags.as_ptr(),
            ids: ids.as_ptr(),
        };
        unsafe { dispatch::<String>(&block) };

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let (info, events) = &seen[0];
        assert_eq!(info, "watch");
        assert_eq!(
            events,
            &vec![
                Event { id: 10, flags: 1, path: EventPath::Text("/a".into()) },
                Event { id: 11, flags: 2, path: EventPath::Text("/b".into()) },
                Event { id: 12, flags: 4, path: EventPath::Text("/c".into()) },
            ]
        );
    }

    #[test]
    fn test_object_ref_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = CallbackContext::new(
            move |_src, _info: &(), events: &[Event]| sink.lock().extend_from_slice(events),
            (),
            PayloadFlags::EXTENDED_DATA,
        );
        let container = 0x2000usize;

        let block = EventBlock {
            source: core::ptr::null(),
            context: CallbackContext::context_ptr(&ctx),
            count: 2,
            paths: container as *const c_void,
            flags: core::ptr::null(),
            ids: core::ptr::null(),
        };
        unsafe { dispatch::<()>(&block) };

        assert_eq!(
            *seen.lock(),
            vec![
                Event { id: 0, flags: 0, path: EventPath::Object { container, index: 0 } },
                Event { id: 0, flags: 0, path: EventPath::Object { container, index: 1 } },
            ]
        );
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let ctx = CallbackContext::new(
            |_src, _info: &u32, _events: &[Event]| panic!("callback failed"),
            7u32,
            PayloadFlags::NONE,
        );
        let block = EventBlock {
            source: core::ptr::null(),
            context: CallbackContext::context_ptr(&ctx),
            count: 0,
            paths: core::ptr::null(),
            flags: core::ptr::null(),
            ids: core::ptr::null(),
        };
        let before = stats().callbacks_dispatched;
        unsafe { dispatch::<u32>(&block) };
        assert!(stats().callbacks_dispatched > before);
    }

    #[test]
    fn test_oversized_count_is_contained() {
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let ctx = CallbackContext::new(
            move |_src, _info: &(), _events: &[Event]| *flag.lock() = true,
            (),
            PayloadFlags::NONE,
        );
        // Null arrays with a count no event list can hold
        let block = EventBlock {
            source: core::ptr::null(),
            context: CallbackContext::context_ptr(&ctx),
            count: usize::MAX,
            paths: core::ptr::null(),
            flags: core::ptr::null(),
            ids: core::ptr::null(),
        };
        unsafe { dispatch::<()>(&block) };
        assert!(!*called.lock());
    }

    #[test]
    fn test_null_context_ignored() {
        let block = EventBlock {
            source: core::ptr::null(),
            context: core::ptr::null(),
            count: 1,
            paths: core::ptr::null(),
            flags: core::ptr::null(),
            ids: core::ptr::null(),
        };
        unsafe { dispatch::<String>(&block) };
    }

    #[test]
    fn test_payload_flags() {
        let flags = PayloadFlags::OBJECT_REFS | PayloadFlags::EXTENDED_DATA;
        assert_eq!(flags.bits(), 0x41);
        assert!(flags.contains(PayloadFlags::OBJECT_REFS));
        assert!(!PayloadFlags::NONE.contains(PayloadFlags::OBJECT_REFS));
        assert_eq!(format!("{:?}", flags), "PayloadFlags(0x41)");
    }
}
