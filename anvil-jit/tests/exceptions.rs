//! Exception behavior: builtin faults, try/catch, and the apply blocker.
#![cfg(target_arch = "x86_64")]

use anvil_codegen::fold::builtin;
use anvil_jit::ir::{Abi, Signature, Type};
use anvil_jit::unwind;
use anvil_jit::{exception_code, CallFlags, Context};

fn div_sig() -> Signature {
    Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int, Type::Int])
}

fn apply_i32(ctx: &Context, f: anvil_jit::FuncId, args: &[i32]) -> (bool, i32) {
    let mut result = 0i32;
    let ptrs: Vec<*const u8> = args.iter().map(|a| a as *const i32 as *const u8).collect();
    let ok = ctx
        .apply(f, &ptrs, &mut result as *mut i32 as *mut u8)
        .unwrap();
    (ok, result)
}

fn build_div(ctx: &Context) -> anvil_jit::FuncId {
    let f = ctx.create_function(div_sig()).unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let q = body.div(a, b)?;
        body.return_(Some(q))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    f
}

#[test]
fn division_works_when_defined() {
    let ctx = Context::new();
    let f = build_div(&ctx);
    assert_eq!(apply_i32(&ctx, f, &[10, 2]), (true, 5));
    assert_eq!(apply_i32(&ctx, f, &[-9, 3]), (true, -3));
}

#[test]
fn division_by_zero_unwinds_to_the_apply_blocker() {
    let ctx = Context::new();
    let f = build_div(&ctx);
    let (ok, _) = apply_i32(&ctx, f, &[10, 0]);
    assert!(!ok);
    let code = exception_code(unwind::exception_get_last());
    assert_eq!(code, Some(builtin::DIVISION_BY_ZERO));
}

#[test]
fn int_min_by_minus_one_raises_arithmetic() {
    let ctx = Context::new();
    let f = build_div(&ctx);
    let (ok, _) = apply_i32(&ctx, f, &[i32::MIN, -1]);
    assert!(!ok);
    let code = exception_code(unwind::exception_get_last());
    assert_eq!(code, Some(builtin::ARITHMETIC));
}

#[test]
fn checked_overflow_raises_at_runtime() {
    let ctx = Context::new();
    let f = ctx.create_function(div_sig()).unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let sum = body.add_ovf(a, b)?;
        body.return_(Some(sum))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    assert_eq!(apply_i32(&ctx, f, &[40, 2]), (true, 42));
    let (ok, _) = apply_i32(&ctx, f, &[i32::MAX, 1]);
    assert!(!ok);
    let code = exception_code(unwind::exception_get_last());
    assert_eq!(code, Some(builtin::OVERFLOW));
}

#[test]
fn null_check_raises_null_reference() {
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Ptr]))
        .unwrap();
    ctx.build(f, |body| {
        let p = body.param(0).unwrap();
        body.check_null(p)?;
        let v = body.load_relative(p, 0, Type::Int)?;
        body.return_(Some(v))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let value = 99i32;
    let good: *const i32 = &value;
    let mut out = 0i32;
    let args = [&good as *const *const i32 as *const u8];
    assert!(ctx
        .apply(f, &args, &mut out as *mut i32 as *mut u8)
        .unwrap());
    assert_eq!(out, 99);

    let bad: *const i32 = core::ptr::null();
    let args = [&bad as *const *const i32 as *const u8];
    assert!(!ctx
        .apply(f, &args, &mut out as *mut i32 as *mut u8)
        .unwrap());
    assert_eq!(
        exception_code(unwind::exception_get_last()),
        Some(builtin::NULL_REFERENCE)
    );
}

#[test]
fn try_catch_recovers_from_division_by_zero() {
    let ctx = Context::new();
    let f = ctx.create_function(div_sig()).unwrap();
    ctx.build(f, |body| {
        body.uses_catcher(unwind::eh_runtime())?;
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let q = body.div(a, b)?;
        body.return_(Some(q))?;
        // All exceptions thrown in the body land here.
        let _exception = body.start_catcher()?;
        let fallback = body.const_int(-1);
        body.return_(Some(fallback))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    assert_eq!(apply_i32(&ctx, f, &[10, 2]), (true, 5));
    assert_eq!(apply_i32(&ctx, f, &[10, 0]), (true, -1));
    // The handler observed the builtin exception before normalizing it.
    assert_eq!(
        exception_code(unwind::exception_get_last()),
        Some(builtin::DIVISION_BY_ZERO)
    );
    // And the function still works afterwards.
    assert_eq!(apply_i32(&ctx, f, &[9, 3]), (true, 3));
}

#[test]
fn throw_of_a_user_object_reaches_apply() {
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![]))
        .unwrap();
    ctx.build(f, |body| {
        let obj = body.const_nint(Type::Ptr, 0x1234);
        body.throw(obj)
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let (ok, _) = apply_i32(&ctx, f, &[]);
    assert!(!ok);
    assert_eq!(unwind::exception_get_last() as usize, 0x1234);
}

#[test]
fn exceptions_cross_jit_call_frames() {
    // An uncaught fault in a callee unwinds through the caller's frame to
    // the apply blocker.
    let ctx = Context::new();
    let callee = build_div(&ctx);
    let callee_info = ctx.callee_info(callee).unwrap();

    let caller = ctx.create_function(div_sig()).unwrap();
    ctx.build(caller, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let r = body.call(Some("div"), &callee_info, &[a, b], CallFlags::NONE)?;
        body.return_(Some(r))
    })
    .unwrap()
    .unwrap();
    ctx.compile(caller).unwrap();

    assert_eq!(apply_i32(&ctx, caller, &[12, 3]), (true, 4));
    let (ok, _) = apply_i32(&ctx, caller, &[12, 0]);
    assert!(!ok);
    assert_eq!(
        exception_code(unwind::exception_get_last()),
        Some(builtin::DIVISION_BY_ZERO)
    );
}

#[test]
fn catcher_in_the_caller_sees_callee_faults() {
    let ctx = Context::new();
    let callee = build_div(&ctx);
    let callee_info = ctx.callee_info(callee).unwrap();

    let caller = ctx.create_function(div_sig()).unwrap();
    ctx.build(caller, |body| {
        body.uses_catcher(unwind::eh_runtime())?;
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let r = body.call(Some("div"), &callee_info, &[a, b], CallFlags::NONE)?;
        body.return_(Some(r))?;
        let _exception = body.start_catcher()?;
        let fallback = body.const_int(-7);
        body.return_(Some(fallback))
    })
    .unwrap()
    .unwrap();
    ctx.compile(caller).unwrap();

    assert_eq!(apply_i32(&ctx, caller, &[12, 4]), (true, 3));
    assert_eq!(apply_i32(&ctx, caller, &[12, 0]), (true, -7));
}

#[test]
fn intrinsic_faults_unwind_like_emitted_ones() {
    // The checked double-to-int conversion has no x86-64 rule; it raises
    // through the intrinsic thrower, which must unwind identically.
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Float64]))
        .unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let v = body.convert(a, Type::Int, true)?;
        body.return_(Some(v))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let good = 41.9f64;
    let mut out = 0i32;
    let args = [&good as *const f64 as *const u8];
    assert!(ctx
        .apply(f, &args, &mut out as *mut i32 as *mut u8)
        .unwrap());
    assert_eq!(out, 41);

    let bad = f64::NAN;
    let args = [&bad as *const f64 as *const u8];
    let ok = ctx
        .apply(f, &args, &mut out as *mut i32 as *mut u8)
        .unwrap();
    assert!(!ok);
    assert_eq!(
        exception_code(unwind::exception_get_last()),
        Some(builtin::OVERFLOW)
    );
}
