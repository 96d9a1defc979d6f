//! System V ABI interop: struct arguments and returns observed from C.
#![cfg(target_arch = "x86_64")]

use anvil_jit::ir::{Abi, Signature, StructLayout, PtrWidth, Type};
use anvil_jit::Context;

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Debug)]
struct DoublePair {
    a: f64,
    b: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct IntDouble {
    i: i64,
    d: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct BigStruct {
    a: i64,
    b: i64,
    c: i64,
}

fn pair_type() -> Type {
    Type::Aggregate(StructLayout::new_struct(
        &[Type::Float64, Type::Float64],
        PtrWidth::P64,
    ))
}

#[test]
fn struct_return_in_xmm_pair() {
    // () -> {double, double} built from a stack local; a C caller sees the
    // halves in xmm0/xmm1.
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, pair_type(), vec![]))
        .unwrap();
    ctx.build(f, |body| {
        let pair = body.create_value(pair_type());
        let addr = body.address_of(pair)?;
        let one = body.const_f64(1.0);
        body.store_relative(addr, 0, one)?;
        let two = body.const_f64(2.0);
        body.store_relative(addr, 8, two)?;
        body.return_ptr(addr, pair_type())
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let closure = ctx.to_closure(f).unwrap();
    let native: extern "C" fn() -> DoublePair = unsafe { std::mem::transmute(closure) };
    assert_eq!(native(), DoublePair { a: 1.0, b: 2.0 });

    // And through apply.
    let mut out = DoublePair { a: 0.0, b: 0.0 };
    assert!(ctx
        .apply(f, &[], &mut out as *mut DoublePair as *mut u8)
        .unwrap());
    assert_eq!(out, DoublePair { a: 1.0, b: 2.0 });
}

#[test]
fn mixed_eightbyte_struct_argument() {
    // {i64, f64} passes as (rdi, xmm0); sum the halves as a double.
    let int_double = Type::Aggregate(StructLayout::new_struct(
        &[Type::Long, Type::Float64],
        PtrWidth::P64,
    ));
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(
            Abi::Cdecl,
            Type::Float64,
            vec![int_double.clone()],
        ))
        .unwrap();
    ctx.build(f, |body| {
        let s = body.param(0).unwrap();
        let addr = body.address_of(s)?;
        let i = body.load_relative(addr, 0, Type::Long)?;
        let d = body.load_relative(addr, 8, Type::Float64)?;
        let sum = body.add(i, d)?;
        body.return_(Some(sum))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let closure = ctx.to_closure(f).unwrap();
    let native: extern "C" fn(IntDouble) -> f64 = unsafe { std::mem::transmute(closure) };
    assert_eq!(native(IntDouble { i: 40, d: 2.5 }), 42.5);
}

#[test]
fn large_struct_argument_passes_in_memory() {
    let big = Type::Aggregate(StructLayout::new_struct(
        &[Type::Long, Type::Long, Type::Long],
        PtrWidth::P64,
    ));
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Long, vec![big.clone()]))
        .unwrap();
    ctx.build(f, |body| {
        let s = body.param(0).unwrap();
        let addr = body.address_of(s)?;
        let a = body.load_relative(addr, 0, Type::Long)?;
        let b = body.load_relative(addr, 8, Type::Long)?;
        let c = body.load_relative(addr, 16, Type::Long)?;
        let ab = body.add(a, b)?;
        let abc = body.add(ab, c)?;
        body.return_(Some(abc))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let closure = ctx.to_closure(f).unwrap();
    let native: extern "C" fn(BigStruct) -> i64 = unsafe { std::mem::transmute(closure) };
    assert_eq!(native(BigStruct { a: 1, b: 2, c: 39 }), 42);
}

#[test]
fn many_arguments_spill_to_the_stack() {
    // Eight integer arguments: two land on the stack.
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(
            Abi::Cdecl,
            Type::Int,
            vec![Type::Int; 8],
        ))
        .unwrap();
    ctx.build(f, |body| {
        let mut acc = body.param(0).unwrap();
        for i in 1..8 {
            let p = body.param(i).unwrap();
            acc = body.add(acc, p)?;
        }
        body.return_(Some(acc))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let closure = ctx.to_closure(f).unwrap();
    let native: extern "C" fn(i32, i32, i32, i32, i32, i32, i32, i32) -> i32 =
        unsafe { std::mem::transmute(closure) };
    assert_eq!(native(1, 2, 3, 4, 5, 6, 7, 8), 36);

    // Through apply, the stack-passed tail goes through the invoker.
    let args: Vec<i32> = (1..=8).collect();
    let ptrs: Vec<*const u8> = args.iter().map(|a| a as *const i32 as *const u8).collect();
    let mut out = 0i32;
    assert!(ctx
        .apply(f, &ptrs, &mut out as *mut i32 as *mut u8)
        .unwrap());
    assert_eq!(out, 36);
}

#[test]
fn jit_to_jit_calls_with_stack_arguments() {
    let ctx = Context::new();
    let callee = ctx
        .create_function(Signature::new(
            Abi::Cdecl,
            Type::Int,
            vec![Type::Int; 8],
        ))
        .unwrap();
    ctx.build(callee, |body| {
        let first = body.param(0).unwrap();
        let last = body.param(7).unwrap();
        let sum = body.add(first, last)?;
        body.return_(Some(sum))
    })
    .unwrap()
    .unwrap();
    ctx.compile(callee).unwrap();
    let callee_info = ctx.callee_info(callee).unwrap();

    let caller = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int]))
        .unwrap();
    ctx.build(caller, |body| {
        let x = body.param(0).unwrap();
        let mut args = Vec::new();
        for i in 0..7 {
            args.push(body.const_int(i));
        }
        args.push(x);
        let r = body.call(
            Some("callee"),
            &callee_info,
            &args,
            anvil_jit::CallFlags::NONE,
        )?;
        body.return_(Some(r))
    })
    .unwrap()
    .unwrap();
    ctx.compile(caller).unwrap();

    let mut out = 0i32;
    let x = 100i32;
    let args = [&x as *const i32 as *const u8];
    assert!(ctx
        .apply(caller, &args, &mut out as *mut i32 as *mut u8)
        .unwrap());
    assert_eq!(out, 100); // param0 (0) + param7 (100)
}

#[test]
fn struct_argument_by_value_via_apply() {
    let pair = pair_type();
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Float64, vec![pair.clone()]))
        .unwrap();
    ctx.build(f, |body| {
        let s = body.param(0).unwrap();
        let addr = body.address_of(s)?;
        let a = body.load_relative(addr, 0, Type::Float64)?;
        let b = body.load_relative(addr, 8, Type::Float64)?;
        let sum = body.add(a, b)?;
        body.return_(Some(sum))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let arg = DoublePair { a: 1.5, b: 40.5 };
    let args = [&arg as *const DoublePair as *const u8];
    let mut out = 0.0f64;
    assert!(ctx
        .apply(f, &args, &mut out as *mut f64 as *mut u8)
        .unwrap());
    assert_eq!(out, 42.0);
}
