//! End-to-end tests: build, compile and run functions on the host.
#![cfg(target_arch = "x86_64")]

use anvil_jit::ir::{Abi, Signature, Type};
use anvil_jit::{CallFlags, Context};

fn int2_sig() -> Signature {
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

#[test]
fn add_ints() {
    let ctx = Context::new();
    let f = ctx.create_function(int2_sig()).unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let sum = body.add(a, b)?;
        body.return_(Some(sum))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(apply_i32(&ctx, f, &[3, 4]), (true, 7));
    assert_eq!(apply_i32(&ctx, f, &[-10, 4]), (true, -6));
}

#[test]
fn identity_int_and_float() {
    let ctx = Context::new();

    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int]))
        .unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        body.return_(Some(a))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(apply_i32(&ctx, f, &[12345]), (true, 12345));
    assert_eq!(apply_i32(&ctx, f, &[i32::MIN]), (true, i32::MIN));

    let g = ctx
        .create_function(Signature::new(
            Abi::Cdecl,
            Type::Float64,
            vec![Type::Float64],
        ))
        .unwrap();
    ctx.build(g, |body| {
        let a = body.param(0).unwrap();
        body.return_(Some(a))
    })
    .unwrap()
    .unwrap();
    ctx.compile(g).unwrap();
    let x = 2.5f64;
    let mut out = 0.0f64;
    let args = [&x as *const f64 as *const u8];
    assert!(ctx
        .apply(g, &args, &mut out as *mut f64 as *mut u8)
        .unwrap());
    assert_eq!(out, 2.5);
}

#[test]
fn arithmetic_with_mixed_types_and_conversions() {
    let ctx = Context::new();
    // (int, double) -> int computing (int)(a * b)
    let f = ctx
        .create_function(Signature::new(
            Abi::Cdecl,
            Type::Int,
            vec![Type::Int, Type::Float64],
        ))
        .unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let product = body.mul(a, b)?;
        let truncated = body.convert(product, Type::Int, false)?;
        body.return_(Some(truncated))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let a = 6i32;
    let b = 2.5f64;
    let mut out = 0i32;
    let args = [
        &a as *const i32 as *const u8,
        &b as *const f64 as *const u8,
    ];
    assert!(ctx
        .apply(f, &args, &mut out as *mut i32 as *mut u8)
        .unwrap());
    assert_eq!(out, 15);
}

#[test]
fn branches_select_the_maximum() {
    let ctx = Context::new();
    let f = ctx.create_function(int2_sig()).unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let cond = body.gt(a, b)?;
        let mut else_label = anvil_jit::ir::Label::UNDEFINED;
        body.branch_if_not(cond, &mut else_label)?;
        body.return_(Some(a))?;
        body.label(&mut else_label)?;
        body.return_(Some(b))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(apply_i32(&ctx, f, &[3, 9]).1, 9);
    assert_eq!(apply_i32(&ctx, f, &[42, 9]).1, 42);
    assert_eq!(apply_i32(&ctx, f, &[-5, -9]).1, -5);
}

#[test]
fn tail_self_call_runs_in_constant_stack() {
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int]))
        .unwrap();
    let self_info = ctx.callee_info(f).unwrap();
    ctx.build(f, |body| {
        let n = body.param(0).unwrap();
        let zero = body.const_int(0);
        let done = body.eq(n, zero)?;
        let mut recurse = anvil_jit::ir::Label::UNDEFINED;
        body.branch_if_not(done, &mut recurse)?;
        let zero = body.const_int(0);
        body.return_(Some(zero))?;
        body.label(&mut recurse)?;
        let one = body.const_int(1);
        let less = body.sub(n, one)?;
        let r = body.call(Some("self"), &self_info, &[less], CallFlags::TAIL)?;
        body.return_(Some(r))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    // Deep enough that a non-tail version would exhaust any thread stack.
    assert_eq!(apply_i32(&ctx, f, &[100_000]), (true, 0));
}

#[test]
fn call_between_jit_functions_compiles_callee_on_demand() {
    let ctx = Context::new();
    let callee = ctx.create_function(int2_sig()).unwrap();
    ctx.build(callee, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let sum = body.add(a, b)?;
        body.return_(Some(sum))
    })
    .unwrap()
    .unwrap();

    let callee_info = ctx.callee_info(callee).unwrap();
    let caller = ctx.create_function(int2_sig()).unwrap();
    ctx.build(caller, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let sum = body.call(Some("callee"), &callee_info, &[a, b], CallFlags::NONE)?;
        let one = body.const_int(1);
        let plus = body.add(sum, one)?;
        body.return_(Some(plus))
    })
    .unwrap()
    .unwrap();

    // Only the caller is compiled eagerly; the callee compiles on first
    // call through its redirector.
    ctx.compile(caller).unwrap();
    assert!(!ctx.is_compiled(callee).unwrap());
    assert_eq!(apply_i32(&ctx, caller, &[3, 4]), (true, 8));
    assert!(ctx.is_compiled(callee).unwrap());
}

#[test]
fn call_native_functions() {
    extern "C" fn triple(x: i32) -> i32 {
        x * 3
    }
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int]))
        .unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let sig = Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int]);
        let r = body.call_native("triple", triple as usize, &sig, &[a], CallFlags::NOTHROW)?;
        body.return_(Some(r))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(apply_i32(&ctx, f, &[14]), (true, 42));
}

#[test]
fn call_indirect_through_a_function_pointer() {
    extern "C" fn sub(a: i32, b: i32) -> i32 {
        a - b
    }
    let ctx = Context::new();
    let f = ctx.create_function(int2_sig()).unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let target = body.const_nint(Type::Ptr, sub as usize as i64);
        let sig = int2_sig();
        let r = body.call_indirect(target, &sig, &[a, b], CallFlags::NOTHROW)?;
        body.return_(Some(r))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(apply_i32(&ctx, f, &[10, 4]), (true, 6));
}

#[test]
fn closure_round_trip() {
    let ctx = Context::new();
    let f = ctx.create_function(int2_sig()).unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let sum = body.add(a, b)?;
        body.return_(Some(sum))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let closure = ctx.to_closure(f).unwrap();
    let native: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(closure) };
    assert_eq!(native(20, 22), 42);
    assert_eq!(native(20, 22), apply_i32(&ctx, f, &[20, 22]).1);

    // The closure pointer maps back to the function that produced it.
    assert_eq!(ctx.from_closure(closure), Some(f));
    let vtable = ctx.to_vtable_pointer(f).unwrap();
    assert_eq!(ctx.from_vtable_pointer(vtable), Some(f));
}

#[test]
fn uncompiled_closure_compiles_on_first_native_call() {
    let ctx = Context::new();
    let f = ctx.create_function(int2_sig()).unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        let m = body.mul(a, b)?;
        body.return_(Some(m))
    })
    .unwrap()
    .unwrap();

    // No explicit compile: the pointer goes through the indirector and the
    // first call lands in the redirector.
    let closure = ctx.to_closure(f).unwrap();
    let native: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(closure) };
    assert_eq!(native(6, 7), 42);
    assert!(ctx.is_compiled(f).unwrap());
}

#[test]
fn recompilation_reaches_existing_callers() {
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![]))
        .unwrap();
    ctx.set_recompilable(f, true).unwrap();
    ctx.build(f, |body| {
        let v = body.const_int(1);
        body.return_(Some(v))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let closure = ctx.to_closure(f).unwrap();
    let native: extern "C" fn() -> i32 = unsafe { std::mem::transmute(closure) };
    assert_eq!(native(), 1);

    // Rebuild with different contents and recompile; the same captured
    // pointer must now reach the new code.
    ctx.build(f, |body| {
        let v = body.const_int(2);
        body.return_(Some(v))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(native(), 2);
}

#[test]
fn abandon_discards_uncompiled_functions() {
    let ctx = Context::new();
    let f = ctx.create_function(int2_sig()).unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        body.return_(Some(a))
    })
    .unwrap()
    .unwrap();
    ctx.abandon(f).unwrap();
    assert!(ctx.is_compiled(f).is_err());

    // A compiled function only loses its new builder.
    let g = ctx.create_function(int2_sig()).unwrap();
    ctx.build(g, |body| {
        let a = body.param(0).unwrap();
        body.return_(Some(a))
    })
    .unwrap()
    .unwrap();
    ctx.compile(g).unwrap();
    ctx.build(g, |body| {
        let b = body.param(1).unwrap();
        body.return_(Some(b))
    })
    .unwrap()
    .unwrap();
    ctx.abandon(g).unwrap();
    assert_eq!(apply_i32(&ctx, g, &[5, 6]).1, 5);
}

#[test]
fn jump_tables_dispatch_by_index() {
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int]))
        .unwrap();
    ctx.build(f, |body| {
        use anvil_jit::ir::Label;
        let idx = body.param(0).unwrap();
        let mut cases = [Label::UNDEFINED; 3];
        body.jump_table(idx, &mut cases)?;
        for (i, case) in cases.iter_mut().enumerate() {
            body.label(case)?;
            let v = body.const_int((i as i32 + 1) * 100);
            body.return_(Some(v))?;
        }
        anvil_codegen::CodegenResult::Ok(())
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(apply_i32(&ctx, f, &[0]).1, 100);
    assert_eq!(apply_i32(&ctx, f, &[1]).1, 200);
    assert_eq!(apply_i32(&ctx, f, &[2]).1, 300);
}

#[test]
fn memory_operations_on_locals() {
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![Type::Int]))
        .unwrap();
    ctx.build(f, |body| {
        // alloca a word, store through the pointer, load it back.
        let size = body.const_nint(Type::NInt, 16);
        let p = body.alloca(size)?;
        let v = body.param(0).unwrap();
        body.store_relative(p, 0, v)?;
        body.check_null(p)?;
        let loaded = body.load_relative(p, 0, Type::Int)?;
        body.return_(Some(loaded))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(apply_i32(&ctx, f, &[77]).1, 77);
}

#[test]
fn memset_and_memcpy_between_locals() {
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(Abi::Cdecl, Type::Int, vec![]))
        .unwrap();
    ctx.build(f, |body| {
        let size = body.const_nint(Type::NInt, 16);
        let src = body.alloca(size)?;
        let size2 = body.const_nint(Type::NInt, 16);
        let dst = body.alloca(size2)?;
        // Fill the source with 0x01 bytes, copy, then read a word:
        // 0x01010101 == 16843009.
        let fill = body.const_int(1);
        let n = body.const_nint(Type::NInt, 16);
        body.memset(src, fill, n)?;
        let n = body.const_nint(Type::NInt, 16);
        body.memcpy(dst, src, n)?;
        let w = body.load_relative(dst, 4, Type::Int)?;
        body.return_(Some(w))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    assert_eq!(apply_i32(&ctx, f, &[]).1, 0x01010101);
}

#[test]
fn nfloat_arithmetic_through_the_x87_stack() {
    let ctx = Context::new();
    let f = ctx
        .create_function(Signature::new(
            Abi::Cdecl,
            Type::Float64,
            vec![Type::Float64, Type::Float64],
        ))
        .unwrap();
    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        let b = body.param(1).unwrap();
        // Route through extended precision and back.
        let a = body.convert(a, Type::NFloat, false)?;
        let b = body.convert(b, Type::NFloat, false)?;
        let sum = body.add(a, b)?;
        let back = body.convert(sum, Type::Float64, false)?;
        body.return_(Some(back))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();

    let a = 1.25f64;
    let b = 2.5f64;
    let mut out = 0.0f64;
    let args = [
        &a as *const f64 as *const u8,
        &b as *const f64 as *const u8,
    ];
    assert!(ctx
        .apply(f, &args, &mut out as *mut f64 as *mut u8)
        .unwrap());
    assert_eq!(out, 3.75);
}

#[test]
fn function_listing_and_pc_lookup() {
    let ctx = Context::new();
    let f = ctx.create_function(int2_sig()).unwrap();
    let g = ctx.create_function(int2_sig()).unwrap();
    assert_eq!(ctx.functions(), vec![f, g]);

    ctx.build(f, |body| {
        let a = body.param(0).unwrap();
        body.return_(Some(a))
    })
    .unwrap()
    .unwrap();
    ctx.compile(f).unwrap();
    let entry = ctx.to_closure(f).unwrap();
    assert_eq!(ctx.function_from_pc(entry as usize), Some(f));
}
