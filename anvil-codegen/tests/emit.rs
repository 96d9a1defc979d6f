//! Emission-level properties: fixup patching, prologue placement, and the
//! grow-and-retry protocol.

use anvil_codegen::binemit::CodeBuffer;
use anvil_codegen::compile::{compile_body, CompileEnv, LeakyConstAlloc, NullResolver, RuntimeHooks};
use anvil_codegen::ir::{Abi, FunctionBody, Label, Signature, Type};
use anvil_codegen::isa::{self, TargetIsa};
use anvil_codegen::CodegenError;

fn hooks() -> RuntimeHooks {
    extern "C" fn nothing(_: i32) -> ! {
        unreachable!()
    }
    extern "C" fn nothing_ptr(_: *mut u8) -> ! {
        unreachable!()
    }
    extern "C" fn blockop(d: usize, _: usize, _: usize) -> usize {
        d
    }
    RuntimeHooks {
        exception_builtin: nothing as usize,
        exception_throw: nothing_ptr as usize,
        memcpy: blockop as usize,
        memmove: blockop as usize,
        memset: blockop as usize,
    }
}

fn emit(
    body: &mut FunctionBody,
    isa: &'static dyn TargetIsa,
    storage: &mut Vec<u8>,
) -> anvil_codegen::compile::EmitInfo {
    let mut buf = unsafe { CodeBuffer::new(storage.as_mut_ptr(), storage.len()) };
    let mut consts = LeakyConstAlloc;
    let mut env = CompileEnv {
        hooks: hooks(),
        resolver: &NullResolver,
        consts: &mut consts,
    };
    compile_body(body, isa, &mut buf, &mut env).expect("emission succeeds")
}

fn new_body(isa: &'static dyn TargetIsa, params: Vec<Type>, ret: Type) -> FunctionBody {
    let sig = Signature::new(Abi::Cdecl, ret, params);
    let mut body = FunctionBody::new(sig, isa);
    isa.create_entry_insns(&mut body).unwrap();
    body.new_block();
    body
}

#[test]
fn forward_branch_displacement_is_patched() {
    let isa: &'static dyn TargetIsa = &isa::x64::Isa;
    let mut body = new_body(isa, vec![Type::Int], Type::Int);
    let x = body.param(0).unwrap();
    let mut label = Label::UNDEFINED;
    body.branch_if_not(x, &mut label).unwrap();
    let one = body.const_int(1);
    body.return_(Some(one)).unwrap();
    body.label(&mut label).unwrap();
    let zero = body.const_int(0);
    body.return_(Some(zero)).unwrap();

    let mut storage = vec![0u8; 4096];
    emit(&mut body, isa, &mut storage);

    // Every block got an address and no fixup survived.
    let target_block = body.block_of_label(label).unwrap();
    let target = body.blocks[target_block].address.unwrap();
    for block in body.blocks.values() {
        assert_eq!(block.fixup_rel, 0);
        assert_eq!(block.fixup_abs, 0);
        assert!(block.address.is_some());
    }

    // Find the long-form `je` that the truth-test branch emitted and check
    // its displacement equals target - (site + 6).
    let site = storage
        .windows(2)
        .position(|w| w == [0x0F, 0x84])
        .expect("long-form je present");
    let disp = i32::from_le_bytes(storage[site + 2..site + 6].try_into().unwrap());
    assert_eq!(disp as i64, target as i64 - (site as i64 + 6));
}

#[test]
fn entry_sits_at_prologue_slot_tail() {
    let isa: &'static dyn TargetIsa = &isa::x64::Isa;
    let mut body = new_body(isa, vec![], Type::Void);
    body.return_(None).unwrap();

    let mut storage = vec![0u8; 4096];
    let info = emit(&mut body, isa, &mut storage);

    // The prologue is copied right-aligned into the reserved slot; the
    // entry must start with `push rbp; mov rbp, rsp`.
    assert!(info.entry_offset > 0);
    assert!((info.entry_offset as usize) < isa.prolog_size());
    let e = info.entry_offset as usize;
    assert_eq!(storage[e], 0x55);
    assert_eq!(&storage[e + 1..e + 4], &[0x48, 0x89, 0xE5]);
}

#[test]
fn exhausted_region_reports_code_too_large() {
    let isa: &'static dyn TargetIsa = &isa::x64::Isa;
    let mut body = new_body(isa, vec![Type::Int, Type::Int], Type::Int);
    let a = body.param(0).unwrap();
    let b = body.param(1).unwrap();
    let mut acc = a;
    for _ in 0..32 {
        acc = body.add(acc, b).unwrap();
    }
    body.return_(Some(acc)).unwrap();

    let mut storage = vec![0u8; 96];
    let mut buf = unsafe { CodeBuffer::new(storage.as_mut_ptr(), storage.len()) };
    let mut consts = LeakyConstAlloc;
    let mut env = CompileEnv {
        hooks: hooks(),
        resolver: &NullResolver,
        consts: &mut consts,
    };
    let err = compile_body(&mut body, isa, &mut buf, &mut env).unwrap_err();
    assert_eq!(err, CodegenError::CodeTooLarge);
}

#[test]
fn x86_32_body_emits_with_callee_pop_return() {
    let isa: &'static dyn TargetIsa = &isa::x86::Isa;
    let sig = Signature::new(Abi::StdCall, Type::Int, vec![Type::Int, Type::Int]);
    let mut body = FunctionBody::new(sig, isa);
    isa.create_entry_insns(&mut body).unwrap();
    body.new_block();
    let a = body.param(0).unwrap();
    let b = body.param(1).unwrap();
    let sum = body.add(a, b).unwrap();
    body.return_(Some(sum)).unwrap();

    let mut storage = vec![0u8; 4096];
    let info = emit(&mut body, isa, &mut storage);

    // stdcall with two int args pops 8 bytes: `ret 8` must appear.
    let code = &storage[..info.code_size as usize];
    assert!(code
        .windows(3)
        .any(|w| w == [0xC2, 0x08, 0x00]));
}

#[test]
fn x86_32_long_multiply_calls_an_intrinsic() {
    let isa: &'static dyn TargetIsa = &isa::x86::Isa;
    let sig = Signature::new(Abi::Cdecl, Type::Long, vec![Type::Long, Type::Long]);
    let mut body = FunctionBody::new(sig, isa);
    isa.create_entry_insns(&mut body).unwrap();
    body.new_block();
    let a = body.param(0).unwrap();
    let b = body.param(1).unwrap();
    let product = body.mul(a, b).unwrap();
    body.return_(Some(product)).unwrap();

    // The builder must have selected the runtime intrinsic, not LMul.
    use anvil_codegen::ir::Opcode;
    assert!(!body.insts.values().any(|i| i.opcode == Opcode::LMul));
    assert!(body
        .insts
        .values()
        .any(|i| i.opcode == Opcode::CallExternal));
}
