//! IR-level behavior of the instruction builder.

use anvil_codegen::builder::mem::check_is_redundant;
use anvil_codegen::ir::{
    Abi, FunctionBody, Label, Opcode, Signature, Type,
};
use anvil_codegen::isa::{self, TargetIsa};

fn x64_isa() -> &'static dyn TargetIsa {
    &isa::x64::Isa
}

fn body_with(params: Vec<Type>, ret: Type) -> FunctionBody {
    let isa = x64_isa();
    let sig = Signature::new(Abi::Cdecl, ret, params);
    let mut body = FunctionBody::new(sig, isa);
    isa.create_entry_insns(&mut body).unwrap();
    body.new_block();
    body
}

#[test]
fn constant_operands_fold_to_constants() {
    let mut body = body_with(vec![], Type::Int);
    let a = body.const_int(3);
    let b = body.const_int(4);
    let sum = body.add(a, b).unwrap();
    assert!(body.values[sum].is_constant());
    assert_eq!(body.values[sum].nint_constant(), Some(7));

    // Mixed types promote before folding.
    let c = body.const_int(2);
    let d = body.const_long(40);
    let sum = body.add(c, d).unwrap();
    assert_eq!(body.values[sum].nint_constant(), Some(42));
}

#[test]
fn checked_overflow_does_not_fold() {
    let mut body = body_with(vec![], Type::Int);
    let a = body.const_int(i32::MAX);
    let b = body.const_int(1);
    // Wrapping form folds...
    let wrapped = body.add(a, b).unwrap();
    assert_eq!(body.values[wrapped].nint_constant(), Some(i32::MIN as i64));
    // ...the checked form must survive to runtime.
    let checked = body.add_ovf(a, b).unwrap();
    assert!(!body.values[checked].is_constant());
}

#[test]
fn branch_fuses_preceding_comparison() {
    let mut body = body_with(vec![Type::Int, Type::Int], Type::Int);
    let a = body.param(0).unwrap();
    let b = body.param(1).unwrap();
    let cmp = body.lt(a, b).unwrap();
    let mut label = Label::UNDEFINED;
    body.branch_if(cmp, &mut label).unwrap();

    // The compare instruction itself must have become the branch.
    let branches: Vec<Opcode> = body
        .insts
        .values()
        .map(|i| i.opcode)
        .filter(|op| op.is_branch())
        .collect();
    assert_eq!(branches, vec![Opcode::BrILt]);
    assert!(!body.insts.values().any(|i| i.opcode == Opcode::ILt));
}

#[test]
fn branch_if_not_uses_inverted_float_form() {
    let mut body = body_with(vec![Type::Float64, Type::Float64], Type::Int);
    let a = body.param(0).unwrap();
    let b = body.param(1).unwrap();
    let cmp = body.lt(a, b).unwrap();
    let mut label = Label::UNDEFINED;
    body.branch_if_not(cmp, &mut label).unwrap();
    // !(a < b) must take the branch on NaN: the inverted, unordered form.
    assert!(body
        .insts
        .values()
        .any(|i| i.opcode == Opcode::BrDGeInv));
}

#[test]
fn load_relative_folds_add_relative_chains() {
    let mut body = body_with(vec![Type::Ptr], Type::Int);
    let p = body.param(0).unwrap();
    let q = body.add_relative(p, 8).unwrap();
    let _loaded = body.load_relative(q, 4, Type::Int).unwrap();

    // The chain collapses to one load at base + 12 off the original
    // pointer.
    let load = body
        .insts
        .values()
        .find(|i| i.opcode == Opcode::LoadRelativeInt)
        .expect("load instruction present");
    assert_eq!(load.value1.value(), Some(p));
    let off = load.value2.value().unwrap();
    assert_eq!(body.values[off].nint_constant(), Some(12));
}

#[test]
fn consecutive_add_relatives_collapse() {
    let mut body = body_with(vec![Type::Ptr], Type::Int);
    let p = body.param(0).unwrap();
    let q = body.add_relative(p, 8).unwrap();
    let r = body.add_relative(q, 16).unwrap();
    let add = body
        .insts
        .values()
        .filter(|i| i.opcode == Opcode::AddRelative)
        .last()
        .unwrap();
    assert_eq!(add.value1.value(), Some(p));
    let off = add.value2.value().unwrap();
    assert_eq!(body.values[off].nint_constant(), Some(24));
    let _ = r;
}

#[test]
fn redundant_null_checks_are_detected() {
    let mut body = body_with(vec![Type::Ptr], Type::Int);
    let p = body.param(0).unwrap();
    body.check_null(p).unwrap();
    let _x = body.load_relative(p, 8, Type::Int).unwrap();
    body.check_null(p).unwrap();

    let block = body.current_block;
    let insns = body.blocks[block].insns.clone();
    let checks: Vec<usize> = insns
        .iter()
        .enumerate()
        .filter(|(_, i)| body.insts[**i].opcode == Opcode::CheckNull)
        .map(|(pos, _)| pos)
        .collect();
    assert_eq!(checks.len(), 2);
    assert!(!check_is_redundant(&body, block, checks[0]));
    assert!(check_is_redundant(&body, block, checks[1]));
}

#[test]
fn stores_through_pointers_keep_checks_redundant() {
    let mut body = body_with(vec![Type::Ptr, Type::Int], Type::Int);
    let p = body.param(0).unwrap();
    let v = body.param(1).unwrap();
    body.check_null(p).unwrap();
    // Writes through the pointer target memory, not the pointer value.
    body.store_relative(p, 0, v).unwrap();
    body.check_null(p).unwrap();

    let block = body.current_block;
    let insns = body.blocks[block].insns.clone();
    let last_check = insns
        .iter()
        .enumerate()
        .rev()
        .find(|(_, i)| body.insts[**i].opcode == Opcode::CheckNull)
        .map(|(pos, _)| pos)
        .unwrap();
    assert!(check_is_redundant(&body, block, last_check));
}

#[test]
fn null_check_on_nonnull_constant_is_elided() {
    let mut body = body_with(vec![], Type::Int);
    let p = body.const_nint(Type::Ptr, 0x1000);
    body.check_null(p).unwrap();
    assert!(!body.insts.values().any(|i| i.opcode == Opcode::CheckNull));
}

#[test]
fn return_dead_ends_the_block() {
    let mut body = body_with(vec![Type::Int], Type::Int);
    let a = body.param(0).unwrap();
    let before = body.current_block;
    body.return_(Some(a)).unwrap();
    assert!(body.blocks[before].ends_in_dead);
    assert_ne!(body.current_block, before);
    assert!(!body.blocks[body.current_block].ends_in_dead);
}

#[test]
fn conversion_chains_use_intermediate_steps() {
    let mut body = body_with(vec![Type::Float64], Type::Int);
    let a = body.param(0).unwrap();
    // double -> sbyte goes through an int intermediate.
    let _v = body.convert(a, Type::SByte, false).unwrap();
    let ops: Vec<Opcode> = body.insts.values().map(|i| i.opcode).collect();
    assert!(ops.contains(&Opcode::Float64ToInt));
    assert!(ops.contains(&Opcode::TruncSByte));
}

#[test]
fn checked_conversion_selects_checked_opcodes() {
    let mut body = body_with(vec![Type::Long], Type::Int);
    let a = body.param(0).unwrap();
    let _v = body.convert(a, Type::Int, true).unwrap();
    assert!(body
        .insts
        .values()
        .any(|i| i.opcode == Opcode::CheckSignedLowWord));
}

#[test]
fn deferred_pops_accumulate_and_flush() {
    let mut body = body_with(vec![], Type::Void);
    body.defer_pop_stack(2).unwrap();
    body.defer_pop_stack(3).unwrap();
    assert_eq!(body.deferred_pop_items, 5);
    // Below threshold: nothing happens.
    body.flush_defer_pop(8).unwrap();
    assert_eq!(body.deferred_pop_items, 5);
    // At threshold zero everything flushes as one pop.
    body.flush_defer_pop(0).unwrap();
    assert_eq!(body.deferred_pop_items, 0);
    assert!(body.insts.values().any(|i| i.opcode == Opcode::PopStack));
}

#[test]
fn labels_bind_once_and_alias_empty_blocks() {
    let mut body = body_with(vec![], Type::Void);
    let mut a = Label::UNDEFINED;
    let mut b = Label::UNDEFINED;
    body.label(&mut a).unwrap();
    body.label_tight(&mut b).unwrap();
    // Adjacent labels denote the same block.
    assert_eq!(body.block_of_label(a), body.block_of_label(b));
}

#[test]
fn float_only_operations_widen_integers() {
    let mut body = body_with(vec![Type::Int], Type::Float64);
    let a = body.param(0).unwrap();
    let s = body.sin(a).unwrap();
    // An integer operand reaches the float-only table as nfloat.
    assert_eq!(
        body.values[s].ty.kind(),
        anvil_codegen::ir::TypeKind::NFloat
    );
}
