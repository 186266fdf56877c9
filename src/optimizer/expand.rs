/*!
  Expansions rewrite one instruction of a tier the target cannot execute into a sequence of
  lower-tier instructions with the same effect on the destination register and memory.

  Every expansion may use the session's reserved scratch register freely. Any other register it
  needs is borrowed: chosen from R1 upward, skipping the instruction's own registers and the
  scratch register, pushed before the sequence and popped after it. The flags accumulator is
  clobbered, and so is the scratch register. Lowered `MLT` and `BSL` end with the masked
  result in the flags, so a product or shift that overflows the word does not set the carry a
  following `BRC` would see natively.

  The sequences may themselves contain opcodes above the target tier (`DIV` traps with `BRK`,
  `DQ` splits into two `DD`s); the optimizer lowers them again.
*/

use crate::bytecode::{halves, split_words, Instruction, Operation};
use crate::emitter::Emitter;
use crate::error::OperandError;
use crate::operand::{Operand, RegisterIndex, ZERO_REGISTER};
use crate::symboltable::Label;

/// What an expansion knows about the session it runs in.
#[derive(Clone, Copy, Debug)]
pub struct Context {
  pub scratch   : RegisterIndex,
  pub word_bits : u32,
}

pub type Expansion = fn(&Instruction, &mut Emitter, &Context) -> Result<(), OperandError>;

/// The registered expansion for an opcode. Opcodes that are never lowered have none.
pub fn expansion_for(operation: Operation) -> Option<Expansion> {
  use Operation::*;
  match operation {
    Mlt => Some(multiply),
    Div => Some(divide),
    Mod => Some(modulo),
    Bsl => Some(shift_left),
    Bsr => Some(shift_right),
    Cal => Some(call),
    Ret => Some(ret),
    Brk => Some(breakpoint),
    Dd  => Some(double_word),
    Dq  => Some(quad_word),
    _   => None
  }
}

// region Helpers

fn reg(index: RegisterIndex) -> Operand {
  Operand::Register(index)
}

fn zero() -> Operand {
  Operand::Register(ZERO_REGISTER)
}

fn to(label: &Label) -> Operand {
  Operand::Label(label.clone())
}

/// The operand in 1-based slot `position`. Construction guarantees it exists for a
/// well-formed instruction.
fn slot(instruction: &Instruction, position: usize) -> Result<&Operand, OperandError> {
  let operand = match position {
    1 => instruction.a(),
    2 => instruction.b(),
    _ => instruction.c()
  };
  operand.ok_or(OperandError::WrongCount{
    operation : instruction.operation(),
    expected  : instruction.operation().arity(),
    found     : instruction.operands().count()
  })
}

/// The destination register in slot A.
fn destination(instruction: &Instruction) -> Result<Operand, OperandError> {
  let operand = slot(instruction, 1)?;
  match operand.is_register() {
    true  => Ok(operand.clone()),
    false => Err(OperandError::Disallowed{ operation: instruction.operation(), position: 1, kind: operand.kind() })
  }
}

/// `count` general-purpose registers the instruction does not name.
fn borrow(instruction: &Instruction, context: &Context, count: usize) -> Vec<RegisterIndex> {
  (1..)
    .filter(|&index| index != context.scratch && !instruction.uses_register(index))
    .take(count)
    .collect()
}

fn save(emitter: &mut Emitter, registers: &[RegisterIndex]) -> Result<(), OperandError> {
  for &index in registers {
    emitter.op(Operation::Psh, &[reg(index)])?;
  }
  Ok(())
}

fn restore(emitter: &mut Emitter, registers: &[RegisterIndex]) -> Result<(), OperandError> {
  for &index in registers.iter().rev() {
    emitter.op(Operation::Pop, &[reg(index)])?;
  }
  Ok(())
}

/// Copies a register, immediate or label address into `target`.
fn load(emitter: &mut Emitter, target: RegisterIndex, value: &Operand) -> Result<(), OperandError> {
  match value {
    Operand::Register(_) => emitter.op(Operation::Mov, &[reg(target), value.clone()]),
    _                    => emitter.op(Operation::Imm, &[reg(target), value.clone()])
  }
}

/// A register holding the (read-only) value in `operand`: the operand's own register, or the
/// borrowed register `spare` after loading it.
fn read_only(emitter: &mut Emitter, operand: &Operand, spare: Option<RegisterIndex>)
  -> Result<RegisterIndex, OperandError>
{
  match (operand, spare) {
    (Operand::Register(index), _) => Ok(*index),
    (_, Some(spare)) => {
      load(emitter, spare, operand)?;
      Ok(spare)
    }
    (_, None) => Ok(ZERO_REGISTER)
  }
}

/// Emits the divide-by-zero trap shared by `DIV` and `MOD`: continue at `go` if `divisor` is
/// non-zero, otherwise break and skip to `done`.
fn zero_trap(emitter: &mut Emitter, divisor: RegisterIndex, go: &Label, done: &Label)
  -> Result<(), OperandError>
{
  emitter.op(Operation::Cmp, &[reg(divisor), Operand::Immediate(0)])?;
  emitter.op(Operation::Bnz, &[to(go)])?;
  emitter.op(Operation::Brk, &[])?;
  emitter.op(Operation::Bra, &[to(done)])
}

// endregion

// region Arithmetic

/// Shift-and-add, least significant bit of the multiplier first, stopping once the multiplier
/// has been shifted down to zero.
fn multiply(instruction: &Instruction, emitter: &mut Emitter, context: &Context) -> Result<(), OperandError> {
  let dest = destination(instruction)?;
  let borrowed = borrow(instruction, context, 2);
  let (multiplier, multiplicand, accumulator) = (borrowed[0], borrowed[1], context.scratch);

  save(emitter, &borrowed)?;
  load(emitter, multiplier, slot(instruction, 2)?)?;
  load(emitter, multiplicand, slot(instruction, 3)?)?;
  emitter.op(Operation::Mov, &[reg(accumulator), zero()])?;

  let top  = emitter.create_label();
  let skip = emitter.create_label();
  let done = emitter.create_label();

  emitter.mark_label(&top);
  emitter.op(Operation::Cmp, &[reg(multiplier), Operand::Immediate(0)])?;
  emitter.op(Operation::Brz, &[to(&done)])?;
  emitter.op(Operation::Bev, &[to(&skip), reg(multiplier)])?;
  emitter.op(Operation::Add, &[reg(accumulator), reg(accumulator), reg(multiplicand)])?;
  emitter.mark_label(&skip);
  emitter.op(Operation::Lsh, &[reg(multiplicand), reg(multiplicand)])?;
  emitter.op(Operation::Rsh, &[reg(multiplier), reg(multiplier)])?;
  emitter.op(Operation::Bra, &[to(&top)])?;
  emitter.mark_label(&done);

  emitter.op(Operation::Add, &[dest, reg(accumulator), zero()])?;
  restore(emitter, &borrowed)
}

/**
  Restoring binary long division, one iteration per bit of the word. Each iteration shifts the
  quotient and the remainder left and brings the next dividend bit into the remainder. If the
  remainder overflowed the word the subtraction is certain; otherwise the divisor is
  trial-subtracted and the quotient bit set only when no borrow occurs.
*/
fn divide(instruction: &Instruction, emitter: &mut Emitter, context: &Context) -> Result<(), OperandError> {
  let dest = destination(instruction)?;
  let divisor_operand = slot(instruction, 3)?;
  let borrowed = borrow(instruction, context, if divisor_operand.is_register() { 3 } else { 4 });
  let (dividend, remainder, quotient, counter) = (borrowed[0], borrowed[1], borrowed[2], context.scratch);

  save(emitter, &borrowed)?;
  let divisor = read_only(emitter, divisor_operand, borrowed.get(3).copied())?;

  let go        = emitter.create_label();
  let top       = emitter.create_label();
  let trial     = emitter.create_label();
  let force     = emitter.create_label();
  let force_sub = emitter.create_label();
  let next      = emitter.create_label();
  let done      = emitter.create_label();

  zero_trap(emitter, divisor, &go, &done)?;

  emitter.mark_label(&go);
  load(emitter, dividend, slot(instruction, 2)?)?;
  emitter.op(Operation::Mov, &[reg(remainder), zero()])?;
  emitter.op(Operation::Mov, &[reg(quotient), zero()])?;
  emitter.op(Operation::Imm, &[reg(counter), Operand::Immediate(context.word_bits as u64)])?;

  emitter.mark_label(&top);
  emitter.op(Operation::Lsh, &[reg(quotient), reg(quotient)])?;
  emitter.op(Operation::Lsh, &[reg(remainder), reg(remainder)])?;
  emitter.op(Operation::Brc, &[to(&force)])?;

  emitter.op(Operation::Lsh, &[reg(dividend), reg(dividend)])?;
  emitter.op(Operation::Bnc, &[to(&trial)])?;
  emitter.op(Operation::Inc, &[reg(remainder), reg(remainder)])?;
  emitter.mark_label(&trial);
  emitter.op(Operation::Cmp, &[reg(remainder), reg(divisor)])?;
  emitter.op(Operation::Brc, &[to(&next)])?;
  emitter.op(Operation::Sub, &[reg(remainder), reg(remainder), reg(divisor)])?;
  emitter.op(Operation::Inc, &[reg(quotient), reg(quotient)])?;
  emitter.op(Operation::Bra, &[to(&next)])?;

  // The remainder carried out of the word, so it certainly exceeds the divisor.
  emitter.mark_label(&force);
  emitter.op(Operation::Lsh, &[reg(dividend), reg(dividend)])?;
  emitter.op(Operation::Bnc, &[to(&force_sub)])?;
  emitter.op(Operation::Inc, &[reg(remainder), reg(remainder)])?;
  emitter.mark_label(&force_sub);
  emitter.op(Operation::Sub, &[reg(remainder), reg(remainder), reg(divisor)])?;
  emitter.op(Operation::Inc, &[reg(quotient), reg(quotient)])?;

  emitter.mark_label(&next);
  emitter.op(Operation::Dec, &[reg(counter), reg(counter)])?;
  emitter.op(Operation::Bnz, &[to(&top)])?;

  emitter.op(Operation::Add, &[dest, reg(quotient), zero()])?;
  emitter.mark_label(&done);
  restore(emitter, &borrowed)
}

/// Repeated subtraction until the first borrow, then one addition to undo it.
fn modulo(instruction: &Instruction, emitter: &mut Emitter, context: &Context) -> Result<(), OperandError> {
  let dest = destination(instruction)?;
  let divisor_operand = slot(instruction, 3)?;
  let borrowed = borrow(instruction, context, if divisor_operand.is_register() { 0 } else { 1 });
  let remainder = context.scratch;

  save(emitter, &borrowed)?;
  let divisor = read_only(emitter, divisor_operand, borrowed.get(0).copied())?;

  let top  = emitter.create_label();
  let done = emitter.create_label();

  load(emitter, remainder, slot(instruction, 2)?)?;
  zero_trap(emitter, divisor, &top, &done)?;

  emitter.mark_label(&top);
  emitter.op(Operation::Sub, &[reg(remainder), reg(remainder), reg(divisor)])?;
  emitter.op(Operation::Bnc, &[to(&top)])?;
  emitter.op(Operation::Add, &[reg(remainder), reg(remainder), reg(divisor)])?;

  emitter.op(Operation::Add, &[dest, reg(remainder), zero()])?;
  emitter.mark_label(&done);
  restore(emitter, &borrowed)
}

// endregion

// region Shifts

fn shift_by(shift: Operation, instruction: &Instruction, emitter: &mut Emitter, context: &Context)
  -> Result<(), OperandError>
{
  let dest = destination(instruction)?;
  let borrowed = borrow(instruction, context, 1);
  let (value, count) = (context.scratch, borrowed[0]);

  save(emitter, &borrowed)?;
  load(emitter, value, slot(instruction, 2)?)?;
  load(emitter, count, slot(instruction, 3)?)?;

  let top  = emitter.create_label();
  let done = emitter.create_label();

  emitter.mark_label(&top);
  emitter.op(Operation::Cmp, &[reg(count), Operand::Immediate(0)])?;
  emitter.op(Operation::Brz, &[to(&done)])?;
  emitter.op(shift, &[reg(value), reg(value)])?;
  emitter.op(Operation::Dec, &[reg(count), reg(count)])?;
  emitter.op(Operation::Bra, &[to(&top)])?;
  emitter.mark_label(&done);

  emitter.op(Operation::Add, &[dest, reg(value), zero()])?;
  restore(emitter, &borrowed)
}

fn shift_left(instruction: &Instruction, emitter: &mut Emitter, context: &Context) -> Result<(), OperandError> {
  shift_by(Operation::Lsh, instruction, emitter, context)
}

fn shift_right(instruction: &Instruction, emitter: &mut Emitter, context: &Context) -> Result<(), OperandError> {
  shift_by(Operation::Rsh, instruction, emitter, context)
}

// endregion

// region Control flow

/// The return site is pushed onto the value stack as a label immediate.
fn call(instruction: &Instruction, emitter: &mut Emitter, _context: &Context) -> Result<(), OperandError> {
  let target = slot(instruction, 1)?.clone();
  let return_site = emitter.create_label();
  emitter.op(Operation::Psh, &[to(&return_site)])?;
  emitter.op(Operation::Bra, &[target])?;
  emitter.mark_label(&return_site);
  Ok(())
}

fn ret(_instruction: &Instruction, emitter: &mut Emitter, context: &Context) -> Result<(), OperandError> {
  emitter.op(Operation::Pop, &[reg(context.scratch)])?;
  emitter.op(Operation::Bra, &[reg(context.scratch)])
}

fn breakpoint(_instruction: &Instruction, emitter: &mut Emitter, _context: &Context) -> Result<(), OperandError> {
  emitter.op(Operation::Hlt, &[])
}

// endregion

// region Data

fn literal(instruction: &Instruction) -> Result<u64, OperandError> {
  match slot(instruction, 1)? {
    Operand::Immediate(value) => Ok(*value),
    other => Err(OperandError::Disallowed{ operation: instruction.operation(), position: 1, kind: other.kind() })
  }
}

fn double_word(instruction: &Instruction, emitter: &mut Emitter, context: &Context) -> Result<(), OperandError> {
  for word in split_words(literal(instruction)?, context.word_bits, 2) {
    emitter.op(Operation::Dw, &[Operand::Immediate(word)])?;
  }
  Ok(())
}

fn quad_word(instruction: &Instruction, emitter: &mut Emitter, context: &Context) -> Result<(), OperandError> {
  let parts = halves(literal(instruction)?, context.word_bits.saturating_mul(2));
  emitter.op(Operation::Dd, &[Operand::Immediate(parts.high)])?;
  emitter.op(Operation::Dd, &[Operand::Immediate(parts.low)])
}

// endregion


#[cfg(test)]
mod tests {
  use super::*;

  const CONTEXT: Context = Context{ scratch: 4, word_bits: 8 };

  fn expand(operation: Operation, operands: &[Operand]) -> Vec<Instruction> {
    let instruction = Instruction::new(operation, operands).unwrap();
    let mut emitter = Emitter::new();
    expansion_for(operation).unwrap()(&instruction, &mut emitter, &CONTEXT).unwrap();
    emitter.finish().instructions
  }

  fn real(instructions: &[Instruction]) -> Vec<String> {
    instructions.iter()
                .filter(|i| !i.operation().is_pseudo())
                .map(Instruction::to_string)
                .collect()
  }

  #[test]
  fn borrowed_registers_skip_operands_and_scratch(){
    let instruction = Instruction::new(
      Operation::Mlt,
      &[Operand::Register(1), Operand::Register(3), Operand::Register(5)]
    ).unwrap();
    assert_eq!(borrow(&instruction, &CONTEXT, 3), vec![2, 6, 7]);
  }

  #[test]
  fn expansions_save_and_restore_borrowed_registers(){
    let out = real(&expand(Operation::Mlt, &[Operand::Register(1), Operand::Register(2), Operand::Register(3)]));
    assert_eq!(&out[..2], &["PSH R5", "PSH R6"]);
    assert_eq!(&out[out.len() - 3..], &["ADD R1, R4, R0", "POP R6", "POP R5"]);
  }

  #[test]
  fn register_divisor_is_used_in_place(){
    let out = real(&expand(Operation::Mod, &[Operand::Register(1), Operand::Register(2), Operand::Register(3)]));
    assert!(out.iter().all(|line| !line.starts_with("PSH")));
    assert!(out.contains(&"SUB R4, R4, R3".to_string()));
    assert!(out.contains(&"BRK".to_string()));
  }

  #[test]
  fn call_and_return(){
    let out = expand(Operation::Cal, &[Operand::Immediate(12)]);
    let operations = out.iter().map(Instruction::operation).collect::<Vec<_>>();
    assert_eq!(
      operations,
      vec![Operation::CreateLabel, Operation::Psh, Operation::Bra, Operation::MarkLabel]
    );
    assert_eq!(real(&expand(Operation::Ret, &[])), vec!["POP R4", "BRA R4"]);
    assert_eq!(real(&expand(Operation::Brk, &[])), vec!["HLT"]);
  }

  #[test]
  fn data_words_split_high_first(){
    assert_eq!(real(&expand(Operation::Dd, &[Operand::Immediate(0x1234)])), vec!["DW 18", "DW 52"]);
    assert_eq!(real(&expand(Operation::Dq, &[Operand::Immediate(0x0102_0304)])), vec!["DD 258", "DD 772"]);
  }
}
