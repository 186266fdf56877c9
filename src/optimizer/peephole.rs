//! Tier-independent cleanup over a lowered instruction stream. Every rewrite is local and the
//! pass is idempotent: applying it to its own output changes nothing.

use crate::bytecode::{Instruction, Operation};
use crate::operand::{Operand, ZERO_REGISTER};

/// Independently toggleable peephole rewrites.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Peephole {
  /// `PSH x` followed by `POP y`, across comments: removed if `x == y`, else a single move.
  pub stack_traffic   : bool,
  /// `IMM r, 0` becomes `MOV r, R0`.
  pub zero_immediates : bool,
  /// Drop `CreateLabel` pseudo-ops.
  pub create_labels   : bool,
  pub comments        : bool,
  /// Drop pragmas and macro boundary markers.
  pub pragmas         : bool,
}

impl Default for Peephole {
  fn default() -> Peephole {
    Peephole{
      stack_traffic   : true,
      zero_immediates : true,
      create_labels   : false,
      comments        : false,
      pragmas         : false,
    }
  }
}

impl Peephole {

  pub fn all() -> Peephole {
    Peephole{
      stack_traffic   : true,
      zero_immediates : true,
      create_labels   : true,
      comments        : true,
      pragmas         : true,
    }
  }

  pub fn none() -> Peephole {
    Peephole{
      stack_traffic   : false,
      zero_immediates : false,
      create_labels   : false,
      comments        : false,
      pragmas         : false,
    }
  }

  /// The output doubles as a stack: a `POP` looks back at what has already been kept.
  pub fn apply(&self, input: &[Instruction]) -> Vec<Instruction> {
    let mut out: Vec<Instruction> = Vec::with_capacity(input.len());

    for instruction in input {
      match instruction.operation() {

        Operation::CreateLabel if self.create_labels => {}

        Operation::Comment if self.comments => {}

        | Operation::Pragma
        | Operation::MacroBegin
        | Operation::MacroEnd if self.pragmas => {}

        Operation::Pop if self.stack_traffic => {
          match (pending_push(&out), instruction.a()) {
            (Some(index), Some(popped)) => {
              let pushed = out.remove(index);
              if let Some(value) = pushed.a() {
                if value != popped {
                  out.push(self.canonical(transfer(popped, value, instruction)));
                }
              }
            }
            _ => out.push(instruction.clone())
          }
        }

        _ => out.push(self.canonical(instruction.clone()))
      }
    }
    out
  }

  fn canonical(&self, instruction: Instruction) -> Instruction {
    match (self.zero_immediates, instruction.operation(), instruction.a(), instruction.b()) {
      (true, Operation::Imm, Some(dest), Some(Operand::Immediate(0))) => {
        Instruction::new(Operation::Mov, &[dest.clone(), Operand::Register(ZERO_REGISTER)])
          .unwrap_or(instruction)
      }
      _ => instruction
    }
  }
}

/// The index of a `PSH` ending the output, looking past trailing comments.
fn pending_push(out: &[Instruction]) -> Option<usize> {
  for (index, instruction) in out.iter().enumerate().rev() {
    match instruction.operation() {
      Operation::Comment => continue,
      Operation::Psh     => return Some(index),
      _                  => return None
    }
  }
  None
}

/// `dest := value` as one instruction, falling back to the original `POP`.
fn transfer(dest: &Operand, value: &Operand, original: &Instruction) -> Instruction {
  let operation = match value {
    Operand::Register(_) => Operation::Mov,
    _                    => Operation::Imm
  };
  Instruction::new(operation, &[dest.clone(), value.clone()]).unwrap_or_else(|_| original.clone())
}
