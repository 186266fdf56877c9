use std::fmt::{Display, Formatter};

use crate::bytecode::{Instruction, Operation};
use crate::operand::{Operand, RegisterIndex};
use crate::symboltable::{Label, Resolution};

/// An operand as the machine sees it: label operands are resolved once, at load time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Slot {
  Register(RegisterIndex),
  Value(u64),
  /// A label that was never marked. Executing an instruction that reads it faults.
  Unresolved(Label),
}

impl Slot {
  /// Immediates are masked to the word; label addresses are not.
  pub fn decode(operand: &Operand, resolution: &Resolution, mask: u64) -> Slot {
    match operand {
      Operand::Register(index) => Slot::Register(*index),
      Operand::Immediate(value) => Slot::Value(value & mask),
      Operand::Label(label) => {
        match resolution.address_of(label) {
          Some(address) => Slot::Value(address),
          None          => Slot::Unresolved(label.clone())
        }
      }
    }
  }
}

impl Display for Slot {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Slot::Register(index)   => write!(f, "R{}", index),
      Slot::Value(value)      => write!(f, "{}", value),
      Slot::Unresolved(label) => write!(f, "{}?", label),
    }
  }
}

/// An instruction ready to execute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decoded {
  pub operation : Operation,
  pub operands  : [Option<Slot>; 3],
}

impl Decoded {
  pub fn new(instruction: &Instruction, resolution: &Resolution, mask: u64) -> Decoded {
    let decode = |operand: Option<&Operand>| operand.map(|o| Slot::decode(o, resolution, mask));
    Decoded{
      operation : instruction.operation(),
      operands  : [decode(instruction.a()), decode(instruction.b()), decode(instruction.c())],
    }
  }

  /// The slot at 1-based `position`.
  pub fn slot(&self, position: usize) -> Option<&Slot> {
    self.operands.get(position.wrapping_sub(1)).and_then(Option::as_ref)
  }
}

impl Display for Decoded {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let operands = self.operands
                       .iter()
                       .filter_map(Option::as_ref)
                       .map(Slot::to_string)
                       .collect::<Vec<String>>();
    match operands.is_empty() {
      true  => write!(f, "{}", self.operation),
      false => write!(f, "{} {}", self.operation, operands.join(", "))
    }
  }
}

/// One word of RAM or ROM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Cell {
  Data(u64),
  Code(Decoded),
}

impl Default for Cell {
  fn default() -> Cell {
    Cell::Data(0)
  }
}

impl Display for Cell {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Cell::Data(value)   => write!(f, "{}", value),
      Cell::Code(decoded) => write!(f, "{}", decoded),
    }
  }
}
