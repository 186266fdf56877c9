//! An operand is a tagged union holding a register index, an immediate value, or a label. The
//! operand kinds an instruction slot accepts are described by an `OperandKinds` mask.

use std::fmt::{Display, Formatter};
use std::ops::BitOr;

use crate::symboltable::Label;

/// Register indices count from zero. Register 0 is hardwired to the constant zero.
pub type RegisterIndex = usize;

/// The register that always reads as zero.
pub const ZERO_REGISTER: RegisterIndex = 0;

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Operand {
  Register(RegisterIndex),
  Immediate(u64),
  /// A symbolic target, resolved to an address when the program is loaded.
  Label(Label),
}

impl Operand {
  pub fn kind(&self) -> OperandKind {
    match self {
      Operand::Register(_)  => OperandKind::Register,
      Operand::Immediate(_) => OperandKind::Immediate,
      Operand::Label(_)     => OperandKind::Label,
    }
  }

  pub fn register(&self) -> Option<RegisterIndex> {
    match self {
      Operand::Register(index) => Some(*index),
      _                        => None
    }
  }

  pub fn is_register(&self) -> bool {
    self.register().is_some()
  }
}

impl Display for Operand {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Operand::Register(index) => write!(f, "R{}", index),
      Operand::Immediate(value) => write!(f, "{}", value),
      Operand::Label(label) => write!(f, "{}", label),
    }
  }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum OperandKind {
  Register,
  Immediate,
  Label,
}

impl OperandKind {
  fn bit(self) -> u8 {
    match self {
      OperandKind::Register  => 0b001,
      OperandKind::Immediate => 0b010,
      OperandKind::Label     => 0b100,
    }
  }
}

impl Display for OperandKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      OperandKind::Register  => write!(f, "register"),
      OperandKind::Immediate => write!(f, "immediate"),
      OperandKind::Label     => write!(f, "label"),
    }
  }
}

/// The set of operand kinds an instruction slot accepts. An empty set means the slot must be
/// absent.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct OperandKinds(u8);

impl OperandKinds {
  pub const NONE      : OperandKinds = OperandKinds(0b000);
  pub const REGISTER  : OperandKinds = OperandKinds(0b001);
  pub const IMMEDIATE : OperandKinds = OperandKinds(0b010);
  pub const LABEL     : OperandKinds = OperandKinds(0b100);
  /// Register or immediate.
  pub const VALUE     : OperandKinds = OperandKinds(0b011);
  /// Immediate or label.
  pub const ADDRESS   : OperandKinds = OperandKinds(0b110);
  pub const ANY       : OperandKinds = OperandKinds(0b111);

  pub fn allows(self, kind: OperandKind) -> bool {
    self.0 & kind.bit() != 0
  }

  pub fn is_empty(self) -> bool {
    self.0 == 0
  }
}

impl BitOr for OperandKinds {
  type Output = OperandKinds;
  fn bitor(self, rhs: OperandKinds) -> OperandKinds {
    OperandKinds(self.0 | rhs.0)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn composite_masks(){
    assert!(OperandKinds::VALUE.allows(OperandKind::Register));
    assert!(OperandKinds::VALUE.allows(OperandKind::Immediate));
    assert!(!OperandKinds::VALUE.allows(OperandKind::Label));
    assert!(!OperandKinds::ADDRESS.allows(OperandKind::Register));
    assert_eq!(OperandKinds::REGISTER | OperandKinds::ADDRESS, OperandKinds::ANY);
    assert!(OperandKinds::NONE.is_empty());
  }

  #[test]
  fn display(){
    assert_eq!(Operand::Register(3).to_string(), "R3");
    assert_eq!(Operand::Immediate(42).to_string(), "42");
  }
}
