use std::fmt::{Display, Formatter};
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};

use crate::error::OperandError;
use crate::operand::{Operand, OperandKinds, RegisterIndex};
use crate::symboltable::Label;

/**
  How portable an opcode is. Tiers are ordered from most to least portable, so a target that
  supports `Complex` also supports `Basic` and `Core`. The discriminant is the tier's level,
  which lets a host configure a target tier as a plain number.
*/
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq, PartialEq,    Ord, PartialOrd, Debug, Hash
)]
#[repr(u8)]
pub enum Tier {
  Core,
  Basic,
  Complex,
  Custom,
  Pragma,
  CustomPragma,
}

/**
  Opcodes of the IR. Real opcodes are listed first, grouped by the tier they belong to; the
  compiler-only pseudo-ops come last. The metadata for each opcode lives in
  `Operation::signature()`, an exhaustive match, so a new opcode cannot be added without
  declaring its tier and operand slots.
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, EnumIter,
  Clone,        Copy,          Eq, PartialEq,  Debug, Hash
)]
pub enum Operation {
  // Core //
  #[strum(serialize = "ADD")]   Add,
  #[strum(serialize = "SUB")]   Sub,
  #[strum(serialize = "INC")]   Inc,
  #[strum(serialize = "DEC")]   Dec,
  #[strum(serialize = "CMP")]   Cmp,
  #[strum(serialize = "AND")]   And,
  #[strum(serialize = "OR")]    Or,
  #[strum(serialize = "XOR")]   Xor,
  #[strum(serialize = "NAND")]  Nand,
  #[strum(serialize = "NOR")]   Nor,
  #[strum(serialize = "XNOR")]  Xnor,
  #[strum(serialize = "NOT")]   Not,
  #[strum(serialize = "LSH")]   Lsh,
  #[strum(serialize = "RSH")]   Rsh,
  #[strum(serialize = "MOV")]   Mov,
  #[strum(serialize = "IMM")]   Imm,
  #[strum(to_string = "LOAD", serialize = "LOD")]  Load,
  #[strum(to_string = "STORE", serialize = "STR")] Store,
  #[strum(serialize = "PSH")]   Psh,
  #[strum(serialize = "POP")]   Pop,
  #[strum(serialize = "BRA")]   Bra,
  #[strum(serialize = "BRZ")]   Brz,
  #[strum(serialize = "BNZ")]   Bnz,
  #[strum(serialize = "BRC")]   Brc,
  #[strum(serialize = "BNC")]   Bnc,
  #[strum(serialize = "BRP")]   Brp,
  #[strum(serialize = "BRN")]   Brn,
  #[strum(serialize = "BEV")]   Bev,
  #[strum(serialize = "BOD")]   Bod,
  #[strum(serialize = "HLT")]   Hlt,
  #[strum(serialize = "DW")]    Dw,

  // Basic //
  #[strum(serialize = "BSL")]   Bsl,
  #[strum(serialize = "BSR")]   Bsr,
  #[strum(serialize = "CAL")]   Cal,
  #[strum(serialize = "RET")]   Ret,

  // Complex //
  #[strum(serialize = "MLT")]   Mlt,
  #[strum(serialize = "DIV")]   Div,
  #[strum(serialize = "MOD")]   Mod,
  #[strum(serialize = "DD")]    Dd,
  #[strum(serialize = "DQ")]    Dq,

  // Custom //
  #[strum(serialize = "BRK")]   Brk,
  #[strum(serialize = "IN")]    In,
  #[strum(serialize = "OUT")]   Out,

  // CustomPragma //
  #[strum(serialize = "NOP")]   Nop,

  // Compiler-only pseudo-ops //
  #[strum(serialize = "COMPILER_CREATELABEL")] CreateLabel,
  #[strum(serialize = "COMPILER_MARKLABEL")]   MarkLabel,
  #[strum(serialize = "COMPILER_COMMENT")]     Comment,
  #[strum(serialize = "COMPILER_PRAGMA")]      Pragma,
  #[strum(serialize = "COMPILER_MACRO_BEGIN")] MacroBegin,
  #[strum(serialize = "COMPILER_MACRO_END")]   MacroEnd,
  #[strum(serialize = "COMPILER_MAXREG")]      MaxReg,
  #[strum(serialize = "COMPILER_MINRAM")]      MinRam,
}

/// Static metadata of an opcode.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Signature {
  pub tier               : Tier,
  /// Accepted operand kinds for slots A, B and C. `OperandKinds::NONE` marks an absent slot.
  pub slots              : [OperandKinds; 3],
  /// A target below this opcode's tier cannot run it at all, so an expansion must exist.
  pub requires_converter : bool,
}

const fn signature(tier: Tier, slots: [OperandKinds; 3]) -> Signature {
  Signature{ tier, slots, requires_converter: false }
}

use OperandKinds as K;

const NO_OPERANDS : [OperandKinds; 3] = [K::NONE,     K::NONE,    K::NONE];
const TERNARY     : [OperandKinds; 3] = [K::REGISTER, K::VALUE,   K::VALUE];
const UNARY       : [OperandKinds; 3] = [K::REGISTER, K::VALUE,   K::NONE];
const JUMP        : [OperandKinds; 3] = [K::ANY,      K::NONE,    K::NONE];
const TEST_JUMP   : [OperandKinds; 3] = [K::ANY,      K::VALUE,   K::NONE];

impl Operation {

  pub fn signature(self) -> Signature {
    use Operation::*;
    match self {
      Add | Sub | And | Or | Xor | Nand | Nor | Xnor
                     => signature(Tier::Core, TERNARY),
      Inc | Dec | Not | Lsh | Rsh | Mov
                     => signature(Tier::Core, UNARY),
      Cmp            => signature(Tier::Core, [K::VALUE, K::VALUE, K::NONE]),
      Imm            => signature(Tier::Core, [K::REGISTER, K::ADDRESS, K::NONE]),
      Load           => signature(Tier::Core, [K::REGISTER, K::ANY, K::NONE]),
      Store          => signature(Tier::Core, [K::ANY, K::VALUE, K::NONE]),
      Psh            => signature(Tier::Core, [K::ANY, K::NONE, K::NONE]),
      Pop            => signature(Tier::Core, [K::REGISTER, K::NONE, K::NONE]),
      Bra | Brz | Bnz | Brc | Bnc | Brp | Brn
                     => signature(Tier::Core, JUMP),
      Bev | Bod      => signature(Tier::Core, TEST_JUMP),
      Hlt            => signature(Tier::Core, NO_OPERANDS),
      Dw             => signature(Tier::Core, [K::ADDRESS, K::NONE, K::NONE]),

      Bsl | Bsr      => signature(Tier::Basic, TERNARY),
      Cal            => signature(Tier::Basic, JUMP),
      Ret            => signature(Tier::Basic, NO_OPERANDS),

      Mlt | Div | Mod
                     => signature(Tier::Complex, TERNARY),
      Dd | Dq        => signature(Tier::Complex, [K::IMMEDIATE, K::NONE, K::NONE]),

      Brk            => Signature{ requires_converter: true, ..signature(Tier::Custom, NO_OPERANDS) },
      In             => signature(Tier::Custom, [K::REGISTER, K::VALUE, K::NONE]),
      Out            => signature(Tier::Custom, [K::VALUE, K::ANY, K::NONE]),

      Nop            => signature(Tier::CustomPragma, NO_OPERANDS),

      CreateLabel | MarkLabel
                     => signature(Tier::Pragma, [K::LABEL, K::NONE, K::NONE]),
      MaxReg | MinRam
                     => signature(Tier::Pragma, [K::IMMEDIATE, K::NONE, K::NONE]),
      Comment | Pragma | MacroBegin | MacroEnd
                     => signature(Tier::Pragma, NO_OPERANDS),
    }
  }

  pub fn tier(self) -> Tier {
    self.signature().tier
  }

  pub fn requires_converter(self) -> bool {
    self.signature().requires_converter
  }

  /// The number of operand slots the opcode requires.
  pub fn arity(self) -> usize {
    self.signature().slots.iter().filter(|slot| !slot.is_empty()).count()
  }

  /// Compiler-only pseudo-ops are always allowed on every target and occupy no memory.
  pub fn is_pseudo(self) -> bool {
    use Operation::*;
    match self {
      CreateLabel | MarkLabel | Comment | Pragma | MacroBegin | MacroEnd | MaxReg | MinRam => true,
      _ => false
    }
  }

  /// The number of memory words the opcode occupies once loaded.
  pub fn footprint(self) -> usize {
    match self {
      Operation::Dd                => 2,
      Operation::Dq                => 4,
      op if op.is_pseudo()         => 0,
      _                            => 1
    }
  }

  /// Looks up a real opcode by its (case-insensitive) mnemonic. Pseudo-ops have no mnemonic.
  pub fn from_mnemonic(text: &str) -> Option<Operation> {
    match Operation::from_str(&text.to_ascii_uppercase()) {
      Ok(operation) if !operation.is_pseudo() => Some(operation),
      _                                       => None
    }
  }
}

/**
  One opcode plus up to three typed operands. The string payload is only used by the
  comment, pragma and macro-boundary pseudo-ops. Instructions are immutable once built:
  every transformation stage constructs new values.
*/
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Instruction {
  operation : Operation,
  operands  : [Option<Operand>; 3],
  text      : Option<String>,
}

impl Instruction {

  /// Builds an instruction, checking the operands against the opcode's signature.
  pub fn new(operation: Operation, operands: &[Operand]) -> Result<Instruction, OperandError> {
    let expected = operation.arity();
    if operands.len() != expected {
      return Err(OperandError::WrongCount{ operation, expected, found: operands.len() });
    }

    let slots = operation.signature().slots;
    for (index, operand) in operands.iter().enumerate() {
      if !slots[index].allows(operand.kind()) {
        return Err(OperandError::Disallowed{ operation, position: index + 1, kind: operand.kind() });
      }
    }

    let mut filled: [Option<Operand>; 3] = [None, None, None];
    for (slot, operand) in filled.iter_mut().zip(operands.iter()) {
      *slot = Some(operand.clone());
    }
    Ok(Instruction{ operation, operands: filled, text: None })
  }

  fn with_text(operation: Operation, text: String) -> Instruction {
    Instruction{ operation, operands: [None, None, None], text: Some(text) }
  }

  fn with_label(operation: Operation, label: Label) -> Instruction {
    Instruction{ operation, operands: [Some(Operand::Label(label)), None, None], text: None }
  }

  fn with_count(operation: Operation, count: u64) -> Instruction {
    Instruction{ operation, operands: [Some(Operand::Immediate(count)), None, None], text: None }
  }

  // region Pseudo-op constructors

  pub fn comment<S: Into<String>>(text: S) -> Instruction {
    Instruction::with_text(Operation::Comment, text.into())
  }

  pub fn pragma<S: Into<String>>(text: S) -> Instruction {
    Instruction::with_text(Operation::Pragma, text.into())
  }

  pub fn macro_begin<S: Into<String>>(name: S) -> Instruction {
    Instruction::with_text(Operation::MacroBegin, name.into())
  }

  pub fn macro_end() -> Instruction {
    Instruction{ operation: Operation::MacroEnd, operands: [None, None, None], text: None }
  }

  pub fn create_label(label: &Label) -> Instruction {
    Instruction::with_label(Operation::CreateLabel, label.clone())
  }

  pub fn mark_label(label: &Label) -> Instruction {
    Instruction::with_label(Operation::MarkLabel, label.clone())
  }

  /// Bookkeeping: the highest register index the program uses.
  pub fn max_reg(index: RegisterIndex) -> Instruction {
    Instruction::with_count(Operation::MaxReg, index as u64)
  }

  /// Bookkeeping: the minimum number of RAM words the program needs.
  pub fn min_ram(words: u64) -> Instruction {
    Instruction::with_count(Operation::MinRam, words)
  }

  // endregion

  pub fn operation(&self) -> Operation {
    self.operation
  }

  pub fn a(&self) -> Option<&Operand> {
    self.operands[0].as_ref()
  }

  pub fn b(&self) -> Option<&Operand> {
    self.operands[1].as_ref()
  }

  pub fn c(&self) -> Option<&Operand> {
    self.operands[2].as_ref()
  }

  /// The present operands, in slot order.
  pub fn operands(&self) -> impl Iterator<Item = &Operand> {
    self.operands.iter().filter_map(Option::as_ref)
  }

  pub fn text(&self) -> Option<&str> {
    self.text.as_deref()
  }

  /// The label a `CreateLabel` or `MarkLabel` pseudo-op refers to.
  pub fn label(&self) -> Option<&Label> {
    match (self.operation, self.a()) {
      (Operation::CreateLabel, Some(Operand::Label(label)))
      | (Operation::MarkLabel, Some(Operand::Label(label))) => Some(label),
      _ => None
    }
  }

  /// The highest register index named by any operand, if any operand is a register.
  pub fn max_register(&self) -> Option<RegisterIndex> {
    self.operands().filter_map(Operand::register).max()
  }

  pub fn uses_register(&self, index: RegisterIndex) -> bool {
    self.operands().any(|operand| operand.register() == Some(index))
  }
}

/// The textual assembly form. Everything except `CreateLabel` and the macro boundaries reads
/// back through the assembler unchanged.
impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let text = self.text.as_deref().unwrap_or("");
    match self.operation {
      Operation::Comment    => write!(f, "// {}", text),
      Operation::Pragma     => write!(f, "@{}", text),
      Operation::MacroBegin => write!(f, "// macro {}", text),
      Operation::MacroEnd   => write!(f, "// end macro"),
      Operation::MarkLabel  => write!(f, "{}", self.operands().next().map(|a| a.to_string()).unwrap_or_default()),
      Operation::CreateLabel => write!(f, "// label {}", self.operands().next().map(|a| a.to_string()).unwrap_or_default()),
      Operation::MaxReg     => write!(f, "@minreg {}", self.operands().next().map(|a| a.to_string()).unwrap_or_default()),
      Operation::MinRam     => write!(f, "@minram {}", self.operands().next().map(|a| a.to_string()).unwrap_or_default()),
      operation             => {
        let operands = self.operands().map(Operand::to_string).collect::<Vec<String>>();
        match operands.is_empty() {
          true  => write!(f, "{}", operation),
          false => write!(f, "{} {}", operation, operands.join(", "))
        }
      }
    }
  }
}


#[cfg(test)]
mod tests {
  use std::convert::TryFrom;

  use strum::IntoEnumIterator;

  use super::*;
  use crate::operand::OperandKind;
  use crate::symboltable::LabelTable;

  #[test]
  fn tiers_are_ordered(){
    assert!(Tier::Core < Tier::Basic);
    assert!(Tier::Complex < Tier::Custom);
    assert!(Tier::Pragma < Tier::CustomPragma);
    assert_eq!(Tier::try_from(2u8).unwrap(), Tier::Complex);
    assert!(Tier::try_from(9u8).is_err());
  }

  #[test]
  fn mnemonics(){
    assert_eq!(Operation::from_mnemonic("add"), Some(Operation::Add));
    assert_eq!(Operation::from_mnemonic("LOD"), Some(Operation::Load));
    assert_eq!(Operation::from_mnemonic("STORE"), Some(Operation::Store));
    assert_eq!(Operation::Load.to_string(), "LOAD");
    assert_eq!(Operation::from_mnemonic("COMPILER_MARKLABEL"), None);
    assert_eq!(Operation::from_mnemonic("FROB"), None);
  }

  #[test]
  fn every_real_opcode_round_trips_its_mnemonic(){
    for operation in Operation::iter().filter(|op| !op.is_pseudo()) {
      assert_eq!(Operation::from_mnemonic(&operation.to_string()), Some(operation));
    }
  }

  #[test]
  fn operand_checks(){
    let ok = Instruction::new(
      Operation::Add,
      &[Operand::Register(1), Operand::Register(2), Operand::Immediate(3)]
    );
    assert!(ok.is_ok());

    let wrong_count = Instruction::new(Operation::Add, &[Operand::Register(1)]);
    assert_eq!(
      wrong_count,
      Err(OperandError::WrongCount{ operation: Operation::Add, expected: 3, found: 1 })
    );

    let disallowed = Instruction::new(
      Operation::Add,
      &[Operand::Immediate(1), Operand::Register(2), Operand::Register(3)]
    );
    assert_eq!(
      disallowed,
      Err(OperandError::Disallowed{ operation: Operation::Add, position: 1, kind: OperandKind::Immediate })
    );
  }

  #[test]
  fn display_and_max_register(){
    let mut labels = LabelTable::new();
    let target = labels.create("loop").unwrap();
    let branch = Instruction::new(Operation::Bev, &[Operand::Label(target.clone()), Operand::Register(5)]).unwrap();
    assert_eq!(branch.to_string(), "BEV .loop, R5");
    assert_eq!(branch.max_register(), Some(5));
    assert_eq!(Instruction::mark_label(&target).to_string(), ".loop");
    assert_eq!(Instruction::new(Operation::Hlt, &[]).unwrap().to_string(), "HLT");
    assert_eq!(Instruction::new(Operation::Hlt, &[]).unwrap().max_register(), None);
    assert_eq!(Instruction::pragma("debug on").to_string(), "@debug on");
  }

  #[test]
  fn footprints(){
    assert_eq!(Operation::Dw.footprint(), 1);
    assert_eq!(Operation::Dd.footprint(), 2);
    assert_eq!(Operation::Dq.footprint(), 4);
    assert_eq!(Operation::MarkLabel.footprint(), 0);
    assert_eq!(Operation::Add.footprint(), 1);
  }
}
