//! Error types. Assembly-time errors (`OperandError`, `AssemblyError`) abort a session before
//! anything reaches the machine; run-time faults (`Fault`) are reported by the machine to its
//! host. The two are deliberately separate types.

use thiserror::Error;

use crate::bytecode::Operation;
use crate::operand::{OperandKind, RegisterIndex};
use crate::symboltable::Label;

/// An instruction was built with operands that do not match its opcode's signature.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum OperandError {
  #[error("{operation} takes {expected} operand(s) but was given {found}")]
  WrongCount {
    operation : Operation,
    expected  : usize,
    found     : usize
  },

  #[error("operand {position} of {operation} cannot be a {kind}")]
  Disallowed {
    operation : Operation,
    position  : usize,
    kind      : OperandKind
  },
}

/// What went wrong on a single source line.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum LineError {
  #[error("`{0}` is not an operation")]
  UnknownMnemonic(String),

  #[error(transparent)]
  Operand(#[from] OperandError),

  #[error("undefined label `.{0}`")]
  UndefinedLabel(String),

  #[error("undefined macro `{0}`")]
  UndefinedMacro(String),

  #[error("label `.{0}` is already defined")]
  DuplicateLabel(String),

  #[error("macro `{0}` is already defined")]
  DuplicateMacro(String),

  #[error("malformed numeric literal `{0}`")]
  MalformedLiteral(String),

  #[error("cannot parse operand `{0}`")]
  UnknownOperand(String),

  #[error("macro `{0}` is defined or used inside another macro")]
  NestedMacro(String),

  #[error("macro `{0}` is never closed by `@macro end`")]
  UnterminatedMacro(String),

  #[error("`@macro end` without a matching `@macro begin`")]
  UnmatchedMacroEnd,

  #[error("label `.{0}` cannot be defined inside a macro")]
  LabelInMacro(String),

  #[error("malformed `@{0}` directive")]
  MalformedDirective(String),

  #[error("unexpected `{0}` after a label definition")]
  UnexpectedToken(String),
}

/// Fatal to an assembly or lowering session.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AssemblyError {
  #[error("line {line}: {kind}\n  {line:>4} | {text}")]
  Line {
    /// 1-based source line number.
    line : usize,
    text : String,
    kind : LineError
  },

  #[error("{0} exceeds the target tier but no expansion is registered for it")]
  MissingConverter(Operation),

  #[error("register R{0} leaves no index for a scratch register")]
  NoScratchRegister(RegisterIndex),

  #[error("expanding {operation}: {source}")]
  Expansion {
    operation : Operation,
    source    : OperandError
  },
}

/// The program could not be placed into memory.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum LoadError {
  #[error("program needs {needed} words but the code store holds {available}")]
  ProgramTooLarge {
    needed    : usize,
    available : usize
  },

  #[error("label {0} is marked more than once")]
  DuplicateMark(Label),

  #[error("data word refers to unresolved label {0}")]
  UnresolvedData(Label),

  #[error("program uses register R{needed} but only {available} registers are configured")]
  InsufficientRegisters {
    needed    : RegisterIndex,
    available : usize
  },

  #[error("program needs {needed} words of RAM but only {available} are configured")]
  InsufficientRam {
    needed    : u64,
    available : usize
  },
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ConfigError {
  #[error("word width must be between 1 and 64 bits, not {0}")]
  WordWidth(u32),

  #[error("at least one {0} is required")]
  Empty(&'static str),

  #[error("{0} is not a tier level")]
  TierLevel(u8),
}

/// The kind of a run-time fault.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FaultKind {
  #[error("address {address} is outside of {store} (size {size})")]
  MemoryOutOfRange {
    store   : &'static str,
    address : u64,
    size    : usize
  },

  #[error("register R{index} exceeds the configured {count} registers")]
  RegisterOutOfRange {
    index : RegisterIndex,
    count : usize
  },

  #[error("value stack overflow (limit {0})")]
  StackOverflow(usize),

  #[error("value stack underflow")]
  StackUnderflow,

  #[error("call stack overflow (limit {0})")]
  CallStackOverflow(usize),

  #[error("unresolved label {0}")]
  UnresolvedLabel(Label),

  #[error("port {0} is not supported")]
  UnsupportedPort(u64),

  #[error("malformed data at address {0}")]
  MalformedData(u64),

  #[error("operand {position} of {operation} is missing or of the wrong kind")]
  InvalidOperand {
    operation : Operation,
    position  : usize
  },
}

/// A run-time fault raised by one core. The faulting core is halted.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("core {core}: {kind}")]
pub struct Fault {
  pub core : usize,
  pub kind : FaultKind,
}

/// Returned by a port bus for a port it does not implement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("port {0} is not supported")]
pub struct PortError(pub u64);
