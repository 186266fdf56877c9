/*!
  The producer and consumer contracts. Front ends (and the optimizer's own expansions) build
  a program through an `Emitter`; back ends implement the closed `Backend` trait and consume
  an already-lowered program.
*/

use crate::bytecode::{Instruction, Operation, Tier};
use crate::config::Configuration;
use crate::error::OperandError;
use crate::operand::{Operand, RegisterIndex};
use crate::optimizer::Lowered;
use crate::symboltable::{Label, LabelTable};

/// A flat instruction stream together with the label table its labels came from.
#[derive(Debug, Default)]
pub struct Program {
  pub instructions : Vec<Instruction>,
  pub labels       : LabelTable,
}

impl Program {

  /// The highest register index named anywhere in the program, or 0 if none is named.
  pub fn max_register(&self) -> RegisterIndex {
    self.instructions
        .iter()
        .filter_map(Instruction::max_register)
        .max()
        .unwrap_or(0)
  }
}

/// Collects emitted instructions. Register 0 is always zero; scratch registers are the
/// producer's own business, starting from index 1.
#[derive(Debug, Default)]
pub struct Emitter {
  instructions : Vec<Instruction>,
  labels       : LabelTable,
}

impl Emitter {

  pub fn new() -> Emitter {
    Emitter::default()
  }

  /// Continues an existing label table, so labels created here never collide with it.
  pub fn with_labels(labels: LabelTable) -> Emitter {
    Emitter{ instructions: Vec::new(), labels }
  }

  /// Allocates a label and emits the `CreateLabel` pseudo-op some back ends need to
  /// pre-allocate it before first use.
  pub fn create_label(&mut self) -> Label {
    let label = self.labels.fresh();
    self.instructions.push(Instruction::create_label(&label));
    label
  }

  /// Allocates a label without announcing it.
  pub fn fresh_label(&mut self) -> Label {
    self.labels.fresh()
  }

  pub fn mark_label(&mut self, label: &Label) {
    self.instructions.push(Instruction::mark_label(label));
  }

  pub fn emit(&mut self, instruction: Instruction) {
    self.instructions.push(instruction);
  }

  /// Builds and emits a real instruction.
  pub fn op(&mut self, operation: Operation, operands: &[Operand]) -> Result<(), OperandError> {
    let instruction = Instruction::new(operation, operands)?;
    self.instructions.push(instruction);
    Ok(())
  }

  pub fn comment<S: Into<String>>(&mut self, text: S) {
    self.instructions.push(Instruction::comment(text));
  }

  pub fn pragma<S: Into<String>>(&mut self, text: S) {
    self.instructions.push(Instruction::pragma(text));
  }

  /// Removes and returns everything emitted from position `start` onward.
  pub fn split_off(&mut self, start: usize) -> Vec<Instruction> {
    self.instructions.split_off(start)
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn len(&self) -> usize {
    self.instructions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instructions.is_empty()
  }

  pub fn finish(self) -> Program {
    Program{ instructions: self.instructions, labels: self.labels }
  }
}

/// A consumer of lowered programs.
pub trait Backend {
  type Output;

  /// The most capable tier this back end can express. The program handed to `emit` has been
  /// lowered to it.
  fn max_tier(&self) -> Tier;

  fn emit(&mut self, program: &Lowered, config: &Configuration) -> Self::Output;
}

/// Writes a lowered program back out as assembly text.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssemblyText;

impl Backend for AssemblyText {
  type Output = String;

  fn max_tier(&self) -> Tier {
    Tier::CustomPragma
  }

  fn emit(&mut self, program: &Lowered, config: &Configuration) -> String {
    let mut text = format!("// {} bit words, {} registers\n", config.word_bits, program.registers_required);
    for instruction in &program.program.instructions {
      text.push_str(&instruction.to_string());
      text.push('\n');
    }
    text
  }
}
