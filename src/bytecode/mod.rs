/*!

  The instruction model. An `Instruction` is one `Operation` plus up to three typed operands
  (A, B and C), each a register index, an immediate, or a label. Every opcode carries an
  immutable support `Tier` and a per-slot operand-kind mask; building an instruction whose
  operands do not match is an error at construction, never at run time.

  Word size is a property of the target, not of the IR. Immediates are stored as 64 bit
  values and are masked to the configured word width when they are written to a register or
  to memory.

  The human readable form of the IR is called assembly. `assembly` turns source lines into
  instructions, and `Instruction`'s `Display` impl writes them back out.

*/

mod assembly;
mod binary;
mod instruction;

pub use assembly::Assembler;
pub use binary::{mask_for, split_words, halves, TwoWords};
pub use instruction::{Instruction, Operation, Signature, Tier};
