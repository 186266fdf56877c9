/*!
  A word-size-parameterized intermediate representation with three cooperating pieces:

    * an assembler that turns source text into a canonical instruction stream,
    * a tiered optimizer that lowers instructions a restricted target cannot run into
      sequences of simpler ones, followed by peephole cleanup,
    * a multi-core reference virtual machine.

  The optimizer and the machine share only the instruction model and the label table; neither
  depends on the assembler. Configuration is always passed explicitly.
*/

#[macro_use] extern crate prettytable;
#[macro_use] extern crate lazy_static;

pub mod bytecode;
pub mod cell;
pub mod config;
pub mod emitter;
pub mod error;
pub mod machine;
pub mod operand;
pub mod optimizer;
pub mod ports;
pub mod symboltable;

pub use bytecode::{Assembler, Instruction, Operation, Tier};
pub use config::Configuration;
pub use emitter::{AssemblyText, Backend, Emitter, Program};
pub use error::{AssemblyError, Fault, FaultKind, LoadError};
pub use machine::{Machine, StopReason, Tick};
pub use optimizer::{Lowered, Optimizer, Peephole};
pub use ports::{NullBus, PortBus, QueueBus};
