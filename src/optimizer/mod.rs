/*!

  Tiered lowering. Every opcode belongs to a support tier; a target declares the most capable
  tier it executes natively. The optimizer rewrites each instruction above the target's tier
  with its registered expansion, lowering the result again until everything fits, then runs
  the peephole pass over the whole stream.

  Opcodes that exceed the target and have no expansion are handled by tier:

    * `CustomPragma` opcodes are dropped silently.
    * Anything else becomes a warning pragma and a comment holding the original instruction.

  Opcodes flagged as requiring a converter must have an expansion; `Optimizer::new` refuses to
  build otherwise.

*/

mod expand;
mod peephole;

use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::bytecode::{Instruction, Operation, Tier};
use crate::config::Configuration;
use crate::emitter::{Emitter, Program};
use crate::error::AssemblyError;
use crate::operand::{Operand, RegisterIndex};

use expand::{expansion_for, Context};
pub use peephole::Peephole;

/// A program lowered for a particular target.
#[derive(Debug)]
pub struct Lowered {
  pub program            : Program,
  /// Registers the program needs, including the zero register and any scratch register the
  /// expansions reserved.
  pub registers_required : usize,
}

/// Checks that every opcode that cannot run without a converter has one.
pub fn verify_converters() -> Result<(), AssemblyError> {
  for operation in Operation::iter() {
    if operation.requires_converter() && expansion_for(operation).is_none() {
      return Err(AssemblyError::MissingConverter(operation));
    }
  }
  Ok(())
}

#[derive(Clone, Debug)]
pub struct Optimizer {
  target    : Tier,
  word_bits : u32,
  registers : usize,
  peephole  : Peephole,
}

impl Optimizer {

  pub fn new(config: &Configuration) -> Result<Optimizer, AssemblyError> {
    verify_converters()?;
    Ok(Optimizer{
      target    : config.max_tier,
      word_bits : config.word_bits,
      registers : config.registers,
      peephole  : Peephole::default(),
    })
  }

  pub fn with_peephole(mut self, peephole: Peephole) -> Optimizer {
    self.peephole = peephole;
    self
  }

  pub fn target(&self) -> Tier {
    self.target
  }

  /// Lowers `program` to the target tier and applies the peephole pass.
  pub fn optimize(&self, program: Program) -> Result<Lowered, AssemblyError> {
    let Program{ instructions, labels } = program;

    let declared = declared_max_register(&instructions);
    let highest = instructions.iter()
                              .filter_map(Instruction::max_register)
                              .max()
                              .unwrap_or(0)
                              .max(declared);
    let scratch = highest.checked_add(1).ok_or(AssemblyError::NoScratchRegister(highest))?;
    let context = Context{ scratch, word_bits: self.word_bits };

    let mut out = Emitter::with_labels(labels);
    let mut expanded = 0usize;
    for instruction in &instructions {
      self.lower_into(instruction, &mut out, &context, &mut expanded)?;
    }

    let Program{ instructions, labels } = out.finish();
    let instructions = self.peephole.apply(&instructions);

    let highest = instructions.iter()
                              .filter_map(Instruction::max_register)
                              .max()
                              .unwrap_or(0)
                              .max(declared);
    let registers_required = highest.checked_add(1).ok_or(AssemblyError::NoScratchRegister(highest))?;
    let instructions = instructions.into_iter()
                                   .map(|instruction| match instruction.operation() {
                                     Operation::MaxReg => Instruction::max_reg(highest),
                                     _                 => instruction
                                   })
                                   .collect::<Vec<_>>();

    if registers_required > self.registers {
      warn!(registers_required, configured = self.registers, "lowered program needs more registers than configured");
    }
    debug!(
      tier = %self.target,
      expanded,
      instructions = instructions.len(),
      registers_required,
      "lowered"
    );
    Ok(Lowered{ program: Program{ instructions, labels }, registers_required })
  }

  fn lower_into(
    &self,
    instruction : &Instruction,
    out         : &mut Emitter,
    context     : &Context,
    expanded    : &mut usize
  ) -> Result<(), AssemblyError>
  {
    let operation = instruction.operation();
    if operation.is_pseudo() || operation.tier() <= self.target {
      out.emit(instruction.clone());
      return Ok(());
    }

    match expansion_for(operation) {

      Some(expansion) => {
        *expanded += 1;
        out.comment(instruction.to_string());
        let start = out.len();
        expansion(instruction, out, context)
          .map_err(|source| AssemblyError::Expansion{ operation, source })?;
        for emitted in out.split_off(start) {
          self.lower_into(&emitted, out, context, expanded)?;
        }
      }

      None if operation.tier() == Tier::CustomPragma => {
        debug!(%instruction, "dropped");
      }

      None => {
        warn!(%instruction, tier = %self.target, "no expansion for an instruction above the target tier");
        out.pragma(format!("warning {} is not supported by the target", operation));
        out.comment(instruction.to_string());
      }
    }
    Ok(())
  }
}

/// The register index requested by `MAXREG` bookkeeping, if any.
fn declared_max_register(instructions: &[Instruction]) -> RegisterIndex {
  instructions.iter()
              .filter(|instruction| instruction.operation() == Operation::MaxReg)
              .filter_map(|instruction| match instruction.a() {
                Some(Operand::Immediate(value)) => Some(*value as RegisterIndex),
                _                               => None
              })
              .max()
              .unwrap_or(0)
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::{mask_for, Assembler};
  use crate::emitter::{AssemblyText, Backend};
  use crate::machine::Machine;
  use crate::ports::NullBus;

  fn config(tier: Tier) -> Configuration {
    Configuration{ max_tier: tier, ..Configuration::default() }
  }

  fn lower(text: &str, tier: Tier) -> Lowered {
    let config = config(tier);
    let program = Assembler::new(&config).assemble(text).unwrap();
    Optimizer::new(&config).unwrap().optimize(program).unwrap()
  }

  /// Runs `text` lowered to `tier` at the given word width until every core halts.
  fn machine_at(text: &str, tier: Tier, word_bits: u32) -> Machine<NullBus> {
    let config = Configuration{ word_bits, ..config(tier) };
    let program = Assembler::new(&config).assemble(text).unwrap();
    let lowered = Optimizer::new(&config).unwrap().optimize(program).unwrap();
    let mut machine = Machine::new(config, NullBus).unwrap();
    machine.load(&lowered.program.instructions).unwrap();
    machine.run().unwrap();
    machine
  }

  /// Register `index` after running `text` lowered to `tier` with 8-bit words.
  fn run(text: &str, tier: Tier, index: RegisterIndex) -> u64 {
    machine_at(text, tier, 8).core(0).unwrap().register(index)
  }

  fn arithmetic(operation: &str, b: u64, c: u64) -> String {
    format!("IMM R2, {}\nIMM R3, {}\n{} R1, R2, R3\nHLT", b, c, operation)
  }

  #[test]
  fn converters_are_registered(){
    assert_eq!(verify_converters(), Ok(()));
  }

  #[test]
  fn lowered_output_fits_the_target(){
    let text = "
      IMM R2, 9
      MLT R1, R2, R2
      DIV R1, R1, 4
      MOD R1, R1, R2
      BSL R1, R1, 2
      CAL .f
      BRK
      HLT
      .f
      RET
    ";
    for &tier in &[Tier::Core, Tier::Basic] {
      let lowered = lower(text, tier);
      for instruction in &lowered.program.instructions {
        let operation = instruction.operation();
        assert!(operation.is_pseudo() || operation.tier() <= tier, "{} survived lowering to {}", operation, tier);
      }
    }
  }

  #[test]
  fn lowering_is_equivalent(){
    for &(operation, b, c, expected) in &[
      ("MLT", 6, 7, 42),
      ("DIV", 17, 5, 3),
      ("MOD", 17, 5, 2),
      ("BSL", 3, 4, 48),
      ("BSR", 200, 3, 25),
      ("MLT", 20, 20, 144),
      ("DIV", 250, 7, 35),
      ("MOD", 250, 7, 5),
      ("DIV", 5, 17, 0),
      ("BSL", 1, 0, 1),
    ] {
      let text = arithmetic(operation, b, c);
      let direct = run(&text, Tier::CustomPragma, 1);
      let lowered = run(&text, Tier::Core, 1);
      assert_eq!(direct, expected, "{} {} {} directly", operation, b, c);
      assert_eq!(lowered, expected, "{} {} {} lowered", operation, b, c);
    }
  }

  #[test]
  fn lowering_is_equivalent_at_every_width(){
    for &bits in &[8u32, 16, 64] {
      let mask = mask_for(bits);
      let half = mask >> 1;
      let wide = |value: u128| (value & mask as u128) as u64;
      // Operands sit at the edges of the word. MOD subtracts repeatedly, so its dividends stay
      // within a few multiples of the divisor.
      for &(operation, b, c, expected) in &[
        ("MLT", mask, mask, wide(mask as u128 * mask as u128)),
        ("MLT", half, 3, wide(half as u128 * 3)),
        ("MLT", half + 1, 2, 0),
        ("DIV", mask, 1, mask),
        ("DIV", mask, 3, mask / 3),
        ("DIV", mask, mask, 1),
        ("DIV", 7, mask, 0),
        ("DIV", half + 1, 2, (half + 1) / 2),
        ("MOD", mask, half, 1),
        ("MOD", mask, half + 1, half),
        ("MOD", 17, 5, 2),
        ("BSL", mask, 1, wide((mask as u128) << 1)),
        ("BSL", 1, bits as u64 - 1, half + 1),
        ("BSR", mask, bits as u64 - 1, 1),
        ("BSR", half + 1, 3, (half + 1) >> 3),
      ] {
        let text = arithmetic(operation, b, c);
        let direct = machine_at(&text, Tier::CustomPragma, bits).core(0).unwrap().register(1);
        let lowered = machine_at(&text, Tier::Core, bits).core(0).unwrap().register(1);
        assert_eq!(direct, expected, "{} {} {} directly at {} bits", operation, b, c, bits);
        assert_eq!(lowered, expected, "{} {} {} lowered at {} bits", operation, b, c, bits);
      }
    }
  }

  #[test]
  fn lowered_multiply_leaves_the_masked_product_in_flags(){
    let text = arithmetic("MLT", 20, 20);
    let direct = machine_at(&text, Tier::CustomPragma, 8);
    let lowered = machine_at(&text, Tier::Core, 8);
    assert_eq!(direct.core(0).unwrap().flags(), 400);
    assert_eq!(lowered.core(0).unwrap().flags(), 144);
    assert_eq!(lowered.core(0).unwrap().register(1), 144);
  }

  #[test]
  fn register_index_without_room_for_scratch(){
    let config = config(Tier::Core);
    let text = format!("MOV R{}, R1\nHLT", RegisterIndex::max_value());
    let program = Assembler::new(&config).assemble(&text).unwrap();
    assert_eq!(
      Optimizer::new(&config).unwrap().optimize(program).unwrap_err(),
      AssemblyError::NoScratchRegister(RegisterIndex::max_value())
    );
  }

  #[test]
  fn lowering_preserves_other_registers(){
    let text = "
      IMM R2, 6
      IMM R3, 7
      IMM R4, 11
      IMM R5, 12
      MLT R1, R2, R3
      DIV R6, R2, 4
      HLT
    ";
    assert_eq!(run(text, Tier::Core, 1), 42);
    assert_eq!(run(text, Tier::Core, 4), 11);
    assert_eq!(run(text, Tier::Core, 5), 12);
    assert_eq!(run(text, Tier::Core, 6), 1);
  }

  #[test]
  fn call_and_return_lowered(){
    let text = "
      CAL .double
      HLT
      .double
      ADD R1, R1, 21
      ADD R1, R1, R1
      RET
    ";
    assert_eq!(run(text, Tier::Core, 1), 42);
    assert_eq!(run(text, Tier::CustomPragma, 1), 42);
  }

  #[test]
  fn scratch_register_is_counted(){
    let lowered = lower(&arithmetic("MLT", 2, 3), Tier::Core);
    assert_eq!(lowered.registers_required, 7);
    assert_eq!(lowered.program.instructions[0].to_string(), "@minreg 6");

    let native = lower(&arithmetic("MLT", 2, 3), Tier::Complex);
    assert_eq!(native.registers_required, 4);
  }

  #[test]
  fn unsupported_instructions(){
    let lowered = lower("NOP\nIN R1, 3\nHLT", Tier::Complex);
    let rendered = lowered.program.instructions.iter().map(Instruction::to_string).collect::<Vec<_>>();
    assert!(!rendered.iter().any(|line| line == "NOP"));
    assert!(rendered.contains(&"@warning IN is not supported by the target".to_string()));
    assert!(rendered.contains(&"// IN R1, 3".to_string()));
    assert_eq!(rendered.last().map(String::as_str), Some("HLT"));
  }

  #[test]
  fn assembly_text_round_trips(){
    let config = config(Tier::Core);
    let lowered = lower(&arithmetic("MOD", 9, 4), Tier::Core);
    let text = AssemblyText.emit(&lowered, &config);
    let reassembled = Assembler::new(&config).assemble(&text).unwrap();
    let lowered_again = Optimizer::new(&config).unwrap().optimize(reassembled).unwrap();
    let mut machine = Machine::new(config, NullBus).unwrap();
    machine.load(&lowered_again.program.instructions).unwrap();
    machine.run().unwrap();
    assert_eq!(machine.core(0).unwrap().register(1), 1);
  }
}
