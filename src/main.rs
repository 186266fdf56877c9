use std::error::Error;

use tracing::{info, Level};

use tiered_ir::{
  AssemblyText,
  Assembler,
  Backend,
  Configuration,
  Machine,
  NullBus,
  Optimizer,
  Tier
};

/// Computes N! into R2.
const FACTORIAL: &str = "
  @macro N 6
  IMM R1, N
  IMM R2, 1
  .loop
  CMP R1, 0
  BRZ .done
  MLT R2, R2, R1
  DEC R1, R1
  BRA .loop
  .done
  HLT
";

fn main() -> Result<(), Box<dyn Error>> {
  #[cfg(feature = "trace_computation")]
  let level = Level::TRACE;
  #[cfg(not(feature = "trace_computation"))]
  let level = Level::INFO;
  tracing_subscriber::fmt().with_max_level(level).init();

  for &tier in &[Tier::CustomPragma, Tier::Core] {
    let config = Configuration{ word_bits: 16, max_tier: tier, ..Configuration::default() };

    let program = Assembler::new(&config).assemble(FACTORIAL)?;
    let lowered = Optimizer::new(&config)?.optimize(program)?;
    println!("Lowered to {}:\n{}", tier, AssemblyText.emit(&lowered, &config));

    let mut machine = Machine::new(config, NullBus)?;
    machine.load(&lowered.program.instructions)?;
    let reason = machine.run()?;

    let result = machine.core(0).map(|core| core.register(2)).unwrap_or_default();
    info!(%tier, ?reason, result, "finished");
    println!("{}", machine);
  }

  Ok(())
}
