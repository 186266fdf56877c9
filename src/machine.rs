//! The reference virtual machine: one or more cores sharing RAM, ROM and a port bus, advanced
//! one instruction at a time by `clock`.

use std::fmt::{Display, Formatter};
use std::time::Instant;

use prettytable::{format as TableFormat, Cell as TableCell, Row, Table};
use tracing::{debug, info, warn};
#[cfg(feature = "trace_computation")]
use tracing::trace;

use crate::bytecode::{split_words, Instruction, Operation};
use crate::cell::{Cell, Decoded, Slot};
use crate::config::Configuration;
use crate::error::{ConfigError, Fault, FaultKind, LoadError};
use crate::operand::{Operand, RegisterIndex, ZERO_REGISTER};
use crate::ports::PortBus;
use crate::symboltable::Resolution;

/// What a single `clock` tick did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tick {
  Executed,
  /// A breakpoint was hit, either `BRK` or a division by zero.
  Breakpoint,
  /// Every core is halted; nothing ran.
  Idle,
}

/// Why `Machine::run` returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
  Halted,
  Breakpoint,
  TimeBudget,
  Step,
}

/// The state of one core.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Core {
  ip         : usize,
  registers  : Vec<u64>,
  /// The unmasked result of the most recent arithmetic, logical or compare operation.
  flags      : u128,
  stack      : Vec<u64>,
  call_stack : Vec<usize>,
  halted     : bool,
}

impl Core {

  fn new(registers: usize) -> Core {
    Core{
      ip         : 0,
      registers  : vec![0; registers],
      flags      : 0,
      stack      : vec![],
      call_stack : vec![],
      halted     : false,
    }
  }

  pub fn ip(&self) -> usize {
    self.ip
  }

  /// The contents of register `index`, or 0 for an index outside the register file.
  pub fn register(&self, index: RegisterIndex) -> u64 {
    self.registers.get(index).copied().unwrap_or(0)
  }

  pub fn registers(&self) -> &[u64] {
    &self.registers
  }

  pub fn flags(&self) -> u128 {
    self.flags
  }

  pub fn stack(&self) -> &[u64] {
    &self.stack
  }

  pub fn call_stack(&self) -> &[usize] {
    &self.call_stack
  }

  pub fn is_halted(&self) -> bool {
    self.halted
  }

  fn read(&self, index: RegisterIndex) -> Result<u64, FaultKind> {
    match self.registers.get(index) {
      Some(_) if index == ZERO_REGISTER => Ok(0),
      Some(value)                       => Ok(*value),
      None => Err(FaultKind::RegisterOutOfRange{ index, count: self.registers.len() })
    }
  }

  /// Writes to the zero register are discarded.
  fn write(&mut self, index: RegisterIndex, value: u64) -> Result<(), FaultKind> {
    let count = self.registers.len();
    match self.registers.get_mut(index) {
      Some(_) if index == ZERO_REGISTER => Ok(()),
      Some(register) => {
        *register = value;
        Ok(())
      }
      None => Err(FaultKind::RegisterOutOfRange{ index, count })
    }
  }
}

pub struct Machine<B: PortBus> {
  config      : Configuration,
  mask        : u64,
  ram         : Vec<Cell>,
  rom         : Vec<Cell>,
  cores       : Vec<Core>,
  /// The core offered the next tick.
  next_core   : usize,
  bus         : B,
  program_len : usize,
}

impl<B: PortBus> Machine<B> {

  pub fn new(config: Configuration, bus: B) -> Result<Machine<B>, ConfigError> {
    config.validate()?;
    Ok(Machine{
      mask        : config.mask(),
      ram         : vec![Cell::default(); config.ram_words],
      rom         : vec![Cell::default(); config.rom_words],
      cores       : vec![Core::new(config.registers); config.cores],
      next_core   : 0,
      bus,
      program_len : 0,
      config,
    })
  }

  // region Accessors

  pub fn config(&self) -> &Configuration {
    &self.config
  }

  pub fn core(&self, index: usize) -> Option<&Core> {
    self.cores.get(index)
  }

  pub fn cores(&self) -> &[Core] {
    &self.cores
  }

  pub fn ram(&self) -> &[Cell] {
    &self.ram
  }

  pub fn rom(&self) -> &[Cell] {
    &self.rom
  }

  pub fn bus(&self) -> &B {
    &self.bus
  }

  pub fn bus_mut(&mut self) -> &mut B {
    &mut self.bus
  }

  /// Words occupied by the loaded program in the code store.
  pub fn program_len(&self) -> usize {
    self.program_len
  }

  /// True when every core is halted.
  pub fn is_halted(&self) -> bool {
    self.cores.iter().all(Core::is_halted)
  }

  fn code(&self) -> &[Cell] {
    match self.config.execute_from_rom {
      true  => &self.rom,
      false => &self.ram
    }
  }

  // endregion

  // region Loading

  /**
    Places `program` into the code store. Labels are resolved to code-store addresses in a
    first pass; data directives become one, two or four data words, most significant first.
    Pseudo-ops occupy no memory. `MAXREG` and `MINRAM` bookkeeping is checked against the
    configuration. Every core is reset.
  */
  pub fn load(&mut self, program: &[Instruction]) -> Result<(), LoadError> {
    let mut resolution = Resolution::new();
    let mut size = 0usize;

    for instruction in program {
      match (instruction.operation(), instruction.a()) {

        (Operation::MarkLabel, Some(Operand::Label(label))) => {
          resolution.bind(label, size as u64)
                    .map_err(|_| LoadError::DuplicateMark(label.clone()))?;
        }

        (Operation::MaxReg, Some(Operand::Immediate(index))) => {
          if *index as usize >= self.config.registers {
            return Err(LoadError::InsufficientRegisters{ needed: *index as usize, available: self.config.registers });
          }
        }

        (Operation::MinRam, Some(Operand::Immediate(words))) => {
          if *words > self.config.ram_words as u64 {
            return Err(LoadError::InsufficientRam{ needed: *words, available: self.config.ram_words });
          }
        }

        _ => {}
      }
      size += instruction.operation().footprint();
    }

    let available = self.config.code_words();
    if size > available {
      return Err(LoadError::ProgramTooLarge{ needed: size, available });
    }

    let mut cells = Vec::with_capacity(size);
    for instruction in program {
      let operation = instruction.operation();
      match operation {

        Operation::Dw | Operation::Dd | Operation::Dq => {
          let value = match instruction.a() {
            Some(Operand::Immediate(value)) => *value,
            Some(Operand::Label(label)) => {
              resolution.address_of(label)
                        .ok_or_else(|| LoadError::UnresolvedData(label.clone()))?
            }
            _ => 0
          };
          for word in split_words(value, self.config.word_bits, operation.footprint()) {
            cells.push(Cell::Data(word));
          }
        }

        operation if operation.is_pseudo() => {}

        _ => cells.push(Cell::Code(Decoded::new(instruction, &resolution, self.mask)))
      }
    }

    self.ram = vec![Cell::default(); self.config.ram_words];
    self.rom = vec![Cell::default(); self.config.rom_words];
    let store = match self.config.execute_from_rom {
      true  => &mut self.rom,
      false => &mut self.ram
    };
    for (target, cell) in store.iter_mut().zip(cells.into_iter()) {
      *target = cell;
    }
    self.program_len = size;
    self.reset();

    debug!(words = size, labels = resolution.len(), from_rom = self.config.execute_from_rom, "program loaded");
    Ok(())
  }

  /// Returns every core to its reset state. Memory is left as it is.
  pub fn reset(&mut self) {
    let registers = self.config.registers;
    for core in self.cores.iter_mut() {
      *core = Core::new(registers);
    }
    self.next_core = 0;
  }

  // endregion

  // region Execution

  /**
    Executes one instruction on the next core that is not halted, in round-robin order. A
    faulting core is halted before the fault is returned.
  */
  pub fn clock(&mut self) -> Result<Tick, Fault> {
    let count = self.cores.len();
    let index = match (0..count).map(|offset| (self.next_core + offset) % count)
                                .find(|&index| !self.cores[index].halted)
    {
      Some(index) => index,
      None        => return Ok(Tick::Idle)
    };
    self.next_core = (index + 1) % count;

    let result = self.step(index);

    #[cfg(feature = "trace_computation")]
    trace!("\n{}", self);

    result.map_err(|kind| {
      self.cores[index].halted = true;
      warn!(core = index, fault = %kind, "core faulted");
      Fault{ core: index, kind }
    })
  }

  /// Ticks until every core halts, a breakpoint is hit, the wall-clock budget runs out, or,
  /// in single-step mode, after one tick.
  pub fn run(&mut self) -> Result<StopReason, Fault> {
    let started = Instant::now();
    let mut ticks = 0u64;

    let reason = loop {
      match self.clock()? {
        Tick::Idle       => break StopReason::Halted,
        Tick::Breakpoint => break StopReason::Breakpoint,
        Tick::Executed   => ticks += 1,
      }
      if self.is_halted() {
        break StopReason::Halted;
      }
      if self.config.single_step {
        break StopReason::Step;
      }
      if started.elapsed() >= self.config.max_run_time {
        break StopReason::TimeBudget;
      }
    };

    info!(?reason, ticks, "run stopped");
    Ok(reason)
  }

  fn step(&mut self, index: usize) -> Result<Tick, FaultKind> {
    let ip = self.cores[index].ip;
    if ip >= self.program_len {
      // Ran off the end of the program.
      self.cores[index].halted = true;
      return Ok(Tick::Executed);
    }
    let decoded = match self.code().get(ip) {
      Some(Cell::Code(decoded)) => decoded.clone(),
      _                         => return Err(FaultKind::MalformedData(ip as u64))
    };

    let Machine{ cores, ram, bus, config, mask, .. } = self;
    let mask = *mask;
    let core = &mut cores[index];
    let operation = decoded.operation;

    let value = |core: &Core, position: usize| -> Result<u64, FaultKind> {
      match decoded.slot(position) {
        Some(Slot::Register(index)) => core.read(*index),
        Some(Slot::Value(value))    => Ok(*value),
        Some(Slot::Unresolved(label)) => Err(FaultKind::UnresolvedLabel(label.clone())),
        None => Err(FaultKind::InvalidOperand{ operation, position })
      }
    };
    let destination = |position: usize| -> Result<RegisterIndex, FaultKind> {
      match decoded.slot(position) {
        Some(Slot::Register(index)) => Ok(*index),
        _ => Err(FaultKind::InvalidOperand{ operation, position })
      }
    };
    let address = |value: u64| -> Result<usize, FaultKind> {
      match (value as usize) < ram.len() {
        true  => Ok(value as usize),
        false => Err(FaultKind::MemoryOutOfRange{ store: "RAM", address: value, size: ram.len() })
      }
    };

    let mut next = ip + 1;
    let mut tick = Tick::Executed;

    // An ALU result: full width into flags, masked into the destination.
    macro_rules! alu {
      ($result:expr) => {{
        let result: u128 = $result;
        core.flags = result;
        core.write(destination(1)?, (result as u64) & mask)?;
      }};
    }

    // Branch to slot A when the condition holds.
    macro_rules! branch_if {
      ($condition:expr) => {{
        if $condition {
          next = value(core, 1)? as usize;
        }
      }};
    }

    let flags = core.flags;
    use Operation::*;
    match operation {

      // region Arithmetic and logic

      Add  => alu!(value(core, 2)? as u128 + value(core, 3)? as u128),
      Sub  => alu!((value(core, 2)? as u128).wrapping_sub(value(core, 3)? as u128)),
      Inc  => alu!(value(core, 2)? as u128 + 1),
      Dec  => alu!((value(core, 2)? as u128).wrapping_sub(1)),
      Mlt  => alu!(value(core, 2)? as u128 * value(core, 3)? as u128),
      And  => alu!((value(core, 2)? & value(core, 3)?) as u128),
      Or   => alu!((value(core, 2)? | value(core, 3)?) as u128),
      Xor  => alu!((value(core, 2)? ^ value(core, 3)?) as u128),
      Nand => alu!(!(value(core, 2)? & value(core, 3)?) as u128),
      Nor  => alu!(!(value(core, 2)? | value(core, 3)?) as u128),
      Xnor => alu!(!(value(core, 2)? ^ value(core, 3)?) as u128),
      Not  => alu!(!value(core, 2)? as u128),
      Lsh  => alu!((value(core, 2)? as u128) << 1),
      Rsh  => alu!((value(core, 2)? >> 1) as u128),

      Bsl  => {
        let (operand, count) = (value(core, 2)? as u128, value(core, 3)?);
        alu!(match count < 128 { true => operand << count, false => 0 })
      }

      Bsr  => {
        let (operand, count) = (value(core, 2)?, value(core, 3)?);
        alu!(match count < 64 { true => (operand >> count) as u128, false => 0 })
      }

      Div | Mod => {
        let (dividend, divisor) = (value(core, 2)?, value(core, 3)?);
        match (divisor, operation) {
          (0, _)   => tick = Tick::Breakpoint,
          (_, Div) => alu!((dividend / divisor) as u128),
          _        => alu!((dividend % divisor) as u128),
        }
      }

      Cmp  => core.flags = (value(core, 1)? as u128).wrapping_sub(value(core, 2)? as u128),

      // endregion

      // region Data movement

      Mov | Imm => {
        let word = value(core, 2)? & mask;
        core.write(destination(1)?, word)?;
      }

      Load => {
        let at = address(value(core, 2)?)?;
        match &ram[at] {
          Cell::Data(word) => core.write(destination(1)?, *word)?,
          Cell::Code(_)    => return Err(FaultKind::MalformedData(at as u64))
        }
      }

      Store => {
        let at = address(value(core, 1)?)?;
        ram[at] = Cell::Data(value(core, 2)? & mask);
      }

      Psh => {
        if core.stack.len() >= config.max_stack {
          return Err(FaultKind::StackOverflow(config.max_stack));
        }
        let word = value(core, 1)?;
        core.stack.push(word);
      }

      Pop => {
        let word = core.stack.pop().ok_or(FaultKind::StackUnderflow)?;
        core.write(destination(1)?, word)?;
      }

      // endregion

      // region Control flow

      Bra => branch_if!(true),
      Brz => branch_if!(flags & mask as u128 == 0),
      Bnz => branch_if!(flags & mask as u128 != 0),
      Brc => branch_if!(flags > mask as u128),
      Bnc => branch_if!(flags <= mask as u128),
      Brp => branch_if!(flags & mask as u128 <= (mask >> 1) as u128),
      Brn => branch_if!(flags & mask as u128 > (mask >> 1) as u128),
      Bev => branch_if!(value(core, 2)? & 1 == 0),
      Bod => branch_if!(value(core, 2)? & 1 == 1),

      Cal => {
        if core.call_stack.len() >= config.max_stack {
          return Err(FaultKind::CallStackOverflow(config.max_stack));
        }
        let target = value(core, 1)? as usize;
        core.call_stack.push(ip + 1);
        next = target;
      }

      Ret => {
        match core.call_stack.pop() {
          Some(site) => next = site,
          None       => core.halted = true
        }
      }

      Hlt => core.halted = true,

      Brk => tick = Tick::Breakpoint,

      // endregion

      // region I/O

      In => {
        let port = value(core, 2)?;
        let word = bus.read(port).map_err(|error| FaultKind::UnsupportedPort(error.0))?;
        core.write(destination(1)?, word & mask)?;
      }

      Out => {
        let port = value(core, 1)?;
        let word = value(core, 2)?;
        bus.write(port, word).map_err(|error| FaultKind::UnsupportedPort(error.0))?;
      }

      // endregion

      Dw | Dd | Dq => return Err(FaultKind::MalformedData(ip as u64)),

      | Nop | CreateLabel | MarkLabel | Comment | Pragma
      | MacroBegin | MacroEnd | MaxReg | MinRam => {}
    }

    core.ip = next;
    Ok(tick)
  }

  // endregion

  // region Display methods

  fn make_core_table(core: &Core, index: usize) -> Table {
    let mut table = Table::new();
    let status = match core.halted {
      true  => "halted",
      false => "running"
    };

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->format!("Core {}", index), ubl->status]);

    for (i, value) in core.registers.iter().enumerate() {
      table.add_row(row![r->format!("R{} =", i), value]);
    }
    table.add_row(row![r->"ip =", core.ip]);
    table.add_row(row![r->"flags =", core.flags]);
    table.add_row(row![r->"stack =", format!("{:?}", core.stack)]);
    table.add_row(row![r->"calls =", format!("{:?}", core.call_stack)]);
    table
  }

  fn make_code_table(&self) -> Table {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Address", ubl->"Contents"]);

    for (address, cell) in self.code().iter().take(self.program_len).enumerate() {
      let pointers = self.cores
                         .iter()
                         .enumerate()
                         .filter(|(_, core)| !core.halted && core.ip == address)
                         .map(|(i, _)| i.to_string())
                         .collect::<Vec<String>>();
      match pointers.is_empty() {

        true  => {
          table.add_row(row![r->format!("[{}] =", address), cell]);
        }

        false => {
          table.add_row(row![r->format!("* {} --> [{}] =", pointers.join(","), address), cell]);
        }

      }
    }
    table
  }

  // endregion
}

lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

impl<B: PortBus> Display for Machine<B> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut cells = vec![TableCell::new(&self.make_code_table().to_string())];
    for (index, core) in self.cores.iter().enumerate() {
      cells.push(TableCell::new(&Machine::<B>::make_core_table(core, index).to_string()));
    }

    let mut combined_table = Table::new();
    combined_table.set_format(*TABLE_DISPLAY_FORMAT);
    combined_table.add_row(Row::new(cells));

    write!(f, "{}-bit words, {} core(s)\n{}", self.config.word_bits, self.cores.len(), combined_table)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::Assembler;
  use crate::ports::{NullBus, QueueBus};

  fn machine_with<B: PortBus>(text: &str, config: Configuration, bus: B) -> Machine<B> {
    let program = Assembler::new(&config).assemble(text).unwrap();
    let mut machine = Machine::new(config, bus).unwrap();
    machine.load(&program.instructions).unwrap();
    machine
  }

  fn machine(text: &str) -> Machine<NullBus> {
    machine_with(text, Configuration::default(), NullBus)
  }

  fn fault_of(text: &str) -> FaultKind {
    let mut machine = machine(text);
    let fault = machine.run().unwrap_err();
    assert_eq!(fault.core, 0);
    assert!(machine.core(0).unwrap().is_halted());
    fault.kind
  }

  #[test]
  fn end_to_end(){
    let mut machine = machine("IMM R1,5\nIMM R2,3\nADD R1,R1,R2\nHLT");
    assert_eq!(machine.run(), Ok(StopReason::Halted));
    let core = machine.core(0).unwrap();
    assert_eq!(core.register(1), 8);
    assert_eq!(core.flags(), 8);
    assert!(core.is_halted());
    assert_eq!(machine.clock(), Ok(Tick::Idle));
  }

  #[test]
  fn halting_first_leaves_reset_state(){
    let mut machine = machine("HLT\nIMM R1, 9");
    machine.run().unwrap();
    let core = machine.core(0).unwrap();
    assert!(core.registers().iter().all(|&r| r == 0));
    assert_eq!(core.flags(), 0);
    assert_eq!(core.ip(), 1);
  }

  #[test]
  fn zero_register_stays_zero(){
    let mut machine = machine("IMM R0, 7\nADD R0, R0, 9\nPSH 5\nPOP R0\nMOV R1, R0\nHLT");
    machine.run().unwrap();
    let core = machine.core(0).unwrap();
    assert_eq!(core.register(0), 0);
    assert_eq!(core.register(1), 0);
  }

  #[test]
  fn results_are_masked_but_flags_are_not(){
    let mut machine = machine("IMM R1, 200\nADD R2, R1, R1\nHLT");
    machine.run().unwrap();
    let core = machine.core(0).unwrap();
    assert_eq!(core.register(2), 144);
    assert_eq!(core.flags(), 400);
  }

  #[test]
  fn flags_and_branches_agree(){
    // Each branch recomputes R1 - R2 and, when taken, sets its bit in R3.
    let branches = ["BRZ", "BNZ", "BRC", "BNC", "BRN", "BRP"];
    let mut program = String::new();
    for (bit, branch) in branches.iter().enumerate() {
      program.push_str(&format!(
        "SUB R0, R1, R2\n{} .taken{}\nBRA .next{}\n.taken{}\nOR R3, R3, {}\n.next{}\n",
        branch, bit, bit, bit, 1 << bit, bit
      ));
    }
    program.push_str("HLT");

    for &bits in &[8u32, 16, 64] {
      let mask = crate::bytecode::mask_for(bits);
      let half = mask >> 1;
      let samples = [0, 1, 2, half - 1, half, half + 1, half + 2, mask - 1, mask];
      for &a in &samples {
        for &b in &samples {
          let config = Configuration{ word_bits: bits, ..Configuration::default() };
          let mut machine = machine_with(&program, config, NullBus);
          machine.cores[0].registers[1] = a;
          machine.cores[0].registers[2] = b;
          machine.run().unwrap();
          let taken = machine.core(0).unwrap().register(3);
          let difference = a.wrapping_sub(b) & mask;
          let negative = difference > half;
          for (bit, (&branch, &expected)) in branches.iter()
                                                     .zip(&[a == b, a != b, a < b, a >= b, negative, !negative])
                                                     .enumerate()
          {
            assert_eq!(taken & (1 << bit) != 0, expected, "{} for {} - {} at {} bits", branch, a, b, bits);
          }
        }
      }
    }
  }

  #[test]
  fn carry_out_of_a_64_bit_word(){
    let config = Configuration{ word_bits: 64, ..Configuration::default() };
    let text = "IMM R1, 0xFFFFFFFFFFFFFFFF\nADD R2, R1, 2\nBNC .done\nIMM R3, 1\n.done\nHLT";
    let mut machine = machine_with(text, config, NullBus);
    machine.run().unwrap();
    let core = machine.core(0).unwrap();
    assert_eq!(core.register(2), 1);
    assert_eq!(core.flags(), (1u128 << 64) + 1);
    assert_eq!(core.register(3), 1);
  }

  #[test]
  fn compare_sets_flags_only(){
    let mut machine = machine("IMM R1, 3\nCMP R1, 3\nBNZ .bad\nBEV .bad, R1\nBOD .done, R1\n.bad\nIMM R2, 1\n.done\nHLT");
    machine.run().unwrap();
    let core = machine.core(0).unwrap();
    assert_eq!(core.register(1), 3);
    assert_eq!(core.register(2), 0);
  }

  #[test]
  fn memory_and_data(){
    let text = "
      LOAD R1, .table
      IMM R2, .table
      INC R2, R2
      LOD R3, R2
      STORE 40, R3
      STR 41, 0x1FF
      LOAD R4, 41
      HLT
      .table
      DW 7
      DD 0x0102
    ";
    let mut machine = machine(text);
    machine.run().unwrap();
    let core = machine.core(0).unwrap();
    assert_eq!(core.register(1), 7);
    assert_eq!(core.register(3), 1);
    assert_eq!(core.register(4), 0xFF);
    assert_eq!(machine.ram()[40], Cell::Data(1));
    assert_eq!(machine.ram()[10], Cell::Data(2));
    assert_eq!(machine.program_len(), 11);
  }

  #[test]
  fn memory_faults(){
    let config = Configuration{ ram_words: 16, ..Configuration::default() };
    let mut machine = machine_with("STORE 20, 1", config, NullBus);
    assert_eq!(
      machine.run().unwrap_err().kind,
      FaultKind::MemoryOutOfRange{ store: "RAM", address: 20, size: 16 }
    );

    assert_eq!(fault_of("LOAD R1, 0"), FaultKind::MalformedData(0));
    assert_eq!(fault_of("BRA .data\n.data\nDW 3"), FaultKind::MalformedData(1));
  }

  #[test]
  fn register_index_faults(){
    let mut machine = Machine::new(Configuration::default(), NullBus).unwrap();
    let mov = Instruction::new(Operation::Mov, &[Operand::Register(9), Operand::Register(1)]).unwrap();
    machine.load(&[mov]).unwrap();
    assert_eq!(machine.run().unwrap_err().kind, FaultKind::RegisterOutOfRange{ index: 9, count: 8 });
  }

  #[test]
  fn stack_depth_faults(){
    let config = Configuration{ max_stack: 2, ..Configuration::default() };
    let mut machine = machine_with(".top\nPSH R1\nBRA .top", config.clone(), NullBus);
    assert_eq!(machine.run().unwrap_err().kind, FaultKind::StackOverflow(2));
    assert_eq!(machine.core(0).unwrap().stack().len(), 2);

    assert_eq!(fault_of("POP R1"), FaultKind::StackUnderflow);

    let mut machine = machine_with(".f\nCAL .f", config, NullBus);
    assert_eq!(machine.run().unwrap_err().kind, FaultKind::CallStackOverflow(2));
  }

  #[test]
  fn calls_and_top_level_return(){
    let mut machine = machine("CAL .f\nIMM R2, 2\nRET\nIMM R3, 3\n.f\nIMM R1, 1\nRET");
    assert_eq!(machine.run(), Ok(StopReason::Halted));
    let core = machine.core(0).unwrap();
    assert_eq!((core.register(1), core.register(2), core.register(3)), (1, 2, 0));
    assert!(core.call_stack().is_empty());
  }

  #[test]
  fn breakpoints_and_division_by_zero(){
    let mut machine = machine("IMM R1, 4\nDIV R1, R1, 0\nBRK\nIMM R2, 1\nHLT");
    assert_eq!(machine.run(), Ok(StopReason::Breakpoint));
    assert_eq!(machine.core(0).unwrap().register(1), 4);
    assert_eq!(machine.core(0).unwrap().ip(), 2);
    assert_eq!(machine.run(), Ok(StopReason::Breakpoint));
    assert_eq!(machine.run(), Ok(StopReason::Halted));
    assert_eq!(machine.core(0).unwrap().register(2), 1);
  }

  #[test]
  fn ports(){
    let bus = QueueBus::new().with_port(1).with_port(2);
    let mut machine = machine_with("IN R1, 1\nADD R1, R1, 1\nOUT 2, R1\nHLT", Configuration::default(), bus);
    machine.bus_mut().feed(1, vec![41]).unwrap();
    machine.run().unwrap();
    assert_eq!(machine.bus().output(2), &[42]);

    assert_eq!(fault_of("OUT 5, 1"), FaultKind::UnsupportedPort(5));
  }

  #[test]
  fn unresolved_labels_fault_at_run_time(){
    let mut program = Assembler::new(&Configuration::default()).assemble("HLT").unwrap();
    let label = program.labels.fresh();
    let mut machine = Machine::new(Configuration::default(), NullBus).unwrap();
    machine.load(&[Instruction::new(Operation::Bra, &[Operand::Label(label.clone())]).unwrap()]).unwrap();
    assert_eq!(machine.run().unwrap_err().kind, FaultKind::UnresolvedLabel(label));
  }

  #[test]
  fn cores_take_turns(){
    let config = Configuration{ cores: 2, ..Configuration::default() };
    let mut machine = machine_with("INC R1, R1\nINC R1, R1\nHLT", config, NullBus);
    assert_eq!(machine.clock(), Ok(Tick::Executed));
    assert_eq!(machine.core(0).unwrap().ip(), 1);
    assert_eq!(machine.core(1).unwrap().ip(), 0);
    assert_eq!(machine.clock(), Ok(Tick::Executed));
    assert_eq!(machine.core(1).unwrap().ip(), 1);
    assert_eq!(machine.run(), Ok(StopReason::Halted));
    assert!(machine.cores().iter().all(|core| core.register(1) == 2));
  }

  #[test]
  fn single_step_and_reset(){
    let config = Configuration{ single_step: true, ..Configuration::default() };
    let mut machine = machine_with("IMM R1, 1\nIMM R2, 2\nHLT", config, NullBus);
    assert_eq!(machine.run(), Ok(StopReason::Step));
    assert_eq!(machine.core(0).unwrap().register(1), 1);
    assert_eq!(machine.core(0).unwrap().register(2), 0);
    machine.reset();
    assert_eq!(machine.core(0).unwrap().register(1), 0);
    assert_eq!(machine.core(0).unwrap().ip(), 0);
  }

  #[test]
  fn running_off_the_end_halts(){
    let mut machine = machine("IMM R1, 1");
    assert_eq!(machine.run(), Ok(StopReason::Halted));
    assert_eq!(machine.core(0).unwrap().register(1), 1);
  }

  #[test]
  fn execute_from_rom(){
    let config = Configuration{ rom_words: 16, execute_from_rom: true, ..Configuration::default() };
    let mut machine = machine_with("STORE 0, 5\nLOAD R1, 0\nHLT", config, NullBus);
    machine.run().unwrap();
    assert_eq!(machine.core(0).unwrap().register(1), 5);
    assert!(matches!(machine.rom()[0], Cell::Code(_)));
  }

  #[test]
  fn load_errors(){
    let config = Configuration{ ram_words: 2, ..Configuration::default() };
    let program = Assembler::new(&config).assemble("HLT\nHLT\nDD 1").unwrap();
    let mut machine = Machine::new(config, NullBus).unwrap();
    assert_eq!(machine.load(&program.instructions), Err(LoadError::ProgramTooLarge{ needed: 4, available: 2 }));

    let program = Assembler::new(&Configuration::default()).assemble("@minreg 12\nHLT").unwrap();
    let mut machine = Machine::new(Configuration::default(), NullBus).unwrap();
    assert_eq!(
      machine.load(&program.instructions),
      Err(LoadError::InsufficientRegisters{ needed: 12, available: 8 })
    );
  }

  #[test]
  fn display_shows_cores_and_code(){
    let machine = machine("IMM R1, 5\nHLT");
    let text = machine.to_string();
    assert!(text.contains("Core 0"));
    assert!(text.contains("IMM R1, 5"));
  }
}
