//! The configuration record shared by the assembler, the optimizer and the machine. It is
//! always passed explicitly; nothing in the crate reads configuration from global state.

use std::convert::TryFrom;
use std::time::Duration;

use crate::bytecode::{mask_for, Tier};
use crate::error::ConfigError;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Configuration {
  /// Size of each core's register file, including the zero register.
  pub registers        : usize,
  /// Maximum depth of both the value stack and the call stack.
  pub max_stack        : usize,
  pub ram_words        : usize,
  pub rom_words        : usize,
  /// Load and execute the program from ROM instead of RAM.
  pub execute_from_rom : bool,
  /// Word width in bits, 1 through 64.
  pub word_bits        : u32,
  /// The most capable tier the target executes natively.
  pub max_tier         : Tier,
  /// Wall-clock budget for `Machine::run`.
  pub max_run_time     : Duration,
  /// `Machine::run` returns after every tick.
  pub single_step      : bool,
  pub cores            : usize,
}

impl Default for Configuration {
  fn default() -> Configuration {
    Configuration{
      registers        : 8,
      max_stack        : 256,
      ram_words        : 256,
      rom_words        : 0,
      execute_from_rom : false,
      word_bits        : 8,
      max_tier         : Tier::CustomPragma,
      max_run_time     : Duration::from_secs(10),
      single_step      : false,
      cores            : 1,
    }
  }
}

impl Configuration {

  /// The bit-mask derived from the word width.
  pub fn mask(&self) -> u64 {
    mask_for(self.word_bits)
  }

  /// Size of the store the program is loaded into.
  pub fn code_words(&self) -> usize {
    match self.execute_from_rom {
      true  => self.rom_words,
      false => self.ram_words
    }
  }

  /// Sets the target tier from its numeric level (0 = Core).
  pub fn with_tier_level(mut self, level: u8) -> Result<Configuration, ConfigError> {
    self.max_tier = Tier::try_from(level).map_err(|_| ConfigError::TierLevel(level))?;
    Ok(self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.word_bits == 0 || self.word_bits > 64 {
      return Err(ConfigError::WordWidth(self.word_bits));
    }
    if self.registers == 0 {
      return Err(ConfigError::Empty("register"));
    }
    if self.cores == 0 {
      return Err(ConfigError::Empty("core"));
    }
    if self.code_words() == 0 {
      return Err(ConfigError::Empty("word of code memory"));
    }
    Ok(())
  }
}
