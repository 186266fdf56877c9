/*!
  The human readable textual form of the IR is called assembly. This module turns source lines
  into an instruction stream in three passes:

    1. Discovery: every label definition (`.name`) creates a label, value macros are recorded,
       and code-macro bodies are captured, so all of them may be used before they are defined.
    2. Sizing: every instruction is parsed against its opcode's signature while the highest
       register index and the largest `@minram` request are collected.
    3. Emission: `MAXREG`/`MINRAM` bookkeeping leads the stream, followed by the instructions,
       label marks and pragmas in source order, with code macros replayed where used.

  Lines are tokenized once; each pass re-reads the tokens. Operands are lexed with `nom`:

    .name              a label
    Rn, $n             a register
    0x.., 0b.., digits an immediate
    NAME               a value macro
*/

use std::collections::HashMap;

use nom::{
  branch::alt,
  bytes::complete::{tag_no_case, take_while1},
  character::complete::{digit1, hex_digit1, one_of},
  combinator::{all_consuming, map_res},
  error::ErrorKind,
  sequence::preceded,
  IResult
};
use string_cache::DefaultAtom;
use tracing::{debug, warn};

use crate::bytecode::{Instruction, Operation};
use crate::config::Configuration;
use crate::emitter::Program;
use crate::error::{AssemblyError, LineError};
use crate::operand::{Operand, RegisterIndex};
use crate::symboltable::LabelTable;

const COMMENT      : &str = "//";
const LABEL_SIGIL  : char = '.';
const PRAGMA_SIGIL : char = '@';

// region Operand lexing

type LexResult<'a, O> = IResult<&'a str, O, (&'a str, ErrorKind)>;

fn register(input: &str) -> LexResult<'_, RegisterIndex> {
  map_res(
    preceded(one_of("Rr$"), digit1),
    |digits: &str| digits.parse::<RegisterIndex>()
  )(input)
}

fn hexadecimal(input: &str) -> LexResult<'_, u64> {
  map_res(
    preceded(tag_no_case("0x"), hex_digit1),
    |digits: &str| u64::from_str_radix(digits, 16)
  )(input)
}

fn binary(input: &str) -> LexResult<'_, u64> {
  map_res(
    preceded(tag_no_case("0b"), take_while1(|c: char| c == '0' || c == '1')),
    |digits: &str| u64::from_str_radix(digits, 2)
  )(input)
}

fn decimal(input: &str) -> LexResult<'_, u64> {
  map_res(digit1, |digits: &str| digits.parse::<u64>())(input)
}

fn literal(input: &str) -> LexResult<'_, u64> {
  all_consuming(alt((hexadecimal, binary, decimal)))(input)
}

// endregion

/// The shape of a non-blank source line.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Syntax<'a> {
  LabelDefinition(&'a str),
  ValueMacro{ name: &'a str, value: &'a str },
  MacroBegin(&'a str),
  MacroEnd,
  MacroUse(&'a str),
  MinRam(&'a str),
  MinReg(&'a str),
  /// Any other `@` line, kept verbatim.
  Pragma(&'a str),
  Operation{ mnemonic: &'a str, operands: Vec<&'a str> },
}

struct SourceLine<'a> {
  /// 1-based line number in the original source.
  number : usize,
  text   : &'a str,
  syntax : Syntax<'a>,
}

impl<'a> SourceLine<'a> {
  fn error(&self, kind: LineError) -> AssemblyError {
    AssemblyError::Line{ line: self.number, text: self.text.to_string(), kind }
  }
}

/// Splits a line into its syntax. Blank and comment-only lines yield `None`.
fn tokenize(number: usize, raw: &str) -> Result<Option<SourceLine<'_>>, AssemblyError> {
  let text = match raw.find(COMMENT) {
    Some(index) => &raw[..index],
    None        => raw
  }.trim();
  if text.is_empty() {
    return Ok(None);
  }

  let fail = |kind: LineError| AssemblyError::Line{ line: number, text: raw.trim().to_string(), kind };
  let tokens: Vec<&str> =
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .collect();
  // Separators alone make a blank line.
  if tokens.is_empty() {
    return Ok(None);
  }

  let syntax =
    if text.starts_with(LABEL_SIGIL) {
      let name = &tokens[0][1..];
      if name.is_empty() {
        return Err(fail(LineError::UnknownOperand(tokens[0].to_string())));
      }
      if let Some(extra) = tokens.get(1) {
        return Err(fail(LineError::UnexpectedToken(extra.to_string())));
      }
      Syntax::LabelDefinition(name)
    }
    else if text.starts_with(PRAGMA_SIGIL) {
      let directive = &tokens[0][1..];
      match (directive.to_ascii_lowercase().as_str(), &tokens[1..]) {
        ("macro", &["begin", name]) => Syntax::MacroBegin(name),
        ("macro", &["end"])         => Syntax::MacroEnd,
        ("macro", &["begin"])       => {
          return Err(fail(LineError::MalformedDirective(directive.to_string())));
        }
        ("macro", &[name, value])   => Syntax::ValueMacro{ name, value },
        ("macro", &[name])          => Syntax::MacroUse(name),
        ("minram", &[value])        => Syntax::MinRam(value),
        ("minreg", &[value])        => Syntax::MinReg(value),
        ("macro", _) | ("minram", _) | ("minreg", _) => {
          return Err(fail(LineError::MalformedDirective(directive.to_string())));
        }
        _                           => Syntax::Pragma(text[1..].trim())
      }
    }
    else {
      Syntax::Operation{ mnemonic: tokens[0], operands: tokens[1..].to_vec() }
    };

  Ok(Some(SourceLine{ number, text: raw.trim(), syntax }))
}

/// Translates assembly source into a `Program`. Each call to `assemble` is an independent
/// session with its own label and macro tables.
#[derive(Clone, Debug)]
pub struct Assembler {
  mask      : u64,
  registers : usize,
  ram_words : usize,
}

impl Assembler {

  pub fn new(config: &Configuration) -> Assembler {
    Assembler{
      mask      : config.mask(),
      registers : config.registers,
      ram_words : config.ram_words,
    }
  }

  pub fn assemble(&self, source: &str) -> Result<Program, AssemblyError> {
    let lines: Vec<&str> = source.lines().collect();
    self.assemble_lines(&lines)
  }

  pub fn assemble_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<Program, AssemblyError> {
    let mut source = Vec::with_capacity(lines.len());
    for (index, raw) in lines.iter().enumerate() {
      if let Some(line) = tokenize(index + 1, raw.as_ref())? {
        source.push(line);
      }
    }

    let mut session = Session::new(self, &source);
    session.discover()?;
    let (max_register, min_ram) = session.size()?;
    let instructions = session.emit(max_register, min_ram)?;

    debug!(
      lines = source.len(),
      instructions = instructions.len(),
      labels = session.labels.len(),
      max_register,
      min_ram,
      "assembled"
    );
    Ok(Program{ instructions, labels: session.labels })
  }
}

/// The state of one assembly run.
struct Session<'s, 'a> {
  assembler   : &'s Assembler,
  lines       : &'s [SourceLine<'a>],
  labels      : LabelTable,
  values      : HashMap<DefaultAtom, u64>,
  /// Code macro name to the indices of its body lines.
  code_macros : HashMap<DefaultAtom, Vec<usize>>,
  /// Lines that belong to a code-macro definition and are only emitted where it is used.
  in_body     : Vec<bool>,
  parsed      : Vec<Option<Instruction>>,
}

impl<'s, 'a> Session<'s, 'a> {

  fn new(assembler: &'s Assembler, lines: &'s [SourceLine<'a>]) -> Session<'s, 'a> {
    Session{
      assembler,
      lines,
      labels      : LabelTable::new(),
      values      : HashMap::new(),
      code_macros : HashMap::new(),
      in_body     : vec![false; lines.len()],
      parsed      : vec![None; lines.len()],
    }
  }

  // region Pass 1: discovery

  fn discover(&mut self) -> Result<(), AssemblyError> {
    let lines = self.lines;
    // The macro being captured: its name, the line that opened it, and its body.
    let mut open: Option<(DefaultAtom, usize, Vec<usize>)> = None;

    for (index, line) in lines.iter().enumerate() {
      match &line.syntax {

        Syntax::MacroBegin(name) => {
          if open.is_some() {
            return Err(line.error(LineError::NestedMacro(name.to_string())));
          }
          let atom = DefaultAtom::from(*name);
          if self.code_macros.contains_key(&atom) {
            return Err(line.error(LineError::DuplicateMacro(name.to_string())));
          }
          open = Some((atom, index, Vec::new()));
          self.in_body[index] = true;
          continue;
        }

        Syntax::MacroEnd => {
          match open.take() {
            Some((name, _, body)) => {
              self.code_macros.insert(name, body);
              self.in_body[index] = true;
            }
            None => {
              return Err(line.error(LineError::UnmatchedMacroEnd));
            }
          }
        }

        Syntax::LabelDefinition(name) => {
          if open.is_some() {
            return Err(line.error(LineError::LabelInMacro(name.to_string())));
          }
          if self.labels.create(name).is_err() {
            return Err(line.error(LineError::DuplicateLabel(name.to_string())));
          }
        }

        Syntax::ValueMacro{ name, .. } if open.is_some() => {
          return Err(line.error(LineError::NestedMacro(name.to_string())));
        }

        Syntax::ValueMacro{ name, value } => {
          let value = self.value_of(value).map_err(|kind| line.error(kind))?;
          let atom = DefaultAtom::from(*name);
          if self.values.contains_key(&atom) {
            return Err(line.error(LineError::DuplicateMacro(name.to_string())));
          }
          self.values.insert(atom, value);
        }

        Syntax::MacroUse(name) if open.is_some() => {
          return Err(line.error(LineError::NestedMacro(name.to_string())));
        }

        _ => {}
      }

      if let Some((_, _, body)) = &mut open {
        body.push(index);
        self.in_body[index] = true;
      }
    }

    if let Some((name, index, _)) = open {
      return Err(lines[index].error(LineError::UnterminatedMacro(name.to_string())));
    }

    debug!(labels = self.labels.len(), value_macros = self.values.len(), code_macros = self.code_macros.len(), "discovery pass complete");
    Ok(())
  }

  // endregion

  // region Pass 2: sizing

  /// Parses every instruction line and returns the highest register index and the largest
  /// RAM request.
  fn size(&mut self) -> Result<(RegisterIndex, u64), AssemblyError> {
    let lines = self.lines;
    let mut max_register: RegisterIndex = 0;
    let mut min_ram: u64 = 0;

    for (index, line) in lines.iter().enumerate() {
      match &line.syntax {

        Syntax::Operation{ mnemonic, operands } => {
          let instruction = self.parse_instruction(line.number, mnemonic, operands)
                                .map_err(|kind| line.error(kind))?;
          max_register = max_register.max(instruction.max_register().unwrap_or(0));
          self.parsed[index] = Some(instruction);
        }

        Syntax::MinRam(value) => {
          min_ram = min_ram.max(self.value_of(value).map_err(|kind| line.error(kind))?);
        }

        Syntax::MinReg(value) => {
          let requested = self.value_of(value).map_err(|kind| line.error(kind))?;
          max_register = max_register.max(requested as RegisterIndex);
        }

        _ => {}
      }
    }

    if max_register >= self.assembler.registers {
      warn!(max_register, configured = self.assembler.registers, "program uses more registers than configured");
    }
    if min_ram > self.assembler.ram_words as u64 {
      warn!(min_ram, configured = self.assembler.ram_words, "program requests more RAM than configured");
    }
    Ok((max_register, min_ram))
  }

  fn parse_instruction(&self, number: usize, mnemonic: &str, tokens: &[&str])
    -> Result<Instruction, LineError>
  {
    let operation =
      Operation::from_mnemonic(mnemonic)
        .ok_or_else(|| LineError::UnknownMnemonic(mnemonic.to_string()))?;

    let mut operands = Vec::with_capacity(tokens.len());
    for token in tokens {
      let operand = self.lex_operand(token)?;
      if let Operand::Immediate(value) = operand {
        if value & !self.assembler.mask != 0 {
          warn!(line = number, value, "immediate is wider than the word and will be masked");
        }
      }
      operands.push(operand);
    }

    Ok(Instruction::new(operation, &operands)?)
  }

  fn lex_operand(&self, token: &str) -> Result<Operand, LineError> {
    if let Some(name) = token.strip_prefix(LABEL_SIGIL) {
      return self.labels
                 .lookup(name)
                 .map(Operand::Label)
                 .ok_or_else(|| LineError::UndefinedLabel(name.to_string()));
    }
    if let Ok((_, index)) = all_consuming(register)(token) {
      return Ok(Operand::Register(index));
    }
    self.value_of(token).map(Operand::Immediate)
  }

  /// A numeric literal or the value of a previously defined value macro.
  fn value_of(&self, token: &str) -> Result<u64, LineError> {
    if let Ok((_, value)) = literal(token) {
      return Ok(value);
    }
    if token.starts_with(|c: char| c.is_ascii_digit()) {
      return Err(LineError::MalformedLiteral(token.to_string()));
    }
    self.values
        .get(&DefaultAtom::from(token))
        .copied()
        .ok_or_else(|| LineError::UnknownOperand(token.to_string()))
  }

  // endregion

  // region Pass 3: emission

  /// `MAXREG` and `MINRAM` come first in the output, ahead of every instruction, so a back end
  /// sees the program's resource needs before its code.
  fn emit(&self, max_register: RegisterIndex, min_ram: u64) -> Result<Vec<Instruction>, AssemblyError> {
    let mut out = vec![Instruction::max_reg(max_register), Instruction::min_ram(min_ram)];
    for index in 0..self.lines.len() {
      if !self.in_body[index] {
        self.emit_line(index, &mut out)?;
      }
    }
    Ok(out)
  }

  fn emit_line(&self, index: usize, out: &mut Vec<Instruction>) -> Result<(), AssemblyError> {
    let line = &self.lines[index];
    match &line.syntax {

      Syntax::LabelDefinition(name) => {
        let label = self.labels
                        .lookup(name)
                        .ok_or_else(|| line.error(LineError::UndefinedLabel(name.to_string())))?;
        out.push(Instruction::mark_label(&label));
      }

      Syntax::Pragma(text) => out.push(Instruction::pragma(*text)),

      Syntax::MacroUse(name) => {
        match self.code_macros.get(&DefaultAtom::from(*name)) {
          Some(body) => {
            out.push(Instruction::macro_begin(*name));
            for &body_index in body {
              self.emit_line(body_index, out)?;
            }
            out.push(Instruction::macro_end());
          }
          None => {
            return Err(line.error(LineError::UndefinedMacro(name.to_string())));
          }
        }
      }

      Syntax::Operation{ .. } => {
        if let Some(instruction) = &self.parsed[index] {
          out.push(instruction.clone());
        }
      }

      // Directives and macro definitions were consumed by the earlier passes.
      _ => {}
    }
    Ok(())
  }

  // endregion
}
