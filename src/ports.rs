//! Port-mapped I/O. The machine owns a bus but not the behavior behind its ports.

use std::collections::{HashMap, VecDeque};

use crate::error::PortError;

pub trait PortBus {
  fn read(&mut self, port: u64) -> Result<u64, PortError>;
  fn write(&mut self, port: u64, value: u64) -> Result<(), PortError>;
}

/// A bus with no devices: every port is unsupported.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBus;

impl PortBus for NullBus {
  fn read(&mut self, port: u64) -> Result<u64, PortError> {
    Err(PortError(port))
  }

  fn write(&mut self, port: u64, _value: u64) -> Result<(), PortError> {
    Err(PortError(port))
  }
}

#[derive(Clone, Debug, Default)]
struct Port {
  input  : VecDeque<u64>,
  output : Vec<u64>,
}

/**
  A bus of registered ports, each with a queue of pending input and a record of everything
  written to it. Reading a port with an empty queue yields 0.
*/
#[derive(Clone, Debug, Default)]
pub struct QueueBus {
  ports: HashMap<u64, Port>,
}

impl QueueBus {

  pub fn new() -> QueueBus {
    QueueBus::default()
  }

  pub fn with_port(mut self, port: u64) -> QueueBus {
    self.ports.entry(port).or_default();
    self
  }

  /// Queues input for `port`.
  pub fn feed<I>(&mut self, port: u64, values: I) -> Result<(), PortError>
    where I: IntoIterator<Item = u64>
  {
    let entry = self.ports.get_mut(&port).ok_or(PortError(port))?;
    entry.input.extend(values);
    Ok(())
  }

  /// Everything written to `port` so far.
  pub fn output(&self, port: u64) -> &[u64] {
    match self.ports.get(&port) {
      Some(entry) => &entry.output,
      None        => &[]
    }
  }
}

impl PortBus for QueueBus {
  fn read(&mut self, port: u64) -> Result<u64, PortError> {
    let entry = self.ports.get_mut(&port).ok_or(PortError(port))?;
    Ok(entry.input.pop_front().unwrap_or(0))
  }

  fn write(&mut self, port: u64, value: u64) -> Result<(), PortError> {
    let entry = self.ports.get_mut(&port).ok_or(PortError(port))?;
    entry.output.push(value);
    Ok(())
  }
}
