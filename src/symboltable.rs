use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use bimap::BiMap;
use string_cache::DefaultAtom;

/**
  A `Label` is an opaque symbolic target. Labels compare by identity, not by name or by the
  address they eventually resolve to, so two labels are never confused even when they land on
  the same address. Clones are cheap. Names, when present, are interned and used only for
  display.
*/
#[derive(Clone, Debug)]
pub struct Label {
  id   : usize,
  name : Option<DefaultAtom>,
}

impl Label {
  pub fn id(&self) -> usize {
    self.id
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_ref().map(|atom| &**atom)
  }
}

impl PartialEq for Label {
  fn eq(&self, other: &Label) -> bool {
    self.id == other.id
  }
}

impl Eq for Label {}

impl Hash for Label {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id.hash(state);
  }
}

impl Display for Label {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match &self.name {
      Some(name) => write!(f, ".{}", name),
      // Anonymous labels get a name no assembler source is likely to collide with.
      None       => write!(f, ".__{}", self.id)
    }
  }
}

/**
  A symbol table is a mapping between label names and label identities, plus the allocator
  for fresh anonymous labels. One table is scoped to one program: the assembler creates it, and
  the optimizer extends it with the labels its expansions need. It is really just a
  convenience wrapper around a BiMap.
*/
#[derive(Debug)]
pub struct LabelTable {
  next_id : usize,
  table   : BiMap<DefaultAtom, Label>,
}

impl LabelTable {

  pub fn new() -> LabelTable {
    LabelTable{
      next_id : 0,
      table   : BiMap::new()
    }
  }

  /// Creates a label bound to `name`. If the name is taken, the existing label is returned
  /// as the error.
  pub fn create(&mut self, name: &str) -> Result<Label, Label> {
    let atom = DefaultAtom::from(name);
    if let Some(existing) = self.table.get_by_left(&atom) {
      return Err(existing.clone());
    }
    let label = Label{ id: self.allocate_id(), name: Some(atom.clone()) };
    self.table.insert(atom, label.clone());
    Ok(label)
  }

  /// Creates an anonymous label.
  pub fn fresh(&mut self) -> Label {
    Label{ id: self.allocate_id(), name: None }
  }

  pub fn lookup(&self, name: &str) -> Option<Label> {
    self.table.get_by_left(&DefaultAtom::from(name)).cloned()
  }

  pub fn name_of(&self, label: &Label) -> Option<&str> {
    self.table.get_by_right(label).map(|atom| &**atom)
  }

  /// The number of named labels.
  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  fn allocate_id(&mut self) -> usize {
    let id = self.next_id;
    self.next_id += 1;
    id
  }
}

impl Default for LabelTable {
  fn default() -> LabelTable {
    LabelTable::new()
  }
}

/// Maps labels to addresses. A label is bound at most once and never rebound.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
  addresses: HashMap<Label, u64>,
}

impl Resolution {

  pub fn new() -> Resolution {
    Resolution::default()
  }

  /// Binds `label` to `address`. Returns the earlier address if the label is already bound.
  pub fn bind(&mut self, label: &Label, address: u64) -> Result<(), u64> {
    match self.addresses.get(label) {
      Some(previous) => Err(*previous),
      None           => {
        self.addresses.insert(label.clone(), address);
        Ok(())
      }
    }
  }

  pub fn address_of(&self, label: &Label) -> Option<u64> {
    self.addresses.get(label).copied()
  }

  pub fn len(&self) -> usize {
    self.addresses.len()
  }

  pub fn is_empty(&self) -> bool {
    self.addresses.is_empty()
  }
}
