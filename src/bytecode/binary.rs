/*!
  Word-level helpers shared by the loader and the optimizer. A data directive (`DW`, `DD`,
  `DQ`) occupies one, two or four machine words; a value is split into those words by
  recursively halving it into a high part and a low part, most significant word first.
*/

/// The value of a word as wide as `bits`. Widths of 64 bits or more saturate to `u64::MAX`.
pub fn mask_for(bits: u32) -> u64 {
  match bits >= 64 {
    true  => u64::max_value(),
    false => (1u64 << bits) - 1
  }
}

// Convenience for decomposing a value into a high part and a low part:
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct TwoWords {
  pub high : u64,
  pub low  : u64
}

/// Splits `value` at bit `low_bits`.
pub fn halves(value: u64, low_bits: u32) -> TwoWords {
  TwoWords{
    high : value.checked_shr(low_bits).unwrap_or(0),
    low  : value & mask_for(low_bits)
  }
}

/**
  Splits `value` into `count` words of `word_bits` each, most significant first. `count` must
  be a power of two. Bits that do not fit in `count` words are discarded.
*/
pub fn split_words(value: u64, word_bits: u32, count: usize) -> Vec<u64> {
  match count {
    0 => vec![],
    1 => vec![value & mask_for(word_bits)],
    _ => {
      let half = count / 2;
      let TwoWords{ high, low } = halves(value, word_bits.saturating_mul(half as u32));
      let mut words = split_words(high, word_bits, half);
      words.extend(split_words(low, word_bits, half));
      words
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn masks(){
    assert_eq!(mask_for(8), 0xFF);
    assert_eq!(mask_for(1), 1);
    assert_eq!(mask_for(64), u64::max_value());
  }

  #[test]
  fn split_high_first(){
    assert_eq!(split_words(0xABCD, 8, 2), vec![0xAB, 0xCD]);
    assert_eq!(split_words(0x1234_5678, 8, 4), vec![0x12, 0x34, 0x56, 0x78]);
    assert_eq!(split_words(0x1FF, 8, 1), vec![0xFF]);
  }

  #[test]
  fn wide_words_do_not_overflow_shifts(){
    assert_eq!(split_words(7, 64, 2), vec![0, 7]);
    assert_eq!(split_words(7, 32, 4), vec![0, 0, 0, 7]);
  }
}
