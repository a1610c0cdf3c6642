//! The simple format: a bare 2-byte region header, no game code, no
//! identifiers, no checksum (spec §4.5).

use super::{public_data_offset, validate_region, FormatFlag, REGION_MAX_LENGTH};
use crate::dump::Dump;

const HEADER_SIZE: usize = 2;

/// Parser for the simple format. Always carries [`FormatFlag::HAS_PUBLIC_SECTION`]
/// (set unconditionally by [`super::Parser::new`]).
pub struct SimpleParser<'a> {
  dump: &'a mut Dump,
  pub flags: FormatFlag,
}

impl<'a> SimpleParser<'a> {
  pub fn new(dump: &'a mut Dump, flags: FormatFlag) -> SimpleParser<'a> {
    SimpleParser { dump, flags }
  }

  fn header_offset(&self) -> usize {
    public_data_offset(self.dump)
  }

  pub fn get_region(&self, output: &mut [u8; REGION_MAX_LENGTH]) -> usize {
    let off = self.header_offset();
    output[0] = self.dump.data[off];
    output[1] = self.dump.data[off + 1];
    output[2..].fill(0);
    2
  }

  pub fn set_region(&mut self, input: &[u8]) {
    let off = self.header_offset();
    self.dump.data[off] = input.first().copied().unwrap_or(0);
    self.dump.data[off + 1] = input.get(1).copied().unwrap_or(0);
  }

  pub fn validate(&self) -> bool {
    let off = self.header_offset();
    validate_region(&self.dump.data[off..off + HEADER_SIZE])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dump::ChipKind;

  #[test]
  fn region_roundtrips() {
    let mut dump = Dump::new();
    dump.chip_kind = ChipKind::Zs01;
    let mut p = SimpleParser::new(&mut dump, FormatFlag::HAS_PUBLIC_SECTION);
    p.set_region(b"JA");
    let mut out = [0u8; REGION_MAX_LENGTH];
    assert_eq!(p.get_region(&mut out), 2);
    assert_eq!(&out[..2], b"JA");
    assert!(p.validate());
  }

  #[test]
  fn invalid_region_fails_validation() {
    let mut dump = Dump::new();
    dump.chip_kind = ChipKind::Zs01;
    let mut p = SimpleParser::new(&mut dump, FormatFlag::HAS_PUBLIC_SECTION);
    p.set_region(b"ZZ");
    assert!(!p.validate());
  }
}
