//! The extended format: a 5-character game code, a checksummed header, and
//! (optionally) a public/private identifier-set split (spec §4.5).

use super::{
  public_data_offset, validate_region, FormatFlag, IdentifierSet, PublicIdentifierSet,
  CODE_LENGTH, REGION_MAX_LENGTH,
};
use crate::dump::Dump;

pub const HEADER_SIZE: usize = 16;
const CHECKSUM_WORDS: usize = 7;

/// GX706's header byte, as actually burned into the chip. The intended game
/// code is `GX706`, but the cart ships with this byte mastered as `'E'`
/// while the checksum was computed as if it were `'X'`.
const GX706_STORED_BYTE: u8 = b'E';
const GX706_LOGICAL_BYTE: u8 = b'X';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ExtendedHeader {
  code: [u8; 5],
  region: [u8; 5],
  year: u16,
  pad: [u8; 2],
  checksum: u16,
}

impl ExtendedHeader {
  fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> ExtendedHeader {
    ExtendedHeader {
      code: bytes[0..5].try_into().unwrap(),
      region: bytes[5..10].try_into().unwrap(),
      year: u16::from_le_bytes([bytes[10], bytes[11]]),
      pad: [bytes[12], bytes[13]],
      checksum: u16::from_le_bytes([bytes[14], bytes[15]]),
    }
  }

  fn to_bytes(self) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0..5].copy_from_slice(&self.code);
    out[5..10].copy_from_slice(&self.region);
    out[10..12].copy_from_slice(&self.year.to_le_bytes());
    out[12..14].copy_from_slice(&self.pad);
    out[14..16].copy_from_slice(&self.checksum.to_le_bytes());
    out
  }

  fn checksum_words(self) -> [u16; CHECKSUM_WORDS] {
    let raw = self.to_bytes();
    let mut words = [0u16; CHECKSUM_WORDS];
    for (i, w) in words.iter_mut().enumerate() {
      *w = u16::from_le_bytes([raw[2 * i], raw[2 * i + 1]]);
    }
    words
  }

  fn update_checksum(&mut self, inverted: bool) {
    let sum: u16 = self.checksum_words().iter().fold(0u16, |a, &w| a.wrapping_add(w));
    self.checksum = sum ^ if inverted { 0xffff } else { 0x0000 };
  }

  fn validate_checksum(self, inverted: bool) -> bool {
    let sum: u16 = self.checksum_words().iter().fold(0u16, |a, &w| a.wrapping_add(w));
    let expected = sum ^ if inverted { 0xffff } else { 0x0000 };
    if expected != self.checksum {
      crate::log::debug!(
        "extended header checksum mismatch: exp={:#06x} got={:#06x}",
        expected,
        self.checksum
      );
      return false;
    }
    true
  }
}

/// Parser for the extended format. Always carries
/// [`FormatFlag::HAS_CODE_PREFIX`] (set unconditionally by [`super::Parser::new`]).
pub struct ExtendedParser<'a> {
  dump: &'a mut Dump,
  pub flags: FormatFlag,
}

impl<'a> ExtendedParser<'a> {
  pub fn new(dump: &'a mut Dump, flags: FormatFlag) -> ExtendedParser<'a> {
    ExtendedParser { dump, flags }
  }

  fn header_offset(&self) -> usize {
    public_data_offset(self.dump)
  }

  fn read_header(&self) -> ExtendedHeader {
    let off = self.header_offset();
    let mut bytes = [0u8; HEADER_SIZE];
    bytes.copy_from_slice(&self.dump.data[off..off + HEADER_SIZE]);
    ExtendedHeader::from_bytes(&bytes)
  }

  fn write_header(&mut self, header: ExtendedHeader) {
    let off = self.header_offset();
    self.dump.data[off..off + HEADER_SIZE].copy_from_slice(&header.to_bytes());
  }

  fn public_identifiers_offset(&self) -> usize {
    self.header_offset() + HEADER_SIZE
  }

  fn private_identifiers_offset(&self) -> usize {
    self.header_offset() + HEADER_SIZE + PublicIdentifierSet::SIZE
  }

  /// Runs `body` with `code[1]` temporarily forced to the byte the checksum
  /// was actually computed over, then restores whatever was stored.
  fn with_gx706_checksum_byte<T>(&mut self, body: impl FnOnce(&mut Self) -> T) -> T {
    if !self.flags.contains(FormatFlag::GX706_WORKAROUND) {
      return body(self);
    }

    let mut header = self.read_header();
    let stored = header.code[1];
    header.code[1] = GX706_LOGICAL_BYTE;
    self.write_header(header);

    let result = body(self);

    let mut header = self.read_header();
    header.code[1] = stored;
    self.write_header(header);
    result
  }

  pub fn get_code(&self, output: &mut [u8; CODE_LENGTH]) -> usize {
    let header = self.read_header();
    *output = header.code;
    if self.flags.contains(FormatFlag::GX706_WORKAROUND) {
      output[1] = GX706_LOGICAL_BYTE;
    }
    CODE_LENGTH
  }

  pub fn set_code(&mut self, input: &[u8; CODE_LENGTH]) {
    let mut header = self.read_header();
    header.code = *input;
    if self.flags.contains(FormatFlag::GX706_WORKAROUND) {
      header.code[1] = GX706_STORED_BYTE;
    }
    self.write_header(header);
  }

  pub fn get_region(&self, output: &mut [u8; REGION_MAX_LENGTH]) -> usize {
    let header = self.read_header();
    output.copy_from_slice(&header.region);
    let len = header.region.iter().position(|&b| b == 0).unwrap_or(header.region.len());
    len
  }

  pub fn set_region(&mut self, input: &[u8]) {
    let mut header = self.read_header();
    header.region = [0; 5];
    let n = input.len().min(5);
    header.region[..n].copy_from_slice(&input[..n]);
    self.write_header(header);
  }

  pub fn get_year(&self) -> u16 {
    self.read_header().year
  }

  pub fn set_year(&mut self, value: u16) {
    let mut header = self.read_header();
    header.year = value;
    self.write_header(header);
  }

  pub fn get_identifiers(&self) -> Option<IdentifierSet> {
    if !self.flags.contains(FormatFlag::HAS_PUBLIC_SECTION) {
      return None;
    }
    let off = self.private_identifiers_offset();
    let mut bytes = [0u8; IdentifierSet::SIZE];
    bytes.copy_from_slice(&self.dump.data[off..off + IdentifierSet::SIZE]);
    Some(IdentifierSet::from_bytes(&bytes))
  }

  pub fn set_identifiers(&mut self, set: &IdentifierSet) {
    if !self.flags.contains(FormatFlag::HAS_PUBLIC_SECTION) {
      return;
    }
    let off = self.private_identifiers_offset();
    self.dump.data[off..off + IdentifierSet::SIZE].copy_from_slice(&set.to_bytes());
  }

  pub fn get_public_identifiers(&self) -> Option<PublicIdentifierSet> {
    if !self.flags.contains(FormatFlag::HAS_PUBLIC_SECTION) {
      return None;
    }
    let off = self.public_identifiers_offset();
    let mut bytes = [0u8; PublicIdentifierSet::SIZE];
    bytes.copy_from_slice(&self.dump.data[off..off + PublicIdentifierSet::SIZE]);
    Some(PublicIdentifierSet::from_bytes(&bytes))
  }

  pub fn set_public_identifiers(&mut self, set: &PublicIdentifierSet) {
    if !self.flags.contains(FormatFlag::HAS_PUBLIC_SECTION) {
      return;
    }
    let off = self.public_identifiers_offset();
    self.dump.data[off..off + PublicIdentifierSet::SIZE].copy_from_slice(&set.to_bytes());
  }

  /// If [`FormatFlag::HAS_PUBLIC_SECTION`] is set, copies the private
  /// identifier set's `system_id` (only; `install_id` is left alone, per
  /// the reference firmware) into the public set, then updates the
  /// checksum under the GX706 workaround if applicable.
  pub fn flush(&mut self) {
    if self.flags.contains(FormatFlag::HAS_PUBLIC_SECTION) {
      let system_id = self.get_identifiers().unwrap_or_default().system_id;
      let mut public = self.get_public_identifiers().unwrap_or_default();
      public.system_id = system_id;
      self.set_public_identifiers(&public);
    }

    let inverted = self.flags.contains(FormatFlag::CHECKSUM_INVERTED);
    self.with_gx706_checksum_byte(|this| {
      let mut header = this.read_header();
      header.update_checksum(inverted);
      this.write_header(header);
    });
  }

  pub fn validate(&self) -> bool {
    let mut region = [0u8; REGION_MAX_LENGTH];
    self.get_region(&mut region);
    if !validate_region(&region) {
      return false;
    }

    // `with_gx706_checksum_byte` needs `&mut self`; validation only reads,
    // so work on a throwaway copy of the header bytes instead of mutating.
    let mut header = self.read_header();
    if self.flags.contains(FormatFlag::GX706_WORKAROUND) {
      header.code[1] = GX706_LOGICAL_BYTE;
    }
    let inverted = self.flags.contains(FormatFlag::CHECKSUM_INVERTED);
    header.validate_checksum(inverted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dump::ChipKind;

  fn fresh() -> Dump {
    let mut dump = Dump::new();
    dump.chip_kind = ChipKind::Zs01;
    dump
  }

  #[test]
  fn flush_then_validate_round_trips() {
    let mut dump = fresh();
    let mut p = ExtendedParser::new(&mut dump, FormatFlag::HAS_CODE_PREFIX);
    p.set_region(b"US");
    p.set_code(b"GE884");
    p.set_year(1999);
    p.flush();
    assert!(p.validate());
    assert_eq!(p.get_year(), 1999);
  }

  #[test]
  fn gx706_workaround_stores_e_displays_x() {
    let mut dump = fresh();
    let flags = FormatFlag::HAS_CODE_PREFIX | FormatFlag::GX706_WORKAROUND;
    {
      let mut p = ExtendedParser::new(&mut dump, flags);
      p.set_region(b"JA");
      p.set_code(b"GX706");
      p.flush();
      assert!(p.validate());

      let mut code = [0u8; CODE_LENGTH];
      p.get_code(&mut code);
      assert_eq!(&code, b"GX706");
    }

    let off = public_data_offset(&dump);
    assert_eq!(dump.data[off + 1], GX706_STORED_BYTE);
  }

  #[test]
  fn public_section_gets_system_id_only() {
    let mut dump = fresh();
    let flags = FormatFlag::HAS_CODE_PREFIX | FormatFlag::HAS_PUBLIC_SECTION;
    let mut p = ExtendedParser::new(&mut dump, flags);
    p.set_region(b"US");

    let mut ids = IdentifierSet::default();
    ids.system_id.data = [1, 2, 3, 4, 5, 6, 7, 8];
    ids.install_id.data = [9, 9, 9, 9, 9, 9, 9, 9];
    p.set_identifiers(&ids);
    p.flush();

    let public = p.get_public_identifiers().unwrap();
    assert_eq!(public.system_id, ids.system_id);
    assert_eq!(public.install_id, Default::default());
  }
}
