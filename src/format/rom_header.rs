//! The on-board flash/RTC header format: an `ExtendedHeader` plus an
//! optional MD5-derived signature tying the header to the system's DS2401
//! (spec §4.5).

use md5::{Digest, Md5};

use super::{validate_region, FormatFlag, REGION_MAX_LENGTH};
use crate::dump::Dump;

const HEADER_SIZE: usize = super::extended::HEADER_SIZE;
const SIGNATURE_SIZE: usize = 8;

/// Mixed into the MD5 input alongside the system ID and header bytes.
/// Constant across every game (spec §4.5/§6).
const SIGNATURE_SALT: [u8; 8] = [0xc1, 0xa2, 0x03, 0xd6, 0xab, 0x70, 0x85, 0x5e];

fn calculate_signature(system_id: &[u8; 8], header_bytes: &[u8; HEADER_SIZE]) -> [u8; SIGNATURE_SIZE] {
  let mut hasher = Md5::new();
  hasher.update(system_id);
  hasher.update(header_bytes);
  hasher.update(SIGNATURE_SALT);
  let digest = hasher.finalize();

  let mut out = [0u8; SIGNATURE_SIZE];
  for i in 0..SIGNATURE_SIZE {
    out[i] = digest[i] ^ digest[i + SIGNATURE_SIZE];
  }
  out
}

/// Parser for the ROM-header format. Reuses [`Dump::system_id`] and the
/// header/signature bytes at the front of [`Dump::data`]; `chip_kind` is
/// irrelevant here since this format never comes from a cartridge bus
/// transaction.
pub struct RomHeaderParser<'a> {
  dump: &'a mut Dump,
  pub flags: FormatFlag,
}

impl<'a> RomHeaderParser<'a> {
  pub fn new(dump: &'a mut Dump, flags: FormatFlag) -> RomHeaderParser<'a> {
    RomHeaderParser { dump, flags }
  }

  fn header_bytes(&self) -> [u8; HEADER_SIZE] {
    self.dump.data[0..HEADER_SIZE].try_into().unwrap()
  }

  fn write_header_bytes(&mut self, bytes: [u8; HEADER_SIZE]) {
    self.dump.data[0..HEADER_SIZE].copy_from_slice(&bytes);
  }

  fn signature_offset(&self) -> usize {
    HEADER_SIZE
  }

  fn extended(&mut self) -> super::extended::ExtendedParser<'_> {
    super::extended::ExtendedParser::new(&mut *self.dump, self.flags)
  }

  pub fn get_code(&mut self, output: &mut [u8; super::CODE_LENGTH]) -> usize {
    self.extended().get_code(output)
  }

  pub fn set_code(&mut self, input: &[u8; super::CODE_LENGTH]) {
    self.extended().set_code(input);
  }

  pub fn get_region(&mut self, output: &mut [u8; REGION_MAX_LENGTH]) -> usize {
    self.extended().get_region(output)
  }

  pub fn set_region(&mut self, input: &[u8]) {
    self.extended().set_region(input);
  }

  pub fn get_year(&mut self) -> u16 {
    self.extended().get_year()
  }

  pub fn set_year(&mut self, value: u16) {
    self.extended().set_year(value);
  }

  pub fn get_signature(&self) -> [u8; SIGNATURE_SIZE] {
    let off = self.signature_offset();
    self.dump.data[off..off + SIGNATURE_SIZE].try_into().unwrap()
  }

  fn expected_signature(&self) -> [u8; SIGNATURE_SIZE] {
    calculate_signature(&self.dump.system_id.data, &self.header_bytes())
  }

  /// Recomputes the header checksum (via the same law as [`super::ExtendedParser`])
  /// and, if [`FormatFlag::HAS_SYSTEM_ID`] is set, the MD5 signature.
  pub fn flush(&mut self) {
    self.extended().flush();

    if self.flags.contains(FormatFlag::HAS_SYSTEM_ID) {
      let signature = self.expected_signature();
      let off = self.signature_offset();
      self.dump.data[off..off + SIGNATURE_SIZE].copy_from_slice(&signature);
    }
  }

  /// Validates the region grammar and header checksum, then, if
  /// [`FormatFlag::HAS_SYSTEM_ID`] is set, recomputes and byte-compares the
  /// signature.
  pub fn validate(&mut self) -> bool {
    let mut region = [0u8; REGION_MAX_LENGTH];
    self.get_region(&mut region);
    if !validate_region(&region) {
      return false;
    }
    if !self.extended().validate() {
      return false;
    }

    if self.flags.contains(FormatFlag::HAS_SYSTEM_ID) {
      let expected = self.expected_signature();
      if expected != self.get_signature() {
        crate::log::debug!("rom header signature mismatch");
        return false;
      }
    }

    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dump::ChipKind;

  fn fresh() -> Dump {
    let mut dump = Dump::new();
    dump.chip_kind = ChipKind::None;
    dump
  }

  #[test]
  fn flush_then_validate_with_signature() {
    let mut dump = fresh();
    dump.system_id.data = [1, 2, 3, 4, 5, 6, 7, 8];
    let flags = FormatFlag::HAS_CODE_PREFIX | FormatFlag::HAS_SYSTEM_ID;
    let mut p = RomHeaderParser::new(&mut dump, flags);
    p.set_region(b"US");
    p.set_code(b"GE884");
    p.flush();
    assert!(p.validate());
  }

  #[test]
  fn signature_changes_with_header_mutation() {
    let mut dump = fresh();
    dump.system_id.data = [1, 2, 3, 4, 5, 6, 7, 8];
    let flags = FormatFlag::HAS_CODE_PREFIX | FormatFlag::HAS_SYSTEM_ID;
    let mut p = RomHeaderParser::new(&mut dump, flags);
    p.set_region(b"US");
    p.set_code(b"GE884");
    p.flush();
    let before = p.get_signature();

    let mut p = RomHeaderParser::new(&mut dump, flags);
    p.set_year(2001);
    p.flush();
    assert_ne!(p.get_signature(), before);
  }

  #[test]
  fn signature_is_skipped_without_has_system_id() {
    let mut dump = fresh();
    let flags = FormatFlag::HAS_CODE_PREFIX;
    let mut p = RomHeaderParser::new(&mut dump, flags);
    p.set_region(b"JA");
    p.set_code(b"GE884");
    p.flush();
    assert_eq!(p.get_signature(), [0u8; SIGNATURE_SIZE]);
    assert!(p.validate());
  }
}
