//! The in-memory cartridge dump: identifiers, key, config and data payload,
//! plus QR and on-disk (de)serialization.

use alloc::vec::Vec;

use crate::cipher::ds_crc8;

/// Maximum bytes a dump's data section can ever occupy (the largest chip,
/// X76F041, uses all 512).
pub const MAX_DATA_LENGTH: usize = 512;

/// Maximum length of a [`Dump::to_qr_string`] payload, callers must size
/// their buffer to this (spec §4.4/§6).
pub const MAX_QR_STRING_LENGTH: usize = 0x600;

/// Dump-file header magic (spec §6).
pub const CART_DUMP_MAGIC: u16 = 0x573d;
/// ROM-header dump-file header magic.
pub const ROM_HEADER_DUMP_MAGIC: u16 = 0x573e;

const BASE41_CHARSET: &[u8; 41] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ+-./:";

/// Which security EEPROM is present on a cartridge, and the buffer sizes
/// that follow from it. No other place in the crate may hardcode chip
/// capacity; everything goes through this triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipKind {
  /// No cartridge, or an unrecognized chip.
  #[default]
  None,
  /// Xicor X76F041: 512 bytes, key-gated in full, no public section.
  X76F041,
  /// Xicor X76F100: never shipped; driver is a documented stub.
  X76F100,
  /// Konami ZS01: scrambled transport, 32-byte public + 80-byte private.
  Zs01,
}

impl ChipKind {
  /// `(data_length, public_offset, public_length)`, per spec §3.
  pub fn sizes(self) -> (usize, usize, usize) {
    match self {
      ChipKind::None => (0, 0, 0),
      ChipKind::X76F041 => (512, 0, 0),
      ChipKind::X76F100 => (0, 0, 0),
      ChipKind::Zs01 => (112, 0, 32),
    }
  }

  /// The used length of [`Dump::data`] for this chip kind.
  pub fn data_length(self) -> usize {
    self.sizes().0
  }

  fn from_wire(value: u8) -> Option<ChipKind> {
    match value {
      0 => Some(ChipKind::None),
      1 => Some(ChipKind::X76F041),
      2 => Some(ChipKind::X76F100),
      3 => Some(ChipKind::Zs01),
      _ => None,
    }
  }

  fn to_wire(self) -> u8 {
    match self {
      ChipKind::None => 0,
      ChipKind::X76F041 => 1,
      ChipKind::X76F100 => 2,
      ChipKind::Zs01 => 3,
    }
  }
}

bitflags::bitflags! {
  /// Which identifier/data sections a [`Dump`] has attempted and/or
  /// successfully read (spec §3).
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct DumpFlag: u8 {
    /// The system board carries a DS2401 (attempted, not necessarily valid).
    const HAS_SYSTEM_ID = 1 << 0;
    /// The cartridge carries a DS2401 (attempted, not necessarily valid).
    const HAS_CART_ID = 1 << 1;
    /// `config` was read and is trustworthy.
    const CONFIG_OK = 1 << 2;
    /// `system_id` passed its CRC check.
    const SYSTEM_ID_OK = 1 << 3;
    /// `cart_id` passed its CRC check.
    const CART_ID_OK = 1 << 4;
    /// `zs_id` passed its CRC check (ZS01 only).
    const ZS_ID_OK = 1 << 5;
    /// The public data section was read successfully.
    const PUBLIC_DATA_OK = 1 << 6;
    /// The private data section was read successfully (key accepted).
    const PRIVATE_DATA_OK = 1 << 7;
  }
}

/// An 8-byte identifier token, validated by one of two disciplines (spec
/// §3): Dallas 1-Wire CRC-8 for DS2401-sourced IDs, or a "simple checksum"
/// (`data[7] == sum(data[0..7]) mod 256`) for interior identifiers. The two
/// disciplines are never interchanged (spec §9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Identifier {
  /// The raw 8 bytes: for DS2401 IDs, `[family, serial x6, crc]`.
  pub data: [u8; 8],
}

impl Identifier {
  /// Whether every byte is zero (an identifier that was never populated).
  pub fn is_empty(&self) -> bool {
    self.data.iter().all(|&b| b == 0)
  }

  /// Recomputes and writes the trailing Dallas CRC-8 byte.
  pub fn update_ds_crc(&mut self) {
    self.data[7] = ds_crc8(&self.data[0..7]);
  }

  /// Checks the trailing Dallas CRC-8 byte against the leading 7.
  pub fn validate_ds_crc(&self) -> bool {
    ds_crc8(&self.data[0..7]) == self.data[7]
  }

  /// Recomputes and writes the trailing simple-checksum byte.
  pub fn update_checksum(&mut self) {
    let sum: u8 = self.data[0..7].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    self.data[7] = sum;
  }

  /// Checks the trailing simple-checksum byte.
  pub fn validate_checksum(&self) -> bool {
    let sum: u8 = self.data[0..7].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum == self.data[7]
  }

  /// Formats this identifier as ASCII hex with `-` separators
  /// (`aa-bb-cc-...`), returning the number of bytes written into `out`.
  /// Mirrors the original firmware's display helper; useful for logging.
  pub fn to_hex_string(&self, out: &mut [u8; 23]) -> usize {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut pos = 0;
    for (i, &byte) in self.data.iter().enumerate() {
      out[pos] = HEX[(byte >> 4) as usize];
      out[pos + 1] = HEX[(byte & 0xf) as usize];
      pos += 2;
      if i + 1 < self.data.len() {
        out[pos] = b'-';
        pos += 1;
      }
    }
    pos
  }
}

/// The central value: everything readable from (or about to be written to)
/// a cartridge.
#[derive(Debug, Clone)]
pub struct Dump {
  /// Which chip this dump was read from, or is destined for.
  pub chip_kind: ChipKind,
  /// Which sections have been attempted/validated so far.
  pub flags: DumpFlag,
  /// The System 573 main-board DS2401, if any.
  pub system_id: Identifier,
  /// The cartridge-side DS2401, if any.
  pub cart_id: Identifier,
  /// The ZS01's own internal serial (ZS01 carts only).
  pub zs_id: Identifier,
  /// The 8-byte data key guarding the private section.
  pub data_key: [u8; 8],
  /// The 8-byte chip config register.
  pub config: [u8; 8],
  /// Backing storage; only `chip_kind.data_length()` bytes are meaningful.
  pub data: [u8; MAX_DATA_LENGTH],
}

impl Default for Dump {
  fn default() -> Self {
    Dump {
      chip_kind: ChipKind::None,
      flags: DumpFlag::empty(),
      system_id: Identifier::default(),
      cart_id: Identifier::default(),
      zs_id: Identifier::default(),
      data_key: [0; 8],
      config: [0; 8],
      data: [0; MAX_DATA_LENGTH],
    }
  }
}

impl Dump {
  /// A dump with no chip and no data, as produced before driver selection.
  pub fn new() -> Dump {
    Dump::default()
  }

  /// Whether this dump's `chip_kind`/`flags` combination is internally
  /// consistent (spec §3: "flag bitset is a subset of the flags permitted
  /// by that kind").
  pub fn is_well_formed(&self) -> bool {
    if self.chip_kind == ChipKind::None {
      return false;
    }
    if self.flags.contains(DumpFlag::ZS_ID_OK) && self.chip_kind != ChipKind::Zs01 {
      return false;
    }
    true
  }

  /// Resets every field to its zero value.
  pub fn clear(&mut self) {
    *self = Dump::default();
  }

  /// Zeros only the used portion of `data`.
  pub fn clear_data(&mut self) {
    let len = self.chip_kind.data_length();
    self.data[..len].fill(0);
  }

  /// Copies `source` into the used portion of `data`.
  pub fn copy_data_from(&mut self, source: &[u8]) {
    let len = self.chip_kind.data_length();
    self.data[..len].copy_from_slice(&source[..len]);
  }

  /// Copies the used portion of `data` into `dest`.
  pub fn copy_data_to(&self, dest: &mut [u8]) {
    let len = self.chip_kind.data_length();
    dest[..len].copy_from_slice(&self.data[..len]);
  }

  /// Copies the data key from `source`.
  pub fn copy_key_from(&mut self, source: &[u8; 8]) {
    self.data_key = *source;
  }

  /// Copies the data key into `dest`.
  pub fn copy_key_to(&self, dest: &mut [u8; 8]) {
    *dest = self.data_key;
  }

  /// Copies the config register from `source`.
  pub fn copy_config_from(&mut self, source: &[u8; 8]) {
    self.config = *source;
  }

  /// Copies the config register into `dest`.
  pub fn copy_config_to(&self, dest: &mut [u8; 8]) {
    *dest = self.config;
  }

  /// Initializes the config register for a freshly-keyed chip.
  pub fn init_config(&mut self, max_attempts: u8, has_public_section: bool) {
    self.config = [0; 8];
    self.config[0] = max_attempts;
    self.config[1] = has_public_section as u8;
  }

  /// Whether the used portion of `data` is all `0x00` or all `0xff` (an
  /// erased or never-written chip).
  pub fn is_data_empty(&self) -> bool {
    let len = self.chip_kind.data_length();
    let used = &self.data[..len];
    used.iter().all(|&b| b == 0x00) || used.iter().all(|&b| b == 0xff)
  }

  /// This dump's on-wire length: `sizeof(Dump) - sizeof(max_data) +
  /// data_length(chip_kind)` (spec §3).
  pub fn wire_length(&self) -> usize {
    const FIXED: usize = 2 /* chip_kind + flags */ + 24 /* 3 identifiers */ + 8 + 8;
    FIXED + self.chip_kind.data_length()
  }

  fn encode_base41(input: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < input.len() {
      let hi = input[i];
      let lo = if i + 1 < input.len() { input[i + 1] } else { 0 };
      let value = ((hi as u32) << 8) | lo as u32;
      out.push(BASE41_CHARSET[(value % 41) as usize]);
      out.push(BASE41_CHARSET[((value / 41) % 41) as usize]);
      out.push(BASE41_CHARSET[(value / 1681) as usize]);
      i += 2;
    }
  }

  /// Serializes this dump's wire-format bytes (everything [`Self::wire_length`]
  /// covers, little-endian, no magic) into `raw`.
  fn encode_raw(&self) -> Vec<u8> {
    let mut raw = Vec::with_capacity(self.wire_length());
    raw.push(self.chip_kind.to_wire());
    raw.push(self.flags.bits());
    raw.extend_from_slice(&self.system_id.data);
    raw.extend_from_slice(&self.cart_id.data);
    raw.extend_from_slice(&self.zs_id.data);
    raw.extend_from_slice(&self.data_key);
    raw.extend_from_slice(&self.config);
    raw.extend_from_slice(&self.data[..self.chip_kind.data_length()]);
    raw
  }

  /// Builds the `"573::" + base41(deflate(dump)) + "::\0"` QR payload
  /// (spec §4.4/§6) into `out`, returning the number of bytes written, or
  /// `0` if the compressed form would not fit [`MAX_QR_STRING_LENGTH`].
  pub fn to_qr_string(&self, out: &mut [u8; MAX_QR_STRING_LENGTH]) -> usize {
    let raw = self.encode_raw();
    let compressed =
      miniz_oxide::deflate::compress_to_vec(&raw, 10 /* best compression */);

    let mut encoded = Vec::with_capacity(compressed.len() / 2 * 3 + 3);
    Self::encode_base41(&compressed, &mut encoded);

    let total = 5 + encoded.len() + 3;
    if total > MAX_QR_STRING_LENGTH {
      return 0;
    }

    out[0..5].copy_from_slice(b"573::");
    out[5..5 + encoded.len()].copy_from_slice(&encoded);
    out[5 + encoded.len()..5 + encoded.len() + 3].copy_from_slice(b"::\0");
    total
  }

  /// Serializes this dump to a dump-file image (magic + wire bytes).
  pub fn to_file(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + self.wire_length());
    out.extend_from_slice(&CART_DUMP_MAGIC.to_le_bytes());
    out.extend_from_slice(&self.encode_raw());
    out
  }

  /// Parses a dump-file image, validating the magic and the declared
  /// length against `chip_kind`'s expected size (spec §6).
  pub fn from_file(bytes: &[u8]) -> Option<Dump> {
    if bytes.len() < 2 {
      return None;
    }
    let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
    if magic != CART_DUMP_MAGIC {
      return None;
    }

    let body = &bytes[2..];
    if body.is_empty() {
      return None;
    }
    let chip_kind = ChipKind::from_wire(body[0])?;
    let mut dump = Dump { chip_kind, ..Dump::default() };

    let expected = dump.wire_length();
    if body.len() != expected {
      return None;
    }

    dump.flags = DumpFlag::from_bits_truncate(body[1]);
    dump.system_id.data.copy_from_slice(&body[2..10]);
    dump.cart_id.data.copy_from_slice(&body[10..18]);
    dump.zs_id.data.copy_from_slice(&body[18..26]);
    dump.data_key.copy_from_slice(&body[26..34]);
    dump.config.copy_from_slice(&body[34..42]);
    let data_len = chip_kind.data_length();
    dump.data[..data_len].copy_from_slice(&body[42..42 + data_len]);

    Some(dump)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ds_crc_roundtrip() {
    let mut id = Identifier { data: [0x01, 1, 2, 3, 4, 5, 6, 0] };
    id.update_ds_crc();
    assert!(id.validate_ds_crc());
    id.data[2] ^= 1;
    assert!(!id.validate_ds_crc());
  }

  #[test]
  fn simple_checksum_roundtrip() {
    let mut id = Identifier { data: [10, 20, 30, 40, 50, 60, 70, 0] };
    id.update_checksum();
    assert!(id.validate_checksum());
    id.data[0] ^= 1;
    assert!(!id.validate_checksum());
  }

  #[test]
  fn is_data_empty_detects_zero_and_ff() {
    let mut dump = Dump { chip_kind: ChipKind::Zs01, ..Dump::default() };
    assert!(dump.is_data_empty());
    dump.data[0..dump.chip_kind.data_length()].fill(0xff);
    assert!(dump.is_data_empty());
    dump.data[5] = 0x42;
    assert!(!dump.is_data_empty());
  }

  #[test]
  fn file_roundtrip() {
    let mut dump = Dump { chip_kind: ChipKind::Zs01, ..Dump::default() };
    dump.flags = DumpFlag::HAS_CART_ID | DumpFlag::CART_ID_OK;
    dump.data[0] = 0xab;
    let bytes = dump.to_file();
    let back = Dump::from_file(&bytes).expect("valid file");
    assert_eq!(back.chip_kind, dump.chip_kind);
    assert_eq!(back.flags, dump.flags);
    assert_eq!(back.data[0], 0xab);
  }

  #[test]
  fn qr_string_has_expected_framing() {
    let dump = Dump { chip_kind: ChipKind::X76F041, ..Dump::default() };
    let mut out = [0u8; MAX_QR_STRING_LENGTH];
    let len = dump.to_qr_string(&mut out);
    assert!(len > 0);
    assert_eq!(&out[0..5], b"573::");
    assert_eq!(&out[len - 3..len], b"::\0");
  }
}
