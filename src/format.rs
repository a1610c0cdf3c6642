//! Cartridge data formats: region grammar, per-generation headers and their
//! checksum laws, and the packed identifier sub-structures a header may
//! carry (spec §4.5).

pub mod basic;
pub mod extended;
pub mod region;
pub mod rom_header;
pub mod simple;

pub use basic::BasicParser;
pub use extended::ExtendedParser;
pub use region::{is_valid_region, is_valid_upgrade_region, REGION_MAX_LENGTH, REGION_MIN_LENGTH};
pub use rom_header::RomHeaderParser;
pub use simple::SimpleParser;

use crate::dump::{Dump, Identifier};

/// Length of a game code string (`ExtendedHeader::code`, catalog entries).
pub const CODE_LENGTH: usize = 5;

/// Which parser dialect a [`Dump`]'s data was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CartFormat {
  /// No recognized format; raw bytes only.
  #[default]
  None,
  /// Two-byte region header, no identifiers, no checksum.
  Simple,
  /// `BasicHeader` plus an identifier set.
  Basic,
  /// `ExtendedHeader`, a game code, and optional public/private identifier
  /// sets.
  Extended,
}

impl CartFormat {
  pub(crate) fn from_wire(value: u8) -> Option<CartFormat> {
    match value {
      0 => Some(CartFormat::None),
      1 => Some(CartFormat::Simple),
      2 => Some(CartFormat::Basic),
      3 => Some(CartFormat::Extended),
      _ => None,
    }
  }

  pub(crate) fn to_wire(self) -> u8 {
    match self {
      CartFormat::None => 0,
      CartFormat::Simple => 1,
      CartFormat::Basic => 2,
      CartFormat::Extended => 3,
    }
  }
}

bitflags::bitflags! {
  /// Which optional sub-structures a header carries, and two checksum
  /// quirks (spec §4.5). A catalog entry pins a `(CartFormat, FormatFlag)`
  /// pair to a known game.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct FormatFlag: u8 {
    /// `ExtendedHeader`/`BasicHeader` carries a meaningful game-code prefix.
    const HAS_CODE_PREFIX = 1 << 0;
    /// The identifier set's `trace_id` is populated.
    const HAS_TRACE_ID = 1 << 1;
    /// The identifier set's `cart_id` is populated.
    const HAS_CART_ID = 1 << 2;
    /// The identifier set's `install_id` is populated.
    const HAS_INSTALL_ID = 1 << 3;
    /// The identifier set's `system_id` is populated.
    const HAS_SYSTEM_ID = 1 << 4;
    /// A public identifier set precedes the private one (ZS01 layout, or
    /// the ROM-header's MD5 signature gate).
    const HAS_PUBLIC_SECTION = 1 << 5;
    /// Checksum/signature bytes are bitwise-inverted from the plain sum.
    const CHECKSUM_INVERTED = 1 << 6;
    /// GX706's header byte mastering bug (see [`extended`]).
    const GX706_WORKAROUND = 1 << 7;
  }
}

/// Which algorithm (if any) populates `IdentifierSet::trace_id`, and with
/// what parameter. Carried by catalog entries for newly-provisioned carts;
/// read-side parsing never needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceIdKind {
  /// No trace ID; `update_trace_id` is a no-op.
  #[default]
  None,
  /// A fixed, content-independent 7-byte pattern.
  Tid81,
  /// A parity-style checksum over the cart ID, big-endian.
  Tid82BigEndian,
  /// Same checksum, little-endian.
  Tid82LittleEndian,
}

/// Up to four identifiers embedded in a header's private section (spec
/// §3/§4.5). 32 bytes packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdentifierSet {
  pub trace_id: Identifier,
  pub cart_id: Identifier,
  pub install_id: Identifier,
  pub system_id: Identifier,
}

impl IdentifierSet {
  pub const SIZE: usize = 32;

  pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> IdentifierSet {
    let mut set = IdentifierSet::default();
    set.trace_id.data.copy_from_slice(&bytes[0..8]);
    set.cart_id.data.copy_from_slice(&bytes[8..16]);
    set.install_id.data.copy_from_slice(&bytes[16..24]);
    set.system_id.data.copy_from_slice(&bytes[24..32]);
    set
  }

  pub fn to_bytes(&self) -> [u8; Self::SIZE] {
    let mut out = [0u8; Self::SIZE];
    out[0..8].copy_from_slice(&self.trace_id.data);
    out[8..16].copy_from_slice(&self.cart_id.data);
    out[16..24].copy_from_slice(&self.install_id.data);
    out[24..32].copy_from_slice(&self.system_id.data);
    out
  }

  /// Which of the four identifiers are non-empty, as [`FormatFlag`] bits.
  pub fn flags(&self) -> FormatFlag {
    let mut flags = FormatFlag::empty();
    flags.set(FormatFlag::HAS_TRACE_ID, !self.trace_id.is_empty());
    flags.set(FormatFlag::HAS_CART_ID, !self.cart_id.is_empty());
    flags.set(FormatFlag::HAS_INSTALL_ID, !self.install_id.is_empty());
    flags.set(FormatFlag::HAS_SYSTEM_ID, !self.system_id.is_empty());
    flags
  }

  /// Sets `install_id` to `[prefix, 0, 0, 0, 0, 0, 0, checksum]`.
  pub fn set_install_id(&mut self, prefix: u8) {
    self.install_id = Identifier::default();
    self.install_id.data[0] = prefix;
    self.install_id.update_checksum();
  }

  /// Recomputes `trace_id` from `cart_id` (or `cart_id_override` if given).
  /// Mirrors the reference firmware's `IdentifierSet::updateTraceID`: the
  /// family byte and trailing checksum byte of the source identifier are
  /// skipped, only the 6 serial bytes feed the computation.
  pub fn update_trace_id(
    &mut self,
    kind: TraceIdKind,
    param: u8,
    cart_id_override: Option<&Identifier>,
  ) {
    self.trace_id = Identifier::default();
    if kind == TraceIdKind::None {
      return;
    }

    let source = match cart_id_override {
      Some(id) => id.data,
      None => self.cart_id.data,
    };
    let input = &source[1..7];

    match kind {
      TraceIdKind::None => unreachable!(),
      TraceIdKind::Tid81 => {
        self.trace_id.data[0] = 0x81;
        self.trace_id.data[2] = 5;
        self.trace_id.data[5] = 7;
        self.trace_id.data[6] = 3;
      }
      TraceIdKind::Tid82BigEndian | TraceIdKind::Tid82LittleEndian => {
        let mut checksum: u16 = 0;
        for (i, &byte) in input.iter().enumerate() {
          let base = i * 8;
          let mut value = byte;
          for j in 0..8u32 {
            if value & 1 != 0 {
              checksum ^= 1 << ((base as u32 + j) % param as u32);
            }
            value >>= 1;
          }
        }

        self.trace_id.data[0] = 0x82;
        if kind == TraceIdKind::Tid82BigEndian {
          self.trace_id.data[1] = (checksum >> 8) as u8;
          self.trace_id.data[2] = (checksum & 0xff) as u8;
        } else {
          self.trace_id.data[1] = (checksum & 0xff) as u8;
          self.trace_id.data[2] = (checksum >> 8) as u8;
        }
      }
    }

    self.trace_id.update_checksum();
  }
}

/// The subset of [`IdentifierSet`] visible in a format's public section
/// (ZS01 layout: install + system only, no trace/cart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublicIdentifierSet {
  pub install_id: Identifier,
  pub system_id: Identifier,
}

impl PublicIdentifierSet {
  pub const SIZE: usize = 16;

  pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> PublicIdentifierSet {
    let mut set = PublicIdentifierSet::default();
    set.install_id.data.copy_from_slice(&bytes[0..8]);
    set.system_id.data.copy_from_slice(&bytes[8..16]);
    set
  }

  pub fn to_bytes(&self) -> [u8; Self::SIZE] {
    let mut out = [0u8; Self::SIZE];
    out[0..8].copy_from_slice(&self.install_id.data);
    out[8..16].copy_from_slice(&self.system_id.data);
    out
  }

  pub fn flags(&self) -> FormatFlag {
    let mut flags = FormatFlag::empty();
    flags.set(FormatFlag::HAS_INSTALL_ID, !self.install_id.is_empty());
    flags.set(FormatFlag::HAS_SYSTEM_ID, !self.system_id.is_empty());
    flags
  }

  pub fn set_install_id(&mut self, prefix: u8) {
    self.install_id = Identifier::default();
    self.install_id.data[0] = prefix;
    self.install_id.update_checksum();
  }
}

/// A format parser bound to a particular [`Dump`] and [`FormatFlag`] set
/// (spec §4.5/§4.6). Tagged-variant dispatch, matching [`crate::chip::ChipDriver`]'s
/// approach to the same vtable-replacement problem (spec §9).
pub enum Parser<'a> {
  Simple(SimpleParser<'a>),
  Basic(BasicParser<'a>),
  Extended(ExtendedParser<'a>),
}

impl<'a> Parser<'a> {
  /// Builds the parser matching `format`, forcing the flags each dialect
  /// always carries (`Simple` always has a public section; `Extended`
  /// always has a code prefix).
  pub fn new(dump: &'a mut Dump, format: CartFormat, flags: FormatFlag) -> Option<Parser<'a>> {
    match format {
      CartFormat::None => None,
      CartFormat::Simple => {
        Some(Parser::Simple(SimpleParser::new(dump, flags | FormatFlag::HAS_PUBLIC_SECTION)))
      }
      CartFormat::Basic => Some(Parser::Basic(BasicParser::new(dump, flags))),
      CartFormat::Extended => {
        Some(Parser::Extended(ExtendedParser::new(dump, flags | FormatFlag::HAS_CODE_PREFIX)))
      }
    }
  }

  pub fn format(&self) -> CartFormat {
    match self {
      Parser::Simple(_) => CartFormat::Simple,
      Parser::Basic(_) => CartFormat::Basic,
      Parser::Extended(_) => CartFormat::Extended,
    }
  }

  pub fn flags(&self) -> FormatFlag {
    match self {
      Parser::Simple(p) => p.flags,
      Parser::Basic(p) => p.flags,
      Parser::Extended(p) => p.flags,
    }
  }

  pub fn get_code(&self, output: &mut [u8; CODE_LENGTH]) -> usize {
    match self {
      Parser::Simple(_) | Parser::Basic(_) => 0,
      Parser::Extended(p) => p.get_code(output),
    }
  }

  pub fn set_code(&mut self, input: &[u8; CODE_LENGTH]) {
    match self {
      Parser::Simple(_) => {}
      Parser::Basic(p) => p.set_code(input),
      Parser::Extended(p) => p.set_code(input),
    }
  }

  pub fn get_region(&self, output: &mut [u8; REGION_MAX_LENGTH]) -> usize {
    match self {
      Parser::Simple(p) => p.get_region(output),
      Parser::Basic(p) => p.get_region(output),
      Parser::Extended(p) => p.get_region(output),
    }
  }

  pub fn set_region(&mut self, input: &[u8]) {
    match self {
      Parser::Simple(p) => p.set_region(input),
      Parser::Basic(p) => p.set_region(input),
      Parser::Extended(p) => p.set_region(input),
    }
  }

  pub fn get_year(&self) -> u16 {
    match self {
      Parser::Simple(_) | Parser::Basic(_) => 0,
      Parser::Extended(p) => p.get_year(),
    }
  }

  pub fn set_year(&mut self, value: u16) {
    if let Parser::Extended(p) = self {
      p.set_year(value);
    }
  }

  pub fn get_identifiers(&self) -> Option<IdentifierSet> {
    match self {
      Parser::Simple(_) => None,
      Parser::Basic(p) => Some(p.get_identifiers()),
      Parser::Extended(p) => p.get_identifiers(),
    }
  }

  pub fn set_identifiers(&mut self, set: &IdentifierSet) {
    match self {
      Parser::Simple(_) => {}
      Parser::Basic(p) => p.set_identifiers(set),
      Parser::Extended(p) => p.set_identifiers(set),
    }
  }

  pub fn get_public_identifiers(&self) -> Option<PublicIdentifierSet> {
    match self {
      Parser::Simple(_) | Parser::Basic(_) => None,
      Parser::Extended(p) => p.get_public_identifiers(),
    }
  }

  pub fn flush(&mut self) {
    match self {
      Parser::Simple(_) => {}
      Parser::Basic(p) => p.flush(),
      Parser::Extended(p) => p.flush(),
    }
  }

  pub fn validate(&self) -> bool {
    match self {
      Parser::Simple(p) => p.validate(),
      Parser::Basic(p) => p.validate(),
      Parser::Extended(p) => p.validate(),
    }
  }
}

/// Offset of a format's header within [`Dump::data`]: the public data
/// offset, which in every chip this crate supports is always 0 (spec §3's
/// `ChipKind::sizes`), kept symbolic so a future chip with a nonzero
/// offset doesn't require touching every parser.
pub(crate) fn public_data_offset(dump: &Dump) -> usize {
  dump.chip_kind.sizes().1
}

/// Common region-grammar gate every parser's `validate` runs first (spec
/// §4.5: "`validate` requires region to pass the grammar").
pub(crate) fn validate_region(region: &[u8]) -> bool {
  let len = region.iter().position(|&b| b == 0).unwrap_or(region.len());
  let region = &region[..len];
  if region.len() < REGION_MIN_LENGTH {
    crate::log::debug!("region is too short");
    return false;
  }
  if !is_valid_region(region) {
    crate::log::debug!("invalid region");
    return false;
  }
  true
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cart_format_wire_roundtrip() {
    for f in [CartFormat::None, CartFormat::Simple, CartFormat::Basic, CartFormat::Extended] {
      assert_eq!(CartFormat::from_wire(f.to_wire()), Some(f));
    }
  }

  #[test]
  fn identifier_set_roundtrips_through_bytes() {
    let mut set = IdentifierSet::default();
    set.cart_id.data = [1, 2, 3, 4, 5, 6, 7, 8];
    set.system_id.data = [9, 8, 7, 6, 5, 4, 3, 2];
    let bytes = set.to_bytes();
    assert_eq!(IdentifierSet::from_bytes(&bytes), set);
  }

  #[test]
  fn identifier_set_flags_reflect_emptiness() {
    let mut set = IdentifierSet::default();
    assert_eq!(set.flags(), FormatFlag::empty());
    set.cart_id.data[0] = 1;
    assert_eq!(set.flags(), FormatFlag::HAS_CART_ID);
  }

  #[test]
  fn trace_id_81_is_content_independent() {
    let mut set = IdentifierSet::default();
    set.cart_id.data = [1, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 2];
    set.update_trace_id(TraceIdKind::Tid81, 0, None);
    assert_eq!(set.trace_id.data[0], 0x81);
    assert!(set.trace_id.validate_checksum());
  }

  #[test]
  fn trace_id_82_endianness_swaps_bytes() {
    let mut a = IdentifierSet::default();
    a.cart_id.data = [1, 11, 22, 33, 44, 55, 66, 2];
    let mut b = a;
    a.update_trace_id(TraceIdKind::Tid82BigEndian, 16, None);
    b.update_trace_id(TraceIdKind::Tid82LittleEndian, 16, None);
    assert_eq!(a.trace_id.data[1], b.trace_id.data[2]);
    assert_eq!(a.trace_id.data[2], b.trace_id.data[1]);
  }
}
