//! Format auto-detection: try a fixed, most-complex-first candidate list of
//! `(CartFormat, FormatFlag)` pairs against a dump's data and return the
//! first one whose parser validates (spec §4.6).
//!
//! The reference firmware declares its table least-complex-first and walks
//! it backwards to try the most complex entry first; this crate writes each
//! table directly in try-order (most complex first) and walks it forwards
//! instead, for the same effective order. The order is load-bearing since a
//! simpler dialect's header can validate by coincidence against data that
//! was actually written in a more complex one.

use crate::catalog::CatalogStore;
use crate::dump::Dump;
use crate::format::{CartFormat, FormatFlag, Parser, CODE_LENGTH, REGION_MAX_LENGTH};

/// One row of the candidate table: `(format, flags)`.
type Candidate = (CartFormat, FormatFlag);

const fn basic(flags: FormatFlag) -> Candidate {
  (CartFormat::Basic, flags)
}

const fn extended(flags: FormatFlag) -> Candidate {
  (CartFormat::Extended, flags)
}

/// The canonical cartridge-data candidate list, most complex first. Must be
/// preserved bit-for-bit: this order is what resolves format ambiguity
/// between games (spec §4.6).
const CART_CANDIDATES: &[Candidate] = &[
  extended(
    FormatFlag::HAS_CODE_PREFIX
      .union(FormatFlag::HAS_TRACE_ID)
      .union(FormatFlag::HAS_CART_ID)
      .union(FormatFlag::HAS_INSTALL_ID)
      .union(FormatFlag::HAS_SYSTEM_ID)
      .union(FormatFlag::HAS_PUBLIC_SECTION)
      .union(FormatFlag::CHECKSUM_INVERTED),
  ),
  extended(FormatFlag::HAS_CODE_PREFIX.union(FormatFlag::GX706_WORKAROUND)),
  extended(FormatFlag::HAS_CODE_PREFIX),
  extended(FormatFlag::HAS_CODE_PREFIX.union(FormatFlag::CHECKSUM_INVERTED)),
  basic(
    FormatFlag::HAS_CODE_PREFIX
      .union(FormatFlag::HAS_TRACE_ID)
      .union(FormatFlag::HAS_CART_ID)
      .union(FormatFlag::HAS_INSTALL_ID)
      .union(FormatFlag::HAS_SYSTEM_ID)
      .union(FormatFlag::CHECKSUM_INVERTED),
  ),
  basic(
    FormatFlag::HAS_CODE_PREFIX
      .union(FormatFlag::HAS_TRACE_ID)
      .union(FormatFlag::HAS_CART_ID)
      .union(FormatFlag::CHECKSUM_INVERTED),
  ),
  basic(FormatFlag::HAS_TRACE_ID.union(FormatFlag::HAS_CART_ID).union(FormatFlag::CHECKSUM_INVERTED)),
  basic(FormatFlag::HAS_CART_ID.union(FormatFlag::CHECKSUM_INVERTED)),
  basic(FormatFlag::HAS_TRACE_ID.union(FormatFlag::CHECKSUM_INVERTED)),
  basic(FormatFlag::CHECKSUM_INVERTED),
  (CartFormat::Simple, FormatFlag::HAS_PUBLIC_SECTION),
];

/// The ROM-header candidate list: only `Extended` ever applies, since the
/// on-board flash header was never written in `Simple`/`Basic` form. Most
/// complex first, same as [`CART_CANDIDATES`].
const ROM_HEADER_CANDIDATES: &[Candidate] = &[
  extended(FormatFlag::HAS_CODE_PREFIX.union(FormatFlag::HAS_SYSTEM_ID).union(FormatFlag::CHECKSUM_INVERTED)),
  extended(FormatFlag::HAS_CODE_PREFIX.union(FormatFlag::GX706_WORKAROUND)),
  extended(FormatFlag::HAS_CODE_PREFIX.union(FormatFlag::CHECKSUM_INVERTED)),
  extended(FormatFlag::HAS_CODE_PREFIX),
];

fn try_candidates(dump: &mut Dump, candidates: &[Candidate]) -> Option<Candidate> {
  for &(format, flags) in candidates.iter() {
    let Some(parser) = Parser::new(dump, format, flags) else {
      continue;
    };
    if parser.validate() {
      crate::log::debug!("identified as format={:?} flags={:?}", format, flags);
      return Some((format, flags));
    }
  }
  crate::log::debug!("unrecognized data format");
  None
}

/// Tries every candidate in [`CART_CANDIDATES`] against `dump`'s data,
/// returning the `(format, flags)` of the first that validates.
pub fn identify_cart_format(dump: &mut Dump) -> Option<Candidate> {
  try_candidates(dump, CART_CANDIDATES)
}

/// Tries every candidate in [`ROM_HEADER_CANDIDATES`] against `dump`'s data.
pub fn identify_rom_header_format(dump: &mut Dump) -> Option<Candidate> {
  try_candidates(dump, ROM_HEADER_CANDIDATES)
}

/// Full identification pipeline for a cartridge dump (spec §4.6): detect a
/// format, and if the detected parser exposes a game code (only `Extended`
/// does; `Basic`/`Simple` return an empty code and are skipped), resolve it
/// against `catalog` and rebuild the parser from the matched entry's
/// `(format, flags)` so future `flush` calls emit the game's exact expected
/// layout rather than whichever equally-valid candidate happened to match
/// first. Returns the final parser alongside the matched catalog entry, if
/// any, so a caller (see [`crate::app::AppCore::identify_cart`]) doesn't
/// have to look it up a second time.
pub fn identify_cart<'d, 'c>(
  dump: &'d mut Dump,
  catalog: Option<&CatalogStore<'c>>,
) -> Option<(Parser<'d>, Option<&'c crate::catalog::CatalogEntry>)> {
  let (format, flags) = identify_cart_format(dump)?;

  let mut matched = None;
  if let Some(catalog) = catalog {
    let mut code = [0u8; CODE_LENGTH];
    let mut region = [0u8; REGION_MAX_LENGTH];
    let (code_len, region_len) = {
      let parser = Parser::new(dump, format, flags)?;
      (parser.get_code(&mut code), parser.get_region(&mut region))
    };

    if code_len > 0 && region_len > 0 {
      matched = catalog.lookup(&code, &region);
    }
  }

  let (format, flags) = match matched {
    Some(entry) => (entry.format, entry.flags),
    None => (format, flags),
  };

  Some((Parser::new(dump, format, flags)?, matched))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dump::ChipKind;

  fn fresh(kind: ChipKind) -> Dump {
    let mut dump = Dump::new();
    dump.chip_kind = kind;
    dump
  }

  #[test]
  fn identifies_simple_format() {
    let mut dump = fresh(ChipKind::X76F041);
    {
      let mut p = Parser::new(&mut dump, CartFormat::Simple, FormatFlag::empty()).unwrap();
      p.set_region(b"US");
      p.flush();
    }
    let (format, _) = identify_cart_format(&mut dump).unwrap();
    assert_eq!(format, CartFormat::Simple);
  }

  #[test]
  fn identifies_extended_over_basic_when_both_could_match() {
    let mut dump = fresh(ChipKind::Zs01);
    {
      let mut p = Parser::new(&mut dump, CartFormat::Extended, FormatFlag::empty()).unwrap();
      p.set_region(b"US");
      p.set_code(b"GE884");
      p.flush();
    }
    let (format, _) = identify_cart_format(&mut dump).unwrap();
    assert_eq!(format, CartFormat::Extended);
  }

  #[test]
  fn unrecognized_data_returns_none() {
    let mut dump = fresh(ChipKind::X76F041);
    dump.data[0..dump.chip_kind.data_length().max(8)].fill(0x42);
    assert!(identify_cart_format(&mut dump).is_none());
  }

  #[test]
  fn most_complex_extended_candidate_is_not_shadowed_by_a_simpler_one() {
    // CART_CANDIDATES[0] (every ID/public-section flag set, checksum
    // inverted) and CART_CANDIDATES[3] (just HAS_CODE_PREFIX +
    // CHECKSUM_INVERTED) validate identically under `ExtendedParser::validate`,
    // since it only checks the region and checksum, not which ID/public-
    // section flags are set. Trying candidates in any order but
    // most-complex-first would match index 3 first and silently drop the
    // public section and ID flags on a subsequent flush.
    let full_flags = FormatFlag::HAS_CODE_PREFIX
      .union(FormatFlag::HAS_TRACE_ID)
      .union(FormatFlag::HAS_CART_ID)
      .union(FormatFlag::HAS_INSTALL_ID)
      .union(FormatFlag::HAS_SYSTEM_ID)
      .union(FormatFlag::HAS_PUBLIC_SECTION)
      .union(FormatFlag::CHECKSUM_INVERTED);

    let mut dump = fresh(ChipKind::Zs01);
    {
      let mut p = Parser::new(&mut dump, CartFormat::Extended, full_flags).unwrap();
      p.set_region(b"US");
      p.set_code(b"GE884");
      p.flush();
    }

    let (format, flags) = identify_cart_format(&mut dump).unwrap();
    assert_eq!(format, CartFormat::Extended);
    assert_eq!(flags, full_flags);
  }

  #[test]
  fn checksum_inverted_candidate_is_distinguished_from_plain() {
    // The checksum law makes the plain and ChecksumInverted candidates
    // mutually exclusive for any given header (a stored checksum can equal
    // either `sum` or `sum ^ 0xffff`, never both), so this also guards the
    // §4.6 ordering property: trying ChecksumInverted first never produces
    // a false positive against data actually written without it.
    let mut dump = fresh(ChipKind::Zs01);
    {
      let mut p = Parser::new(
        &mut dump,
        CartFormat::Extended,
        FormatFlag::HAS_CODE_PREFIX | FormatFlag::CHECKSUM_INVERTED,
      )
      .unwrap();
      p.set_region(b"US");
      p.set_code(b"GE884");
      p.flush();
    }
    let (format, flags) = identify_cart_format(&mut dump).unwrap();
    assert_eq!(format, CartFormat::Extended);
    assert!(flags.contains(FormatFlag::CHECKSUM_INVERTED));
  }

  #[test]
  fn catalog_match_rebuilds_parser_with_entrys_exact_flags() {
    use crate::catalog::{CatalogEntry, CatalogStore};

    let mut dump = fresh(ChipKind::Zs01);
    {
      // Written with a plain, idless Extended header.
      let mut p = Parser::new(&mut dump, CartFormat::Extended, FormatFlag::empty()).unwrap();
      p.set_region(b"US");
      p.set_code(b"GE884");
      p.flush();
    }

    let mut entry = CatalogEntry {
      game_code: [0; crate::catalog::CODE_FIELD_LENGTH],
      region: [0; crate::catalog::REGION_FIELD_LENGTH],
      chip_kind: ChipKind::Zs01,
      format: CartFormat::Extended,
      flags: FormatFlag::HAS_CODE_PREFIX | FormatFlag::HAS_PUBLIC_SECTION,
      trace_id_kind: crate::format::TraceIdKind::None,
      trace_id_param: 0,
      install_id_prefix: 0,
      year: 1999,
      data_key: [0; 8],
      display_name: [0; crate::catalog::NAME_FIELD_LENGTH],
    };
    entry.game_code[..5].copy_from_slice(b"GE884");
    entry.region[..2].copy_from_slice(b"US");
    let entries = [entry];
    let store = CatalogStore::new(&entries);

    let (parser, matched) = identify_cart(&mut dump, Some(&store)).unwrap();
    assert!(matched.is_some());
    assert_eq!(parser.flags(), entry.flags);
  }

  #[test]
  fn basic_format_has_no_code_so_catalog_is_never_consulted() {
    let mut dump = fresh(ChipKind::X76F041);
    {
      let mut p = Parser::new(&mut dump, CartFormat::Basic, FormatFlag::CHECKSUM_INVERTED).unwrap();
      p.set_region(b"JA");
      p.flush();
    }
    let (parser, matched) = identify_cart(&mut dump, None).unwrap();
    assert_eq!(parser.format(), CartFormat::Basic);
    assert!(matched.is_none());
    let mut code = [0u8; CODE_LENGTH];
    assert_eq!(parser.get_code(&mut code), 0);
  }
}
