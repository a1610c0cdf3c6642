//! The known-cartridge catalog: an immutable, presorted table of
//! `CatalogEntry` records looked up by `(code, region)` via binary search
//! (spec §4.7).
//!
//! The reference firmware memory-maps this table straight out of a
//! resource file; this crate takes the decoded slice as a borrow instead
//! and leaves loading it from wherever (a flash resource, a host file) to
//! the caller.

use core::cmp::Ordering;

use crate::dump::ChipKind;
use crate::format::{CartFormat, FormatFlag, TraceIdKind, CODE_LENGTH};

/// Fixed width of the `game_code`/`region`/`display_name` fields, matching
/// the reference firmware's packed entry struct.
pub const CODE_FIELD_LENGTH: usize = 8;
/// See [`CODE_FIELD_LENGTH`].
pub const REGION_FIELD_LENGTH: usize = 8;
/// See [`CODE_FIELD_LENGTH`].
pub const NAME_FIELD_LENGTH: usize = 64;

/// `strncmp(a, b, n) == 0` bytewise, treating a read past either slice's end
/// as a `0x00` byte (so a short query still compares correctly against a
/// longer, nul-padded field).
fn strncmp(a: &[u8], b: &[u8], n: usize) -> Ordering {
  for i in 0..n {
    let av = a.get(i).copied().unwrap_or(0);
    let bv = b.get(i).copied().unwrap_or(0);
    match av.cmp(&bv) {
      Ordering::Equal => continue,
      other => return other,
    }
  }
  Ordering::Equal
}

fn trim_len(bytes: &[u8]) -> usize {
  bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len())
}

/// One known-game (or known flash-header) record (spec §3). Entries are
/// immutable once loaded; there is no insert, only [`CatalogStore::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
  /// The game's code, e.g. `b"GE884\0\0\0"` (nul-padded).
  pub game_code: [u8; CODE_FIELD_LENGTH],
  /// The region this entry covers, e.g. `b"US\0\0\0\0\0\0"`. A query region
  /// only needs to start with this (trimmed) prefix to match.
  pub region: [u8; REGION_FIELD_LENGTH],
  /// Which chip this game's cartridge carries.
  pub chip_kind: ChipKind,
  /// The format a freshly-provisioned cart of this game should be written
  /// in, and what [`crate::identify`] should rebuild its parser as once
  /// this entry is matched.
  pub format: CartFormat,
  /// The flag set paired with `format`.
  pub flags: FormatFlag,
  /// Which trace-ID algorithm (if any) a freshly-provisioned cart uses.
  pub trace_id_kind: TraceIdKind,
  /// The parameter passed to [`crate::format::IdentifierSet::update_trace_id`].
  pub trace_id_param: u8,
  /// The byte written as `install_id`'s first byte on a freshly-provisioned
  /// cart (see [`crate::format::IdentifierSet::set_install_id`]).
  pub install_id_prefix: u8,
  /// The year a freshly-provisioned cart's header should carry.
  pub year: u16,
  /// The X76/ZS01 data key this game's carts ship with.
  pub data_key: [u8; 8],
  /// A human-readable name, e.g. `b"DDR Extreme"` (nul-padded).
  pub display_name: [u8; NAME_FIELD_LENGTH],
}

impl CatalogEntry {
  /// Orders `self` against a `(code, region)` query: `Equal` only when the
  /// full (nul-terminated) code matches and `self.region`'s trimmed prefix
  /// matches the start of `region` (spec §4.7).
  fn compare(&self, code: &[u8], region: &[u8]) -> Ordering {
    // +1 so that e.g. "GE88" never matches the entry "GE884": the compared
    // span includes the byte right after the code, which must be nul on
    // both sides for a true match.
    let code_cmp = strncmp(&self.game_code, code, CODE_LENGTH + 1);
    if code_cmp != Ordering::Equal {
      return code_cmp;
    }

    let region_len = trim_len(&self.region);
    strncmp(&self.region[..region_len], region, region_len)
  }

  /// The trimmed (nul-stripped) game code.
  pub fn code(&self) -> &[u8] {
    &self.game_code[..trim_len(&self.game_code)]
  }

  /// The trimmed region this entry covers.
  pub fn region_str(&self) -> &[u8] {
    &self.region[..trim_len(&self.region)]
  }

  /// Formats `"{code} {region}\t{display_name}"` into `out`, truncating if
  /// it doesn't fit, and returns the number of bytes written. Mirrors the
  /// reference firmware's `Entry::getDisplayName`.
  pub fn format_display_name(&self, out: &mut [u8]) -> usize {
    let mut pos = 0;
    let mut push = |data: &[u8], pos: &mut usize| {
      let n = data.len().min(out.len().saturating_sub(*pos));
      out[*pos..*pos + n].copy_from_slice(&data[..n]);
      *pos += n;
    };

    push(self.code(), &mut pos);
    if pos < out.len() {
      out[pos] = b' ';
      pos += 1;
    }
    push(self.region_str(), &mut pos);
    if pos < out.len() {
      out[pos] = b'\t';
      pos += 1;
    }
    let name_len = trim_len(&self.display_name);
    push(&self.display_name[..name_len], &mut pos);

    pos
  }
}

/// A borrowed, presorted catalog table and its binary-search lookup (spec
/// §4.7). The table must already be sorted by `(game_code, region)`
/// ascending; this type never checks or re-sorts it.
pub struct CatalogStore<'a> {
  entries: &'a [CatalogEntry],
}

impl<'a> CatalogStore<'a> {
  /// Wraps an already-sorted slice. Does not validate the ordering; a
  /// malformed table just yields wrong (or missed) lookups, never a panic.
  pub fn new(entries: &'a [CatalogEntry]) -> CatalogStore<'a> {
    CatalogStore { entries }
  }

  /// How many entries this table holds.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether this table holds no entries.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// The entry at `index`, or `None` if out of range. Borrowed from the
  /// backing slice directly (`'a`, not `self`), so callers can hold onto a
  /// match after the `CatalogStore` itself goes out of scope.
  pub fn get(&self, index: usize) -> Option<&'a CatalogEntry> {
    self.entries.get(index)
  }

  /// Binary search by `(code, region)`, per [`CatalogEntry::compare`]'s
  /// region-prefix rule (spec §4.7).
  pub fn lookup(&self, code: &[u8], region: &[u8]) -> Option<&'a CatalogEntry> {
    let mut low = 0usize;
    let mut high = self.entries.len();

    while low < high {
      let mid = low + (high - low) / 2;
      let entry = &self.entries[mid];

      match entry.compare(code, region) {
        Ordering::Equal => {
          crate::log::debug!("catalog entry found at index {}", mid);
          return Some(entry);
        }
        Ordering::Less => low = mid + 1,
        Ordering::Greater => high = mid,
      }
    }

    crate::log::debug!("catalog entry not found");
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(code: &[u8], region: &[u8]) -> CatalogEntry {
    let mut e = CatalogEntry {
      game_code: [0; CODE_FIELD_LENGTH],
      region: [0; REGION_FIELD_LENGTH],
      chip_kind: ChipKind::Zs01,
      format: CartFormat::Extended,
      flags: FormatFlag::empty(),
      trace_id_kind: TraceIdKind::None,
      trace_id_param: 0,
      install_id_prefix: 0,
      year: 2000,
      data_key: [0; 8],
      display_name: [0; NAME_FIELD_LENGTH],
    };
    e.game_code[..code.len()].copy_from_slice(code);
    e.region[..region.len()].copy_from_slice(region);
    e
  }

  fn table() -> [CatalogEntry; 4] {
    [
      entry(b"GC985", b"A"),
      entry(b"GE884", b"JA"),
      entry(b"GE884", b"US"),
      entry(b"GX706", b"EA"),
    ]
  }

  #[test]
  fn finds_exact_match() {
    let entries = table();
    let store = CatalogStore::new(&entries);
    let found = store.lookup(b"GE884", b"US").unwrap();
    assert_eq!(found.code(), b"GE884");
    assert_eq!(found.region_str(), b"US");
  }

  #[test]
  fn region_prefix_matches_longer_query() {
    let entries = table();
    let store = CatalogStore::new(&entries);
    // Entry region "A" should match a 2-char query that starts with it.
    let found = store.lookup(b"GC985", b"AB").unwrap();
    assert_eq!(found.code(), b"GC985");
  }

  #[test]
  fn query_shorter_than_entry_region_does_not_match() {
    let entries = table();
    let store = CatalogStore::new(&entries);
    assert!(store.lookup(b"GE884", b"J").is_none());
  }

  #[test]
  fn code_prefix_never_matches_a_longer_code() {
    let entries = table();
    let store = CatalogStore::new(&entries);
    assert!(store.lookup(b"GE88", b"US").is_none());
  }

  #[test]
  fn missing_code_returns_none() {
    let entries = table();
    let store = CatalogStore::new(&entries);
    assert!(store.lookup(b"ZZ999", b"US").is_none());
  }

  #[test]
  fn gx706_ja_prefix_matches_longer_queries_but_not_shorter() {
    let entries = [entry(b"GX706", b"JA")];
    let store = CatalogStore::new(&entries);
    assert!(store.lookup(b"GX706", b"JA").is_some());
    assert!(store.lookup(b"GX706", b"JAA").is_some());
    assert!(store.lookup(b"GX706", b"JAZ00").is_some());
    assert!(store.lookup(b"GX706", b"J").is_none());
  }

  #[test]
  fn display_name_formats_code_region_name() {
    let mut e = entry(b"GE884", b"US");
    e.display_name[..11].copy_from_slice(b"DDR Extreme");
    let mut buf = [0u8; 32];
    let n = e.format_display_name(&mut buf);
    assert_eq!(&buf[..n], b"GE884 US\tDDR Extreme");
  }
}
