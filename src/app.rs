//! Cross-cutting application state, replacing the reference firmware's
//! file-scope globals for the cart dump, catalog and worker status (spec §9
//! "Global mutable state to eliminate"). A host owns one [`AppCore`] and
//! passes it by reference to every subsystem, instead of each module
//! reaching into a singleton.

use crate::catalog::{CatalogEntry, CatalogStore};
use crate::chip::{CartError, ChipDriver};
use crate::dump::Dump;
use crate::format::{Parser, CODE_LENGTH, REGION_MAX_LENGTH};
use crate::identify;

/// Which named stage of a cartridge worker (spec §5's cooperative worker
/// model; named after `cartworkers.cpp`'s `cartDetectWorker`/
/// `cartUnlockWorker`/`cartWriteWorker`/`cartEraseWorker` message sequence)
/// is currently running.
///
/// This crate has no event loop of its own to drive these transitions — a
/// host owns `AppCore` and advances it by calling the matching method, then
/// reads [`AppCore::status`] to update its own UI. The suspension points
/// enumerated in spec §5 (ACK-poll delays, ZS01 packet delays) happen
/// inside [`crate::chip::ChipDriver`]'s `hw`-gated methods themselves;
/// nothing here models a scheduler, only which logical stage is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerStage {
  /// No cartridge operation in flight.
  #[default]
  Idle,
  /// Probing the DSR line and chip-select resets for a chip kind.
  DetectingCart,
  /// Reading the system-board and/or cartridge DS2401.
  ReadingCartId,
  /// Reading the unlocked-free public data section.
  ReadingPublicData,
  /// Running format identification and catalog lookup.
  IdentifyingGame,
  /// Reading the key-gated private data section.
  ReadingPrivateData,
  /// Writing the private data section.
  WritingData,
  /// Replacing the chip's data key.
  SettingDataKey,
  /// Erasing the chip back to its factory (all-zero-key) state.
  Erasing,
}

/// A snapshot of worker progress (spec §5: "progress counters... worker-
/// status flags [are] touched by the worker only; the loop reads snapshots
/// without locks"). `AppCore` updates this after every stage; a host loop
/// only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStatus {
  /// The stage that most recently ran (or is running).
  pub stage: WorkerStage,
  /// The error from that stage, if it failed. Cleared at the start of each
  /// new stage.
  pub error: Option<CartError>,
}

impl WorkerStatus {
  /// Whether no operation has run yet.
  pub fn is_idle(&self) -> bool {
    self.stage == WorkerStage::Idle
  }

  /// Whether the most recent stage ended in an error.
  pub fn failed(&self) -> bool {
    self.error.is_some()
  }
}

/// The top-level, host-owned value every subsystem is threaded through:
/// the active driver, the in-flight dump, a borrowed catalog table (if
/// loaded), the catalog entry a cart was last identified as (if any), and
/// the current worker stage.
pub struct AppCore<'a> {
  /// The currently selected chip driver (`Null` until a cart is detected).
  pub driver: ChipDriver,
  /// The dump being read from, or written to.
  pub dump: Dump,
  /// The loaded catalog table for `dump.chip_kind`, if any.
  pub catalog: Option<CatalogStore<'a>>,
  /// The catalog entry the current dump was last identified as, if any.
  pub identified: Option<&'a CatalogEntry>,
  /// The current worker stage and its last result.
  pub status: WorkerStatus,
}

impl<'a> AppCore<'a> {
  /// An idle core with no driver, no cart and no catalog loaded.
  pub fn new() -> AppCore<'a> {
    AppCore {
      driver: ChipDriver::Null,
      dump: Dump::new(),
      catalog: None,
      identified: None,
      status: WorkerStatus::default(),
    }
  }

  /// An idle core with a catalog table already loaded (spec: `cartDB` is
  /// loaded once and reused across detect cycles).
  pub fn with_catalog(catalog: CatalogStore<'a>) -> AppCore<'a> {
    AppCore { catalog: Some(catalog), ..AppCore::new() }
  }

  /// Resets per-cart state before a new detect cycle, mirroring
  /// `App::_unloadCartData`. Does not touch the loaded catalog table.
  pub fn unload_cart_data(&mut self) {
    self.driver = ChipDriver::Null;
    self.dump.clear();
    self.identified = None;
    self.status = WorkerStatus::default();
  }

  fn begin_stage(&mut self, stage: WorkerStage) {
    self.status.stage = stage;
    self.status.error = None;
  }

  fn finish_stage(&mut self, result: Result<(), CartError>) -> Result<(), CartError> {
    self.status.error = result.err();
    result
  }

  /// Runs the factory probe and adopts whatever it returns, resetting the
  /// dump's `chip_kind` to match (spec §4.3 "driver selection").
  #[cfg(feature = "hw")]
  pub fn detect_cart(&mut self, dsr_asserted: bool) {
    self.begin_stage(WorkerStage::DetectingCart);
    self.driver = ChipDriver::detect(dsr_asserted);
    self.dump.chip_kind = self.driver.chip_kind();
  }

  /// Reads every identifier the active driver exposes: the system-board
  /// DS2401 (every driver, via the shared base routine) and the cart-side
  /// identifier (X76 DS2401 or ZS01 internal serial).
  #[cfg(feature = "hw")]
  pub fn read_cart_ids(&mut self) -> Result<(), CartError> {
    self.begin_stage(WorkerStage::ReadingCartId);
    let result =
      self.driver.read_system_id(&mut self.dump).and_then(|_| self.driver.read_cart_id(&mut self.dump));
    self.finish_stage(result)
  }

  /// Reads the unlocked-free public data section, if this chip kind has one.
  #[cfg(feature = "hw")]
  pub fn read_public_data(&mut self) -> Result<(), CartError> {
    self.begin_stage(WorkerStage::ReadingPublicData);
    let result = self.driver.read_public_data(&mut self.dump);
    self.finish_stage(result)
  }

  /// Reads the key-gated private data section with the dump's current
  /// `data_key`.
  #[cfg(feature = "hw")]
  pub fn read_private_data(&mut self) -> Result<(), CartError> {
    self.begin_stage(WorkerStage::ReadingPrivateData);
    let result = self.driver.read_private_data(&mut self.dump);
    self.finish_stage(result)
  }

  /// Writes the dump's private data section to the chip.
  #[cfg(feature = "hw")]
  pub fn write_data(&mut self) -> Result<(), CartError> {
    self.begin_stage(WorkerStage::WritingData);
    let result = self.driver.write_data(&self.dump);
    self.finish_stage(result)
  }

  /// Erases the chip, resetting its stored key to all-zero (spec S4: a
  /// subsequent `read_private_data` with the pre-erase key must then fail).
  #[cfg(feature = "hw")]
  pub fn erase(&mut self) -> Result<(), CartError> {
    self.begin_stage(WorkerStage::Erasing);
    let result = self.driver.erase(&mut self.dump);
    self.finish_stage(result)
  }

  /// Replaces the chip's data key.
  #[cfg(feature = "hw")]
  pub fn set_data_key(&mut self, new_key: &[u8; 8]) -> Result<(), CartError> {
    self.begin_stage(WorkerStage::SettingDataKey);
    let result = self.driver.set_data_key(&mut self.dump, new_key);
    self.finish_stage(result)
  }

  /// The host-testable identification step of `cartDetectWorker`/
  /// `cartUnlockWorker` (spec §4.6): runs once `self.dump.data` holds
  /// whatever was read, independent of actual hardware access. Mirrors the
  /// reference's `if (!isReadableDataEmpty()) ... if (getCode && getRegion)
  /// identified = cartDB.lookup(...)` gate, then rebuilds the parser from
  /// the matched entry so a later `flush` emits the exact expected layout.
  /// Returns whether a recognized format was found at all (a format match
  /// without a catalog entry still counts).
  pub fn identify_cart(&mut self) -> bool {
    self.begin_stage(WorkerStage::IdentifyingGame);
    self.identified = None;

    if self.dump.is_data_empty() {
      return false;
    }

    let Some((parser, matched)) = identify::identify_cart(&mut self.dump, self.catalog.as_ref()) else {
      return false;
    };
    drop(parser);
    self.identified = matched;
    true
  }

  /// The resolved game code and region of the current identification, if
  /// any (only meaningful for `CartFormat::Extended`; spec §4.5).
  pub fn identified_code_and_region(
    &mut self,
  ) -> Option<([u8; CODE_LENGTH], [u8; REGION_MAX_LENGTH])> {
    let (format, flags) = self.identified.map(|e| (e.format, e.flags))?;
    let parser = Parser::new(&mut self.dump, format, flags)?;

    let mut code = [0u8; CODE_LENGTH];
    let mut region = [0u8; REGION_MAX_LENGTH];
    parser.get_code(&mut code);
    parser.get_region(&mut region);
    Some((code, region))
  }
}

impl<'a> Default for AppCore<'a> {
  fn default() -> Self {
    AppCore::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::{CODE_FIELD_LENGTH, NAME_FIELD_LENGTH, REGION_FIELD_LENGTH};
  use crate::dump::ChipKind;
  use crate::format::{CartFormat, FormatFlag, TraceIdKind};

  fn entry(code: &[u8], region: &[u8]) -> CatalogEntry {
    let mut e = CatalogEntry {
      game_code: [0; CODE_FIELD_LENGTH],
      region: [0; REGION_FIELD_LENGTH],
      chip_kind: ChipKind::Zs01,
      format: CartFormat::Extended,
      flags: FormatFlag::HAS_CODE_PREFIX,
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

  #[test]
  fn fresh_core_is_idle_with_no_driver() {
    let core = AppCore::new();
    assert!(core.status.is_idle());
    assert_eq!(core.driver.chip_kind(), ChipKind::None);
  }

  #[test]
  fn unload_cart_data_resets_identification() {
    let mut core = AppCore::new();
    core.dump.chip_kind = ChipKind::X76F041;
    core.status.stage = WorkerStage::ReadingPrivateData;
    core.unload_cart_data();
    assert!(core.status.is_idle());
    assert_eq!(core.dump.chip_kind, ChipKind::None);
  }

  #[test]
  fn identify_cart_on_empty_data_finds_nothing() {
    let mut core = AppCore::new();
    core.dump.chip_kind = ChipKind::X76F041;
    assert!(!core.identify_cart());
    assert!(core.identified.is_none());
  }

  #[test]
  fn identify_cart_matches_catalog_and_rebuilds_parser() {
    let entries = [entry(b"GE884", b"US")];
    let store = CatalogStore::new(&entries);
    let mut core = AppCore::with_catalog(store);
    core.dump.chip_kind = ChipKind::Zs01;

    {
      let mut p = Parser::new(&mut core.dump, CartFormat::Extended, FormatFlag::empty()).unwrap();
      p.set_region(b"US");
      p.set_code(b"GE884");
      p.flush();
    }

    assert!(core.identify_cart());
    assert!(core.identified.is_some());

    let (code, region) = core.identified_code_and_region().unwrap();
    assert_eq!(&code, b"GE884");
    assert_eq!(&region[..2], b"US");
  }
}
