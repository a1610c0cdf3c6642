//! Per-chip command sequencing, polling and error mapping for the three
//! security EEPROMs (spec §4.3).
//!
//! The reference firmware dispatches through a driver base class with one
//! override per concrete chip. Rust has no vtables without heap allocation,
//! and the candidate set is closed and small, so [`ChipDriver`] is a tagged
//! enum dispatched by `match` instead (spec §9: "the former preserves cache
//! locality and avoids heap allocation; prefer it").

pub mod x76f041;

use crate::bus::OneWireLine;
use crate::dump::{ChipKind, Dump, DumpFlag};

/// Every way a chip transaction can fail (spec §4.3/§7). `UnsupportedOp` is
/// never surfaced to the user; it's a pre-check signal the UI uses to hide
/// an action the current driver doesn't implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CartError {
  /// The active driver does not implement this capability.
  UnsupportedOp,
  /// A DS2401 reset pulse went unanswered.
  Ds2401NoResp,
  /// A DS2401 ID was read but failed its CRC-8 check.
  Ds2401IdError,
  /// An X76 command byte went unACKed.
  X76Nack,
  /// ACK polling exceeded `X76_MAX_ACK_POLLS` (spec: "the canonical 'wrong
  /// key' signal").
  X76PollFail,
  /// A write succeeded but the chip's content didn't match on verify.
  X76VerifyFail,
  /// A ZS01 request packet went unACKed at the bus level.
  Zs01Nack,
  /// The ZS01 rejected the request; carries the raw response code
  /// (0x01..0x05). Codes 0x02/0x03/0x05 are undocumented upstream and kept
  /// opaque (spec §9 Open Questions).
  Zs01Error(u8),
  /// A ZS01 response packet failed its CRC-16 check.
  Zs01CrcMismatch,
}

/// Where a driver currently sits in the per-chip lifecycle (spec §4.3
/// "State machine"). A failed transition leaves the driver in its prior
/// state; only the Dump's flag bits record which sub-reads succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
  /// No chip was detected, or the DSR line was deasserted.
  Absent,
  /// The factory probe matched a chip kind.
  Detected,
  /// `read_system_id`/`read_cart_id` succeeded.
  IdRead,
  /// `read_public_data` succeeded (no key required).
  PublicRead,
  /// `read_private_data` succeeded with the supplied key.
  Unlocked,
  /// `write_data` succeeded.
  Written,
  /// `erase` succeeded; the chip's data key is now all-zero.
  Erased,
}

/// Timing constants, in microseconds (spec §6). These are conservative
/// floors; shortening the ZS01 delays is known to corrupt the data key and
/// soft-brick the cart, so drivers must not reduce them.
pub mod timing {
  /// Maximum ACK-poll attempts in `_x76_command` before `X76PollFail`.
  pub const X76_MAX_ACK_POLLS: u32 = 5;
  /// Delay between ACK-poll attempts and after a write's stop condition.
  pub const X76_WRITE_DELAY_US: u32 = 12_000;
  /// Delay before every `_x76Command` packet.
  pub const X76_PACKET_DELAY_US: u32 = 12_000;
  /// Delay while sending a ZS01 request packet.
  pub const ZS01_SEND_DELAY_US: u32 = 100_000;
  /// Delay before every ZS01 transaction.
  pub const ZS01_PACKET_DELAY_US: u32 = 300_000;
}

/// A driver, dispatched by tag, over the capability set
/// `{read_system_id, read_cart_id, read_public_data, read_private_data,
/// write_data, erase, set_data_key}`. Capabilities a concrete kind doesn't
/// implement return `UnsupportedOp` (spec: "notably X76F100 stubs
/// everything except ID reads").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipDriver {
  /// No cartridge (DSR deasserted, or neither probe matched).
  Null,
  /// Xicor X76F041.
  X76F041,
  /// Xicor X76F100: documented stub, no production carts exist.
  X76F100,
  /// Konami ZS01, tracking its running scrambler state.
  Zs01 {
    /// The chaining byte threaded through consecutive transactions; a new
    /// driver starts with the documented reset value.
    scrambler_state: u8,
  },
}

impl ChipDriver {
  /// A freshly-constructed ZS01 driver, scrambler state at its initial
  /// value (primer used by the first transaction).
  pub fn new_zs01() -> ChipDriver {
    ChipDriver::Zs01 { scrambler_state: 0xff }
  }

  /// The [`ChipKind`] this driver instance targets.
  pub fn chip_kind(&self) -> ChipKind {
    match self {
      ChipDriver::Null => ChipKind::None,
      ChipDriver::X76F041 => ChipKind::X76F041,
      ChipDriver::X76F100 => ChipKind::X76F100,
      ChipDriver::Zs01 { .. } => ChipKind::Zs01,
    }
  }
}

#[cfg(feature = "hw")]
mod hw_impl {
  use super::*;
  use crate::bus;
  use crate::cipher::zs01 as cipher;

  fn read_ds2401(line: OneWireLine, out: &mut [u8; 8]) -> Result<(), CartError> {
    if !bus::one_wire_reset(line) {
      return Err(CartError::Ds2401NoResp);
    }
    bus::one_wire_write_byte(line, 0x33);
    for byte in out.iter_mut() {
      *byte = bus::one_wire_read_byte(line);
    }
    Ok(())
  }

  impl ChipDriver {
    /// Reads the System 573 main-board DS2401. Shared by every concrete
    /// driver (spec: "CartDriver base class supplies read_system_id").
    pub fn read_system_id(&self, dump: &mut Dump) -> Result<(), CartError> {
      dump.flags.insert(DumpFlag::HAS_SYSTEM_ID);
      let mut id = [0u8; 8];
      read_ds2401(OneWireLine::System, &mut id)?;
      dump.system_id.data = id;
      if !dump.system_id.validate_ds_crc() {
        return Err(CartError::Ds2401IdError);
      }
      dump.flags.insert(DumpFlag::SYSTEM_ID_OK);
      Ok(())
    }

    /// Reads the cartridge-side identifier: a DS2401 for X76 carts, or the
    /// ZS01's own `readID`/`readInternalID` pair for ZS01 carts (spec §2
    /// supplemented feature).
    pub fn read_cart_id(&mut self, dump: &mut Dump) -> Result<(), CartError> {
      match self {
        ChipDriver::Null | ChipDriver::X76F100 => Err(CartError::UnsupportedOp),
        ChipDriver::X76F041 => {
          dump.flags.insert(DumpFlag::HAS_CART_ID);
          let mut id = [0u8; 8];
          read_ds2401(OneWireLine::Cart, &mut id)?;
          dump.cart_id.data = id;
          if !dump.cart_id.validate_ds_crc() {
            return Err(CartError::Ds2401IdError);
          }
          dump.flags.insert(DumpFlag::CART_ID_OK);
          Ok(())
        }
        ChipDriver::Zs01 { scrambler_state } => {
          let mut zs = [0u8; 8];
          zs01_read(scrambler_state, cipher::address::ZS_ID, &mut zs, None)?;
          dump.zs_id.data = zs;
          if !dump.zs_id.validate_ds_crc() {
            return Err(CartError::Ds2401IdError);
          }
          dump.flags.insert(DumpFlag::ZS_ID_OK);

          let mut cart = [0u8; 8];
          zs01_read(scrambler_state, cipher::address::DS2401_ID, &mut cart, None)?;
          dump.cart_id.data = cart;
          if !dump.cart_id.validate_ds_crc() {
            return Err(CartError::Ds2401IdError);
          }
          dump.flags.insert(DumpFlag::HAS_CART_ID | DumpFlag::CART_ID_OK);
          Ok(())
        }
      }
    }

    /// Reads the unlocked-free public data section, if this kind has one.
    pub fn read_public_data(&mut self, dump: &mut Dump) -> Result<(), CartError> {
      match self {
        ChipDriver::Null | ChipDriver::X76F041 | ChipDriver::X76F100 => {
          Err(CartError::UnsupportedOp)
        }
        ChipDriver::Zs01 { scrambler_state } => {
          for addr in cipher::address::PUBLIC..(cipher::address::PUBLIC + 4) {
            let mut block = [0u8; 8];
            zs01_read(scrambler_state, addr, &mut block, None)?;
            let off = addr as usize * 8;
            dump.data[off..off + 8].copy_from_slice(&block);
          }
          dump.flags.insert(DumpFlag::PUBLIC_DATA_OK);
          Ok(())
        }
      }
    }

    /// Reads the key-gated private data section.
    pub fn read_private_data(&mut self, dump: &mut Dump) -> Result<(), CartError> {
      match self {
        ChipDriver::Null | ChipDriver::X76F100 => Err(CartError::UnsupportedOp),
        ChipDriver::X76F041 => {
          for base in (0..512usize).step_by(128) {
            x76f041::x76_command(
              &dump.data_key,
              x76f041::READ | ((base >> 8) as u8),
              (base & 0xff) as u8,
              x76f041::ACK_POLL,
            )?;
            bus::i2c_read_byte();
            bus::i2c_start();
            if !bus::i2c_write_byte((base & 0xff) as u8) {
              bus::i2c_stop_with_cs(0);
              return Err(CartError::X76Nack);
            }
            bus::i2c_read_bytes(&mut dump.data[base..base + 128]);
            bus::i2c_stop_with_cs(0);
          }

          x76f041::x76_command(&dump.data_key, x76f041::CONFIG, x76f041::CFG_READ_CONFIG, x76f041::ACK_POLL)?;
          bus::i2c_read_byte();
          bus::i2c_start();
          if !bus::i2c_write_byte(0) {
            bus::i2c_stop_with_cs(0);
            return Err(CartError::X76Nack);
          }
          let mut config = [0u8; 5];
          bus::i2c_read_bytes(&mut config);
          bus::i2c_stop_with_cs(0);
          dump.config[..5].copy_from_slice(&config);

          dump.flags.insert(DumpFlag::PRIVATE_DATA_OK);
          Ok(())
        }
        ChipDriver::Zs01 { scrambler_state } => {
          let key = cipher::Key::unpack(&dump.data_key);
          for addr in cipher::address::PRIVATE..(cipher::address::PRIVATE + 10) {
            let mut block = [0u8; 8];
            zs01_read(scrambler_state, addr, &mut block, Some(&key))?;
            let off = addr as usize * 8;
            dump.data[off..off + 8].copy_from_slice(&block);
          }
          dump.flags.insert(DumpFlag::PRIVATE_DATA_OK);

          let mut config = [0u8; 8];
          zs01_read(scrambler_state, cipher::address::CONFIG, &mut config, Some(&key))?;
          dump.config = config;
          dump.flags.insert(DumpFlag::CONFIG_OK);
          Ok(())
        }
      }
    }

    /// Writes `dump.data` back to the chip.
    pub fn write_data(&mut self, dump: &Dump) -> Result<(), CartError> {
      match self {
        ChipDriver::Null | ChipDriver::X76F100 => Err(CartError::UnsupportedOp),
        ChipDriver::X76F041 => {
          for base in (0..512usize).step_by(8) {
            x76f041::x76_command(
              &dump.data_key,
              x76f041::WRITE | ((base >> 8) as u8),
              (base & 0xff) as u8,
              x76f041::ACK_POLL,
            )?;
            if !bus::i2c_write_bytes(&dump.data[base..base + 8]) {
              bus::i2c_stop_with_cs(timing::X76_WRITE_DELAY_US);
              return Err(CartError::X76Nack);
            }
            bus::i2c_stop_with_cs(timing::X76_WRITE_DELAY_US);
          }

          x76f041::x76_command(&dump.data_key, x76f041::CONFIG, x76f041::CFG_WRITE_CONFIG, x76f041::ACK_POLL)?;
          if !bus::i2c_write_bytes(&dump.config) {
            bus::i2c_stop_with_cs(timing::X76_WRITE_DELAY_US);
            return Err(CartError::X76Nack);
          }
          bus::i2c_stop_with_cs(timing::X76_WRITE_DELAY_US);
          Ok(())
        }
        ChipDriver::Zs01 { scrambler_state } => {
          let key = cipher::Key::unpack(&dump.data_key);
          for addr in cipher::address::PRIVATE..(cipher::address::PRIVATE + 10) {
            let off = addr as usize * 8;
            let mut block = [0u8; 8];
            block.copy_from_slice(&dump.data[off..off + 8]);
            zs01_write(scrambler_state, addr, block, Some(&key))?;
          }
          Ok(())
        }
      }
    }

    /// Resets the chip to its factory-erased state. The data key becomes
    /// all-zero on success (spec: "the chip default").
    pub fn erase(&mut self, dump: &mut Dump) -> Result<(), CartError> {
      match self {
        ChipDriver::Null | ChipDriver::X76F100 => Err(CartError::UnsupportedOp),
        ChipDriver::X76F041 => {
          x76f041::x76_command(&dump.data_key, x76f041::CONFIG, x76f041::CFG_MASS_PROGRAM, x76f041::ACK_POLL)?;
          bus::i2c_stop_with_cs(timing::X76_WRITE_DELAY_US);
          dump.data_key = [0; 8];
          Ok(())
        }
        ChipDriver::Zs01 { scrambler_state } => {
          let key = cipher::Key::unpack(&dump.data_key);
          zs01_write(scrambler_state, cipher::address::DS2401_ID, [0; 8], Some(&key))?;
          dump.data_key = [0; 8];
          Ok(())
        }
      }
    }

    /// Replaces the data key. Only on success is the Dump's in-memory key
    /// updated (spec §4.3).
    pub fn set_data_key(&mut self, dump: &mut Dump, new_key: &[u8; 8]) -> Result<(), CartError> {
      match self {
        ChipDriver::Null | ChipDriver::X76F100 => Err(CartError::UnsupportedOp),
        ChipDriver::X76F041 => {
          x76f041::x76_command(&dump.data_key, x76f041::CONFIG, x76f041::CFG_SET_DATA_KEY, x76f041::ACK_POLL)?;
          // The chip requires the new key sent twice back-to-back.
          for _ in 0..2 {
            if !bus::i2c_write_bytes(new_key) {
              bus::i2c_stop_with_cs(timing::X76_WRITE_DELAY_US);
              return Err(CartError::X76Nack);
            }
          }
          bus::i2c_stop_with_cs(timing::X76_WRITE_DELAY_US);
          dump.data_key = *new_key;
          Ok(())
        }
        ChipDriver::Zs01 { scrambler_state } => {
          let old_key = cipher::Key::unpack(&dump.data_key);
          zs01_write(scrambler_state, cipher::address::DATA_KEY, *new_key, Some(&old_key))?;
          dump.data_key = *new_key;
          Ok(())
        }
      }
    }
  }

  fn zs01_read(
    scrambler_state: &mut u8,
    address: u8,
    out: &mut [u8; 8],
    key: Option<&cipher::Key>,
  ) -> Result<(), CartError> {
    bus::delay_us(timing::ZS01_PACKET_DELAY_US);
    let mut packet = cipher::Packet::read_request(address);
    let wire = packet.encode(key.map(|k| (k, *scrambler_state)));

    bus::i2c_start();
    if !bus::i2c_write_bytes(&wire) {
      bus::i2c_stop();
      return Err(CartError::Zs01Nack);
    }
    let mut response_wire = [0u8; 12];
    bus::i2c_read_bytes(&mut response_wire);
    bus::i2c_stop();

    let response = cipher::Packet::decode(response_wire).ok_or(CartError::Zs01CrcMismatch)?;
    *scrambler_state = response.address;
    if !cipher::ResponseCode(response.command).is_ok() {
      return Err(CartError::Zs01Error(response.command));
    }
    *out = response.data;
    Ok(())
  }

  fn zs01_write(
    scrambler_state: &mut u8,
    address: u8,
    data: [u8; 8],
    key: Option<&cipher::Key>,
  ) -> Result<(), CartError> {
    bus::delay_us(timing::ZS01_PACKET_DELAY_US);
    let mut packet = cipher::Packet::write_request(address, data);
    let wire = packet.encode(key.map(|k| (k, *scrambler_state)));

    bus::i2c_start();
    if !bus::i2c_write_bytes(&wire) {
      bus::i2c_stop();
      return Err(CartError::Zs01Nack);
    }
    let mut response_wire = [0u8; 12];
    bus::i2c_read_bytes(&mut response_wire);
    bus::i2c_stop();

    let response = cipher::Packet::decode(response_wire).ok_or(CartError::Zs01CrcMismatch)?;
    *scrambler_state = response.address;
    if !cipher::ResponseCode(response.command).is_ok() {
      return Err(CartError::Zs01Error(response.command));
    }
    Ok(())
  }

  /// The factory probe (spec §4.3 "Driver selection"). Checks the DSR line,
  /// then tries ZS01 before X76 (matching the reference's probe order).
  pub fn detect(dsr_asserted: bool) -> ChipDriver {
    if !dsr_asserted {
      return ChipDriver::Null;
    }
    let zs01_id = bus::i2c_reset_zs01();
    if zs01_id == bus::PROBE_ZS01 {
      return ChipDriver::new_zs01();
    }
    let x76_id = bus::i2c_reset_x76();
    if x76_id == bus::PROBE_X76F041 {
      return ChipDriver::X76F041;
    }
    if x76_id == bus::PROBE_X76F100 {
      return ChipDriver::X76F100;
    }
    ChipDriver::Null
  }
}

#[cfg(feature = "hw")]
pub use hw_impl::detect;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chip_kind_matches_driver_tag() {
    assert_eq!(ChipDriver::Null.chip_kind(), ChipKind::None);
    assert_eq!(ChipDriver::X76F041.chip_kind(), ChipKind::X76F041);
    assert_eq!(ChipDriver::new_zs01().chip_kind(), ChipKind::Zs01);
  }

  #[test]
  fn zs01_error_carries_raw_code() {
    let err = CartError::Zs01Error(0x03);
    assert_eq!(err, CartError::Zs01Error(0x03));
    assert_ne!(err, CartError::Zs01Error(0x02));
  }
}
