//! Bit-banged bus primitives: a Dallas 1-Wire line (DS2401 ROM ID chips, one
//! on the system board and one per cartridge) and an I²C-like line shared by
//! all three security EEPROM kinds.
//!
//! Every function here is timing-exact and, where noted, masks interrupts
//! for its duration (spec: "Interrupt masking is scoped: acquired before any
//! 1-Wire reset, released on every exit path"). Without the `hw` feature
//! only the line/constant types are compiled, so host tools that never talk
//! to real hardware (format identification, catalog lookup) can still link
//! this crate; see [`crate::sync::disable_irqs`] for the masking primitive
//! used underneath.

use crate::sync::disable_irqs;

/// Which physical 1-Wire line a DS2401 transaction targets.
///
/// The system board and every cartridge each carry their own DS2401; one
/// driver routine serves both; only the line differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneWireLine {
  /// The DS2401 soldered to the System 573 main board.
  System,
  /// The DS2401 (if present) on the inserted cartridge.
  Cart,
}

/// 32-bit probe response identifying an X76F041 on [`i2c_reset_x76`].
pub const PROBE_X76F041: u32 = 0x55aa_5519;
/// 32-bit probe response identifying an X76F100 on [`i2c_reset_x76`].
pub const PROBE_X76F100: u32 = 0x55aa_0019;
/// 32-bit probe response identifying a ZS01 on [`i2c_reset_zs01`].
pub const PROBE_ZS01: u32 = 0x5a53_0001;

#[cfg(feature = "hw")]
pub mod hw {
  //! Real MMIO register definitions for the bit-banged bus.
  //!
  //! System 573 exposes its security cartridge over the PS1 expansion port
  //! (`cartio.cpp` includes `ps1/system.h`); the cart bus lines are muxed
  //! onto a single byte-wide port register in that address range. The exact
  //! offsets were not present in any recovered source file, so the
  //! addresses below are placeholders pinned to the expansion-port base —
  //! see `DESIGN.md` for the open question this leaves and what to verify
  //! against real hardware before trusting a build with `hw` enabled.

  use voladdress::{Safe, VolAddress};

  /// Bit-banged bus port: bit 0 is 1-Wire data, bit 1 is I²C SDA, bit 2 is
  /// I²C SCL, bit 3 is cartridge chip-select.
  pub const BUS_PORT: VolAddress<u8, Safe, Safe> = unsafe { VolAddress::new(0x1f00_0000) };
  /// IRQ mask register used by [`crate::critical_section`].
  pub const IRQ_MASK: VolAddress<u16, Safe, Safe> = unsafe { VolAddress::new(0x1f00_0004) };

  const BIT_1WIRE: u8 = 1 << 0;
  const BIT_SDA: u8 = 1 << 1;
  const BIT_SCL: u8 = 1 << 2;
  const BIT_CS: u8 = 1 << 3;

  pub(super) fn set_1wire(level: bool) {
    let v = BUS_PORT.read();
    BUS_PORT.write(if level { v | BIT_1WIRE } else { v & !BIT_1WIRE });
  }
  pub(super) fn get_1wire() -> bool {
    BUS_PORT.read() & BIT_1WIRE != 0
  }
  pub(super) fn set_sda(level: bool) {
    let v = BUS_PORT.read();
    BUS_PORT.write(if level { v | BIT_SDA } else { v & !BIT_SDA });
  }
  pub(super) fn get_sda() -> bool {
    BUS_PORT.read() & BIT_SDA != 0
  }
  pub(super) fn set_scl(level: bool) {
    let v = BUS_PORT.read();
    BUS_PORT.write(if level { v | BIT_SCL } else { v & !BIT_SCL });
  }
  pub(super) fn set_cs(level: bool) {
    let v = BUS_PORT.read();
    BUS_PORT.write(if level { v | BIT_CS } else { v & !BIT_CS });
  }

  /// Busy-waits for approximately `us` microseconds.
  ///
  /// There is no free-running hardware counter recovered from
  /// `original_source/`, so this loops a calibrated spin count instead of
  /// reading a timer register; `X76_WRITE_DELAY`/`ZS01_PACKET_DELAY` are
  /// conservative floors regardless (spec §6), so overshoot here is safe,
  /// undershoot is not.
  pub fn delay_us(us: u32) {
    const SPINS_PER_US: u32 = 33;
    let mut total = us.saturating_mul(SPINS_PER_US);
    while total > 0 {
      core::hint::spin_loop();
      total -= 1;
    }
  }
}

#[cfg(feature = "hw")]
use hw::*;
#[cfg(feature = "hw")]
pub use hw::delay_us;

/// Emits a 1-Wire reset/presence pulse and reports whether a device
/// answered. Masks interrupts for the duration (bus-timing regions are
/// uninterruptible, spec §5).
#[cfg(feature = "hw")]
pub fn one_wire_reset(_line: OneWireLine) -> bool {
  disable_irqs(|| {
    set_1wire(false);
    delay_us(480);
    set_1wire(true);
    delay_us(70);
    let present = !get_1wire();
    delay_us(410);
    present
  })
}

/// Reads one LSB-first byte from the 1-Wire line.
#[cfg(feature = "hw")]
pub fn one_wire_read_byte(_line: OneWireLine) -> u8 {
  let mut byte = 0u8;
  for bit in 0..8 {
    set_1wire(false);
    delay_us(6);
    set_1wire(true);
    delay_us(9);
    if get_1wire() {
      byte |= 1 << bit;
    }
    delay_us(55);
  }
  byte
}

/// Writes one LSB-first byte to the 1-Wire line.
#[cfg(feature = "hw")]
pub fn one_wire_write_byte(_line: OneWireLine, value: u8) {
  for bit in 0..8 {
    let level = value & (1 << bit) != 0;
    set_1wire(false);
    delay_us(if level { 6 } else { 60 });
    set_1wire(true);
    delay_us(if level { 64 } else { 10 });
  }
}

/// I²C-like start condition.
#[cfg(feature = "hw")]
pub fn i2c_start() {
  set_sda(true);
  set_scl(true);
  set_sda(false);
  set_scl(false);
}

/// Start condition with the cartridge chip-select asserted first.
#[cfg(feature = "hw")]
pub fn i2c_start_with_cs() {
  set_cs(true);
  i2c_start();
}

/// I²C-like stop condition.
#[cfg(feature = "hw")]
pub fn i2c_stop() {
  set_sda(false);
  set_scl(true);
  set_sda(true);
}

/// Stop condition that also releases chip-select, after an optional delay
/// (used by the X76 drivers between `STOP` and the next command, spec
/// §5 suspension point 3).
#[cfg(feature = "hw")]
pub fn i2c_stop_with_cs(delay_us_after: u32) {
  i2c_stop();
  if delay_us_after > 0 {
    delay_us(delay_us_after);
  }
  set_cs(false);
}

/// Writes one byte MSB-first, returning whether the slave ACKed.
#[cfg(feature = "hw")]
pub fn i2c_write_byte(value: u8) -> bool {
  for bit in (0..8).rev() {
    set_sda(value & (1 << bit) != 0);
    set_scl(true);
    set_scl(false);
  }
  set_sda(true);
  set_scl(true);
  let ack = !get_sda();
  set_scl(false);
  ack
}

/// Reads one byte MSB-first, sending an ACK bit afterward.
#[cfg(feature = "hw")]
pub fn i2c_read_byte() -> u8 {
  let mut byte = 0u8;
  set_sda(true);
  for _ in 0..8 {
    set_scl(true);
    byte = (byte << 1) | get_sda() as u8;
    set_scl(false);
  }
  set_sda(false);
  set_scl(true);
  set_scl(false);
  byte
}

/// Writes a run of bytes, stopping and returning `false` on the first
/// missing ACK (spec §4.1: "`write_bytes` returns false on first missing
/// ACK").
#[cfg(feature = "hw")]
pub fn i2c_write_bytes(data: &[u8]) -> bool {
  for &byte in data {
    if !i2c_write_byte(byte) {
      return false;
    }
  }
  true
}

/// Reads a run of bytes into `out`, ACKing every byte but the last.
#[cfg(feature = "hw")]
pub fn i2c_read_bytes(out: &mut [u8]) {
  for byte in out.iter_mut() {
    *byte = i2c_read_byte();
  }
}

/// Resets the bus and probes for an X76-family chip, returning the 32-bit
/// identifier reported ([`PROBE_X76F041`] / [`PROBE_X76F100`] / neither).
#[cfg(feature = "hw")]
pub fn i2c_reset_x76() -> u32 {
  i2c_start_with_cs();
  let mut id = [0u8; 4];
  i2c_read_bytes(&mut id);
  i2c_stop_with_cs(0);
  u32::from_be_bytes(id)
}

/// Resets the bus and probes for a ZS01, returning the 32-bit identifier
/// reported ([`PROBE_ZS01`] or something else).
#[cfg(feature = "hw")]
pub fn i2c_reset_zs01() -> u32 {
  i2c_start_with_cs();
  let mut id = [0u8; 4];
  i2c_read_bytes(&mut id);
  i2c_stop_with_cs(0);
  u32::from_be_bytes(id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn probe_constants_match_spec() {
    assert_eq!(PROBE_X76F041, 0x55aa_5519);
    assert_eq!(PROBE_X76F100, 0x55aa_0019);
    assert_eq!(PROBE_ZS01, 0x5a53_0001);
  }
}
