//! X76F041 command bytes and the shared `_x76_command` sequencing helper
//! (spec §4.3/§6). The X76F100 never shipped in production and has no
//! command-formula helper of its own; its driver variant stubs every
//! capability with `UnsupportedOp`.

use super::{timing, CartError};

/// `0x60 | (addr >> 8)`.
pub const READ: u8 = 0x60;
/// `0x40 | (addr >> 8)`.
pub const WRITE: u8 = 0x40;
/// Selects a config sub-operation (key set, config read/write, mass erase).
pub const CONFIG: u8 = 0x80;
/// Poll byte used after every command while waiting for the chip to ACK.
pub const ACK_POLL: u8 = 0xc0;
/// Config sub-operation: replace the data key.
pub const CFG_SET_DATA_KEY: u8 = 0x20;
/// Config sub-operation: read the 8-byte config register.
pub const CFG_READ_CONFIG: u8 = 0x60;
/// Config sub-operation: write the 8-byte config register.
pub const CFG_WRITE_CONFIG: u8 = 0x50;
/// Config sub-operation: mass-erase (spec: "a single CONFIG | MASS_PROGRAM
/// command").
pub const CFG_MASS_PROGRAM: u8 = 0x70;

#[cfg(feature = "hw")]
pub(crate) fn x76_command(
  data_key: &[u8; 8],
  cmd: u8,
  param: u8,
  poll_byte: u8,
) -> Result<(), CartError> {
  use crate::bus;

  bus::delay_us(timing::X76_PACKET_DELAY_US);
  bus::i2c_start_with_cs();

  if !bus::i2c_write_byte(cmd) {
    bus::i2c_stop_with_cs(0);
    return Err(CartError::X76Nack);
  }
  if !bus::i2c_write_byte(param) {
    bus::i2c_stop_with_cs(0);
    return Err(CartError::X76Nack);
  }
  if !bus::i2c_write_bytes(data_key) {
    bus::i2c_stop_with_cs(0);
    return Err(CartError::X76Nack);
  }

  for _ in 0..timing::X76_MAX_ACK_POLLS {
    bus::delay_us(timing::X76_WRITE_DELAY_US);
    bus::i2c_start();
    if bus::i2c_write_byte(poll_byte) {
      return Ok(());
    }
  }

  bus::i2c_stop_with_cs(0);
  Err(CartError::X76PollFail)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn command_bytes_match_spec_table() {
    assert_eq!(READ, 0x60);
    assert_eq!(WRITE, 0x40);
    assert_eq!(CONFIG, 0x80);
    assert_eq!(ACK_POLL, 0xc0);
    assert_eq!(CFG_SET_DATA_KEY, 0x20);
    assert_eq!(CFG_READ_CONFIG, 0x60);
    assert_eq!(CFG_WRITE_CONFIG, 0x50);
    assert_eq!(CFG_MASS_PROGRAM, 0x70);
  }
}
