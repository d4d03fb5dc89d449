//! The boot control blocks read by the NAND boot ROM.
//!
//! Before any firmware or filesystem exists, the ROM looks for two structures
//! at fixed offsets: the Firmware Configuration Block (FCB), which tells it
//! the NAND timing, the ECC layout, and where the firmware images start, and
//! the Discovered Bad Block Table (DBBT), which lists the erase blocks it
//! must skip. Both are written in several redundant copies so a single failed
//! block cannot brick the device.

mod dbbt;
mod fcb;
mod scan;
mod write;

pub use dbbt::Dbbt;
pub use fcb::{Fcb, FirmwareSlots, FCB_LEN};
pub use scan::{scan_range, BadBlock, BadBlockCause, ScanReport};
pub use write::{write_dbbt, write_fcb};

/// The integrity value embedded in each boot control block: a wrapping byte
/// sum, complemented. Purely a corruption detector; it carries no
/// cryptographic weight.
pub fn bcb_checksum(data: &[u8]) -> u32 {
    !data
        .iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(u32::from(byte)))
}

#[test]
fn test_checksum_known_values() {
    assert_eq!(bcb_checksum(&[]), 0xFFFF_FFFF);
    assert_eq!(bcb_checksum(&[1, 2, 3]), !6u32);
    assert_eq!(bcb_checksum(&[0xFF; 4]), !(4 * 0xFF));
}

#[test]
fn test_checksum_deterministic_complement() {
    let buffers: [&[u8]; 3] = [&[], &[0x00, 0x80, 0xFF], &[0xAA; 300]];
    for buf in buffers {
        let sum = bcb_checksum(buf);
        assert_eq!(sum, bcb_checksum(buf));
        assert_eq!(sum.wrapping_add(!sum), 0xFFFF_FFFF);
    }
}

#[test]
fn test_checksum_wraps() {
    // Enough 0xFF bytes to overflow a u32 accumulator several times over.
    let buf = vec![0xFFu8; 0x0300_0000];
    let total = 0xFFu32.wrapping_mul(0x0300_0000);
    assert_eq!(bcb_checksum(&buf), !total);
}
