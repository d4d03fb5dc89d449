//! The Firmware Configuration Block, field for field as the boot ROM reads
//! it.
//!
//! Every field is little-endian. Most of the record is a fixed table of NAND
//! timing and ECC tuning values for the target silicon; only the geometry
//! fields, the firmware image locations, and the bad-block-marker policy vary
//! with the layout this tool is pointed at.

use deku::prelude::*;

use super::bcb_checksum;
use crate::geometry::BcbGeometry;

/// Encoded size of the record; pinned by `test_fcb_len`.
pub const FCB_LEN: usize = 284;

/// Start page and page count of the two redundant firmware images the FCB
/// points the boot ROM at.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FirmwareSlots {
    pub fw1_start: u32,
    pub fw1_pages: u32,
    pub fw2_start: u32,
    pub fw2_pages: u32,
}

impl Default for FirmwareSlots {
    fn default() -> Self {
        Self {
            fw1_start: 512,
            fw1_pages: 1,
            fw2_start: 1536,
            fw2_pages: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct Fcb {
    pub checksum: u32,
    pub fingerprint: u32,
    pub version: u32,
    pub data_setup: u8,
    pub data_hold: u8,
    pub address_setup: u8,
    pub dsample_time: u8,
    pub nand_timing_state: u8,
    pub rea: u8,
    pub rloh: u8,
    pub rhoh: u8,
    pub page_size: u32,
    pub total_page_size: u32,
    pub block_size: u32,
    pub nand_number: u32,
    pub die_number: u32,
    pub cell_type: u32,
    pub bn_ecc_type: u32,
    pub b0_ecc_size: u32,
    pub bn_ecc_size: u32,
    pub b0_ecc_type: u32,
    pub meta_size: u32,
    pub ecc_per_page: u32,
    pub bn_ecc_level_sdk: u32,
    pub b0_ecc_size_sdk: u32,
    pub bn_ecc_size_sdk: u32,
    pub b0_ecc_level_sdk: u32,
    pub ecc_per_page_sdk: u32,
    pub meta_size_sdk: u32,
    pub erase_threshold: u32,
    pub padding: [u8; 8],
    pub fw1_start: u32,
    pub fw2_start: u32,
    pub fw1_size: u32,
    pub fw2_size: u32,
    pub dbbt_start: u32,
    pub bbm_offset: u32,
    pub bbm_start: u32,
    pub bbm_phys_offset: u32,
    pub bch_type: u32,
    pub read_latency: u32,
    pub preamble_delay: u32,
    pub ce_delay: u32,
    pub postamble_delay: u32,
    pub cmd_add_pause: u32,
    pub data_pause: u32,
    pub speed: u32,
    pub busy_timeout: u32,
    pub bbm_disabled: u32,
    pub bbm_spare_offset: u32,
    pub onfi_sync_enabled: u32,
    pub onfi_sync_speed: u32,
    pub onfi_sync_nand_data: [u8; 28],
    pub disable_bbm_search: u32,
    pub reserved: [u8; 64],
}

impl Fcb {
    /// Populate a fresh record with the hardware timing table, the layout
    /// from `geometry`, and the firmware image locations, then stamp the
    /// checksum.
    pub fn build(geometry: &BcbGeometry, firmware: &FirmwareSlots) -> Self {
        let mut fcb = Self {
            checksum: 0,
            fingerprint: geometry.fcb_fingerprint,
            version: geometry.bcb_version,
            data_setup: 0x78,
            data_hold: 0x3C,
            address_setup: 0x19,
            dsample_time: 0x6,
            nand_timing_state: 0,
            rea: 0,
            rloh: 0,
            rhoh: 0,
            page_size: geometry.page_size as u32,
            total_page_size: geometry.raw_page_size as u32,
            block_size: geometry.pages_per_block,
            nand_number: 0,
            die_number: 0,
            cell_type: 0,
            bn_ecc_type: 0x7,
            b0_ecc_size: 0,
            bn_ecc_size: 512,
            b0_ecc_type: 0x8,
            meta_size: 0x10,
            ecc_per_page: 8,
            bn_ecc_level_sdk: 0,
            b0_ecc_size_sdk: 0,
            bn_ecc_size_sdk: 0,
            b0_ecc_level_sdk: 0,
            ecc_per_page_sdk: 0,
            meta_size_sdk: 0,
            erase_threshold: 0,
            padding: [0; 8],
            fw1_start: firmware.fw1_start,
            fw2_start: firmware.fw2_start,
            fw1_size: firmware.fw1_pages,
            fw2_size: firmware.fw2_pages,
            dbbt_start: geometry.dbbt_start_page,
            bbm_offset: geometry.marker_offset as u32,
            bbm_start: 0,
            bbm_phys_offset: geometry.marker_offset as u32,
            bch_type: 0,
            read_latency: 0,
            preamble_delay: 0,
            ce_delay: 0,
            postamble_delay: 0,
            cmd_add_pause: 0,
            data_pause: 0,
            speed: 0,
            busy_timeout: 0xFFFF,
            bbm_disabled: 1,
            bbm_spare_offset: 0,
            onfi_sync_enabled: 0,
            onfi_sync_speed: 0,
            onfi_sync_nand_data: [0; 28],
            disable_bbm_search: 1,
            reserved: [0; 64],
        };

        fcb.checksum = fcb.compute_checksum();
        fcb
    }

    /// Recompute the integrity value over everything after the checksum
    /// field.
    ///
    /// The ROM's own routine runs one byte past the record; that byte is
    /// always zero in the page image it reads, so the in-bounds sum here
    /// stamps the same value.
    pub fn compute_checksum(&self) -> u32 {
        let bytes = self.to_bytes().unwrap();
        bcb_checksum(&bytes[std::mem::size_of::<u32>()..])
    }

    /// Does the embedded checksum match the encoded fields?
    pub fn check_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Encoded record bytes, as the ECC encoder consumes them.
    pub fn to_record_bytes(&self) -> Vec<u8> {
        self.to_bytes().unwrap()
    }

    /// Decode a record from the start of `buf`, with fingerprint, version,
    /// and checksum verification.
    pub fn parse(geometry: &BcbGeometry, buf: &[u8]) -> Option<Self> {
        let (_, fcb) = Self::from_bytes((buf, 0)).ok()?;

        if (fcb.fingerprint, fcb.version) != (geometry.fcb_fingerprint, geometry.bcb_version) {
            return None;
        }

        if !fcb.check_checksum() {
            return None;
        }

        Some(fcb)
    }
}

#[test]
fn test_fcb_len() {
    let fcb = Fcb::build(&BcbGeometry::imx6ull(), &FirmwareSlots::default());
    assert_eq!(fcb.to_record_bytes().len(), FCB_LEN);
}

#[test]
fn test_build_stamps_valid_checksum() {
    let fcb = Fcb::build(&BcbGeometry::imx6ull(), &FirmwareSlots::default());
    assert!(fcb.check_checksum());

    let bytes = fcb.to_record_bytes();
    assert_eq!(fcb.checksum, bcb_checksum(&bytes[4..]));
}

#[test]
fn test_checksum_covers_fields() {
    let mut fcb = Fcb::build(&BcbGeometry::imx6ull(), &FirmwareSlots::default());
    fcb.fw1_start += 1;
    assert!(!fcb.check_checksum());
}

#[test]
fn test_parse_roundtrip() {
    let geo = BcbGeometry::imx6ull();
    let fcb = Fcb::build(&geo, &FirmwareSlots::default());

    // The record is parsed back out of a larger page image.
    let mut page = vec![0u8; geo.page_size];
    let bytes = fcb.to_record_bytes();
    page[..bytes.len()].copy_from_slice(&bytes);

    assert_eq!(Fcb::parse(&geo, &page), Some(fcb));
}

#[test]
fn test_parse_rejects_corruption() {
    let geo = BcbGeometry::imx6ull();
    let fcb = Fcb::build(&geo, &FirmwareSlots::default());
    let mut bytes = fcb.to_record_bytes();

    bytes[20] ^= 0xFF;
    assert_eq!(Fcb::parse(&geo, &bytes), None);

    bytes[20] ^= 0xFF;
    assert!(Fcb::parse(&geo, &bytes).is_some());

    // A wrong fingerprint is rejected even with a consistent checksum.
    let mut other = fcb;
    other.fingerprint = 0xDEAD_BEEF;
    other.checksum = other.compute_checksum();
    assert_eq!(Fcb::parse(&geo, &other.to_record_bytes()), None);
}

#[test]
fn test_geometry_fields() {
    let geo = BcbGeometry::imx6ull();
    let fcb = Fcb::build(&geo, &FirmwareSlots::default());
    assert_eq!(fcb.fingerprint, 0x2042_4346);
    assert_eq!(fcb.page_size, 4096);
    assert_eq!(fcb.total_page_size, 4320);
    assert_eq!(fcb.block_size, 64);
    assert_eq!(fcb.dbbt_start, 0x100);
    assert_eq!(fcb.bbm_offset, 4096);
}
