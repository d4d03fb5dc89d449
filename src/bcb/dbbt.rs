//! The Discovered Bad Block Table.
//!
//! On flash, a DBBT slot is two sparse pages: a header page identifying the
//! table, and (only when there is anything to list) an entry page holding the
//! bad block indices, a fixed page stride into the slot.

use deku::prelude::*;

use super::scan::ScanReport;
use crate::error::FlashError;
use crate::flash::alloc_buffer;
use crate::geometry::BcbGeometry;

/// The bad erase blocks the boot ROM must skip, in discovery order.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Dbbt {
    /// Pages occupied by the bad-block entry area.
    pub size: u32,

    /// Bad block indices, in the order the scan found them.
    pub bad_blocks: Vec<u32>,
}

impl Dbbt {
    /// Assemble a table from a list of bad blocks.
    ///
    /// Refuses a list larger than the table capacity; the table is never
    /// silently truncated.
    pub fn build(geometry: &BcbGeometry, blocks: &[u32]) -> Result<Self, FlashError> {
        if blocks.len() > geometry.bad_block_limit {
            return Err(FlashError::CapacityExceeded {
                found: blocks.len(),
                limit: geometry.bad_block_limit,
            });
        }

        Ok(Self {
            size: 1,
            bad_blocks: blocks.to_vec(),
        })
    }

    /// Assemble a table from a scan, refusing an overflowed scan outright:
    /// a device with that many bad blocks is not usable for booting.
    pub fn from_scan(geometry: &BcbGeometry, report: &ScanReport) -> Result<Self, FlashError> {
        if report.overflowed {
            return Err(FlashError::CapacityExceeded {
                found: report.bad_blocks.len(),
                limit: geometry.bad_block_limit,
            });
        }
        Self::build(geometry, &report.indices())
    }

    /// Number of entries in the table.
    pub fn entries_num(&self) -> u32 {
        self.bad_blocks.len() as u32
    }

    /// Whether `block` is listed bad.
    pub fn contains(&self, block: u32) -> bool {
        self.bad_blocks.contains(&block)
    }

    /// The header page image written at the start of each redundant slot.
    pub fn header_page(&self, geometry: &BcbGeometry) -> Result<Vec<u8>, FlashError> {
        let header = DbbtHeader {
            checksum: 0,
            fingerprint: geometry.dbbt_fingerprint,
            version: geometry.bcb_version,
            reserved: 0,
            size: self.size,
        };

        let mut page = alloc_buffer(geometry.page_size)?;
        let bytes = header.to_bytes().unwrap();
        page[..bytes.len()].copy_from_slice(&bytes);
        Ok(page)
    }

    /// The entry page image, or None when the table is empty.
    pub fn entries_page(&self, geometry: &BcbGeometry) -> Result<Option<Vec<u8>>, FlashError> {
        if self.bad_blocks.is_empty() {
            return Ok(None);
        }

        let entries = DbbtEntries {
            reserved: 0,
            entries_num: self.entries_num(),
            bad_block: self.bad_blocks.clone(),
        };

        let mut page = alloc_buffer(geometry.page_size)?;
        let bytes = entries.to_bytes().unwrap();
        page[..bytes.len()].copy_from_slice(&bytes);
        Ok(Some(page))
    }

    /// Rebuild a table from the pages of one slot, verifying the header
    /// magics.
    pub fn parse(geometry: &BcbGeometry, header: &[u8], entries: Option<&[u8]>) -> Option<Self> {
        let (_, header) = DbbtHeader::from_bytes((header, 0)).ok()?;

        if (header.fingerprint, header.version)
            != (geometry.dbbt_fingerprint, geometry.bcb_version)
        {
            return None;
        }

        let bad_blocks = match entries {
            None => Vec::new(),
            Some(buf) => DbbtEntries::from_bytes((buf, 0)).ok()?.1.bad_block,
        };

        Some(Self {
            size: header.size,
            bad_blocks,
        })
    }
}

/// First page of a DBBT slot. The checksum field exists in the format but is
/// left zero; the ROM identifies the table by fingerprint alone.
#[derive(Debug, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct DbbtHeader {
    checksum: u32,
    fingerprint: u32,
    version: u32,
    reserved: u32,
    size: u32,
}

/// The bad-block entry page.
#[derive(Debug, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct DbbtEntries {
    reserved: u32,
    entries_num: u32,
    #[deku(count = "entries_num")]
    bad_block: Vec<u32>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_preserves_order() {
        let geo = BcbGeometry::imx6ull();
        let blocks = [7u32, 3, 11, 4];

        let dbbt = Dbbt::build(&geo, &blocks).unwrap();
        assert_eq!(dbbt.entries_num(), 4);
        assert_eq!(dbbt.bad_blocks, blocks);
        assert_eq!(dbbt.size, 1);

        assert!(dbbt.contains(11));
        assert!(!dbbt.contains(5));
    }

    #[test]
    fn test_build_rejects_overflow() {
        let geo = BcbGeometry {
            bad_block_limit: 3,
            ..BcbGeometry::imx6ull()
        };

        let err = Dbbt::build(&geo, &[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(
            err,
            FlashError::CapacityExceeded { found: 4, limit: 3 }
        ));
    }

    #[test]
    fn test_header_page_layout() {
        let geo = BcbGeometry::imx6ull();
        let dbbt = Dbbt::build(&geo, &[]).unwrap();

        let page = dbbt.header_page(&geo).unwrap();
        assert_eq!(page.len(), geo.page_size);
        assert_eq!(&page[..4], &[0, 0, 0, 0]);
        assert_eq!(&page[4..8], b"DBBT");
        assert_eq!(&page[8..12], &0x0100_0000u32.to_le_bytes());
        assert_eq!(&page[16..20], &1u32.to_le_bytes());

        assert_eq!(dbbt.entries_page(&geo).unwrap(), None);
    }

    #[test]
    fn test_entries_page_layout() {
        let geo = BcbGeometry::imx6ull();
        let dbbt = Dbbt::build(&geo, &[9, 2]).unwrap();

        let page = dbbt.entries_page(&geo).unwrap().unwrap();
        assert_eq!(page.len(), geo.page_size);
        assert_eq!(&page[4..8], &2u32.to_le_bytes());
        assert_eq!(&page[8..12], &9u32.to_le_bytes());
        assert_eq!(&page[12..16], &2u32.to_le_bytes());
    }

    #[test]
    fn test_parse_roundtrip() {
        let geo = BcbGeometry::imx6ull();
        let dbbt = Dbbt::build(&geo, &[5, 8, 13]).unwrap();

        let header = dbbt.header_page(&geo).unwrap();
        let entries = dbbt.entries_page(&geo).unwrap();
        assert_eq!(Dbbt::parse(&geo, &header, entries.as_deref()), Some(dbbt));

        // A header carrying the wrong magic is not a table.
        let mut bogus = header.clone();
        bogus[4] = 0;
        assert_eq!(Dbbt::parse(&geo, &bogus, None), None);
    }
}
