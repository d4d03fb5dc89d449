//! The boot-ROM layout description shared by every component.
//!
//! The boot ROM expects the control blocks at fixed offsets derived from a
//! handful of layout constants. They are carried in one immutable value that
//! callers pass into the scanner, the builders, and the writers, so the same
//! code can be pointed at a different boot-ROM geometry without edits.

/// A pub-fields struct describing where the boot control blocks live on NAND
/// and which magics identify them.
#[derive(Debug, Copy, Clone)]
pub struct BcbGeometry {
    /// Bytes in the data area of one NAND page.
    pub page_size: usize,

    /// Bytes in one raw page: the data area plus the out-of-band area.
    pub raw_page_size: usize,

    /// Pages per erase block.
    pub pages_per_block: u32,

    /// How many redundant copies of each boot control block are written.
    pub bcb_sets: u32,

    /// Capacity of the bad block table. A device with more bad blocks than
    /// this is not usable for booting.
    pub bad_block_limit: usize,

    /// Raw-space byte address of the first FCB copy.
    pub fcb_offset: u64,

    /// Page index of the first DBBT copy.
    pub dbbt_start_page: u32,

    /// Page index, within a DBBT slot, of the bad-block entry area.
    pub dbbt_entries_page: u32,

    /// Byte offset of the bad-block marker within a raw page: the first
    /// out-of-band byte.
    pub marker_offset: usize,

    /// Magic identifying an FCB.
    pub fcb_fingerprint: u32,

    /// Magic identifying a DBBT.
    pub dbbt_fingerprint: u32,

    /// Format revision shared by both control blocks.
    pub bcb_version: u32,
}

impl BcbGeometry {
    /// The layout the i.MX6ULL boot ROM is hardwired for.
    pub const fn imx6ull() -> Self {
        Self {
            page_size: 4096,
            raw_page_size: 4320,
            pages_per_block: 64,
            bcb_sets: 4,
            bad_block_limit: 256,
            fcb_offset: 0,
            dbbt_start_page: 0x100,
            dbbt_entries_page: 4,
            marker_offset: 4096,
            fcb_fingerprint: 0x2042_4346,
            dbbt_fingerprint: 0x5442_4244,
            bcb_version: 0x0100_0000,
        }
    }

    /// Bytes in the data area of one erase block.
    pub fn block_bytes(&self) -> u64 {
        u64::from(self.pages_per_block) * self.page_size as u64
    }

    /// Bytes in one raw erase block, out-of-band areas included.
    pub fn raw_block_bytes(&self) -> u64 {
        u64::from(self.pages_per_block) * self.raw_page_size as u64
    }

    /// Raw-space address of the first page of `block`.
    pub fn raw_block_address(&self, block: u32) -> u64 {
        u64::from(block) * self.raw_block_bytes()
    }

    /// Data-space address of the first DBBT slot.
    pub fn dbbt_base(&self) -> u64 {
        u64::from(self.dbbt_start_page) * self.page_size as u64
    }

    /// Byte offset of the bad-block entry page within a DBBT slot.
    pub fn dbbt_entries_offset(&self) -> u64 {
        u64::from(self.dbbt_entries_page) * self.page_size as u64
    }

    /// Smallest target able to hold every redundant DBBT copy.
    pub fn min_dbbt_size(&self) -> u64 {
        self.dbbt_base() + u64::from(self.bcb_sets) * self.block_bytes()
    }
}

impl Default for BcbGeometry {
    fn default() -> Self {
        Self::imx6ull()
    }
}

#[test]
fn test_derived_addresses() {
    let geo = BcbGeometry::imx6ull();
    assert_eq!(geo.block_bytes(), 64 * 4096);
    assert_eq!(geo.raw_block_bytes(), 64 * 4320);
    assert_eq!(geo.raw_block_address(2), 2 * 64 * 4320);
    assert_eq!(geo.dbbt_base(), 0x100 * 4096);
    assert_eq!(geo.dbbt_entries_offset(), 4 * 4096);
    assert_eq!(geo.min_dbbt_size(), 0x100 * 4096 + 4 * 64 * 4096);
}
