//! Scanning erase blocks for bad-block markers.
//!
//! A block earns a place in the bad block table two ways: its first
//! out-of-band byte holds something other than 0xFF (the factory or a driver
//! marked it), or the raw read itself fails, which is evidence enough that
//! the block cannot be trusted. Misclassifying a bad block as good lets the
//! ROM boot from media that silently corrupts data later, so every doubt
//! marks the block bad; the cost is only a wasted block.

use crate::flash::FlashService;
use crate::geometry::BcbGeometry;

/// Why a block was classified bad.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum BadBlockCause {
    /// The raw read of the block failed.
    ReadFailed,

    /// The out-of-band marker byte held this value instead of 0xFF.
    Marker(u8),
}

/// One bad block found during a scan.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct BadBlock {
    pub block: u32,
    pub cause: BadBlockCause,
}

/// The outcome of scanning a block range.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Bad blocks, in the order they were found.
    pub bad_blocks: Vec<BadBlock>,

    /// Set when the scan hit the bad-block limit and stopped early. The
    /// remaining blocks were left unscanned and the device must be
    /// considered unusable.
    pub overflowed: bool,
}

impl ScanReport {
    /// The bad block indices alone, still in discovery order.
    pub fn indices(&self) -> Vec<u32> {
        self.bad_blocks.iter().map(|bad| bad.block).collect()
    }
}

/// Read the first raw page of every block in `[start_block, end_block)` and
/// classify the block by its out-of-band marker.
///
/// Read failures are absorbed as bad-block evidence rather than reported; the
/// scan's job is to produce a usable table, not to relay transient errors.
/// Each block appears at most once, under the first cause observed.
pub fn scan_range<S: FlashService + ?Sized>(
    service: &mut S,
    geometry: &BcbGeometry,
    start_block: u32,
    end_block: u32,
) -> ScanReport {
    let rpt = howudoin::new()
        .label("Scanning blocks")
        .set_len(u64::from(end_block.saturating_sub(start_block)));

    let mut report = ScanReport::default();
    for block in start_block..end_block {
        let address = geometry.raw_block_address(block);
        let cause = match service.read_raw(address, geometry.raw_page_size) {
            Err(_) => Some(BadBlockCause::ReadFailed),
            Ok(page) => match page[geometry.marker_offset] {
                0xFF => None,
                marker => Some(BadBlockCause::Marker(marker)),
            },
        };
        rpt.inc();

        let Some(cause) = cause else { continue };
        rpt.add_info(format!("block {block} is marked bad"));
        report.bad_blocks.push(BadBlock { block, cause });

        if report.bad_blocks.len() >= geometry.bad_block_limit {
            rpt.add_info("too many bad blocks, flash is not usable");
            report.overflowed = true;
            break;
        }
    }

    rpt.close();
    report
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flash::SimFlash;

    fn test_geometry() -> BcbGeometry {
        BcbGeometry {
            page_size: 512,
            raw_page_size: 528,
            pages_per_block: 8,
            bad_block_limit: 8,
            marker_offset: 512,
            ..BcbGeometry::imx6ull()
        }
    }

    #[test]
    fn test_scan_finds_marked_blocks() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 4);
        sim.mark_bad(1);
        sim.mark_bad(3);

        let report = scan_range(&mut sim, &geo, 0, 4);
        assert_eq!(report.indices(), [1, 3]);
        assert!(!report.overflowed);
        assert_eq!(report.bad_blocks[0].cause, BadBlockCause::Marker(0x00));
    }

    #[test]
    fn test_scan_absorbs_read_failures() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 4);
        sim.fail_reads(2);

        let report = scan_range(&mut sim, &geo, 0, 4);
        assert_eq!(
            report.bad_blocks,
            [BadBlock {
                block: 2,
                cause: BadBlockCause::ReadFailed,
            }]
        );
        assert!(!report.overflowed);
    }

    #[test]
    fn test_scan_stops_at_limit() {
        let geo = BcbGeometry {
            bad_block_limit: 2,
            ..test_geometry()
        };
        let mut sim = SimFlash::new(geo, 6);
        sim.mark_bad(0);
        sim.mark_bad(1);
        // Would be found as bad if the scan kept going past the limit.
        sim.fail_reads(3);

        let report = scan_range(&mut sim, &geo, 0, 6);
        assert_eq!(report.indices(), [0, 1]);
        assert!(report.overflowed);
    }

    #[test]
    fn test_scan_overflow_on_last_block() {
        let geo = BcbGeometry {
            bad_block_limit: 2,
            ..test_geometry()
        };
        let mut sim = SimFlash::new(geo, 4);
        sim.mark_bad(2);
        sim.mark_bad(3);

        let report = scan_range(&mut sim, &geo, 0, 4);
        assert_eq!(report.indices(), [2, 3]);
        assert!(report.overflowed);
    }

    #[test]
    fn test_scan_respects_range() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 6);
        sim.mark_bad(0);
        sim.mark_bad(5);

        let report = scan_range(&mut sim, &geo, 1, 5);
        assert!(report.bad_blocks.is_empty());
    }
}
