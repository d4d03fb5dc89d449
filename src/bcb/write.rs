//! Writing the redundant boot control block copies to their fixed offsets.
//!
//! The two tables carry different weight, and the writers reflect it. FCB
//! copies are mandatory for boot, so a failed slot aborts the operation and
//! surfaces the error. DBBT content is advisory, so each slot is attempted
//! regardless of its siblings; redundancy, not retry, is the recovery
//! mechanism.

use super::{Dbbt, Fcb, FirmwareSlots};
use crate::ecc::EccEncoder;
use crate::error::FlashError;
use crate::flash::{FlashService, WriteKind};
use crate::geometry::BcbGeometry;

/// Build one FCB and write its ECC-encoded image to every redundant slot,
/// one raw erase block apart.
///
/// The first failed slot aborts the rest and propagates. Returns the
/// in-memory record for verification and logging.
pub fn write_fcb<S, E>(
    service: &mut S,
    ecc: &E,
    geometry: &BcbGeometry,
    firmware: &FirmwareSlots,
) -> Result<Fcb, FlashError>
where
    S: FlashService + ?Sized,
    E: EccEncoder + ?Sized,
{
    let fcb = Fcb::build(geometry, firmware);
    let encoded = ecc.encode(&fcb.to_record_bytes(), geometry.raw_page_size)?;

    for slot in 0..geometry.bcb_sets {
        let address = geometry.fcb_offset + u64::from(slot) * geometry.raw_block_bytes();
        service.write_raw(address, WriteKind::Raw, &encoded)?;
    }

    Ok(fcb)
}

/// Write the DBBT header page, and the entry page when the table is
/// nonempty, to every redundant slot.
///
/// Failed slots are reported and skipped; the remaining slots are still
/// written. Returns how many slots were written in full.
pub fn write_dbbt<S: FlashService + ?Sized>(
    service: &mut S,
    geometry: &BcbGeometry,
    dbbt: &Dbbt,
) -> Result<u32, FlashError> {
    let actual = service.get_size()?;
    let required = geometry.min_dbbt_size();
    if actual < required {
        return Err(FlashError::SizeTooSmall { actual, required });
    }

    let header = dbbt.header_page(geometry)?;
    let entries = dbbt.entries_page(geometry)?;

    let rpt = howudoin::new()
        .label("Writing bad block table")
        .set_len(u64::from(geometry.bcb_sets));

    let mut written = 0;
    for slot in 0..geometry.bcb_sets {
        let slot_base = geometry.dbbt_base() + u64::from(slot) * geometry.block_bytes();
        match write_dbbt_slot(service, geometry, slot_base, &header, entries.as_deref()) {
            Ok(()) => written += 1,
            Err(err) => {
                rpt.add_info(format!("bad block table copy {slot} failed: {err}"));
            }
        }
        rpt.inc();
    }

    rpt.close();
    Ok(written)
}

fn write_dbbt_slot<S: FlashService + ?Sized>(
    service: &mut S,
    geometry: &BcbGeometry,
    slot_base: u64,
    header: &[u8],
    entries: Option<&[u8]>,
) -> Result<(), FlashError> {
    service.write_raw(slot_base, WriteKind::Data, header)?;

    if let Some(entries) = entries {
        let address = slot_base + geometry.dbbt_entries_offset();
        service.write_raw(address, WriteKind::Data, entries)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bcb::FCB_LEN;
    use crate::ecc::NullEcc;
    use crate::flash::SimFlash;

    fn test_geometry() -> BcbGeometry {
        BcbGeometry {
            page_size: 512,
            raw_page_size: 528,
            pages_per_block: 8,
            bad_block_limit: 8,
            dbbt_start_page: 16,
            marker_offset: 512,
            ..BcbGeometry::imx6ull()
        }
    }

    #[test]
    fn test_write_fcb_all_slots() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 8);

        let fcb = write_fcb(&mut sim, &NullEcc, &geo, &FirmwareSlots::default()).unwrap();

        for slot in 0..geo.bcb_sets {
            let page = sim.raw_page(slot, 0);
            assert_eq!(&page[4..8], b"FCB ");
            assert_eq!(Fcb::parse(&geo, page), Some(fcb.clone()));
        }
    }

    #[test]
    fn test_write_fcb_aborts_on_failed_slot() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 8);

        // Fail the third of the four redundant writes.
        sim.fail_writes_at(geo.raw_block_address(2));

        let err = write_fcb(&mut sim, &NullEcc, &geo, &FirmwareSlots::default()).unwrap_err();
        assert!(matches!(err, FlashError::WriteFailed { .. }));

        // Slots 0..=2 were attempted; the fourth never was.
        assert_eq!(sim.write_attempts().len(), 3);
        assert!(sim.raw_page(3, 0).iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_write_fcb_roundtrip_through_identity_ecc() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 8);

        let fcb = write_fcb(&mut sim, &NullEcc, &geo, &FirmwareSlots::default()).unwrap();

        let raw = sim.read_raw(geo.raw_block_address(0), geo.raw_page_size).unwrap();
        let decoded = Fcb::parse(&geo, &raw).unwrap();
        assert_eq!(decoded, fcb);
        assert!(raw[FCB_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_dbbt_all_slots() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 8);

        let dbbt = Dbbt::build(&geo, &[5, 7]).unwrap();
        assert_eq!(write_dbbt(&mut sim, &geo, &dbbt).unwrap(), geo.bcb_sets);

        // Slots start at block 2 here, one block apart.
        for slot in 0..geo.bcb_sets {
            let header = sim.raw_page(2 + slot, 0);
            assert_eq!(&header[4..8], b"DBBT");

            let entries = sim.raw_page(2 + slot, geo.dbbt_entries_page);
            assert_eq!(&entries[4..8], &2u32.to_le_bytes());
            assert_eq!(&entries[8..12], &5u32.to_le_bytes());
            assert_eq!(&entries[12..16], &7u32.to_le_bytes());
        }
    }

    #[test]
    fn test_write_dbbt_survives_failed_slot() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 8);

        // Fail the header write of the second slot.
        sim.fail_writes_at(geo.dbbt_base() + geo.block_bytes());

        let dbbt = Dbbt::build(&geo, &[1]).unwrap();
        assert_eq!(write_dbbt(&mut sim, &geo, &dbbt).unwrap(), 3);

        for slot in [0, 2, 3] {
            assert_eq!(&sim.raw_page(2 + slot, 0)[4..8], b"DBBT");
        }
        assert_eq!(&sim.raw_page(3, 0)[4..8], &[0xFF; 4]);
    }

    #[test]
    fn test_write_dbbt_empty_table_skips_entry_pages() {
        let geo = test_geometry();
        let mut sim = SimFlash::new(geo, 8);

        let dbbt = Dbbt::build(&geo, &[]).unwrap();
        assert_eq!(write_dbbt(&mut sim, &geo, &dbbt).unwrap(), geo.bcb_sets);

        // One header write per slot, nothing else.
        assert_eq!(sim.write_attempts().len(), geo.bcb_sets as usize);
        assert!(sim
            .raw_page(2, geo.dbbt_entries_page)
            .iter()
            .all(|&b| b == 0xFF));
    }

    #[test]
    fn test_write_dbbt_rejects_small_target() {
        let geo = test_geometry();
        // Too few blocks to hold every redundant copy.
        let mut sim = SimFlash::new(geo, 4);

        let dbbt = Dbbt::build(&geo, &[]).unwrap();
        let err = write_dbbt(&mut sim, &geo, &dbbt).unwrap_err();
        assert!(matches!(err, FlashError::SizeTooSmall { .. }));
        assert!(sim.write_attempts().is_empty());
    }
}
