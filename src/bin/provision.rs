//! Provisioning tool for writing NAND boot control blocks.
//!
//! Operates on a file-backed simulated flash device, so boot images can be
//! prepared and inspected offline. On a real target the same operations run
//! against the platform's flash service through the identical trait.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use std::fs::File;
use std::path::PathBuf;

use nandboot::bcb::{scan_range, write_dbbt, write_fcb, Dbbt, Fcb, FirmwareSlots};
use nandboot::ecc::NullEcc;
use nandboot::flash::{write_clean_markers, FlashService, SimFlash};
use nandboot::geometry::BcbGeometry;

#[derive(Args, Debug)]
struct ImageOptions {
    /// Path to the NAND image file; created on save if missing
    #[clap(long)]
    image: Option<PathBuf>,

    /// Number of erase blocks in the device
    #[clap(long, default_value_t = 1024)]
    blocks: u32,

    /// Write the image file back when done
    #[clap(long, requires = "image")]
    save: bool,
}

impl ImageOptions {
    fn open(&self, geometry: BcbGeometry) -> Result<SimFlash> {
        let mut sim = SimFlash::new(geometry, self.blocks);
        if let Some(path) = &self.image {
            if path.exists() {
                sim.load(&mut File::open(path)?)?;
            }
        }
        Ok(sim)
    }

    fn cleanup(&self, sim: &SimFlash) -> Result<()> {
        if self.save {
            if let Some(path) = &self.image {
                sim.save(&mut File::create(path)?)?;
            }
        }
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a block range and print the bad block report; read-only
    Scan {
        /// First block to scan
        #[clap(long, default_value_t = 0)]
        start: u32,

        /// End block (exclusive); defaults to the whole device
        #[clap(long)]
        end: Option<u32>,
    },

    /// Build and write the redundant FCB copies
    WriteFcb,

    /// Scan the device and write the redundant DBBT copies
    WriteDbbt,

    /// Erase everything, then write the FCB, the DBBT, and clean markers
    Provision {
        /// First block of the filesystem area, which receives clean markers
        #[clap(long, default_value_t = 64)]
        fs_start: u32,
    },

    /// Re-read the first copy of each control block and verify it
    Verify,
}

impl Command {
    fn execute(self, nand: &mut SimFlash, geometry: &BcbGeometry, blocks: u32) -> Result<()> {
        match self {
            Command::Scan { start, end } => {
                let report = scan_range(nand, geometry, start, end.unwrap_or(blocks));

                for bad in &report.bad_blocks {
                    println!("{:4} => {:?}", bad.block, bad.cause);
                }
                println!("{} bad blocks", report.bad_blocks.len());
                if report.overflowed {
                    bail!("too many bad blocks, flash is not usable");
                }
            }

            Command::WriteFcb => {
                let fcb = write_fcb(nand, &NullEcc, geometry, &FirmwareSlots::default())?;
                println!(
                    "FCB written: firmware at pages {} and {}, checksum {:#010x}",
                    fcb.fw1_start, fcb.fw2_start, fcb.checksum
                );
            }

            Command::WriteDbbt => {
                let report = scan_range(nand, geometry, 0, blocks);
                let dbbt = Dbbt::from_scan(geometry, &report)?;

                let written = write_dbbt(nand, geometry, &dbbt)?;
                println!(
                    "DBBT written to {written}/{} slots, {} entries",
                    geometry.bcb_sets,
                    dbbt.entries_num()
                );
            }

            Command::Provision { fs_start } => {
                println!("Erasing blocks 0..{blocks}");
                nand.erase_blocks(0, blocks)?;

                let report = scan_range(nand, geometry, 0, blocks);
                let dbbt = Dbbt::from_scan(geometry, &report)?;

                let fcb = write_fcb(nand, &NullEcc, geometry, &FirmwareSlots::default())?;
                println!("FCB written, checksum {:#010x}", fcb.checksum);

                let written = write_dbbt(nand, geometry, &dbbt)?;
                println!(
                    "DBBT written to {written}/{} slots, {} entries",
                    geometry.bcb_sets,
                    dbbt.entries_num()
                );

                let marked = write_clean_markers(nand, geometry, fs_start, blocks)?;
                println!("Clean markers on {marked} blocks");
            }

            Command::Verify => {
                let raw = nand.read_raw(geometry.fcb_offset, geometry.raw_page_size)?;
                match Fcb::parse(geometry, &raw) {
                    Some(fcb) => println!(
                        "FCB ok: page size {}, firmware at pages {} and {}",
                        fcb.page_size, fcb.fw1_start, fcb.fw2_start
                    ),
                    None => bail!("no valid FCB in the first slot"),
                }

                let header_page = u64::from(geometry.dbbt_start_page)
                    * geometry.raw_page_size as u64;
                let entries_page = header_page
                    + u64::from(geometry.dbbt_entries_page) * geometry.raw_page_size as u64;

                let header = nand.read_raw(header_page, geometry.raw_page_size)?;
                let entries = nand.read_raw(entries_page, geometry.raw_page_size)?;
                // An erased entry page means the table is empty.
                let entries = Some(&entries[..]).filter(|page| !page.iter().all(|&b| b == 0xFF));
                match Dbbt::parse(geometry, &header, entries) {
                    Some(dbbt) => println!("DBBT ok: {} entries", dbbt.entries_num()),
                    None => bail!("no valid DBBT in the first slot"),
                }
            }
        };

        Ok(())
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// The NAND image to operate on
    #[clap(flatten)]
    image: ImageOptions,

    /// The provisioning command to run against this image
    #[clap(subcommand)]
    cmd: Command,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    howudoin::init(howudoin::consumers::TermLine::default());

    let geometry = BcbGeometry::imx6ull();
    let mut nand = args.image.open(geometry)?;
    let blocks = args.image.blocks;
    args.cmd.execute(&mut nand, &geometry, blocks)?;
    args.image.cleanup(&nand)?;
    Ok(())
}
