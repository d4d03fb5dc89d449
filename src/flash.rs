//! Abstractions and code to access the raw flash storage service.
//!
//! The storage endpoint is message-passing: every operation is one tagged
//! request answered by one tagged response, serialized by the service itself.
//! This module defines those messages, a [FlashService] trait with the client
//! calls the rest of the crate consumes, and [SimFlash], an in-memory service
//! for testing and for preparing image files offline.

use std::collections::HashSet;
use std::io::{Read, Write};

use deku::prelude::*;

use crate::error::FlashError;
use crate::geometry::BcbGeometry;

/// Which write path the service should use for a request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WriteKind {
    /// An ECC-protected raw page image, written with hardware ECC bypassed.
    Raw,

    /// A plain write through the page data area.
    Data,

    /// An out-of-band metadata write for the addressed page.
    Meta,
}

/// One request to the flash service, one case per operation kind.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FlashRequest {
    /// Read `size` raw bytes (data and out-of-band areas) from `address`.
    ReadRaw { address: u64, size: usize },

    /// Write `data` at `address` through the path picked by `kind`.
    Write {
        address: u64,
        kind: WriteKind,
        data: Vec<u8>,
    },

    /// Erase every block in `[start_block, end_block)`.
    Erase { start_block: u32, end_block: u32 },

    /// Ask for the total data-area capacity of the target.
    GetSize,
}

/// The service's answer to a [FlashRequest].
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FlashResponse {
    Data(Vec<u8>),
    Done,
    Size(u64),
}

/// Represents the flash storage service endpoint.
///
/// Implementations only provide [transact](FlashService::transact); the typed
/// client calls are derived from it. Every call blocks until the service
/// answers; there are no timeouts and no retries here.
pub trait FlashService {
    /// Send one request and wait for its response.
    fn transact(&mut self, request: FlashRequest) -> Result<FlashResponse, FlashError>;

    /// Read `size` raw bytes at `address`.
    fn read_raw(&mut self, address: u64, size: usize) -> Result<Vec<u8>, FlashError> {
        match self.transact(FlashRequest::ReadRaw { address, size })? {
            FlashResponse::Data(data) if data.len() == size => Ok(data),
            _ => Err(mismatched_response()),
        }
    }

    /// Write `data` at `address` through the path picked by `kind`.
    fn write_raw(&mut self, address: u64, kind: WriteKind, data: &[u8]) -> Result<(), FlashError> {
        let request = FlashRequest::Write {
            address,
            kind,
            data: data.to_vec(),
        };
        match self.transact(request)? {
            FlashResponse::Done => Ok(()),
            _ => Err(mismatched_response()),
        }
    }

    /// Erase every block in `[start_block, end_block)`.
    fn erase_blocks(&mut self, start_block: u32, end_block: u32) -> Result<(), FlashError> {
        if end_block < start_block {
            return Err(FlashError::EraseFailed {
                start: start_block,
                end: end_block,
            });
        }
        match self.transact(FlashRequest::Erase {
            start_block,
            end_block,
        })? {
            FlashResponse::Done => Ok(()),
            _ => Err(mismatched_response()),
        }
    }

    /// Total data-area capacity of the target, in bytes.
    fn get_size(&mut self) -> Result<u64, FlashError> {
        match self.transact(FlashRequest::GetSize)? {
            FlashResponse::Size(size) => Ok(size),
            _ => Err(mismatched_response()),
        }
    }
}

fn mismatched_response() -> FlashError {
    FlashError::ServiceUnavailable("response does not match the request".into())
}

/// Fallibly acquire a zeroed transfer buffer of `size` bytes.
pub(crate) fn alloc_buffer(size: usize) -> Result<Vec<u8>, FlashError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| FlashError::AllocationFailed { size })?;
    buf.resize(size, 0);
    Ok(buf)
}

/// JFFS2 clean marker, stamped on freshly erased blocks so the filesystem
/// mounts without rescanning them.
#[derive(Debug, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct CleanMarker {
    pub magic: u16,
    pub nodetype: u16,
    pub totlen: u32,
}

impl Default for CleanMarker {
    fn default() -> Self {
        Self {
            magic: 0x1985,
            nodetype: 0x2003,
            totlen: 8,
        }
    }
}

/// Stamp a clean marker on every block in `[start_block, end_block)`.
///
/// Best-effort: a block that refuses the marker is reported and skipped.
/// Returns how many blocks were marked.
pub fn write_clean_markers<S: FlashService + ?Sized>(
    service: &mut S,
    geometry: &BcbGeometry,
    start_block: u32,
    end_block: u32,
) -> Result<u32, FlashError> {
    let mut meta = alloc_buffer(geometry.page_size)?;
    meta.fill(0xFF);
    let marker = CleanMarker::default().to_bytes().unwrap();
    meta[..marker.len()].copy_from_slice(&marker);

    let rpt = howudoin::new()
        .label("Writing clean markers")
        .set_len(u64::from(end_block.saturating_sub(start_block)));

    let mut marked = 0;
    for block in start_block..end_block {
        let address = u64::from(block) * geometry.block_bytes();
        match service.write_raw(address, WriteKind::Meta, &meta) {
            Ok(()) => marked += 1,
            Err(err) => {
                rpt.add_info(format!("clean marker for block {block} failed: {err}"));
            }
        }
        rpt.inc();
    }

    rpt.close();
    Ok(marked)
}

/// A simulated in-memory flash service, for testing purposes and for
/// preparing NAND images offline.
///
/// The device content is kept as the raw byte image: data and out-of-band
/// areas interleaved per page, blocks back to back. Faults can be injected to
/// exercise the error paths of the callers.
#[derive(Debug, Clone)]
pub struct SimFlash {
    geometry: BcbGeometry,
    blocks: u32,
    raw: Vec<u8>,
    read_faults: HashSet<u32>,
    write_faults: HashSet<u64>,
    writes: Vec<u64>,
}

impl SimFlash {
    /// Create an erased (all-0xFF) device with `blocks` erase blocks.
    pub fn new(geometry: BcbGeometry, blocks: u32) -> Self {
        let raw = vec![0xFF; (u64::from(blocks) * geometry.raw_block_bytes()) as usize];
        Self {
            geometry,
            blocks,
            raw,
            read_faults: HashSet::new(),
            write_faults: HashSet::new(),
            writes: Vec::new(),
        }
    }

    /// Initialize the device content from a raw image stream.
    pub fn load<R: Read>(&mut self, read: &mut R) -> anyhow::Result<()> {
        read.read_exact(&mut self.raw)?;
        Ok(())
    }

    /// Write the device content out as a raw image stream.
    pub fn save<W: Write>(&self, write: &mut W) -> anyhow::Result<()> {
        write.write_all(&self.raw)?;
        Ok(())
    }

    /// Make every raw read touching `block` fail, as an unreliable block
    /// would.
    pub fn fail_reads(&mut self, block: u32) {
        self.read_faults.insert(block);
    }

    /// Make any write issued at exactly `address` fail.
    pub fn fail_writes_at(&mut self, address: u64) {
        self.write_faults.insert(address);
    }

    /// Stamp a non-0xFF bad-block marker into the first out-of-band byte of
    /// `block`.
    pub fn mark_bad(&mut self, block: u32) {
        let base = self.geometry.raw_block_address(block) as usize;
        self.raw[base + self.geometry.marker_offset] = 0x00;
    }

    /// The raw image of one page of one block.
    pub fn raw_page(&self, block: u32, page: u32) -> &[u8] {
        let base = self.geometry.raw_block_address(block) as usize
            + page as usize * self.geometry.raw_page_size;
        &self.raw[base..base + self.geometry.raw_page_size]
    }

    /// Addresses of every write attempted so far, faulted ones included.
    pub fn write_attempts(&self) -> &[u64] {
        &self.writes
    }

    fn write_raw_space(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        let start = address as usize;
        self.raw
            .get_mut(start..start + data.len())
            .ok_or(FlashError::WriteFailed {
                address,
                size: data.len(),
            })?
            .copy_from_slice(data);
        Ok(())
    }

    /// Data-space writes land in the data area of each page they touch.
    fn write_data_space(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        let page_size = self.geometry.page_size;
        let mut addr = address;
        let mut data = data;
        while !data.is_empty() {
            let page = addr / page_size as u64;
            let within = (addr % page_size as u64) as usize;
            let chunk = data.len().min(page_size - within);
            let start = (page * self.geometry.raw_page_size as u64) as usize + within;
            self.raw
                .get_mut(start..start + chunk)
                .ok_or(FlashError::WriteFailed {
                    address,
                    size: data.len(),
                })?
                .copy_from_slice(&data[..chunk]);
            addr += chunk as u64;
            data = &data[chunk..];
        }
        Ok(())
    }

    /// Metadata writes land in the out-of-band area of the addressed page.
    fn write_meta_space(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        let page = address / self.geometry.page_size as u64;
        let oob = self.geometry.raw_page_size - self.geometry.page_size;
        let chunk = data.len().min(oob);
        let start = (page * self.geometry.raw_page_size as u64) as usize + self.geometry.page_size;
        self.raw
            .get_mut(start..start + chunk)
            .ok_or(FlashError::WriteFailed {
                address,
                size: data.len(),
            })?
            .copy_from_slice(&data[..chunk]);
        Ok(())
    }
}

impl FlashService for SimFlash {
    fn transact(&mut self, request: FlashRequest) -> Result<FlashResponse, FlashError> {
        match request {
            FlashRequest::ReadRaw { address, size } => {
                let block = (address / self.geometry.raw_block_bytes()) as u32;
                if self.read_faults.contains(&block) {
                    return Err(FlashError::ReadFailed { address, size });
                }
                let start = address as usize;
                let data = self
                    .raw
                    .get(start..start + size)
                    .ok_or(FlashError::ReadFailed { address, size })?;
                Ok(FlashResponse::Data(data.to_vec()))
            }

            FlashRequest::Write {
                address,
                kind,
                data,
            } => {
                self.writes.push(address);
                if self.write_faults.contains(&address) {
                    return Err(FlashError::WriteFailed {
                        address,
                        size: data.len(),
                    });
                }
                match kind {
                    WriteKind::Raw => self.write_raw_space(address, &data)?,
                    WriteKind::Data => self.write_data_space(address, &data)?,
                    WriteKind::Meta => self.write_meta_space(address, &data)?,
                }
                Ok(FlashResponse::Done)
            }

            FlashRequest::Erase {
                start_block,
                end_block,
            } => {
                let start = (u64::from(start_block) * self.geometry.raw_block_bytes()) as usize;
                let end = (u64::from(end_block) * self.geometry.raw_block_bytes()) as usize;
                self.raw
                    .get_mut(start..end)
                    .ok_or(FlashError::EraseFailed {
                        start: start_block,
                        end: end_block,
                    })?
                    .fill(0xFF);
                Ok(FlashResponse::Done)
            }

            FlashRequest::GetSize => Ok(FlashResponse::Size(
                u64::from(self.blocks) * self.geometry.block_bytes(),
            )),
        }
    }
}

#[cfg(test)]
fn test_geometry() -> BcbGeometry {
    BcbGeometry {
        page_size: 512,
        raw_page_size: 528,
        pages_per_block: 8,
        bcb_sets: 4,
        bad_block_limit: 8,
        dbbt_start_page: 16,
        marker_offset: 512,
        ..BcbGeometry::imx6ull()
    }
}

#[test]
fn test_sim_raw_roundtrip() {
    let geo = test_geometry();
    let mut sim = SimFlash::new(geo, 4);

    let page = vec![0xA5u8; geo.raw_page_size];
    sim.write_raw(geo.raw_block_address(1), WriteKind::Raw, &page)
        .unwrap();

    let back = sim.read_raw(geo.raw_block_address(1), geo.raw_page_size).unwrap();
    assert_eq!(back, page);
    assert_eq!(sim.raw_page(1, 0), &page[..]);

    // The neighboring block is untouched.
    assert!(sim.raw_page(2, 0).iter().all(|&b| b == 0xFF));
}

#[test]
fn test_sim_data_write_lands_in_data_area() {
    let geo = test_geometry();
    let mut sim = SimFlash::new(geo, 4);

    // Page 3 in data space is page 3 of block 0 in raw space.
    let data = vec![0x11u8; geo.page_size];
    sim.write_raw(3 * geo.page_size as u64, WriteKind::Data, &data)
        .unwrap();

    let raw = sim.raw_page(0, 3);
    assert!(raw[..geo.page_size].iter().all(|&b| b == 0x11));
    assert!(raw[geo.page_size..].iter().all(|&b| b == 0xFF));
}

#[test]
fn test_sim_erase_and_size() {
    let geo = test_geometry();
    let mut sim = SimFlash::new(geo, 4);

    sim.write_raw(0, WriteKind::Raw, &[0u8; 16]).unwrap();
    sim.erase_blocks(0, 4).unwrap();
    assert!(sim.raw_page(0, 0).iter().all(|&b| b == 0xFF));

    assert_eq!(sim.get_size().unwrap(), 4 * geo.block_bytes());
    assert!(sim.erase_blocks(3, 1).is_err());
}

#[test]
fn test_sim_fault_injection() {
    let geo = test_geometry();
    let mut sim = SimFlash::new(geo, 4);

    sim.fail_reads(2);
    assert!(sim.read_raw(geo.raw_block_address(2), 16).is_err());
    assert!(sim.read_raw(geo.raw_block_address(1), 16).is_ok());

    sim.fail_writes_at(100);
    assert!(sim.write_raw(100, WriteKind::Raw, &[0u8; 4]).is_err());
    assert_eq!(sim.write_attempts(), [100]);
}

#[test]
fn test_clean_markers() {
    let geo = test_geometry();
    let mut sim = SimFlash::new(geo, 4);

    let marked = write_clean_markers(&mut sim, &geo, 1, 4).unwrap();
    assert_eq!(marked, 3);

    let expected = CleanMarker::default().to_bytes().unwrap();
    assert_eq!(&sim.raw_page(1, 0)[geo.page_size..][..8], &expected[..]);
    // Block 0 was left alone.
    assert!(sim.raw_page(0, 0).iter().all(|&b| b == 0xFF));
}

#[test]
fn test_clean_marker_layout() {
    let bytes = CleanMarker::default().to_bytes().unwrap();
    assert_eq!(bytes, [0x85, 0x19, 0x03, 0x20, 0x08, 0x00, 0x00, 0x00]);
}
