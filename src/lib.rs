//! Boot control block provisioning for NAND-booting i.MX6ULL devices.
//!
//! A NAND-booting processor reads two structures from fixed offsets before
//! any filesystem or firmware image exists: the Firmware Configuration Block
//! (FCB), describing NAND timing, ECC geometry, and firmware image locations,
//! and the Discovered Bad Block Table (DBBT), listing the erase blocks the
//! boot ROM must skip. This crate builds both structures, scans flash for bad
//! blocks, and writes the redundant copies through a raw flash storage
//! service.

pub mod bcb;
pub mod ecc;
pub mod error;
pub mod flash;
pub mod geometry;
