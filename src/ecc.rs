//! The seam to the out-of-core forward-error-correction encoder.
//!
//! The boot ROM reads the FCB through a software BCH decoder, so its page
//! image must be written pre-encoded, with the hardware ECC bypassed. The
//! encoder itself lives outside this crate; targets plug theirs in through
//! [EccEncoder].

use crate::error::FlashError;
use crate::flash::alloc_buffer;

/// Encodes one page payload into the raw (ECC-protected) page image the boot
/// ROM reads.
pub trait EccEncoder {
    /// Encode `payload` into a raw page image of exactly `raw_len` bytes.
    fn encode(&self, payload: &[u8], raw_len: usize) -> Result<Vec<u8>, FlashError>;
}

/// Identity stand-in: embeds the payload unprotected at the start of a
/// zero-padded raw page.
///
/// Used by the simulator tests and for preparing image files whose consumer
/// does not decode ECC.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullEcc;

impl EccEncoder for NullEcc {
    fn encode(&self, payload: &[u8], raw_len: usize) -> Result<Vec<u8>, FlashError> {
        let mut image = alloc_buffer(raw_len)?;
        let len = payload.len().min(raw_len);
        image[..len].copy_from_slice(&payload[..len]);
        Ok(image)
    }
}

#[test]
fn test_null_ecc_pads() {
    let image = NullEcc.encode(&[1, 2, 3], 8).unwrap();
    assert_eq!(image, [1, 2, 3, 0, 0, 0, 0, 0]);
}
