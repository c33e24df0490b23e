//! Fixed-size header slots at the start of the store file.
//!
//! Slot layout (big-endian, zero padded to [`SLOT_SIZE`]):
//! ```text
//! [4 bytes: magic "TOME"]
//! [4 bytes: format version]
//! [8 bytes: generation]
//! [8 bytes: TOC offset]
//! [8 bytes: TOC length]
//! [4 bytes: CRC32 of the TOC bytes]
//! [4 bytes: CRC32 of the preceding 36 bytes]
//! ```

use crate::block::Extent;

pub(crate) const MAGIC: &[u8; 4] = b"TOME";
pub(crate) const FORMAT_VERSION: u32 = 1;
pub(crate) const SLOT_SIZE: u64 = 64;
pub(crate) const SLOT_COUNT: u64 = 2;
/// First byte available for block and TOC regions.
pub(crate) const HEADER_SIZE: u64 = SLOT_SIZE * SLOT_COUNT;

const BODY_LEN: usize = 36;

/// One committed pointer to a TOC region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HeaderSlot {
    pub generation: u64,
    pub toc: Extent,
    pub toc_crc: u32,
}

impl HeaderSlot {
    /// File offset of the slot a given generation is written to.
    pub fn offset_for(generation: u64) -> u64 {
        (generation % SLOT_COUNT) * SLOT_SIZE
    }

    pub fn to_bytes(&self) -> [u8; SLOT_SIZE as usize] {
        let mut buf = [0u8; SLOT_SIZE as usize];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        buf[8..16].copy_from_slice(&self.generation.to_be_bytes());
        buf[16..24].copy_from_slice(&self.toc.offset.to_be_bytes());
        buf[24..32].copy_from_slice(&self.toc.len.to_be_bytes());
        buf[32..36].copy_from_slice(&self.toc_crc.to_be_bytes());
        let crc = crc32fast::hash(&buf[..BODY_LEN]);
        buf[36..40].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Parse a slot. `Ok(None)` means the slot was never written.
    pub fn from_bytes(buf: &[u8]) -> Result<Option<Self>, String> {
        if buf.len() < BODY_LEN + 4 {
            return Err(format!("slot truncated to {} bytes", buf.len()));
        }
        if buf.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        if &buf[0..4] != MAGIC {
            return Err(format!(
                "invalid magic: expected {}, got {}",
                String::from_utf8_lossy(MAGIC),
                String::from_utf8_lossy(&buf[0..4])
            ));
        }
        let expected_crc = read_u32(&buf[36..40]);
        let actual_crc = crc32fast::hash(&buf[..BODY_LEN]);
        if expected_crc != actual_crc {
            return Err(format!(
                "slot CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
            ));
        }
        let version = read_u32(&buf[4..8]);
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version: {version}"));
        }
        Ok(Some(Self {
            generation: read_u64(&buf[8..16]),
            toc: Extent::new(read_u64(&buf[16..24]), read_u64(&buf[24..32])),
            toc_crc: read_u32(&buf[32..36]),
        }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(arr)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}
