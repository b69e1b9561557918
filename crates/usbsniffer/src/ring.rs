//! Extraction of captured data from the analyzer's circular buffer.

use anyhow::{Context, Error};
use log::debug;

use crate::error::TransportError;
use crate::transport::{MAX_TRANSFER, MemoryTransport};

/// The device memory region the analyzer writes capture records into.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RingRegion {
    base: u32,
    size: u32,
}

impl RingRegion {
    pub fn new(base: u32, size: u32) -> Result<RingRegion, TransportError> {
        if size == 0 || size % 4 != 0 || base.checked_add(size).is_none() {
            return Err(TransportError::BadRegion { size });
        }
        Ok(RingRegion { base, size })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// First address past the region.
    pub fn end(&self) -> u32 {
        self.base + self.size
    }

    /// Address of the last word, as programmed into the analyzer's end register.
    pub fn last_word(&self) -> u32 {
        self.end() - 4
    }

    pub fn contains(&self, address: u32) -> bool {
        (self.base..self.end()).contains(&address)
    }

    /// Bytes captured between `read_ptr` and the analyzer's write pointer.
    ///
    /// The write pointer addresses the most recently written word, so the
    /// range is inclusive of it.
    pub fn pending_bytes(&self, read_ptr: u32, write_ptr: u32) -> u32 {
        let read = read_ptr.wrapping_sub(self.base);
        let write = write_ptr.wrapping_sub(self.base);
        match write.cmp(&read) {
            std::cmp::Ordering::Greater => write - read + 4,
            std::cmp::Ordering::Less => self.size - read + write + 4,
            std::cmp::Ordering::Equal => 0,
        }
    }

    /// Address `bytes` past `address`, wrapping to the base at the end.
    pub fn advance(&self, address: u32, bytes: u32) -> u32 {
        let offset = address.wrapping_sub(self.base) as u64 + bytes as u64;
        self.base + (offset % self.size as u64) as u32
    }
}

/// Copy `count` bytes out of the ring, starting at `read_ptr`.
///
/// Transfers are split at `MAX_TRANSFER` bytes and at the physical end of
/// the region, after which reading continues from the base. Any short
/// transfer aborts the whole extraction.
pub fn extract<T>(
    transport: &mut T,
    region: &RingRegion,
    read_ptr: u32,
    count: usize,
) -> Result<Vec<u8>, Error>
where
    T: MemoryTransport + ?Sized,
{
    if count % 4 != 0 {
        return Err(TransportError::Misaligned { count }.into());
    }
    if count > region.size() as usize {
        return Err(TransportError::Oversized {
            count,
            size: region.size(),
        }
        .into());
    }
    if !region.contains(read_ptr) {
        return Err(TransportError::PointerOutOfRange { pointer: read_ptr }.into());
    }

    let mut buffer = Vec::with_capacity(count);
    let mut address = read_ptr;
    while buffer.len() < count {
        let remaining = (region.end() - address) as usize;
        let chunk = (count - buffer.len()).min(MAX_TRANSFER).min(remaining);

        let bytes = transport
            .read_block(address, chunk)
            .with_context(|| format!("Failed to read capture memory at {address:#010x}"))?;
        if bytes.len() != chunk {
            return Err(TransportError::LengthMismatch {
                address,
                requested: chunk,
                actual: bytes.len(),
            }
            .into());
        }
        debug!("Read {chunk} bytes of capture memory at {address:#010x}");
        buffer.extend_from_slice(&bytes);

        address += chunk as u32;
        if address >= region.end() {
            address = region.base();
        }
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryImage;

    /// Records every request and returns short reads on demand.
    struct RecordingTransport {
        image: MemoryImage,
        reads: Vec<(u32, usize)>,
        short_after: Option<usize>,
    }

    impl RecordingTransport {
        fn new(image: MemoryImage) -> Self {
            RecordingTransport { image, reads: Vec::new(), short_after: None }
        }
    }

    impl MemoryTransport for RecordingTransport {
        fn read_block(&mut self, address: u32, length: usize) -> Result<Vec<u8>, Error> {
            self.reads.push((address, length));
            let mut bytes = self.image.read_block(address, length)?;
            if self.short_after.is_some_and(|n| self.reads.len() > n) {
                bytes.truncate(length / 2);
            }
            Ok(bytes)
        }

        fn write_word(&mut self, address: u32, value: u32) -> Result<(), Error> {
            self.image.write_word(address, value)
        }
    }

    fn numbered_image(base: u32, size: usize) -> MemoryImage {
        MemoryImage::new(base, (0..size).map(|i| i as u8).collect())
    }

    #[test]
    fn test_region_geometry() {
        let region = RingRegion::new(0x1000, 0x100).unwrap();
        assert_eq!(region.end(), 0x1100);
        assert_eq!(region.last_word(), 0x10FC);
        assert!(region.contains(0x10FC));
        assert!(!region.contains(0x1100));
        assert_eq!(region.advance(0x10FC, 4), 0x1000);
        assert_eq!(region.advance(0x1010, 8), 0x1018);
        assert!(RingRegion::new(0, 0).is_err());
        assert!(RingRegion::new(0, 6).is_err());
    }

    #[test]
    fn test_pending_bytes() {
        let region = RingRegion::new(0, 0x10000).unwrap();
        assert_eq!(region.pending_bytes(0, 0), 0);
        assert_eq!(region.pending_bytes(0, 0x1C), 0x20);
        assert_eq!(region.pending_bytes(0xFFF0, 0x4), 0x18);

        let region = RingRegion::new(0x8000, 0x100).unwrap();
        assert_eq!(region.pending_bytes(0x80F8, 0x8004), 0x10);
    }

    #[test]
    fn test_extract_linear() {
        let region = RingRegion::new(0x100, 0x40).unwrap();
        let mut transport = RecordingTransport::new(numbered_image(0x100, 0x40));
        let bytes = extract(&mut transport, &region, 0x108, 8).unwrap();
        assert_eq!(bytes, vec![8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(transport.reads, vec![(0x108, 8)]);
    }

    #[test]
    fn test_extract_wraps_at_end() {
        let base = 0x100;
        let size = 0x40;
        let region = RingRegion::new(base, size).unwrap();
        let mut transport = RecordingTransport::new(numbered_image(base, size as usize));
        let bytes = extract(&mut transport, &region, base + size - 4, 12).unwrap();
        assert_eq!(bytes, vec![0x3C, 0x3D, 0x3E, 0x3F, 0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(transport.reads, vec![(0x13C, 4), (0x100, 8)]);
    }

    #[test]
    fn test_extract_chunks_large_reads() {
        let size = 3 * MAX_TRANSFER as u32;
        let region = RingRegion::new(0, size).unwrap();
        let mut transport = RecordingTransport::new(numbered_image(0, size as usize));
        let bytes = extract(&mut transport, &region, 0, 5000).unwrap();
        assert_eq!(bytes.len(), 5000);
        assert_eq!(bytes[4999], (4999 % 256) as u8);
        assert_eq!(transport.reads, vec![(0, 2048), (2048, 2048), (4096, 904)]);
    }

    #[test]
    fn test_extract_short_read_aborts() {
        let size = 3 * MAX_TRANSFER as u32;
        let region = RingRegion::new(0, size).unwrap();
        let mut transport = RecordingTransport::new(numbered_image(0, size as usize));
        transport.short_after = Some(1);
        let err = extract(&mut transport, &region, 0, 4096).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TransportError>(),
            Some(&TransportError::LengthMismatch { address: 2048, requested: 2048, actual: 1024 })
        );
    }

    #[test]
    fn test_extract_rejects_bad_requests() {
        let region = RingRegion::new(0x100, 0x40).unwrap();
        let mut transport = numbered_image(0x100, 0x40);
        let err = extract(&mut transport, &region, 0x100, 6).unwrap_err();
        assert_eq!(err.downcast_ref::<TransportError>(), Some(&TransportError::Misaligned { count: 6 }));
        let err = extract(&mut transport, &region, 0x200, 4).unwrap_err();
        assert_eq!(err.downcast_ref::<TransportError>(), Some(&TransportError::PointerOutOfRange { pointer: 0x200 }));
        let err = extract(&mut transport, &region, 0x100, 0x44).unwrap_err();
        assert_eq!(err.downcast_ref::<TransportError>(), Some(&TransportError::Oversized { count: 0x44, size: 0x40 }));
    }
}
