//! Access to the capture device's memory-mapped address space.

use anyhow::{Error, bail};

/// Largest transfer the device bridge accepts in one call.
pub const MAX_TRANSFER: usize = 2048;

/// A byte-addressable view of the capture device's memory.
///
/// Implementations move bytes over whatever link reaches the hardware.
/// A read may return fewer bytes than requested; callers decide whether
/// that is fatal.
pub trait MemoryTransport {
    fn read_block(&mut self, address: u32, length: usize) -> Result<Vec<u8>, Error>;

    fn write_word(&mut self, address: u32, value: u32) -> Result<(), Error>;
}

/// An in-memory address space, used to replay memory dumps and in tests.
#[derive(Clone, Debug)]
pub struct MemoryImage {
    base: u32,
    bytes: Vec<u8>,
    max_transfer: usize,
}

impl MemoryImage {
    pub fn new(base: u32, bytes: Vec<u8>) -> MemoryImage {
        MemoryImage {
            base,
            bytes,
            max_transfer: MAX_TRANSFER,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn offset(&self, address: u32, length: usize) -> Result<usize, Error> {
        let offset = address.wrapping_sub(self.base) as usize;
        if address < self.base || offset + length > self.bytes.len() {
            bail!("Access of {length} bytes at {address:#010x} is outside the memory image");
        }
        Ok(offset)
    }
}

impl MemoryTransport for MemoryImage {
    fn read_block(&mut self, address: u32, length: usize) -> Result<Vec<u8>, Error> {
        if length > self.max_transfer {
            bail!("Read of {length} bytes exceeds the {}-byte transfer limit", self.max_transfer);
        }
        let offset = self.offset(address, length)?;
        Ok(self.bytes[offset..offset + length].to_vec())
    }

    fn write_word(&mut self, address: u32, value: u32) -> Result<(), Error> {
        let offset = self.offset(address, 4)?;
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}
