use crate::error::ExecError;
use crate::isa::{RAM_SIZE, WORD_BYTES};

/// Flat byte addressable memory. Values are always moved as whole little-endian doubles, at any
/// byte offset.
pub struct Ram {
    mem: Box<[u8]>,
}

impl Ram {
    pub fn new() -> Self {
        Self::with_capacity(RAM_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Ram {
            mem: vec![0; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    /// Byte range of the double at `addr`, if it lies entirely inside memory.
    fn range(&self, addr: impl TryInto<usize>) -> Result<std::ops::Range<usize>, ExecError> {
        let start: usize = addr.try_into().map_err(|_| ExecError::InvalidRamAddress)?;
        match start.checked_add(WORD_BYTES) {
            Some(end) if end <= self.capacity() => Ok(start..end),
            _ => Err(ExecError::InvalidRamAddress),
        }
    }

    pub fn load(&self, addr: impl TryInto<usize>) -> Result<f64, ExecError> {
        let range = self.range(addr)?;
        let mut bytes = [0; WORD_BYTES];
        bytes.copy_from_slice(&self.mem[range]);
        Ok(f64::from_le_bytes(bytes))
    }

    pub fn store(&mut self, addr: impl TryInto<usize>, val: f64) -> Result<(), ExecError> {
        let range = self.range(addr)?;
        self.mem[range].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }
}
