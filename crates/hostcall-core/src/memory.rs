//! Guest memory model.
//!
//! Values exchanged with a guest live in blocks of its linear memory. A
//! block is addressed by its start offset; its length is recorded by the
//! allocator, so a single `u64` handle is enough to name a value.
//!
//! [`GuestMemory`] is the narrow surface the invocation bridge needs.
//! [`LinearMemory`] is the arena every plugin instance owns: a bump
//! allocator with block reuse, growing in 64 KiB pages up to a limit. All
//! accesses are bounds-checked.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::MemoryError;

/// WASM page size in bytes.
pub const PAGE_SIZE: u64 = 65_536;

/// Default memory limit for an instance (64 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 67_108_864;

/// Block start alignment.
const ALIGN: u64 = 8;

/// Offset 0 is the null handle; real blocks start here.
const FIRST_BLOCK: u64 = ALIGN;

/// A contiguous span of guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Start offset.
    pub offset: u64,
    /// Length in bytes.
    pub len: u64,
}

impl Region {
    /// Create a region.
    #[must_use]
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// One past the last byte, `None` on overflow.
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.len)
    }

    /// The empty region at the null handle.
    #[must_use]
    pub fn empty() -> Self {
        Self { offset: 0, len: 0 }
    }
}

/// Memory operations the invocation bridge performs on a guest.
pub trait GuestMemory {
    /// Resolve the block starting at `offset` into a bounds-checked region.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownBlock`] if no block starts there and
    /// [`MemoryError::OutOfBounds`] if the block exceeds memory.
    fn region(&mut self, offset: u64) -> Result<Region, MemoryError>;

    /// Copy a region out of guest memory.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the region exceeds memory.
    fn read(&mut self, region: Region) -> Result<Vec<u8>, MemoryError>;

    /// Allocate a block, copy `bytes` into it and return its region.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::LimitExceeded`] if memory cannot grow enough.
    fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<Region, MemoryError>;
}

#[derive(Debug, Clone, Copy)]
struct Block {
    len: u64,
    capacity: u64,
}

/// Bounds-checked linear memory arena.
#[derive(Debug, Clone)]
pub struct LinearMemory {
    data: Vec<u8>,
    blocks: BTreeMap<u64, Block>,
    /// Freed blocks by offset, holding their capacity.
    free: BTreeMap<u64, u64>,
    next: u64,
    max_bytes: u64,
}

impl Default for LinearMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORY_BYTES)
    }
}

impl LinearMemory {
    /// Create an empty arena that may grow to `max_bytes`.
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            data: Vec::new(),
            blocks: BTreeMap::new(),
            free: BTreeMap::new(),
            next: FIRST_BLOCK,
            max_bytes,
        }
    }

    /// Current size in bytes (always a whole number of pages).
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::try_from(self.data.len()).unwrap_or(u64::MAX)
    }

    /// Configured maximum size in bytes.
    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Number of live blocks.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Allocate a block of `len` bytes and return its offset.
    ///
    /// A zero-length request returns the null handle `0`, which always has
    /// length zero.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::LimitExceeded`] if the block does not fit
    /// under the memory limit.
    pub fn alloc(&mut self, len: u64) -> Result<u64, MemoryError> {
        if len == 0 {
            return Ok(0);
        }
        let max_bytes = self.max_bytes;
        let limit = move || MemoryError::LimitExceeded {
            requested: len,
            limit: max_bytes,
        };
        let capacity = len.checked_next_multiple_of(ALIGN).ok_or_else(limit)?;

        let reuse = self
            .free
            .iter()
            .find(|&(_, &cap)| cap >= capacity)
            .map(|(&offset, &cap)| (offset, cap));
        if let Some((offset, cap)) = reuse {
            self.free.remove(&offset);
            self.zero(offset, cap)?;
            self.blocks.insert(offset, Block { len, capacity: cap });
            return Ok(offset);
        }

        let offset = self.next;
        let end = offset.checked_add(capacity).ok_or_else(limit)?;
        if end > self.size() {
            self.grow_to(end).map_err(|_| limit())?;
        }
        self.next = end;
        self.blocks.insert(offset, Block { len, capacity });
        Ok(offset)
    }

    /// Release the block at `offset`. Freeing the null handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownBlock`] if no live block starts there.
    pub fn free(&mut self, offset: u64) -> Result<(), MemoryError> {
        if offset == 0 {
            return Ok(());
        }
        let block = self
            .blocks
            .remove(&offset)
            .ok_or(MemoryError::UnknownBlock { offset })?;
        self.free.insert(offset, block.capacity);
        Ok(())
    }

    /// Length of the block at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::UnknownBlock`] if no live block starts there.
    pub fn block_len(&self, offset: u64) -> Result<u64, MemoryError> {
        if offset == 0 {
            return Ok(0);
        }
        self.blocks
            .get(&offset)
            .map(|b| b.len)
            .ok_or(MemoryError::UnknownBlock { offset })
    }

    /// Copy `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the span exceeds memory.
    pub fn read_bytes(&self, offset: u64, len: u64) -> Result<Vec<u8>, MemoryError> {
        let range = self.range(offset, len)?;
        Ok(self.data.get(range).unwrap_or_default().to_vec())
    }

    /// Copy `bytes` into memory starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the span exceeds memory; no
    /// byte is written in that case.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        let len = u64::try_from(bytes.len()).map_err(|_| MemoryError::OutOfBounds {
            offset,
            len: u64::MAX,
            size: self.size(),
        })?;
        let range = self.range(offset, len)?;
        if let Some(dst) = self.data.get_mut(range) {
            dst.copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Store one byte.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if `offset` is past the end.
    pub fn store_u8(&mut self, offset: u64, value: u8) -> Result<(), MemoryError> {
        self.write(offset, &[value])
    }

    /// Load one byte.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if `offset` is past the end.
    pub fn load_u8(&self, offset: u64) -> Result<u8, MemoryError> {
        let range = self.range(offset, 1)?;
        Ok(self.data.get(range.start).copied().unwrap_or_default())
    }

    /// Store a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the 8 bytes exceed memory.
    pub fn store_u64(&mut self, offset: u64, value: u64) -> Result<(), MemoryError> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Load a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the 8 bytes exceed memory.
    pub fn load_u64(&self, offset: u64) -> Result<u64, MemoryError> {
        let range = self.range(offset, 8)?;
        let mut buf = [0u8; 8];
        if let Some(src) = self.data.get(range) {
            buf.copy_from_slice(src);
        }
        Ok(u64::from_le_bytes(buf))
    }

    /// Drop every block and shrink back to zero pages.
    pub fn reset(&mut self) {
        self.data = Vec::new();
        self.blocks.clear();
        self.free.clear();
        self.next = FIRST_BLOCK;
    }

    fn range(&self, offset: u64, len: u64) -> Result<Range<usize>, MemoryError> {
        let size = self.size();
        let oob = || MemoryError::OutOfBounds { offset, len, size };
        let end = offset.checked_add(len).ok_or_else(oob)?;
        if end > size {
            return Err(oob());
        }
        let start = usize::try_from(offset).map_err(|_| oob())?;
        let end = usize::try_from(end).map_err(|_| oob())?;
        Ok(start..end)
    }

    fn zero(&mut self, offset: u64, len: u64) -> Result<(), MemoryError> {
        let range = self.range(offset, len)?;
        if let Some(dst) = self.data.get_mut(range) {
            dst.fill(0);
        }
        Ok(())
    }

    fn grow_to(&mut self, end: u64) -> Result<(), MemoryError> {
        let limit = MemoryError::LimitExceeded {
            requested: end,
            limit: self.max_bytes,
        };
        let target = end.checked_next_multiple_of(PAGE_SIZE).ok_or(limit.clone())?;
        if target > self.max_bytes {
            return Err(limit);
        }
        let target = usize::try_from(target).map_err(|_| limit)?;
        self.data.resize(target, 0);
        Ok(())
    }
}

impl GuestMemory for LinearMemory {
    fn region(&mut self, offset: u64) -> Result<Region, MemoryError> {
        let region = Region::new(offset, self.block_len(offset)?);
        self.range(region.offset, region.len)?;
        Ok(region)
    }

    fn read(&mut self, region: Region) -> Result<Vec<u8>, MemoryError> {
        self.read_bytes(region.offset, region.len)
    }

    fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<Region, MemoryError> {
        let len = u64::try_from(bytes.len()).map_err(|_| MemoryError::LimitExceeded {
            requested: u64::MAX,
            limit: self.max_bytes,
        })?;
        let offset = self.alloc(len)?;
        self.write(offset, bytes)?;
        Ok(Region::new(offset, len))
    }
}
