//! [`GuestMemory`] over Extism's kernel memory.

use extism::CurrentPlugin;
use hostcall_core::{GuestMemory, MemoryError, Region};

/// Guest memory of the plugin currently calling into the host.
pub struct ExtismMemory<'a> {
    plugin: &'a mut CurrentPlugin,
}

impl std::fmt::Debug for ExtismMemory<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtismMemory").finish_non_exhaustive()
    }
}

impl<'a> ExtismMemory<'a> {
    /// Wrap the calling plugin.
    pub fn new(plugin: &'a mut CurrentPlugin) -> Self {
        Self { plugin }
    }
}

fn backend<E: std::fmt::Display>(e: E) -> MemoryError {
    MemoryError::Backend(e.to_string())
}

impl GuestMemory for ExtismMemory<'_> {
    fn region(&mut self, offset: u64) -> Result<Region, MemoryError> {
        if offset == 0 {
            return Ok(Region::empty());
        }
        let handle = self
            .plugin
            .memory_handle(offset)
            .ok_or(MemoryError::UnknownBlock { offset })?;
        let len = u64::try_from(handle.len()).map_err(backend)?;
        Ok(Region::new(offset, len))
    }

    fn read(&mut self, region: Region) -> Result<Vec<u8>, MemoryError> {
        if region.len == 0 {
            return Ok(Vec::new());
        }
        let handle = self
            .plugin
            .memory_handle(region.offset)
            .ok_or(MemoryError::UnknownBlock {
                offset: region.offset,
            })?;
        let len = usize::try_from(region.len).map_err(backend)?;
        let bytes = self.plugin.memory_bytes(handle).map_err(backend)?;
        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        bytes
            .get(..len)
            .map(<[u8]>::to_vec)
            .ok_or(MemoryError::OutOfBounds {
                offset: region.offset,
                len: region.len,
                size,
            })
    }

    fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<Region, MemoryError> {
        let handle = self.plugin.memory_new(bytes).map_err(backend)?;
        let len = u64::try_from(bytes.len()).map_err(backend)?;
        Ok(Region::new(handle.offset(), len))
    }
}
