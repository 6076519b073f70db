//! POSIX shared memory wrapper

use crate::{Error, Result};
use shared_memory::{Shmem, ShmemConf};

/// One named shared memory region.
///
/// The creating side owns the OS object and unlinks it on drop; attaching
/// sides only unmap. Each stream uses three regions: a control block and
/// the two frame slots.
pub struct SharedRegion {
    inner: Shmem,
    name: String,
    size: usize,
    owner: bool,
}

impl SharedRegion {
    /// Create a new region of `size` bytes, zero-filled.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let shmem = ShmemConf::new()
            .size(size)
            .os_id(name)
            .create()
            .map_err(|e| Error::Allocation {
                requested_mb: (size as u64) / (1024 * 1024),
                reason: e.to_string(),
            })?;

        let mut region = Self {
            inner: shmem,
            name: name.to_string(),
            size,
            owner: true,
        };
        region.as_mut_slice().fill(0);
        Ok(region)
    }

    /// Attach to an existing region by name.
    pub fn open(name: &str) -> Result<Self> {
        let shmem = ShmemConf::new()
            .os_id(name)
            .open()
            .map_err(|e| Error::SharedMemory(format!("open {name}: {e}")))?;

        let size = shmem.len();

        Ok(Self {
            inner: shmem,
            name: name.to_string(),
            size,
            owner: false,
        })
    }

    /// Region name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this side created the OS object
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Raw pointer to the region
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    /// Mutable raw pointer to the region
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.inner.as_ptr()
    }

    /// Byte view of the region
    pub fn as_slice(&self) -> &[u8] {
        // Safety: the mapping is valid for `size` bytes for the lifetime of `inner`
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.size) }
    }

    /// Mutable byte view of the region
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let size = self.size;
        // Safety: the mapping is valid for `size` bytes for the lifetime of `inner`
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), size) }
    }
}
