//! Per-frame bump allocator over the shared build scratch buffer

use crate::gpu::DeviceAddress;
use crate::math::align_up;

/// Hands out aligned sub-ranges of one scratch buffer. Reset every frame.
#[derive(Clone, Debug)]
pub struct ScratchAllocator {
    base_address: DeviceAddress,
    capacity: u64,
    alignment: u64,
    cursor: u64,
    high_water: u64,
}

impl ScratchAllocator {
    /// Create an allocator over one buffer
    ///
    /// # Arguments
    /// * `base_address` - Device address of the scratch buffer
    /// * `capacity` - Size of the buffer in bytes
    /// * `alignment` - Required alignment of every returned address
    pub fn new(base_address: DeviceAddress, capacity: u64, alignment: u64) -> Self {
        Self { base_address, capacity, alignment, cursor: 0, high_water: 0 }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes consumed since the last reset.
    pub fn used(&self) -> u64 {
        self.cursor
    }

    /// Highest cursor position seen since the last reset.
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.high_water = 0;
    }

    /// Start reusing the buffer from the beginning without forgetting the high-water mark.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Offset a build of `size` bytes would start at.
    fn next_offset(&self) -> u64 {
        align_up(self.base_address + self.cursor, self.alignment) - self.base_address
    }

    /// Whether `size` bytes fit in the remaining budget.
    ///
    /// # Arguments
    /// * `size` - Bytes of scratch a build needs
    pub fn fits(&self, size: u64) -> bool {
        self.next_offset() + size <= self.capacity
    }

    /// Whether `size` bytes would fit in an empty buffer.
    pub fn fits_when_empty(&self, size: u64) -> bool {
        align_up(self.base_address, self.alignment) - self.base_address + size <= self.capacity
    }

    /// Reserve `size` aligned bytes and return their device address.
    ///
    /// # Arguments
    /// * `size` - Bytes of scratch a build needs
    ///
    /// Returns `None` if the remaining budget is too small.
    pub fn allocate(&mut self, size: u64) -> Option<DeviceAddress> {
        if !self.fits(size) {
            return None;
        }
        let offset = self.next_offset();
        self.cursor = offset + size;
        self.high_water = self.high_water.max(self.cursor);
        Some(self.base_address + offset)
    }
}
