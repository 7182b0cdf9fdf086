//! First-fit range allocator over one device heap.
//!
//! Tracks free byte ranges only; no device memory is touched here.
//! Free ranges are kept sorted by offset and coalesced on free.

/// Rounds `value` up to a power-of-two `alignment`.
#[inline]
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FreeRange {
    offset: u64,
    size: u64,
}

impl FreeRange {
    const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Offset allocator for a block of `size` bytes.
#[derive(Debug)]
pub struct VirtualBlock {
    size: u64,
    free: Vec<FreeRange>,
    used: u64,
    live: usize,
}

impl VirtualBlock {
    /// An entirely free block.
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self {
            size,
            free: vec![FreeRange { offset: 0, size }],
            used: 0,
            live: 0,
        }
    }

    /// Total bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Bytes handed out.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> u64 {
        self.used
    }

    /// Number of live allocations.
    #[inline]
    #[must_use]
    pub const fn live_allocations(&self) -> usize {
        self.live
    }

    /// True if nothing is allocated.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Largest contiguous free range.
    #[must_use]
    pub fn largest_free(&self) -> u64 {
        self.free.iter().map(|range| range.size).max().unwrap_or(0)
    }

    /// Finds the first range that fits `size` at `alignment`.
    ///
    /// Returns the offset, or `None` if no range fits.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        debug_assert!(alignment.is_power_of_two());
        if size == 0 {
            return None;
        }

        for index in 0..self.free.len() {
            let range = self.free[index];
            let aligned = align_up(range.offset, alignment);
            let padding = aligned - range.offset;
            if padding.checked_add(size).map_or(true, |need| need > range.size) {
                continue;
            }

            let tail = FreeRange {
                offset: aligned + size,
                size: range.size - padding - size,
            };
            match (padding > 0, tail.size > 0) {
                (true, true) => {
                    self.free[index].size = padding;
                    self.free.insert(index + 1, tail);
                }
                (true, false) => self.free[index].size = padding,
                (false, true) => self.free[index] = tail,
                (false, false) => {
                    self.free.remove(index);
                }
            }

            self.used += size;
            self.live += 1;
            return Some(aligned);
        }

        None
    }

    /// Returns `offset..offset + size` to the free list.
    pub fn free(&mut self, offset: u64, size: u64) {
        debug_assert!(offset + size <= self.size, "range outside the block");
        let index = self.free.partition_point(|range| range.offset < offset);
        debug_assert!(
            index == 0 || self.free[index - 1].end() <= offset,
            "range overlaps a free range"
        );

        self.free.insert(index, FreeRange { offset, size });

        // Merge with the following range
        if index + 1 < self.free.len() && self.free[index].end() == self.free[index + 1].offset {
            self.free[index].size += self.free[index + 1].size;
            self.free.remove(index + 1);
        }
        // Merge with the preceding range
        if index > 0 && self.free[index - 1].end() == self.free[index].offset {
            self.free[index - 1].size += self.free[index].size;
            self.free.remove(index);
        }

        self.used -= size;
        self.live -= 1;
    }
}
