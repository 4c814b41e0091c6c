//! Forwarding Table - Address mapping during compaction
//!
//! One table per chunk of the compacting old space, mapping the address of
//! every marked object to its post-compaction address. Objects that stay in
//! place (pinned chunks, unaligned chunks) map to themselves. An address
//! inside a planned chunk without an entry belongs to a dead object.
//!
//! Usage:
//! 1. Build the tables while planning
//! 2. Look up addresses while fixing up references
//! 3. Keep them until reference processing and code cache cleaning have
//!    resolved their weak slots
//! 4. Drop them at the end of the pass

use indexmap::IndexMap;

/// ForwardingTable - mapping old addresses to new addresses for one chunk
#[derive(Debug, Clone)]
pub struct ForwardingTable {
    /// Chunk base address
    chunk_start: usize,

    /// Chunk size in bytes
    chunk_size: usize,

    /// Forwarding entries: old offset -> new address, in address order
    entries: IndexMap<usize, usize>,
}

impl ForwardingTable {
    /// Create forwarding table for a chunk
    ///
    /// # Arguments
    /// * `chunk_start` - Base address of the chunk
    /// * `chunk_size` - Size of the chunk in bytes
    pub fn new(chunk_start: usize, chunk_size: usize) -> Self {
        Self {
            chunk_start,
            chunk_size,
            entries: IndexMap::new(),
        }
    }

    fn offset(&self, address: usize) -> Option<usize> {
        let offset = address.checked_sub(self.chunk_start)?;
        (offset < self.chunk_size).then_some(offset)
    }

    /// Add forwarding entry
    ///
    /// Returns `false` if `old_address` lies outside the chunk.
    pub fn add_entry(&mut self, old_address: usize, new_address: usize) -> bool {
        match self.offset(old_address) {
            Some(offset) => {
                self.entries.insert(offset, new_address);
                true
            }
            None => {
                log::warn!(
                    "forwarding entry {:#x} outside of chunk {:#x}",
                    old_address,
                    self.chunk_start
                );
                false
            }
        }
    }

    /// New address of the object at `old_address`
    pub fn lookup(&self, old_address: usize) -> Option<usize> {
        let offset = self.offset(old_address)?;
        self.entries.get(&offset).copied()
    }

    /// Whether `address` lies in the chunk this table covers
    #[inline]
    pub fn covers(&self, address: usize) -> bool {
        self.offset(address).is_some()
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn chunk_start(&self) -> usize {
        self.chunk_start
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Entries that actually move, as (old address, new address)
    pub fn moved_entries(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries
            .iter()
            .map(move |(&offset, &new)| (self.chunk_start + offset, new))
            .filter(|(old, new)| old != new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_entry_rejects_old_address_before_chunk() {
        let mut table = ForwardingTable::new(0x1000, 0x1000);
        assert!(!table.add_entry(0x800, 0x3000));
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn test_add_entry_rejects_old_address_beyond_chunk() {
        let mut table = ForwardingTable::new(0x1000, 0x1000);
        assert!(!table.add_entry(0x2000, 0x3000));
    }

    #[test]
    fn test_lookup_returns_mapped_address() {
        let mut table = ForwardingTable::new(0x1000, 0x1000);
        assert!(table.add_entry(0x1040, 0x1040));
        assert!(table.add_entry(0x1080, 0x1058));
        assert_eq!(table.lookup(0x1080), Some(0x1058));
        assert_eq!(table.lookup(0x10c0), None);
        assert!(table.covers(0x10c0));
        assert!(!table.covers(0x2000));
        assert_eq!(table.moved_entries().collect::<Vec<_>>(), vec![(0x1080, 0x1058)]);
    }
}
