//! Fixed-capacity append-only table

use std::ops::Range;

use crate::core::error::LoadManifestError;

/// Append-only table whose storage is reserved up front and never moves.
///
/// Tracks how many rows have already been mirrored to the GPU so the sync
/// step can upload exactly the newly appended suffix.
#[derive(Debug)]
pub struct ManifestTable<T> {
    name: &'static str,
    entries: Vec<T>,
    capacity: usize,
    synced: usize,
}

impl<T> ManifestTable<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            entries: Vec::with_capacity(capacity),
            capacity,
            synced: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.entries.len()
    }

    /// Fail unless `count` more rows fit.
    pub fn ensure_room(&self, count: usize) -> Result<(), LoadManifestError> {
        if count > self.remaining() {
            return Err(LoadManifestError::CapacityExceeded {
                table: self.name,
                requested: count,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    /// Append a row and return its stable index.
    pub fn push(&mut self, entry: T) -> Result<u32, LoadManifestError> {
        self.ensure_room(1)?;
        let index = self.entries.len() as u32;
        self.entries.push(entry);
        Ok(index)
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.entries.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.entries.get_mut(index as usize)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    // --- Growth tracking ---

    /// Rows appended since the last [`mark_synced`](Self::mark_synced).
    pub fn unsynced(&self) -> Range<usize> {
        self.synced..self.entries.len()
    }

    pub fn new_entries(&self) -> &[T] {
        &self.entries[self.synced..]
    }

    pub fn mark_synced(&mut self) {
        self.synced = self.entries.len();
    }
}

impl<T> std::ops::Index<u32> for ManifestTable<T> {
    type Output = T;

    fn index(&self, index: u32) -> &T {
        &self.entries[index as usize]
    }
}

impl<T> std::ops::IndexMut<u32> for ManifestTable<T> {
    fn index_mut(&mut self, index: u32) -> &mut T {
        &mut self.entries[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut table = ManifestTable::new("test", 2);
        assert_eq!(table.push(10).unwrap(), 0);
        assert_eq!(table.push(11).unwrap(), 1);
        let err = table.push(12).unwrap_err();
        assert!(matches!(err, LoadManifestError::CapacityExceeded { table: "test", requested: 1, remaining: 0 }));
        assert_eq!(table.len(), 2);
        assert_eq!(table[1], 11);
    }

    #[test]
    fn test_storage_never_moves() {
        let mut table = ManifestTable::new("test", 64);
        table.push(0u64).unwrap();
        let first = table.as_slice().as_ptr();
        for i in 1..64 {
            table.push(i).unwrap();
        }
        assert_eq!(table.as_slice().as_ptr(), first);
    }

    #[test]
    fn test_unsynced_suffix() {
        let mut table = ManifestTable::new("test", 8);
        table.push('a').unwrap();
        table.push('b').unwrap();
        assert_eq!(table.unsynced(), 0..2);
        table.mark_synced();
        assert!(table.new_entries().is_empty());

        table.push('c').unwrap();
        assert_eq!(table.unsynced(), 2..3);
        assert_eq!(table.new_entries(), &['c']);
    }

    #[test]
    fn test_ensure_room() {
        let table: ManifestTable<u8> = ManifestTable::new("test", 3);
        assert!(table.ensure_room(3).is_ok());
        assert!(table.ensure_room(4).is_err());
    }
}
