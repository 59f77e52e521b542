//! Fixed-capacity slot allocation for the bindless descriptor tables.

use std::collections::BTreeSet;

use thiserror::Error;

pub use hal::DescriptorIndex;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("descriptor table of capacity {capacity} is exhausted")]
pub struct CapacityError {
    pub capacity: u32,
}

/// Free list of descriptor slot indices.
///
/// Slots below the high-water mark are either allocated or returned.
/// Allocation hands out the smallest returned index first and only grows
/// the mark when nothing was returned. Freeing the slot right below the
/// mark shrinks it, together with any returned slots that end up at the
/// new tail, so a fully drained list starts over from zero.
///
/// The list is not synchronized. The device keeps its tables behind a lock.
#[derive(Debug)]
pub struct FreeList {
    returned: BTreeSet<DescriptorIndex>,
    high_water: DescriptorIndex,
    capacity: u32,
}

impl FreeList {
    pub fn new(capacity: u32) -> Self {
        Self {
            returned: BTreeSet::new(),
            high_water: 0,
            capacity,
        }
    }

    pub fn allocate(&mut self) -> Result<DescriptorIndex, CapacityError> {
        if let Some(index) = self.returned.pop_first() {
            return Ok(index);
        }
        if self.high_water == self.capacity {
            return Err(CapacityError {
                capacity: self.capacity,
            });
        }
        let index = self.high_water;
        self.high_water += 1;
        Ok(index)
    }

    /// Returns `index` to the list.
    ///
    /// Freeing an index that is not allocated breaks the list.
    pub fn deallocate(&mut self, index: DescriptorIndex) {
        strict_assert!(index < self.high_water);
        if index + 1 == self.high_water {
            self.high_water = index;
            while self.high_water > 0 && self.returned.remove(&(self.high_water - 1)) {
                self.high_water -= 1;
            }
        } else {
            let inserted = self.returned.insert(index);
            strict_assert!(inserted, "descriptor slot {} freed twice", index);
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.high_water as usize - self.returned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn high_water_mark(&self) -> DescriptorIndex {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_list_counts_up() {
        let mut list = FreeList::new(4);
        let indices = (0..4).map(|_| list.allocate().unwrap()).collect::<Vec<_>>();
        assert_eq!(indices, [0, 1, 2, 3]);
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn exhaustion_at_capacity() {
        let mut list = FreeList::new(3);
        for _ in 0..3 {
            list.allocate().unwrap();
        }
        assert_eq!(list.allocate(), Err(CapacityError { capacity: 3 }));
        list.deallocate(1);
        assert_eq!(list.allocate(), Ok(1));
    }

    #[test]
    fn zero_capacity() {
        let mut list = FreeList::new(0);
        assert!(list.allocate().is_err());
    }

    #[test]
    fn reuse_prefers_smallest() {
        let mut list = FreeList::new(8);
        for _ in 0..6 {
            list.allocate().unwrap();
        }
        list.deallocate(4);
        list.deallocate(1);
        list.deallocate(3);
        assert_eq!(list.allocate(), Ok(1));
        assert_eq!(list.allocate(), Ok(3));
        assert_eq!(list.allocate(), Ok(4));
        assert_eq!(list.allocate(), Ok(6));
    }

    #[test]
    fn tail_free_shrinks_mark() {
        let mut list = FreeList::new(8);
        for _ in 0..5 {
            list.allocate().unwrap();
        }
        list.deallocate(2);
        list.deallocate(3);
        assert_eq!(list.high_water_mark(), 5);
        list.deallocate(4);
        // 4 is the tail, 3 and 2 follow it down.
        assert_eq!(list.high_water_mark(), 2);
        assert_eq!(list.len(), 2);
        assert!(list.returned.is_empty());
    }

    #[test]
    fn freed_tail_comes_back_first() {
        let mut list = FreeList::new(8);
        for _ in 0..5 {
            list.allocate().unwrap();
        }
        list.deallocate(4);
        assert_eq!(list.allocate(), Ok(4));
    }

    #[test]
    fn round_trip_any_order() {
        let orders: [&[u32]; 3] = [&[0, 1, 2, 3, 4], &[4, 3, 2, 1, 0], &[2, 4, 0, 3, 1]];
        for order in orders {
            let mut list = FreeList::new(5);
            let first = (0..5).map(|_| list.allocate().unwrap()).collect::<BTreeSet<_>>();
            for &index in order {
                list.deallocate(index);
            }
            assert!(list.is_empty());
            let second = (0..5).map(|_| list.allocate().unwrap()).collect::<BTreeSet<_>>();
            assert_eq!(first, second);
        }
    }
}
