use std::marker::PhantomData;

/// Handle returned by the arena allocator. Handles are never reused, even
/// after the slot they point to has been removed.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ArenaHandle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ArenaHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaHandle<T> {}

impl<T> ArenaHandle<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index: index as u32,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Append-only slot arena. Removing an entry leaves a tombstone so that every
/// handle issued earlier keeps pointing at either its original value or
/// nothing.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Handle the next call to [`Arena::allocate`] will return.
    pub fn next_handle(&self) -> ArenaHandle<T> {
        ArenaHandle::new(self.slots.len())
    }

    pub fn allocate(&mut self, value: T) -> ArenaHandle<T> {
        let handle = self.next_handle();
        self.slots.push(Some(value));
        self.live += 1;
        handle
    }

    pub fn get(&self, handle: ArenaHandle<T>) -> Option<&T> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: ArenaHandle<T>) -> Option<&mut T> {
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Tombstones the slot and hands back its value.
    pub fn remove(&mut self, handle: ArenaHandle<T>) -> Option<T> {
        let taken = self.slots.get_mut(handle.index()).and_then(Option::take);
        if taken.is_some() {
            self.live -= 1;
        }
        taken
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaHandle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (ArenaHandle::new(index), value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ArenaHandle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|value| (ArenaHandle::new(index), value)))
    }

    /// Number of slots ever allocated, tombstones included.
    pub fn capacity_used(&self) -> usize {
        self.slots.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_roundtrip() {
        let mut arena = Arena::new();
        let handle_a = arena.allocate("hello");
        let handle_b = arena.allocate("world");
        assert_eq!(arena.get(handle_a), Some(&"hello"));
        assert_eq!(arena.get(handle_b), Some(&"world"));
    }

    #[test]
    fn removed_slots_are_not_reused() {
        let mut arena = Arena::new();
        let first = arena.allocate(1);
        assert_eq!(arena.remove(first), Some(1));
        assert_eq!(arena.get(first), None);
        let second = arena.allocate(2);
        assert_ne!(first.index(), second.index());
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.capacity_used(), 2);
    }
}
