use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    // (lock id, read guards held by this thread)
    static HELD_READS: RefCell<Vec<(u64, usize)>> = const { RefCell::new(Vec::new()) };
}

fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

fn held_reads(lock_id: u64) -> usize {
    HELD_READS.with(|held| {
        held.borrow()
            .iter()
            .find(|(id, _)| *id == lock_id)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    })
}

fn adjust_held_reads(lock_id: u64, increment: bool) {
    HELD_READS.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(position) = held.iter().position(|(id, _)| *id == lock_id) {
            if increment {
                held[position].1 += 1;
            } else {
                held[position].1 -= 1;
                if held[position].1 == 0 {
                    held.swap_remove(position);
                }
            }
        } else if increment {
            held.push((lock_id, 1));
        }
    });
}

/// Reader/writer lock guarding registry state.
///
/// Besides the lock itself it keeps an observable lock count (`> 0` readers,
/// `-1` writer) and the token of the thread holding the write side, so that a
/// thread trying to write while it already reads or writes the same registry
/// is caught instead of deadlocking.
#[derive(Debug)]
pub struct RegistryLock<T> {
    id: u64,
    inner: RwLock<T>,
    lock_count: AtomicI32,
    writer: AtomicU64,
}

impl<T> RegistryLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inner: RwLock::new(value),
            lock_count: AtomicI32::new(0),
            writer: AtomicU64::new(0),
        }
    }

    pub fn read(&self) -> RegistryReadGuard<'_, T> {
        assert!(
            !self.is_write_locked_by_current_thread(),
            "registry read requested while this thread holds the write lock"
        );
        // A nested read must not queue behind a waiting writer.
        let guard = if held_reads(self.id) > 0 {
            self.inner.read_recursive()
        } else {
            self.inner.read()
        };
        adjust_held_reads(self.id, true);
        self.lock_count.fetch_add(1, Ordering::AcqRel);
        RegistryReadGuard { lock: self, guard }
    }

    pub fn write(&self) -> RegistryWriteGuard<'_, T> {
        assert!(
            !self.is_write_locked_by_current_thread(),
            "re-entrant registry write lock"
        );
        assert!(
            held_reads(self.id) == 0,
            "registry write requested while this thread holds a read lock"
        );
        let guard = self.inner.write();
        self.writer.store(thread_token(), Ordering::Release);
        self.lock_count.store(-1, Ordering::Release);
        RegistryWriteGuard { lock: self, guard }
    }

    pub fn lock_count(&self) -> i32 {
        self.lock_count.load(Ordering::Acquire)
    }

    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.writer.load(Ordering::Acquire) == thread_token()
    }
}

pub struct RegistryReadGuard<'a, T> {
    lock: &'a RegistryLock<T>,
    guard: RwLockReadGuard<'a, T>,
}

impl<T> Deref for RegistryReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for RegistryReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock_count.fetch_sub(1, Ordering::AcqRel);
        adjust_held_reads(self.lock.id, false);
    }
}

pub struct RegistryWriteGuard<'a, T> {
    lock: &'a RegistryLock<T>,
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Deref for RegistryWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for RegistryWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for RegistryWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.writer.store(0, Ordering::Release);
        self.lock.lock_count.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_count_tracks_guards() {
        let lock = RegistryLock::new(5);
        {
            let a = lock.read();
            let b = lock.read();
            assert_eq!(*a + *b, 10);
            assert_eq!(lock.lock_count(), 2);
        }
        assert_eq!(lock.lock_count(), 0);
        {
            let mut w = lock.write();
            *w = 6;
            assert_eq!(lock.lock_count(), -1);
            assert!(lock.is_write_locked_by_current_thread());
        }
        assert_eq!(*lock.read(), 6);
        assert!(!lock.is_write_locked_by_current_thread());
    }

    #[test]
    #[should_panic(expected = "re-entrant registry write lock")]
    fn reentrant_write_is_rejected() {
        let lock = RegistryLock::new(());
        let _outer = lock.write();
        let _inner = lock.write();
    }

    #[test]
    #[should_panic(expected = "holds a read lock")]
    fn write_while_reading_is_rejected() {
        let lock = RegistryLock::new(());
        let _read = lock.read();
        let _write = lock.write();
    }

    #[test]
    fn separate_locks_do_not_interfere() {
        let first = RegistryLock::new(1);
        let second = RegistryLock::new(2);
        let _read = first.read();
        let mut write = second.write();
        *write += 1;
        assert_eq!(*write, 3);
    }
}
