//! A simple spin-lock guarding a value, in the spirit of the teacher's bare
//! `Spinlock` marker lock (`sync::spinlock::Spinlock`), generalized to wrap
//! the data it protects instead of being acquired next to a raw pointer.
//!
//! Real xv6 disables interrupts for the duration of every spinlock hold, to
//! stop a timer interrupt from re-entering the same CPU while a lock is held.
//! That machinery lives in the trap/interrupt glue, which is an external
//! collaborator for this crate (see `hal`), so this type is a plain
//! mutual-exclusion primitive; interrupt-disable nesting is tracked
//! separately, only around the single global task-table lock, in
//! `proc::cpu::Cpu` and `proc::table::TaskTable::lock`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

pub struct Spinlock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Spinlock<T> {
        Spinlock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
        SpinlockGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinlockGuard { lock: self })
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

pub struct SpinlockGuard<'l, T> {
    lock: &'l Spinlock<T>,
}

impl<'l, T> SpinlockGuard<'l, T> {
    /// The lock this guard was taken from, so a caller that needs to drop
    /// and later reacquire it (the `sleep(channel, lock)` handoff, spec
    /// §4.4) doesn't have to thread the `&Spinlock<T>` through separately.
    pub fn source(&self) -> &'l Spinlock<T> {
        self.lock
    }
}

impl<'l, T> Deref for SpinlockGuard<'l, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}
impl<'l, T> DerefMut for SpinlockGuard<'l, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
impl<'l, T> Drop for SpinlockGuard<'l, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
