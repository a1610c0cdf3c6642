//! Functions and utilities for synchronizing state between the cooperative
//! worker (see [`crate::app`]) and the main loop, and for masking interrupts
//! around timing-sensitive bus transactions (spec §5: "Interrupt masking is
//! scoped: acquired before any 1-Wire reset, released on every exit path").
//!
//! This is a direct, target-agnostic port of the teacher crate's
//! `sync`/`critical_section` modules: the GBA-specific `IME`-register
//! critical section backend and the ARM7TDMI `ldmia`/`stmia` fast paths in
//! `Static<T>` are replaced with a plain [`critical_section`]-backed
//! implementation, since System 573 has no equivalent inline-asm story in
//! safe, portable Rust. The API surface (`Static`, `RawMutex`, `Mutex`,
//! `InitOnce`) is unchanged.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ops::{Deref, DerefMut};
use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

/// Runs a function with interrupts masked.
///
/// This should not be done without good reason: the worker's suspension
/// points (spec §5) are exactly the places where interrupts must *not* be
/// masked, since long delays would otherwise stall vertical-blank servicing
/// on the host system. Bus resets and ACK polling loops are the only
/// legitimate callers.
pub fn disable_irqs<T>(func: impl FnOnce() -> T) -> T {
    critical_section::with(|_cs| func())
}

/// A mutex that prevents code from running in both an interrupt handler and
/// normal code at the same time.
///
/// Note that this does not support blocking like a typical mutex, and
/// instead mainly exists for memory safety reasons (mirrors the teacher's
/// `RawMutex`, used by [`crate::chip`] drivers to guard in-flight bus
/// transactions).
pub struct RawMutex(Static<bool>);

impl RawMutex {
    /// Creates a new lock.
    pub const fn new() -> Self {
        RawMutex(Static::new(false))
    }

    fn raw_lock(&self) -> bool {
        if self.0.replace(true) {
            false
        } else {
            compiler_fence(Ordering::Acquire);
            true
        }
    }

    fn raw_unlock(&self) {
        compiler_fence(Ordering::Release);
        if !self.0.replace(false) {
            already_locked();
        }
    }

    /// Returns a guard for this lock, or panics if there is another lock
    /// active.
    pub fn lock(&self) -> RawMutexGuard<'_> {
        self.try_lock().unwrap_or_else(|| already_locked())
    }

    /// Returns a guard for this lock, or `None` if there is another lock
    /// active.
    pub fn try_lock(&self) -> Option<RawMutexGuard<'_>> {
        if self.raw_lock() {
            Some(RawMutexGuard(self))
        } else {
            None
        }
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

#[inline(never)]
fn already_locked() -> ! {
    panic!("this lock has already been locked elsewhere");
}

/// A guard representing an active lock on a [`RawMutex`].
pub struct RawMutexGuard<'a>(&'a RawMutex);

impl Drop for RawMutexGuard<'_> {
    fn drop(&mut self) {
        self.0.raw_unlock();
    }
}

/// A mutex that protects an object from being accessed from both an
/// interrupt handler and normal code at once.
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    /// Creates a new lock containing a given value.
    pub const fn new(t: T) -> Self {
        Mutex { raw: RawMutex::new(), data: UnsafeCell::new(t) }
    }

    /// Returns a guard for this lock, or panics if there is another lock
    /// active.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.try_lock().unwrap_or_else(|| already_locked())
    }

    /// Returns a guard for this lock, or `None` if there is another lock
    /// active.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.raw_lock() {
            Some(MutexGuard { underlying: self, ptr: self.data.get() })
        } else {
            None
        }
    }
}

unsafe impl<T> Send for Mutex<T> {}
unsafe impl<T> Sync for Mutex<T> {}

/// A guard representing an active lock on a [`Mutex`].
pub struct MutexGuard<'a, T> {
    underlying: &'a Mutex<T>,
    ptr: *mut T,
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.underlying.raw.raw_unlock();
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.ptr }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.ptr }
    }
}

/// A helper that implements static variables shared between interrupt and
/// normal code, replacing a value atomically with respect to interrupts.
///
/// Unlike the teacher's version this has no architecture-specific fast
/// path; every access masks interrupts for the duration of the copy. Given
/// the sizes involved here (bytes, small structs, never a whole [`Dump`])
/// this is not a meaningful cost.
///
/// [`Dump`]: crate::dump::Dump
pub struct Static<T> {
    data: UnsafeCell<T>,
}

impl<T> Static<T> {
    /// Creates a new static variable.
    pub const fn new(val: T) -> Self {
        Static { data: UnsafeCell::new(val) }
    }

    /// Replaces the current value of the static variable with another, and
    /// returns the old value.
    pub fn replace(&self, val: T) -> T {
        critical_section::with(|_cs| unsafe { ptr::replace(self.data.get(), val) })
    }

    /// Extracts the interior value of the static variable.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Copy> Static<T> {
    /// Writes a new value into this static variable.
    pub fn write(&self, val: T) {
        critical_section::with(|_cs| unsafe { ptr::write_volatile(self.data.get(), val) });
    }

    /// Reads a value from this static variable.
    pub fn read(&self) -> T {
        critical_section::with(|_cs| unsafe { ptr::read_volatile(self.data.get()) })
    }
}

impl<T: Default> Default for Static<T> {
    fn default() -> Self {
        Static::new(T::default())
    }
}

unsafe impl<T> Send for Static<T> {}
unsafe impl<T> Sync for Static<T> {}

enum Void {}

/// A helper type that ensures a particular value is only initialized once,
/// used by [`crate::catalog::CatalogStore`] to lazily bind the memory-mapped
/// catalog blob.
pub struct InitOnce<T> {
    state: Static<u8>,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> InitOnce<T> {
    /// Creates a new uninitialized object.
    pub const fn new() -> Self {
        InitOnce { state: Static::new(0), value: UnsafeCell::new(MaybeUninit::uninit()) }
    }

    /// Gets the contents of this state, or initializes it if it has not
    /// already been initialized. The initializer is guaranteed to run at
    /// most once.
    pub fn get(&self, initializer: impl FnOnce() -> T) -> &T {
        match self.try_get(|| -> Result<T, Void> { Ok(initializer()) }) {
            Ok(v) => v,
            Err(v) => match v {},
        }
    }

    /// Fallible variant of [`Self::get`]: the initializer may fail, in which
    /// case it will be retried on the next call.
    pub fn try_get<E>(&self, initializer: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        unsafe {
            if self.state.read() != 2 {
                if self.state.replace(1) != 0 {
                    panic!("InitOnce is already being initialized elsewhere");
                }

                let init = match initializer() {
                    Ok(v) => v,
                    Err(e) => {
                        assert_eq!(self.state.replace(0), 1);
                        return Err(e);
                    }
                };
                ptr::write((*self.value.get()).as_mut_ptr(), init);
                assert_eq!(self.state.replace(2), 1);
            }
            Ok(&*(*self.value.get()).as_ptr())
        }
    }
}

impl<T> Drop for InitOnce<T> {
    fn drop(&mut self) {
        if self.state.read() == 2 {
            unsafe {
                ptr::drop_in_place((*self.value.get()).as_mut_ptr());
            }
        }
    }
}

unsafe impl<T: Send> Send for InitOnce<T> {}
unsafe impl<T: Sync> Sync for InitOnce<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mutex_excludes_reentry() {
        let m = RawMutex::new();
        let guard = m.lock();
        assert!(m.try_lock().is_none());
        drop(guard);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn static_roundtrips() {
        let s = Static::new(42u32);
        assert_eq!(s.read(), 42);
        assert_eq!(s.replace(7), 42);
        assert_eq!(s.read(), 7);
    }

    #[test]
    fn init_once_runs_once() {
        let calls = Mutex::new(0u32);
        let once: InitOnce<u32> = InitOnce::new();

        for _ in 0..3 {
            once.get(|| {
                *calls.lock() += 1;
                99
            });
        }

        assert_eq!(*calls.lock(), 1);
    }
}
