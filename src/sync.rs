//! Synchronization primitives.
//!
//! [`parking_lot`] locks are used by default; the `loom` feature replaces them with [`loom`]
//! types exposing the same non-poisoning interface.

#[cfg(not(feature = "loom"))]
pub(crate) use parking_lot::{Mutex, RwLock};
#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::atomic::AtomicUsize;
#[cfg(not(feature = "loom"))]
pub(crate) use std::thread::yield_now;

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::AtomicUsize;
#[cfg(feature = "loom")]
pub(crate) use loom::thread::yield_now;
#[cfg(feature = "loom")]
pub(crate) use loom_lock::{Mutex, RwLock};

#[cfg(feature = "loom")]
mod loom_lock {
    use std::sync::PoisonError;

    /// [`loom`] mutex without lock poisoning.
    #[derive(Debug)]
    pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

    impl<T> Mutex<T> {
        pub(crate) fn new(value: T) -> Self {
            Self(loom::sync::Mutex::new(value))
        }

        pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// [`loom`] reader-writer lock without lock poisoning.
    #[derive(Debug)]
    pub(crate) struct RwLock<T>(loom::sync::RwLock<T>);

    impl<T> RwLock<T> {
        pub(crate) fn new(value: T) -> Self {
            Self(loom::sync::RwLock::new(value))
        }

        pub(crate) fn read(&self) -> loom::sync::RwLockReadGuard<'_, T> {
            self.0.read().unwrap_or_else(PoisonError::into_inner)
        }

        pub(crate) fn write(&self) -> loom::sync::RwLockWriteGuard<'_, T> {
            self.0.write().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
