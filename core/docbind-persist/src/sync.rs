//! Poison-tolerant access to the std locks guarding entity and session state.
//!
//! The guarded data is plain values replaced wholesale, so a panic while a
//! guard is held (say, inside a closure passed to [`Entity::modify`]) leaves
//! nothing half-built. Recovering the guard keeps one panicking caller from
//! turning every later access into a panic too.
//!
//! [`Entity::modify`]: crate::Entity::modify

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
