//! Lock helpers shared by the store and its middleware.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `mutex`, recovering the guard if a previous holder panicked.
///
/// Every value guarded in these crates stays consistent across a panic
/// (whole values are swapped in, never half-written), so a poisoned lock
/// is safe to keep using.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
