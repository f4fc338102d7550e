//! Store-handle lookup on an epic engine.

use subspace_store::StoreHandle;

use crate::epic::StoreSource;
use crate::error::{EpicError, Result};

/// Resolve the live store an engine is bound to.
///
/// Only engines from [`create_epic_middleware`](crate::create_epic_middleware)
/// (or a subspace boundary) expose their store; anything else fails with
/// [`EpicError::StoreNotFound`].
pub fn locate<S>(engine: &(impl StoreSource<S> + ?Sized)) -> Result<StoreHandle<S>> {
    engine.store_handle().ok_or(EpicError::StoreNotFound)
}
