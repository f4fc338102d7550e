//! Minimal unidirectional store.
//!
//! Actions are dispatched, reduced into state, and handed to middleware.
//! Actions are tagged scoped or global so namespace boundaries can route
//! them without inspecting conventional field names.

pub mod action;
pub mod store;
pub mod sync;

pub use action::{
    global_action, is_global_action, namespace_action, namespaced_action, strip_namespace,
    Action, ActionData, GLOBAL_MARKER, NAMESPACE_SEPARATOR, TYPE_FIELD,
};
pub use store::{
    Listener, MemoryStore, MemoryStoreBuilder, Middleware, Reducer, Store, StoreHandle,
    Subscription, WeakStore,
};
