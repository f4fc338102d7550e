//! The store contract and an in-memory, action-recording implementation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tracing::trace;

use crate::action::Action;
use crate::sync::lock;

/// Dispatch / getState / subscribe, bound to one live store.
pub trait Store<S>: Send + Sync {
    fn dispatch(&self, action: Action);

    fn get_state(&self) -> S;

    /// Register a change listener. The listener stays attached until the
    /// returned [`Subscription`] is dropped or unsubscribed.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Shared handle to a live store.
pub type StoreHandle<S> = Arc<dyn Store<S>>;

/// Non-owning handle, held by middleware so it never keeps its store alive.
pub type WeakStore<S> = Weak<dyn Store<S>>;

/// Pure state update. No I/O, no side effects.
pub trait Reducer<S>: Send + Sync {
    fn reduce(&self, state: &mut S, action: &Action);
}

impl<S, F> Reducer<S> for F
where
    F: Fn(&mut S, &Action) + Send + Sync,
{
    fn reduce(&self, state: &mut S, action: &Action) {
        self(state, action)
    }
}

/// Hook into a store's dispatch pipeline.
pub trait Middleware<S>: Send + Sync {
    /// Called once, when the store is built.
    fn attach(&self, store: WeakStore<S>) {
        let _ = store;
    }

    /// Called after every reduction with the action and the new state.
    fn dispatched(&self, action: &Action, state: &S);
}

/// Detaches its listener when dropped.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

type ListenerList = Arc<Mutex<Vec<(u64, Listener)>>>;

/// Actions waiting for the dispatcher currently draining the queue.
#[derive(Default)]
struct Pending {
    queue: VecDeque<Action>,
    draining: bool,
}

/// In-memory store. Records every dispatched action for test assertions.
///
/// Each action runs record → reduce → notify listeners → middleware
/// before the next one starts. Dispatching while another action is in
/// flight (re-entrantly from a listener or middleware, or from another
/// thread) queues the action behind it; the dispatcher that found the
/// queue idle drains it in order. A dispatch that was queued behind
/// another thread's may return before its action was processed.
pub struct MemoryStore<S> {
    state: RwLock<S>,
    reducer: Box<dyn Reducer<S>>,
    middleware: Vec<Arc<dyn Middleware<S>>>,
    listeners: ListenerList,
    next_listener: AtomicU64,
    actions: Mutex<Vec<Action>>,
    pending: Mutex<Pending>,
}

impl<S> MemoryStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn builder(initial_state: S) -> MemoryStoreBuilder<S> {
        MemoryStoreBuilder {
            state: initial_state,
            reducer: None,
            middleware: Vec::new(),
        }
    }

    /// Every action dispatched so far, in dispatch order.
    pub fn actions(&self) -> Vec<Action> {
        lock(&self.actions).clone()
    }

    pub fn clear_actions(&self) {
        lock(&self.actions).clear();
    }

    fn process(&self, action: Action) {
        trace!(action_type = action.action_type(), "dispatch");
        lock(&self.actions).push(action.clone());

        let state = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            self.reducer.reduce(&mut state, &action);
            state.clone()
        };

        let listeners: Vec<Listener> = lock(&*self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener();
        }

        for middleware in &self.middleware {
            middleware.dispatched(&action, &state);
        }
    }

    /// Pop the next queued action, or hand the queue back as idle.
    fn next_pending(&self) -> Option<Action> {
        let mut pending = lock(&self.pending);
        let next = pending.queue.pop_front();
        if next.is_none() {
            pending.draining = false;
        }
        next
    }
}

/// Releases the queue if the draining dispatcher unwinds mid-action, so
/// the next dispatch picks up whatever is still queued.
struct DrainGuard<'a>(&'a Mutex<Pending>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).draining = false;
        }
    }
}

impl<S> Store<S> for MemoryStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn dispatch(&self, action: Action) {
        {
            let mut pending = lock(&self.pending);
            pending.queue.push_back(action);
            if pending.draining {
                trace!(queued = pending.queue.len(), "dispatch queued");
                return;
            }
            pending.draining = true;
        }

        let _guard = DrainGuard(&self.pending);
        while let Some(action) = self.next_pending() {
            self.process(action);
        }
    }

    fn get_state(&self) -> S {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        lock(&*self.listeners).push((id, listener));

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                lock(&*listeners).retain(|(other, _)| *other != id);
            }
        })
    }
}

pub struct MemoryStoreBuilder<S> {
    state: S,
    reducer: Option<Box<dyn Reducer<S>>>,
    middleware: Vec<Arc<dyn Middleware<S>>>,
}

impl<S> MemoryStoreBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn reducer(mut self, reducer: impl Reducer<S> + 'static) -> Self {
        self.reducer = Some(Box::new(reducer));
        self
    }

    /// Middleware runs in registration order.
    pub fn middleware(mut self, middleware: impl Middleware<S> + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Build the store and attach every middleware to it.
    pub fn build(self) -> Arc<MemoryStore<S>> {
        let reducer = self
            .reducer
            .unwrap_or_else(|| Box::new(|_: &mut S, _: &Action| {}) as Box<dyn Reducer<S>>);

        let store = Arc::new(MemoryStore {
            state: RwLock::new(self.state),
            reducer,
            middleware: self.middleware,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(0),
            actions: Mutex::new(Vec::new()),
            pending: Mutex::new(Pending::default()),
        });

        let handle: StoreHandle<S> = store.clone();
        let weak = Arc::downgrade(&handle);
        for middleware in &store.middleware {
            middleware.attach(weak.clone());
        }
        store
    }
}
