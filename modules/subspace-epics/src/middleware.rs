//! Epic middleware: feeds dispatched actions and state into running
//! epics and dispatches whatever they emit.

use std::sync::{Arc, Mutex, OnceLock};

use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use subspace_store::sync::lock;
use subspace_store::{Action, Middleware, StoreHandle, WeakStore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::epic::{ActionStream, Epic, EpicContext, StoreSource};
use crate::error::{EpicError, Result};
use crate::state::{Cursor, StateFeed, Versioned};

#[derive(Debug, Clone, TypedBuilder)]
pub struct MiddlewareOptions<D> {
    /// Handed to every epic through [`EpicContext::dependencies`].
    pub dependencies: D,
}

impl<D: Default> Default for MiddlewareOptions<D> {
    fn default() -> Self {
        Self {
            dependencies: D::default(),
        }
    }
}

/// The store binding an epic engine carries. The namespacing-aware
/// factory exposes it to epics; the ordinary one keeps it private.
struct Engine<S> {
    expose_store: bool,
    store: OnceLock<WeakStore<S>>,
}

impl<S> Engine<S> {
    fn bound_store(&self) -> Option<WeakStore<S>> {
        self.store.get().cloned()
    }
}

impl<S> StoreSource<S> for Engine<S> {
    fn store_handle(&self) -> Option<StoreHandle<S>> {
        if !self.expose_store {
            return None;
        }
        self.store.get()?.upgrade()
    }
}

/// An action plus the state its reduction produced.
type Delivery<S> = (Action, Versioned<S>);

/// Inbound channels of the running epics.
struct Inputs<S> {
    next_id: u64,
    senders: Vec<(u64, UnboundedSender<Delivery<S>>)>,
}

struct Inner<S, D> {
    engine: Arc<Engine<S>>,
    dependencies: Arc<D>,
    feed: OnceLock<StateFeed<S>>,
    /// Also serializes publishing with registration: a new epic's state
    /// subscription and inbound channel start at the same dispatch.
    inputs: Mutex<Inputs<S>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, D> Drop for Inner<S, D> {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

/// Runs epics against the store it is attached to.
///
/// Cheap to clone; clones share the same engine and running epics. Add
/// one clone to the store with [`MemoryStoreBuilder::middleware`] and
/// keep another to call [`run`](Self::run).
///
/// [`MemoryStoreBuilder::middleware`]: subspace_store::MemoryStoreBuilder::middleware
pub struct EpicMiddleware<S, D = ()> {
    inner: Arc<Inner<S, D>>,
}

impl<S, D> Clone for EpicMiddleware<S, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Namespacing-aware factory: the engine exposes its store, which
/// subspaced epics require.
pub fn create_epic_middleware<S, D>(options: MiddlewareOptions<D>) -> EpicMiddleware<S, D>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    EpicMiddleware::with_engine(options, true)
}

impl<S, D> EpicMiddleware<S, D>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    /// Ordinary factory. Plain epics run fine; subspaced epics fail with
    /// [`EpicError::StoreNotFound`].
    pub fn new(options: MiddlewareOptions<D>) -> Self {
        Self::with_engine(options, false)
    }

    fn with_engine(options: MiddlewareOptions<D>, expose_store: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine: Arc::new(Engine {
                    expose_store,
                    store: OnceLock::new(),
                }),
                dependencies: Arc::new(options.dependencies),
                feed: OnceLock::new(),
                inputs: Mutex::new(Inputs {
                    next_id: 0,
                    senders: Vec::new(),
                }),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start an epic. Must be called inside a tokio runtime, after the
    /// middleware has been attached to a store.
    ///
    /// The epic is invoked synchronously, so wiring errors surface here
    /// before any action reaches it. Its output is dispatched back into
    /// the store in emission order.
    ///
    /// While the epic handles an action, its state stream's `value()` is
    /// the state that action's reduction produced.
    pub fn run<E>(&self, epic: E) -> Result<()>
    where
        E: Epic<S, D> + 'static,
    {
        let feed = self.inner.feed.get().ok_or(EpicError::NotAttached)?;
        let store = self
            .inner
            .engine
            .bound_store()
            .ok_or(EpicError::NotAttached)?;

        // Registered before the epic is invoked so nothing dispatched in
        // between is missed; rolled back if the epic fails.
        let (input_tx, input_rx) = mpsc::unbounded::<Delivery<S>>();
        let (id, cursor, state) = {
            let mut inputs = lock(&self.inner.inputs);
            let cursor = Cursor::new(feed.snapshot());
            let state = feed.stream_at(cursor.clone());
            let id = inputs.next_id;
            inputs.next_id += 1;
            inputs.senders.push((id, input_tx));
            (id, cursor, state)
        };
        let actions = input_rx
            .map(move |(action, snapshot)| {
                cursor.advance(&snapshot);
                action
            })
            .boxed();
        let engine: Arc<dyn StoreSource<S>> = self.inner.engine.clone();
        let ctx = EpicContext::new(engine, self.inner.dependencies.clone());

        let output = match epic.run(actions, state, ctx) {
            Ok(output) => output,
            Err(err) => {
                lock(&self.inner.inputs)
                    .senders
                    .retain(|(other, _)| *other != id);
                debug!(error = %err, "epic failed to start");
                return Err(err);
            }
        };

        let task = tokio::spawn(forward_output(output, store));
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        debug!(running = tasks.len(), "epic started");
        Ok(())
    }

    /// Cancel every running epic. Dropping their pipelines unsubscribes
    /// all derived streams.
    pub fn stop(&self) {
        lock(&self.inner.inputs).senders.clear();
        let mut tasks = lock(&self.inner.tasks);
        for task in tasks.drain(..) {
            task.abort();
        }
        debug!("epics stopped");
    }
}

impl<S, D> StoreSource<S> for EpicMiddleware<S, D>
where
    S: Send + Sync,
    D: Send + Sync,
{
    fn store_handle(&self) -> Option<StoreHandle<S>> {
        self.inner.engine.store_handle()
    }
}

impl<S, D> Middleware<S> for EpicMiddleware<S, D>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn attach(&self, store: WeakStore<S>) {
        let Some(live) = store.upgrade() else {
            return;
        };
        let feed = StateFeed::new(live.get_state());
        if self.inner.feed.set(feed).is_err() || self.inner.engine.store.set(store).is_err() {
            warn!("epic middleware attached to more than one store; keeping the first");
        }
    }

    fn dispatched(&self, action: &Action, state: &S) {
        let Some(feed) = self.inner.feed.get() else {
            return;
        };
        let mut inputs = lock(&self.inner.inputs);
        // State first, so state subscribers never lag the action.
        feed.publish(state.clone());
        let snapshot = feed.snapshot();
        inputs
            .senders
            .retain(|(_, input)| input.unbounded_send((action.clone(), snapshot.clone())).is_ok());
    }
}

async fn forward_output<S: 'static>(mut output: ActionStream, store: WeakStore<S>) {
    while let Some(action) = output.next().await {
        let Some(store) = store.upgrade() else {
            warn!(
                action_type = action.action_type(),
                "store dropped, discarding epic output"
            );
            return;
        };
        store.dispatch(action);
    }
    debug!("epic completed");
}
