//! The epic contract: actions in, actions out, with a live state view.

use std::sync::Arc;

use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use subspace_store::{Action, StoreHandle};

use crate::error::Result;
use crate::state::StateStream;

pub type ActionStream = BoxStream<'static, Action>;

pub type EpicResult = Result<ActionStream>;

/// Anything that may expose the live store behind an epic engine.
pub trait StoreSource<S>: Send + Sync {
    fn store_handle(&self) -> Option<StoreHandle<S>>;
}

/// A resolved handle is trivially its own source. Used at subspace
/// boundaries to hand the narrowed store to the inner epic.
impl<S: 'static> StoreSource<S> for StoreHandle<S> {
    fn store_handle(&self) -> Option<StoreHandle<S>> {
        Some(self.clone())
    }
}

/// Third argument of every epic: shared dependencies plus the engine
/// the epic is running on.
pub struct EpicContext<S, D> {
    engine: Arc<dyn StoreSource<S>>,
    dependencies: Arc<D>,
}

impl<S, D> EpicContext<S, D> {
    pub fn new(engine: Arc<dyn StoreSource<S>>, dependencies: Arc<D>) -> Self {
        Self {
            engine,
            dependencies,
        }
    }

    pub fn engine(&self) -> &Arc<dyn StoreSource<S>> {
        &self.engine
    }

    pub fn dependencies(&self) -> &Arc<D> {
        &self.dependencies
    }

    /// Same dependencies, different engine.
    pub fn with_engine<C>(&self, engine: Arc<dyn StoreSource<C>>) -> EpicContext<C, D> {
        EpicContext {
            engine,
            dependencies: self.dependencies.clone(),
        }
    }
}

impl<S, D> Clone for EpicContext<S, D> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

/// Turns the stream of dispatched actions into a stream of actions to
/// dispatch. Failing here aborts registration; nothing is subscribed.
pub trait Epic<S, D>: Send + Sync {
    fn run(
        &self,
        actions: ActionStream,
        state: StateStream<S>,
        ctx: EpicContext<S, D>,
    ) -> EpicResult;
}

impl<S, D, F> Epic<S, D> for F
where
    F: Fn(ActionStream, StateStream<S>, EpicContext<S, D>) -> EpicResult + Send + Sync,
{
    fn run(
        &self,
        actions: ActionStream,
        state: StateStream<S>,
        ctx: EpicContext<S, D>,
    ) -> EpicResult {
        self(actions, state, ctx)
    }
}

/// Operators over action streams.
pub trait ActionStreamExt: Stream<Item = Action> + Send + Sized + 'static {
    /// Keep only actions of the given type.
    fn of_type(self, kind: impl Into<String>) -> ActionStream {
        let kind = kind.into();
        self.filter(move |action| future::ready(action.action_type() == kind))
            .boxed()
    }

    /// Keep only actions whose type is one of `kinds`.
    fn of_types<I, K>(self, kinds: I) -> ActionStream
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let kinds: Vec<String> = kinds.into_iter().map(Into::into).collect();
        self.filter(move |action| {
            future::ready(kinds.iter().any(|kind| kind == action.action_type()))
        })
        .boxed()
    }
}

impl<T> ActionStreamExt for T where T: Stream<Item = Action> + Send + Sized + 'static {}
