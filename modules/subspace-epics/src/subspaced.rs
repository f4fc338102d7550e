//! Subspaced epics.
//!
//! Wrapping an epic narrows the state it observes to a substate and
//! scopes its actions to a namespace:
//!
//! ```text
//!   "ns/TEST" ──strip──▶ "TEST" ──▶ inner epic ──▶ "VERIFY" ──prefix──▶ "ns/VERIFY"
//!   global "X" ───────────────────▶ inner epic ──▶ global "Y" ─────────▶ global "Y"
//! ```
//!
//! Scoped actions outside the namespace never reach the inner epic.

use std::fmt;
use std::sync::Arc;

use futures::future;
use futures::StreamExt;
use serde_json::Value;
use subspace_store::{
    namespace_action, strip_namespace, Action, Listener, Store, StoreHandle, Subscription,
};
use tracing::trace;

use crate::epic::{ActionStream, Epic, EpicContext, EpicResult, StoreSource};
use crate::locate::locate;
use crate::state::{SelectFn, StateStream};

/// State that supports top-level property access by name.
pub trait KeyedState {
    type Child;

    fn select_key(&self, key: &str) -> Self::Child;
}

/// Missing keys read as `null`, the way an absent property would.
impl KeyedState for Value {
    type Child = Value;

    fn select_key(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or(Value::Null)
    }
}

/// How to pick a substate out of the parent state.
pub enum Selector<S, C> {
    Function(SelectFn<S, C>),
    /// Top-level property of the parent state. Also the default namespace.
    Key { key: String, select: SelectFn<S, C> },
}

impl<S, C> Selector<S, C> {
    pub fn from_fn(select: impl Fn(&S) -> C + Send + Sync + 'static) -> Self {
        Selector::Function(Arc::new(select))
    }

    fn into_parts(self) -> (SelectFn<S, C>, Option<String>) {
        match self {
            Selector::Function(select) => (select, None),
            Selector::Key { key, select } => (select, Some(key)),
        }
    }
}

impl<S> Selector<S, S::Child>
where
    S: KeyedState + 'static,
{
    pub fn key(key: impl Into<String>) -> Self {
        let key = key.into();
        let property = key.clone();
        Selector::Key {
            key,
            select: Arc::new(move |state: &S| state.select_key(&property)),
        }
    }
}

impl<S> From<&str> for Selector<S, S::Child>
where
    S: KeyedState + 'static,
{
    fn from(key: &str) -> Self {
        Selector::key(key)
    }
}

impl<S> From<String> for Selector<S, S::Child>
where
    S: KeyedState + 'static,
{
    fn from(key: String) -> Self {
        Selector::key(key)
    }
}

impl<S, C> fmt::Debug for Selector<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Function(_) => f.write_str("Selector::Function"),
            Selector::Key { key, .. } => write!(f, "Selector::Key({key:?})"),
        }
    }
}

/// A substate selector and namespace, ready to wrap epics.
pub struct Subspaced<S, C> {
    select: SelectFn<S, C>,
    namespace: Option<Arc<str>>,
}

/// Build a subspace from a selector and an optional namespace.
///
/// A key selector with no explicit namespace uses the key as its
/// namespace. A function selector with no namespace only narrows state.
pub fn subspaced<S, C>(
    selector: impl Into<Selector<S, C>>,
    namespace: Option<&str>,
) -> Subspaced<S, C> {
    let (select, key) = selector.into().into_parts();
    let namespace: Option<Arc<str>> = namespace.map(str::to_owned).or(key).map(Arc::from);
    Subspaced { select, namespace }
}

impl<S, C> Subspaced<S, C> {
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Wrap `inner` so it runs inside this subspace.
    pub fn epic<E>(&self, inner: E) -> SubspacedEpic<S, C, E> {
        SubspacedEpic {
            subspace: self.clone(),
            inner,
        }
    }
}

impl<S, C> Clone for Subspaced<S, C> {
    fn clone(&self) -> Self {
        Self {
            select: self.select.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

impl<S, C> fmt::Debug for Subspaced<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subspaced")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// An epic running inside a [`Subspaced`]. Registers with the epic
/// middleware like any other epic.
pub struct SubspacedEpic<S, C, E> {
    subspace: Subspaced<S, C>,
    inner: E,
}

impl<S, C, D, E> Epic<S, D> for SubspacedEpic<S, C, E>
where
    S: Send + 'static,
    C: Send + 'static,
    E: Epic<C, D>,
{
    fn run(
        &self,
        actions: ActionStream,
        state: StateStream<S>,
        ctx: EpicContext<S, D>,
    ) -> EpicResult {
        let store = locate(ctx.engine().as_ref())?;
        let namespace = self.subspace.namespace.clone();

        let substore: StoreHandle<C> = Arc::new(SubspacedStore {
            parent: store,
            select: self.subspace.select.clone(),
            namespace: namespace.clone(),
        });
        let engine: Arc<dyn StoreSource<C>> = Arc::new(substore);
        let inner_ctx = ctx.with_engine(engine);
        let substate = state.narrow(self.subspace.select.clone());

        let inbound = match namespace.clone() {
            None => actions,
            Some(namespace) => actions
                .filter_map(move |action| future::ready(enter(&namespace, action)))
                .boxed(),
        };

        let outbound = self.inner.run(inbound, substate, inner_ctx)?;

        Ok(match namespace {
            None => outbound,
            Some(namespace) => outbound
                .map(move |action| leave(&namespace, action))
                .boxed(),
        })
    }
}

fn enter(namespace: &str, action: Action) -> Option<Action> {
    let entered = strip_namespace(namespace, &action);
    match &entered {
        Some(inner) if !inner.is_global() => trace!(
            namespace,
            action_type = inner.action_type(),
            "action entered subspace"
        ),
        Some(_) => {}
        None => trace!(
            namespace,
            action_type = action.action_type(),
            "action outside subspace skipped"
        ),
    }
    entered
}

fn leave(namespace: &str, action: Action) -> Action {
    let left = namespace_action(namespace, action);
    if !left.is_global() {
        trace!(
            namespace,
            action_type = left.action_type(),
            "action left subspace"
        );
    }
    left
}

/// The parent store as seen from inside a subspace: state is narrowed,
/// dispatched actions are namespaced.
struct SubspacedStore<S, C> {
    parent: StoreHandle<S>,
    select: SelectFn<S, C>,
    namespace: Option<Arc<str>>,
}

impl<S, C> Store<C> for SubspacedStore<S, C>
where
    S: 'static,
    C: 'static,
{
    fn dispatch(&self, action: Action) {
        match &self.namespace {
            Some(namespace) => self.parent.dispatch(namespace_action(namespace, action)),
            None => self.parent.dispatch(action),
        }
    }

    fn get_state(&self) -> C {
        (self.select)(&self.parent.get_state())
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        self.parent.subscribe(listener)
    }
}
