//! Live state view handed to epics.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use subspace_store::sync::lock;

type Current<S> = Arc<dyn Fn() -> S + Send + Sync>;
type Subscribe<S> = Arc<dyn Fn() -> BoxStream<'static, S> + Send + Sync>;

/// Projection from a parent state to a child state.
pub type SelectFn<S, C> = Arc<dyn Fn(&S) -> C + Send + Sync>;

/// A state tagged with the feed version it was published as.
#[derive(Debug, Clone)]
pub(crate) struct Versioned<S> {
    version: u64,
    state: S,
}

/// How far one consumer has got through a feed. Only moves forward.
pub(crate) struct Cursor<S> {
    seen: Mutex<Versioned<S>>,
}

impl<S: Clone> Cursor<S> {
    pub(crate) fn new(start: Versioned<S>) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(start),
        })
    }

    pub(crate) fn advance(&self, to: &Versioned<S>) {
        let mut seen = lock(&self.seen);
        if to.version > seen.version {
            *seen = to.clone();
        }
    }

    fn state(&self) -> S {
        lock(&self.seen).state.clone()
    }
}

struct FeedInner<S> {
    latest: Versioned<S>,
    subscribers: Vec<UnboundedSender<Versioned<S>>>,
    /// Cursors of read-through streams, moved on every publish.
    followers: Vec<Weak<Cursor<S>>>,
}

/// Source of [`StateStream`]s: publishes each distinct state to every
/// subscriber, in order, with nothing skipped.
///
/// Publishing a state equal to the latest one is a no-op, so an epic that
/// maps states to actions which leave the state untouched settles instead
/// of feeding itself. Streams end once the feed is dropped.
pub struct StateFeed<S> {
    inner: Arc<Mutex<FeedInner<S>>>,
}

impl<S> StateFeed<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedInner {
                latest: Versioned {
                    version: 0,
                    state: initial,
                },
                subscribers: Vec::new(),
                followers: Vec::new(),
            })),
        }
    }

    /// Publish `state` if it differs from the latest. Returns whether it did.
    pub fn publish(&self, state: S) -> bool {
        let mut inner = lock(&*self.inner);
        if inner.latest.state == state {
            return false;
        }
        let next = Versioned {
            version: inner.latest.version + 1,
            state,
        };
        inner
            .subscribers
            .retain(|subscriber| subscriber.unbounded_send(next.clone()).is_ok());
        inner.followers.retain(|follower| match follower.upgrade() {
            Some(cursor) => {
                cursor.advance(&next);
                true
            }
            None => false,
        });
        inner.latest = next;
        true
    }

    pub fn latest(&self) -> S {
        self.snapshot().state
    }

    /// A stream whose [`value`](StateStream::value) is always the latest
    /// published state.
    pub fn stream(&self) -> StateStream<S> {
        let cursor = {
            let mut inner = lock(&*self.inner);
            let cursor = Cursor::new(inner.latest.clone());
            inner.followers.push(Arc::downgrade(&cursor));
            cursor
        };
        self.stream_at(cursor)
    }

    pub(crate) fn snapshot(&self) -> Versioned<S> {
        lock(&*self.inner).latest.clone()
    }

    /// A stream whose `value()` is whatever `cursor` says. The cursor is
    /// advanced by every item the stream yields; the caller may advance
    /// it further.
    pub(crate) fn stream_at(&self, cursor: Arc<Cursor<S>>) -> StateStream<S> {
        let reader = cursor.clone();
        let current: Current<S> = Arc::new(move || reader.state());

        let feed = Arc::downgrade(&self.inner);
        let subscribe: Subscribe<S> = Arc::new(move || {
            let Some(feed) = feed.upgrade() else {
                return stream::empty::<S>().boxed();
            };
            let (tx, rx) = mpsc::unbounded();
            {
                let mut inner = lock(&*feed);
                // Queued under the same lock as publishing, so the first
                // item and every later one line up without gaps.
                let _ = tx.unbounded_send(inner.latest.clone());
                inner.subscribers.push(tx);
            }
            let cursor = cursor.clone();
            rx.map(move |versioned| {
                cursor.advance(&versioned);
                versioned.state
            })
            .boxed()
        });
        StateStream::from_parts(current, subscribe)
    }
}

impl<S> fmt::Debug for StateFeed<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&*self.inner);
        f.debug_struct("StateFeed")
            .field("version", &inner.latest.version)
            .field("subscribers", &inner.subscribers.len())
            .finish_non_exhaustive()
    }
}

/// A stream of states that can also be read synchronously.
///
/// Polling yields the state current at subscription first, then every
/// later distinct state. [`value`](Self::value) reads through to the
/// source, so a narrowed stream never serves a stale snapshot of its
/// parent.
pub struct StateStream<S> {
    current: Current<S>,
    subscribe: Subscribe<S>,
    changes: BoxStream<'static, S>,
}

impl<S: Send + 'static> StateStream<S> {
    /// The latest state this view has observed.
    pub fn value(&self) -> S {
        (self.current)()
    }

    /// Derive a child view. Every item and every `value()` read applies
    /// `select` to the matching parent state.
    pub fn narrow<C: Send + 'static>(self, select: SelectFn<S, C>) -> StateStream<C> {
        let parent_current = self.current;
        let parent_subscribe = self.subscribe;

        let current_select = select.clone();
        let current: Current<C> = Arc::new(move || current_select(&parent_current()));
        let subscribe: Subscribe<C> = Arc::new(move || {
            let select = select.clone();
            parent_subscribe().map(move |state| select(&state)).boxed()
        });
        StateStream::from_parts(current, subscribe)
    }

    fn from_parts(current: Current<S>, subscribe: Subscribe<S>) -> Self {
        let changes = subscribe();
        Self {
            current,
            subscribe,
            changes,
        }
    }
}

/// A clone is an independent subscriber over the same source.
impl<S: Send + 'static> Clone for StateStream<S> {
    fn clone(&self) -> Self {
        Self::from_parts(self.current.clone(), self.subscribe.clone())
    }
}

impl<S> Stream for StateStream<S> {
    type Item = S;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        self.changes.poll_next_unpin(cx)
    }
}

impl<S> fmt::Debug for StateStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream").finish_non_exhaustive()
    }
}
