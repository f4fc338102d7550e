//! Subspaced epics.
//!
//! Epics react to the stream of dispatched actions and emit more
//! actions. [`subspaced`] lets an epic written against a small,
//! unprefixed slice of state run unmodified inside a larger store:
//! state is narrowed by a [`Selector`], action types are stripped of and
//! re-prefixed with a namespace, and global actions pass untouched.
//!
//! Subspaced epics need the live store behind their engine, so they must
//! run on a middleware built with [`create_epic_middleware`].

pub mod epic;
pub mod error;
pub mod locate;
pub mod middleware;
pub mod state;
pub mod subspaced;

pub use epic::{ActionStream, ActionStreamExt, Epic, EpicContext, EpicResult, StoreSource};
pub use error::{EpicError, Result};
pub use locate::locate;
pub use middleware::{create_epic_middleware, EpicMiddleware, MiddlewareOptions};
pub use state::{SelectFn, StateFeed, StateStream};
pub use subspaced::{subspaced, KeyedState, Selector, Subspaced, SubspacedEpic};
