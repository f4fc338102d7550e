use thiserror::Error;

pub type Result<T> = std::result::Result<T, EpicError>;

#[derive(Debug, Error)]
pub enum EpicError {
    /// The engine was not built by [`create_epic_middleware`](crate::create_epic_middleware).
    #[error(
        "Subspace epic couldn't find the store. Make sure you've used the namespacing-aware middleware factory"
    )]
    StoreNotFound,

    /// `run` was called before the middleware was added to a store.
    #[error("epic middleware is not attached to a store")]
    NotAttached,

    /// Failure raised by an epic itself.
    #[error("epic failed: {0}")]
    Epic(#[source] anyhow::Error),
}

impl EpicError {
    pub fn other(err: impl Into<anyhow::Error>) -> Self {
        EpicError::Epic(err.into())
    }

    /// Wiring mistakes, as opposed to failures inside an epic.
    pub fn is_configuration(&self) -> bool {
        matches!(self, EpicError::StoreNotFound | EpicError::NotAttached)
    }
}
