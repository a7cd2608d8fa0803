use common::OrderId;
use domain::ProductId;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order changed since it was read.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: u64,
        actual: u64,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The store could not complete the operation right now (dropped
    /// connection, pool exhaustion, serialization failure). Nothing from the
    /// current unit of work survives, so the whole unit may be retried.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// A write was refused for a non-transient reason.
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value does not fit the domain model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            // serialization_failure, deadlock_detected
            sqlx::Error::Database(db) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        };

        if transient {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Database(err)
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
