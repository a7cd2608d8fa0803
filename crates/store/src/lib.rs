//! Persistence for the catalog and placed orders.
//!
//! Every multi-record write goes through a [`UnitOfWork`]: stock decrements,
//! stock releases, order inserts and order updates either all become visible
//! on [`UnitOfWork::commit`] or none of them do. Dropping an uncommitted unit
//! rolls it back.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryUnit};
pub use postgres::{PostgresStore, PostgresUnit};
pub use store::{Page, PageRequest, StockDecrement, Store, StoreExt, UnitOfWork};
