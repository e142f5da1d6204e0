// Embedded engine: MVCC trees, transactions, cursors, persistence, params, and errors.
pub mod cursor;
pub mod error;
pub mod global;
pub mod kvdb;
pub mod limits;
pub mod media;
pub(crate) mod params;
pub(crate) mod persist;
pub(crate) mod store;
pub(crate) mod txn;
pub(crate) mod view;
