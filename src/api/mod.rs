//! Purpose: Define the public Rust access layer for hsekv.
//! Exports: `Kvdb`, `Kvs`, `Transaction`, `Cursor`, the buffer contract, runtime, and errors.
//! Role: Public, additive-only surface; engine internals stay behind opaque handles.
//! Invariants: This module is the only public path to KVDB operations.
//! Invariants: Engine errors pass through unchanged; no call retries on the caller's behalf.

mod buffer;
mod cursor;
mod kvdb;
mod kvs;
mod runtime;
mod transaction;

pub type ApiResult<T> = Result<T, Error>;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorContext, ErrorKind};
pub use crate::core::kvdb::CompactStatus;
pub use crate::core::limits::{
    KVS_COUNT_MAX, KVS_KEY_LEN_MAX, KVS_NAME_LEN_MAX, KVS_PFX_LEN_MAX, KVS_VALUE_LEN_MAX,
};
pub use crate::core::media::{Mclass, MclassInfo};
pub use buffer::{ByteBuf, Lookup, OutputBuffer, RecordLen};
pub use cursor::{Cursor, CursorOptions, CursorRead, CursorResult, ScanPath};
pub use kvdb::Kvdb;
pub use kvs::Kvs;
pub use runtime::{Version, fini, init, param};
pub use transaction::{Transaction, TxnState};
