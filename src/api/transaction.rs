//! Purpose: Reusable client transaction bound to one KVDB.
//! Exports: `Transaction`, `TxnState`.
//! Role: Long-lived client container over engine instances that last one begin..commit/abort each.
//! Invariants: `begin` fails when ACTIVE; `commit`/`abort` fail unless ACTIVE.
//! Invariants: `close` commits an ACTIVE transaction; in any other state it only releases.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use super::ApiResult;
use crate::core::error::{Error, ErrorKind};
use crate::core::kvdb::Db;
use crate::core::txn::TxnSlot;

pub use crate::core::txn::TxnState;

/// A snapshot-isolated unit of work, reusable across many begin..commit/abort cycles.
///
/// State transitions take `&mut self`, so one thread drives a transaction at a time; it may
/// move between threads across its lifetime. Dropping an ACTIVE transaction behaves like
/// [`Transaction::close`], except during a panic, where it aborts instead.
pub struct Transaction {
    db: Arc<Db>,
    slot: Arc<TxnSlot>,
}

impl Transaction {
    pub(crate) fn new(db: Arc<Db>) -> Self {
        let slot = db.txn_alloc();
        Self { db, slot }
    }

    pub fn begin(&mut self) -> ApiResult<()> {
        self.db.txn_begin(&self.slot)
    }

    pub fn commit(&mut self) -> ApiResult<()> {
        self.db.txn_commit(&self.slot)
    }

    pub fn abort(&mut self) -> ApiResult<()> {
        self.db.txn_abort(&self.slot)
    }

    pub fn state(&self) -> TxnState {
        self.slot.state()
    }

    /// Commits if ACTIVE, then releases the transaction.
    pub fn close(mut self) -> ApiResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> ApiResult<()> {
        if self.slot.state() == TxnState::Active {
            self.db.txn_commit(&self.slot)
        } else {
            Ok(())
        }
    }

    /// The engine slot, after checking the transaction belongs to `db`.
    pub(crate) fn slot_for(&self, db: &Arc<Db>) -> ApiResult<&TxnSlot> {
        if !Arc::ptr_eq(&self.db, db) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("transaction belongs to a different kvdb"));
        }
        Ok(&self.slot)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if self.slot.state() == TxnState::Active {
                let _ = self.db.txn_abort(&self.slot);
            }
            return;
        }
        if let Err(err) = self.finish() {
            tracing::warn!(error = %err, "transaction close on drop failed");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state())
            .finish()
    }
}
