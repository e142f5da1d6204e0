//! Purpose: Mutation and point-read surface of one open KVS.
//! Exports: `Kvs`.
//! Role: Every operation optionally binds to a `Transaction`; payloads follow the buffer contract.
//! Invariants: Name and prefix length are fixed at open and never change.
//! Invariants: Engine errors, conflicts included, propagate unchanged; nothing is retried here.
#![allow(clippy::result_large_err)]

use super::buffer::fill_lookup;
use super::{ApiResult, Cursor, CursorOptions, Lookup, OutputBuffer, Transaction};
use crate::core::kvdb::KvsHandle;
use crate::core::txn::TxnSlot;

pub struct Kvs {
    handle: KvsHandle,
}

impl Kvs {
    pub(crate) fn from_handle(handle: KvsHandle) -> Self {
        Self { handle }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn prefix_length(&self) -> usize {
        self.handle.prefix_length()
    }

    pub fn transactions_enabled(&self) -> bool {
        self.handle.transactions_enabled()
    }

    pub fn param(&self, name: &str) -> ApiResult<String> {
        self.handle.param(name)
    }

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        txn: Option<&Transaction>,
        key: K,
        value: V,
    ) -> ApiResult<()> {
        let slot = self.slot(txn)?;
        self.handle
            .db()
            .put(&self.handle, slot, key.as_ref(), value.as_ref())
    }

    /// Returns a copy of the value, or `None` when the key is absent.
    pub fn get<K: AsRef<[u8]>>(&self, txn: Option<&Transaction>, key: K) -> ApiResult<Option<Vec<u8>>> {
        let slot = self.slot(txn)?;
        self.handle
            .db()
            .get(&self.handle, slot, key.as_ref(), |value| value.map(<[u8]>::to_vec))
    }

    /// Copies the value into `out` without allocating. A truncated copy still reports
    /// `found` and the full length.
    pub fn get_into<K, O>(&self, txn: Option<&Transaction>, key: K, out: &mut O) -> ApiResult<Lookup>
    where
        K: AsRef<[u8]>,
        O: OutputBuffer + ?Sized,
    {
        let slot = self.slot(txn)?;
        self.handle
            .db()
            .get(&self.handle, slot, key.as_ref(), |value| fill_lookup(out, value))
    }

    pub fn delete<K: AsRef<[u8]>>(&self, txn: Option<&Transaction>, key: K) -> ApiResult<()> {
        let slot = self.slot(txn)?;
        self.handle.db().delete(&self.handle, slot, key.as_ref())
    }

    /// Deletes every key starting with `prefix`, which must be exactly `prefix_length()` bytes.
    pub fn prefix_delete<P: AsRef<[u8]>>(&self, txn: Option<&Transaction>, prefix: P) -> ApiResult<()> {
        let slot = self.slot(txn)?;
        self.handle
            .db()
            .prefix_delete(&self.handle, slot, prefix.as_ref())
    }

    pub fn cursor(&self, options: CursorOptions<'_>) -> ApiResult<Cursor> {
        let slot = self.slot(options.txn)?;
        let inner = self.handle.db().cursor_create(
            &self.handle,
            options.filter.unwrap_or_default(),
            options.reverse,
            slot,
        )?;
        Ok(Cursor::from_engine(inner))
    }

    pub fn close(self) {
        drop(self)
    }

    fn slot<'t>(&self, txn: Option<&'t Transaction>) -> ApiResult<Option<&'t TxnSlot>> {
        txn.map(|txn| txn.slot_for(self.handle.db())).transpose()
    }
}

impl std::fmt::Debug for Kvs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kvs")
            .field("name", &self.name())
            .field("prefix_length", &self.prefix_length())
            .finish()
    }
}
