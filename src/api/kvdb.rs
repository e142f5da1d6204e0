//! Purpose: Client handle for one open KVDB plus the home-level admin calls.
//! Exports: `Kvdb`.
//! Role: Thin owner of the engine handle; every call forwards and propagates engine errors.
//! Invariants: `close` consumes the handle; dropping an unclosed handle closes it best-effort.
#![allow(clippy::result_large_err)]

use std::path::Path;
use std::sync::Arc;

use super::{ApiResult, Kvs, Transaction};
use crate::core::kvdb::{CompactStatus, Db};
use crate::core::media::{Mclass, MclassInfo};

pub struct Kvdb {
    db: Arc<Db>,
}

impl Kvdb {
    /// Creates a KVDB in an existing `home` directory.
    pub fn create<P: AsRef<Path>, S: AsRef<str>>(home: P, params: &[S]) -> ApiResult<()> {
        Db::create(home.as_ref(), params)
    }

    /// Removes the KVDB at `home` with all of its KVS data. Fails with `Busy` while it is open.
    pub fn destroy<P: AsRef<Path>>(home: P) -> ApiResult<()> {
        Db::drop_kvdb(home.as_ref())
    }

    /// Adds a staging or pmem media class to a closed KVDB.
    pub fn storage_add<P: AsRef<Path>, S: AsRef<str>>(home: P, params: &[S]) -> ApiResult<()> {
        Db::storage_add(home.as_ref(), params)
    }

    pub fn open<P: AsRef<Path>, S: AsRef<str>>(home: P, params: &[S]) -> ApiResult<Self> {
        let db = Db::open(home.as_ref(), params)?;
        Ok(Self { db })
    }

    pub fn close(self) -> ApiResult<()> {
        self.db.close()
    }

    pub fn home(&self) -> &Path {
        self.db.home()
    }

    pub fn param(&self, name: &str) -> ApiResult<String> {
        self.db.param(name)
    }

    pub fn kvs_names(&self) -> ApiResult<Vec<String>> {
        self.db.kvs_names()
    }

    pub fn kvs_create<S: AsRef<str>>(&self, name: &str, params: &[S]) -> ApiResult<()> {
        self.db.kvs_create(name, params)
    }

    pub fn kvs_drop(&self, name: &str) -> ApiResult<()> {
        self.db.kvs_drop(name)
    }

    pub fn kvs_open<S: AsRef<str>>(&self, name: &str, params: &[S]) -> ApiResult<Kvs> {
        let handle = self.db.kvs_open(name, params)?;
        Ok(Kvs::from_handle(handle))
    }

    /// Allocates a reusable transaction in the INVALID state.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.db))
    }

    /// Writes committed data to the capacity media class.
    pub fn sync(&self) -> ApiResult<()> {
        self.db.sync()
    }

    /// Prunes versions no live snapshot can see. Returns the number removed.
    pub fn compact(&self) -> ApiResult<u64> {
        self.db.compact()
    }

    pub fn compact_status(&self) -> ApiResult<CompactStatus> {
        self.db.compact_status()
    }

    pub fn mclass_is_configured(&self, mclass: Mclass) -> bool {
        self.db.mclass_is_configured(mclass)
    }

    pub fn mclass_info(&self, mclass: Mclass) -> ApiResult<MclassInfo> {
        self.db.mclass_info(mclass)
    }
}

impl Drop for Kvdb {
    fn drop(&mut self) {
        if let Err(err) = self.db.close() {
            tracing::warn!(home = %self.db.home().display(), error = %err, "kvdb close on drop failed");
        }
    }
}

impl std::fmt::Debug for Kvdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kvdb").field("home", &self.db.home()).finish()
    }
}
