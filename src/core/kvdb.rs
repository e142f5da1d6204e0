//! Purpose: The in-process KVDB engine: stores, seqno publication, transactions, admin calls.
//! Exports: `Db`, `KvsHandle`, `CompactStatus`.
//! Role: Everything the access layer reaches through an opaque handle lives behind `Db`.
//! Invariants: A commit applies all of its writes at one seqno before publishing that seqno.
//! Invariants: At most one `Db` per home at a time, enforced with an `fs2` lock on `kvdb.lock`.
//! Invariants: A KVS has at most one open handle; an open KVS cannot be dropped.
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::Serialize;

use crate::core::cursor::EngineCursor;
use crate::core::error::{Error, ErrorContext, ErrorKind, io_error};
use crate::core::global::ensure_initialized;
use crate::core::limits::{KVS_COUNT_MAX, check_bound, check_key, check_kvs_name, check_value};
use crate::core::media::{Mclass, MclassInfo, mclass_info};
use crate::core::params::{
    KvdbConfig, KvdbCreateParams, KvdbOpenParams, KvsCreateParams, KvsOpenParams, ParamSet,
    apply_json, apply_params, load_kvdb_config, parse_params,
};
use crate::core::persist::{
    KvdbMeta, KvsMeta, LOCK_FILE, META_FILE, load_kvs_file, load_meta, meta_exists,
    remove_if_exists, save_meta, write_kvs_file,
};
use crate::core::store::{Seqno, Tree};
use crate::core::txn::{
    KvsId, KvsWrites, Overlay, SlotInner, TxnInstance, TxnSlot, TxnState, WriteLocks,
};
use crate::core::view::{ViewPin, Views};

const SAMP_LWM_PCT: u64 = 117;
const SAMP_HWM_PCT: u64 = 137;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CompactStatus {
    pub samp_lwm: u64,
    pub samp_hwm: u64,
    pub samp_curr: u64,
    pub active: bool,
    pub canceled: bool,
}

pub(crate) struct KvsShared {
    pub id: KvsId,
    pub name: String,
    pub prefix_length: usize,
    tree: RwLock<Tree>,
    open: AtomicBool,
    dirty: AtomicBool,
}

impl KvsShared {
    fn new(meta: &KvsMeta, tree: Tree) -> Self {
        Self {
            id: meta.id,
            name: meta.name.clone(),
            prefix_length: meta.prefix_length,
            tree: RwLock::new(tree),
            open: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tree_mut(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Engine-side open KVS. Dropping it closes the KVS.
pub(crate) struct KvsHandle {
    db: Arc<Db>,
    shared: Arc<KvsShared>,
    params: KvsOpenParams,
}

impl KvsHandle {
    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn prefix_length(&self) -> usize {
        self.shared.prefix_length
    }

    pub fn transactions_enabled(&self) -> bool {
        self.params.transactions_enabled
    }

    pub fn param(&self, name: &str) -> Result<String, Error> {
        if name == "prefix.length" {
            return Ok(self.shared.prefix_length.to_string());
        }
        self.params.get(name).ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("unknown kvs param: {name}"))
                .with_kvs(self.name())
        })
    }
}

impl Drop for KvsHandle {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::Release);
        tracing::debug!(kvs = %self.shared.name, "kvs closed");
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Access {
    Read,
    Write,
}

pub(crate) struct Db {
    home: PathBuf,
    params: KvdbOpenParams,
    config: KvdbConfig,
    meta: Mutex<KvdbMeta>,
    stores: RwLock<BTreeMap<String, Arc<KvsShared>>>,
    published: AtomicU64,
    commit_lock: Mutex<()>,
    locks: Mutex<WriteLocks>,
    next_txn: AtomicU64,
    views: Arc<Views>,
    compacting: AtomicBool,
    closed: AtomicBool,
    lock_file: File,
}

impl Db {
    pub fn create<S: AsRef<str>>(home: &Path, params: &[S]) -> Result<(), Error> {
        ensure_initialized()?;
        if !home.is_dir() {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("kvdb home does not exist")
                .with_path(home));
        }
        if meta_exists(home) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message("kvdb already exists")
                .with_path(home));
        }
        let create: KvdbCreateParams = parse_params(params)?;
        let base = canonical_home(home)?;
        let capacity = resolve(&base, create.capacity_path.as_deref().unwrap_or(Path::new("capacity")));
        let mut meta = KvdbMeta::new(capacity.clone());
        for (mclass, path) in [
            (Mclass::Staging, create.staging_path.as_deref()),
            (Mclass::Pmem, create.pmem_path.as_deref()),
        ] {
            if let Some(path) = path {
                meta.set_mclass_path(mclass, resolve(&base, path));
            }
        }
        for mclass in Mclass::ALL {
            if let Some(path) = meta.mclass_path(mclass) {
                fs::create_dir_all(path).map_err(|err| io_error(err, path))?;
            }
        }
        save_meta(home, &meta)?;
        tracing::info!(home = %home.display(), capacity = %capacity.display(), "kvdb created");
        Ok(())
    }

    pub fn drop_kvdb(home: &Path) -> Result<(), Error> {
        ensure_initialized()?;
        require_kvdb(home)?;
        let lock = lock_home(home)?;
        let meta = load_meta(home)?;
        for kvs in &meta.kvs {
            remove_if_exists(&meta.kvs_file(&kvs.name))?;
        }
        remove_if_exists(&home.join(META_FILE))?;
        let _ = FileExt::unlock(&lock);
        drop(lock);
        remove_if_exists(&home.join(LOCK_FILE))?;
        tracing::info!(home = %home.display(), "kvdb dropped");
        Ok(())
    }

    pub fn storage_add<S: AsRef<str>>(home: &Path, params: &[S]) -> Result<(), Error> {
        ensure_initialized()?;
        require_kvdb(home)?;
        let _lock = lock_home(home)?;
        let added: KvdbCreateParams = parse_params(params)?;
        if added.capacity_path.is_some() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("the capacity media class is fixed at create time"));
        }
        let mut meta = load_meta(home)?;
        let mut changed = false;
        for (mclass, path) in [
            (Mclass::Staging, added.staging_path),
            (Mclass::Pmem, added.pmem_path),
        ] {
            let Some(path) = path else { continue };
            if meta.mclass_path(mclass).is_some() {
                return Err(Error::new(ErrorKind::AlreadyExists)
                    .with_message(format!("media class {mclass} is already configured")));
            }
            let path = resolve(&canonical_home(home)?, &path);
            fs::create_dir_all(&path).map_err(|err| io_error(err, &path))?;
            tracing::info!(home = %home.display(), %mclass, path = %path.display(), "storage added");
            meta.set_mclass_path(mclass, path);
            changed = true;
        }
        if !changed {
            return Err(Error::new(ErrorKind::Usage).with_message("no media class path given"));
        }
        save_meta(home, &meta)
    }

    pub fn open<S: AsRef<str>>(home: &Path, params: &[S]) -> Result<Arc<Self>, Error> {
        ensure_initialized()?;
        require_kvdb(home)?;
        let config = load_kvdb_config(home)?;
        let mut open = KvdbOpenParams::default();
        apply_json(&mut open, &config.kvdb)?;
        apply_params(&mut open, params)?;

        let lock_file = lock_home(home)?;
        let meta = load_meta(home)?;
        let mut stores = BTreeMap::new();
        for kvs in &meta.kvs {
            let tree = load_tree(&meta, kvs)?;
            stores.insert(kvs.name.clone(), Arc::new(KvsShared::new(kvs, tree)));
        }

        tracing::info!(
            home = %home.display(),
            kvs = stores.len(),
            read_only = open.read_only,
            "kvdb opened"
        );
        Ok(Arc::new(Self {
            home: home.to_path_buf(),
            params: open,
            config,
            meta: Mutex::new(meta),
            stores: RwLock::new(stores),
            published: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            locks: Mutex::new(WriteLocks::default()),
            next_txn: AtomicU64::new(1),
            views: Arc::new(Views::default()),
            compacting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            lock_file,
        }))
    }

    /// Persists committed data and releases the home lock. Later calls are no-ops.
    pub fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.persist();
        let _ = FileExt::unlock(&self.lock_file);
        tracing::info!(home = %self.home.display(), "kvdb closed");
        result
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn param(&self, name: &str) -> Result<String, Error> {
        if let Some(value) = self.params.get(name) {
            return Ok(value);
        }
        let meta = self.meta();
        let path = Mclass::ALL
            .into_iter()
            .find(|mclass| mclass.path_param() == name)
            .map(|mclass| meta.mclass_path(mclass).map(Path::to_path_buf));
        match path {
            Some(path) => Ok(path.map(|path| path.display().to_string()).unwrap_or_default()),
            None => Err(Error::new(ErrorKind::Usage).with_message(format!("unknown kvdb param: {name}"))),
        }
    }

    pub fn kvs_names(&self) -> Result<Vec<String>, Error> {
        self.check_open()?;
        Ok(self.meta().kvs.iter().map(|kvs| kvs.name.clone()).collect())
    }

    pub fn kvs_create<S: AsRef<str>>(&self, name: &str, params: &[S]) -> Result<(), Error> {
        self.check_open()?;
        self.check_writable()?;
        check_kvs_name(name)?;
        let create: KvsCreateParams = parse_params(params)?;

        let mut meta = self.meta();
        if meta.find_kvs(name).is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message("kvs already exists")
                .with_kvs(name));
        }
        if meta.kvs.len() >= KVS_COUNT_MAX {
            return Err(Error::new(ErrorKind::Usage)
                .with_errno(libc::ENOSPC)
                .with_message(format!("a kvdb holds at most {KVS_COUNT_MAX} kvs"))
                .with_kvs(name));
        }
        let kvs = KvsMeta {
            name: name.to_string(),
            id: meta.next_kvs_id,
            prefix_length: create.prefix_length,
        };
        meta.next_kvs_id += 1;
        meta.kvs.push(kvs.clone());
        write_kvs_file(&meta.kvs_file(name), kvs.prefix_length, std::iter::empty())?;
        if let Err(err) = save_meta(&self.home, &meta) {
            meta.kvs.pop();
            return Err(err);
        }
        self.stores_mut()
            .insert(name.to_string(), Arc::new(KvsShared::new(&kvs, Tree::default())));
        tracing::info!(kvs = name, prefix_length = kvs.prefix_length, "kvs created");
        Ok(())
    }

    pub fn kvs_drop(&self, name: &str) -> Result<(), Error> {
        self.check_open()?;
        self.check_writable()?;
        let shared = self.store(name)?;
        if shared.open.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Busy)
                .with_message("kvs is open")
                .with_kvs(name));
        }
        let mut meta = self.meta();
        let mut next = meta.clone();
        next.kvs.retain(|kvs| kvs.name != name);
        save_meta(&self.home, &next)?;
        *meta = next;
        remove_if_exists(&meta.kvs_file(name))?;
        self.stores_mut().remove(name);
        tracing::info!(kvs = name, "kvs dropped");
        Ok(())
    }

    pub fn kvs_open<S: AsRef<str>>(self: &Arc<Self>, name: &str, params: &[S]) -> Result<KvsHandle, Error> {
        self.check_open()?;
        let shared = self.store(name)?;
        let mut open = KvsOpenParams::default();
        for layer in self.config.kvs_layers(name) {
            apply_json(&mut open, layer)?;
        }
        apply_params(&mut open, params)?;
        if shared.open.swap(true, Ordering::AcqRel) {
            return Err(Error::new(ErrorKind::Busy)
                .with_message("kvs is already open")
                .with_kvs(name));
        }
        tracing::debug!(kvs = name, transactions = open.transactions_enabled, "kvs opened");
        Ok(KvsHandle {
            db: Arc::clone(self),
            shared,
            params: open,
        })
    }

    pub fn sync(&self) -> Result<(), Error> {
        self.check_open()?;
        self.persist()
    }

    /// Prunes versions older than the oldest live snapshot.
    pub fn compact(&self) -> Result<u64, Error> {
        self.check_open()?;
        if self.compacting.swap(true, Ordering::AcqRel) {
            return Err(Error::new(ErrorKind::Busy).with_message("compaction already running"));
        }
        let horizon = self.views.horizon(&self.published);
        let stores: Vec<_> = self.stores().values().cloned().collect();
        let mut removed = 0;
        for shared in stores {
            removed += shared.tree_mut().prune(horizon);
        }
        self.compacting.store(false, Ordering::Release);
        tracing::info!(horizon, removed, "kvdb compacted");
        Ok(removed)
    }

    pub fn compact_status(&self) -> Result<CompactStatus, Error> {
        self.check_open()?;
        let view = self.published.load(Ordering::Acquire);
        let (mut versions, mut live) = (0u64, 0u64);
        for shared in self.stores().values() {
            let stats = shared.tree().stats(view);
            versions += stats.versions;
            live += stats.live_keys;
        }
        let samp_curr = match (versions, live) {
            (0, _) => 100,
            (versions, 0) => versions * 100,
            (versions, live) => versions * 100 / live,
        };
        Ok(CompactStatus {
            samp_lwm: SAMP_LWM_PCT,
            samp_hwm: SAMP_HWM_PCT,
            samp_curr,
            active: self.compacting.load(Ordering::Acquire),
            canceled: false,
        })
    }

    pub fn mclass_is_configured(&self, mclass: Mclass) -> bool {
        self.meta().mclass_path(mclass).is_some()
    }

    pub fn mclass_info(&self, mclass: Mclass) -> Result<MclassInfo, Error> {
        let path = self
            .meta()
            .mclass_path(mclass)
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message(format!("media class {mclass} is not configured"))
            })?;
        mclass_info(&path)
    }

    pub fn get<R>(
        &self,
        kvs: &KvsHandle,
        txn: Option<&TxnSlot>,
        key: &[u8],
        read: impl FnOnce(Option<&[u8]>) -> R,
    ) -> Result<R, Error> {
        self.check_access(kvs, txn.is_some(), Access::Read)?;
        check_key(key)?;
        match txn {
            Some(slot) => self.with_active(slot, |inst| {
                if let Some(writes) = inst.writes.get(&kvs.shared.id) {
                    match writes.lookup(key) {
                        Overlay::Value(value) => return Ok(read(Some(value))),
                        Overlay::Deleted => return Ok(read(None)),
                        Overlay::Absent => {}
                    }
                }
                Ok(read(kvs.shared.tree().get(key, inst.view_seqno())))
            }),
            None => {
                let view = self.views.pin_current(&self.published);
                Ok(read(kvs.shared.tree().get(key, view.seqno())))
            }
        }
    }

    pub fn put(&self, kvs: &KvsHandle, txn: Option<&TxnSlot>, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.check_access(kvs, txn.is_some(), Access::Write)?;
        check_key(key)?;
        check_value(value)?;
        match txn {
            Some(slot) => self.txn_write(slot, kvs, key, |writes| {
                writes.put(key.to_vec(), value.to_vec())
            }),
            None => {
                self.apply_single(&kvs.shared, |tree, seqno| {
                    tree.insert(key.to_vec(), seqno, Some(value.to_vec()))
                });
                Ok(())
            }
        }
    }

    pub fn delete(&self, kvs: &KvsHandle, txn: Option<&TxnSlot>, key: &[u8]) -> Result<(), Error> {
        self.check_access(kvs, txn.is_some(), Access::Write)?;
        check_key(key)?;
        match txn {
            Some(slot) => self.txn_write(slot, kvs, key, |writes| writes.delete(key.to_vec())),
            None => {
                self.apply_single(&kvs.shared, |tree, seqno| tree.insert(key.to_vec(), seqno, None));
                Ok(())
            }
        }
    }

    pub fn prefix_delete(&self, kvs: &KvsHandle, txn: Option<&TxnSlot>, prefix: &[u8]) -> Result<(), Error> {
        self.check_access(kvs, txn.is_some(), Access::Write)?;
        let want = kvs.shared.prefix_length;
        if want == 0 || prefix.len() != want {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "prefix delete needs a prefix of exactly {want} bytes, got {}",
                    prefix.len()
                ))
                .with_kvs(kvs.name()));
        }
        match txn {
            Some(slot) => self.with_active(slot, |inst| {
                check_doomed(inst)?;
                if !self.locks().try_lock_prefix(kvs.shared.id, prefix, inst.id) {
                    return Err(conflict(inst, kvs));
                }
                let newer = kvs
                    .shared
                    .tree()
                    .latest_write_under(prefix)
                    .is_some_and(|seqno| seqno > inst.view_seqno());
                if newer {
                    return Err(conflict(inst, kvs));
                }
                inst.writes
                    .entry(kvs.shared.id)
                    .or_default()
                    .delete_prefix(prefix.to_vec());
                Ok(())
            }),
            None => {
                self.apply_single(&kvs.shared, |tree, seqno| tree.delete_prefix(prefix.to_vec(), seqno));
                tracing::debug!(kvs = kvs.name(), "prefix deleted");
                Ok(())
            }
        }
    }

    pub fn txn_alloc(&self) -> Arc<TxnSlot> {
        Arc::new(TxnSlot::default())
    }

    pub fn txn_begin(&self, slot: &TxnSlot) -> Result<(), Error> {
        self.check_open()?;
        let mut inner = slot.lock();
        if inner.state == TxnState::Active {
            return Err(Error::new(ErrorKind::Usage).with_message("transaction is already active"));
        }
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        let view = self.views.pin_current(&self.published);
        tracing::debug!(txn = id, view = view.seqno(), "txn begin");
        inner.instance = Some(TxnInstance {
            id,
            view,
            started: Instant::now(),
            writes: Default::default(),
            doomed: false,
        });
        inner.state = TxnState::Active;
        Ok(())
    }

    pub fn txn_commit(&self, slot: &TxnSlot) -> Result<(), Error> {
        let mut inner = slot.lock();
        let inst = self.active_instance(&mut inner)?;
        if inst.doomed {
            let id = inst.id;
            self.end(&mut inner, TxnState::Aborted);
            tracing::debug!(txn = id, "txn commit refused after conflict");
            return Err(Error::new(ErrorKind::Canceled)
                .with_message("transaction lost a write conflict and was aborted"));
        }
        let Some(inst) = inner.instance.as_ref() else {
            return Err(not_active());
        };
        let id = inst.id;
        let writes = inst.writes.iter().filter(|(_, writes)| !writes.is_empty());
        let stores: BTreeMap<KvsId, Arc<KvsShared>> = self
            .stores()
            .values()
            .map(|shared| (shared.id, Arc::clone(shared)))
            .collect();

        let commit_guard = self.commit_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let seqno = self.published.load(Ordering::Acquire) + 1;
        let mut applied = false;
        for (kvs_id, writes) in writes {
            let Some(shared) = stores.get(kvs_id) else { continue };
            let mut tree = shared.tree_mut();
            for prefix in writes.prefixes() {
                tree.delete_prefix(prefix.to_vec(), seqno);
            }
            for (key, value) in writes.entries() {
                tree.insert(key.to_vec(), seqno, value.map(<[u8]>::to_vec));
            }
            shared.dirty.store(true, Ordering::Release);
            applied = true;
        }
        if applied {
            self.published.store(seqno, Ordering::Release);
        }
        drop(commit_guard);

        self.end(&mut inner, TxnState::Committed);
        tracing::debug!(txn = id, seqno, applied, "txn commit");
        Ok(())
    }

    pub fn txn_abort(&self, slot: &TxnSlot) -> Result<(), Error> {
        let mut inner = slot.lock();
        if inner.state != TxnState::Active {
            return Err(not_active());
        }
        let id = inner.instance.as_ref().map(|inst| inst.id);
        self.end(&mut inner, TxnState::Aborted);
        tracing::debug!(txn = ?id, "txn abort");
        Ok(())
    }

    pub fn cursor_create(
        self: &Arc<Self>,
        kvs: &KvsHandle,
        filter: &[u8],
        reverse: bool,
        txn: Option<&TxnSlot>,
    ) -> Result<EngineCursor, Error> {
        self.check_access(kvs, txn.is_some(), Access::Read)?;
        check_bound(filter)?;
        let (view, overlay) = match txn {
            Some(slot) => self.with_active(slot, |inst| {
                let overlay = inst.writes.get(&kvs.shared.id).cloned().unwrap_or_default();
                Ok((self.views.pin_shared(&inst.view), Some(overlay)))
            })?,
            None => (self.views.pin_current(&self.published), None),
        };
        Ok(EngineCursor::new(
            Arc::clone(self),
            Arc::clone(&kvs.shared),
            view,
            filter.to_vec(),
            reverse,
            overlay,
        ))
    }

    pub(crate) fn pin_current(&self) -> ViewPin {
        self.views.pin_current(&self.published)
    }

    fn txn_write(
        &self,
        slot: &TxnSlot,
        kvs: &KvsHandle,
        key: &[u8],
        write: impl FnOnce(&mut KvsWrites),
    ) -> Result<(), Error> {
        self.with_active(slot, |inst| {
            check_doomed(inst)?;
            if !self.locks().try_lock_key(kvs.shared.id, key, inst.id) {
                return Err(conflict(inst, kvs));
            }
            let newer = kvs
                .shared
                .tree()
                .latest_write(key)
                .is_some_and(|seqno| seqno > inst.view_seqno());
            if newer {
                return Err(conflict(inst, kvs));
            }
            write(inst.writes.entry(kvs.shared.id).or_default());
            Ok(())
        })
    }

    /// Runs `f` against the ACTIVE instance, aborting it first if it has expired.
    fn with_active<R>(
        &self,
        slot: &TxnSlot,
        f: impl FnOnce(&mut TxnInstance) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut inner = slot.lock();
        let inst = self.active_instance(&mut inner)?;
        f(inst)
    }

    fn active_instance<'a>(&self, inner: &'a mut SlotInner) -> Result<&'a mut TxnInstance, Error> {
        self.check_open()?;
        if inner.state != TxnState::Active {
            return Err(not_active());
        }
        let timeout = Duration::from_millis(self.params.txn_timeout_ms);
        let expired = inner
            .instance
            .as_ref()
            .is_some_and(|inst| inst.started.elapsed() > timeout);
        if expired {
            let id = inner.instance.as_ref().map(|inst| inst.id);
            self.end(inner, TxnState::Aborted);
            tracing::warn!(txn = ?id, timeout_ms = self.params.txn_timeout_ms, "txn expired");
            return Err(Error::new(ErrorKind::Canceled)
                .with_context(ErrorContext::TxnExpired)
                .with_message("transaction expired and was aborted"));
        }
        inner.instance.as_mut().ok_or_else(not_active)
    }

    fn end(&self, inner: &mut SlotInner, state: TxnState) {
        if let Some(inst) = inner.instance.take() {
            self.locks().release(inst.id);
        }
        inner.state = state;
    }

    fn apply_single(&self, shared: &KvsShared, apply: impl FnOnce(&mut Tree, Seqno)) {
        let _commit = self.commit_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let seqno = self.published.load(Ordering::Acquire) + 1;
        apply(&mut shared.tree_mut(), seqno);
        shared.dirty.store(true, Ordering::Release);
        self.published.store(seqno, Ordering::Release);
    }

    fn persist(&self) -> Result<(), Error> {
        if self.params.read_only {
            return Ok(());
        }
        let view = self.published.load(Ordering::Acquire);
        let meta = self.meta().clone();
        for shared in self.stores().values() {
            if !shared.dirty.swap(false, Ordering::AcqRel) {
                continue;
            }
            let tree = shared.tree();
            let path = meta.kvs_file(&shared.name);
            if let Err(err) = write_kvs_file(&path, shared.prefix_length, tree.live_records(view)) {
                shared.dirty.store(true, Ordering::Release);
                return Err(err.with_kvs(shared.name.clone()));
            }
            tracing::debug!(kvs = %shared.name, path = %path.display(), "kvs persisted");
        }
        Ok(())
    }

    pub(crate) fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("kvdb is closed")
                .with_path(&self.home));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.params.read_only {
            return Err(Error::new(ErrorKind::Permission)
                .with_errno(libc::EROFS)
                .with_message("kvdb is open read-only"));
        }
        Ok(())
    }

    fn check_access(&self, kvs: &KvsHandle, bound: bool, access: Access) -> Result<(), Error> {
        self.check_open()?;
        if bound && !kvs.params.transactions_enabled {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("kvs was not opened with transactions.enabled=true")
                .with_kvs(kvs.name()));
        }
        if access == Access::Write {
            self.check_writable()?;
            if !bound && kvs.params.transactions_enabled {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("writes to a transactional kvs need an active transaction")
                    .with_kvs(kvs.name()));
            }
        }
        Ok(())
    }

    fn store(&self, name: &str) -> Result<Arc<KvsShared>, Error> {
        self.stores().get(name).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("kvs does not exist")
                .with_kvs(name)
        })
    }

    fn meta(&self) -> MutexGuard<'_, KvdbMeta> {
        self.meta.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn locks(&self) -> MutexGuard<'_, WriteLocks> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stores(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<KvsShared>>> {
        self.stores.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stores_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<KvsShared>>> {
        self.stores.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// Stored media-class paths must not depend on the working directory.
fn canonical_home(home: &Path) -> Result<PathBuf, Error> {
    fs::canonicalize(home).map_err(|err| io_error(err, home))
}

fn resolve(home: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

fn require_kvdb(home: &Path) -> Result<(), Error> {
    if !meta_exists(home) {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message("no kvdb at home")
            .with_path(home));
    }
    Ok(())
}

fn lock_home(home: &Path) -> Result<File, Error> {
    let path = home.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|err| io_error(err, &path))?;
    file.try_lock_exclusive().map_err(|err| {
        let err = io_error(err, &path);
        if err.kind() == ErrorKind::Busy {
            err.with_message("kvdb is open elsewhere")
        } else {
            err
        }
    })?;
    Ok(file)
}

fn load_tree(meta: &KvdbMeta, kvs: &KvsMeta) -> Result<Tree, Error> {
    let path = meta.kvs_file(&kvs.name);
    let mut tree = Tree::default();
    if !path.exists() {
        return Ok(tree);
    }
    let (prefix_length, records) = load_kvs_file(&path).map_err(|err| err.with_kvs(kvs.name.clone()))?;
    if prefix_length != kvs.prefix_length {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("data file prefix length disagrees with metadata")
            .with_kvs(kvs.name.clone())
            .with_path(&path));
    }
    for (key, value) in records {
        tree.insert(key, 0, Some(value));
    }
    Ok(tree)
}

fn not_active() -> Error {
    Error::new(ErrorKind::Usage).with_message("transaction is not active")
}

fn check_doomed(inst: &TxnInstance) -> Result<(), Error> {
    if inst.doomed {
        return Err(Error::new(ErrorKind::Canceled)
            .with_message("transaction already lost a write conflict"));
    }
    Ok(())
}

fn conflict(inst: &mut TxnInstance, kvs: &KvsHandle) -> Error {
    inst.doomed = true;
    tracing::debug!(txn = inst.id, kvs = kvs.name(), "write conflict");
    Error::new(ErrorKind::Canceled)
        .with_message("write conflict")
        .with_kvs(kvs.name())
}
