//! Purpose: Engine-side transaction state: reusable slots, per-cycle instances, write sets.
//! Exports: `TxnState`, `TxnSlot`, `KvsWrites`, `Overlay`, `WriteLocks`.
//! Role: A `TxnSlot` outlives many begin..commit/abort cycles; each cycle owns a fresh `TxnInstance`.
//! Invariants: An instance exists iff the slot state is `Active`.
//! Invariants: Write locks held by an instance are released exactly when it ends.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::core::store::{Seqno, valid_range};
use crate::core::view::ViewPin;

pub(crate) type TxnId = u64;
pub(crate) type KvsId = u64;

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum TxnState {
    #[default]
    Invalid,
    Active,
    Committed,
    Aborted,
}

impl TxnState {
    pub fn as_str(self) -> &'static str {
        match self {
            TxnState::Invalid => "invalid",
            TxnState::Active => "active",
            TxnState::Committed => "committed",
            TxnState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a write set says about one key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Overlay<'a> {
    Value(&'a [u8]),
    Deleted,
    Absent,
}

/// Uncommitted writes of one transaction against one KVS.
#[derive(Clone, Debug, Default)]
pub(crate) struct KvsWrites {
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    prefixes: Vec<Vec<u8>>,
}

impl KvsWrites {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.entries.insert(key, None);
    }

    pub fn delete_prefix(&mut self, prefix: Vec<u8>) {
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        if !self.prefixes.contains(&prefix) {
            self.prefixes.push(prefix);
        }
    }

    pub fn lookup(&self, key: &[u8]) -> Overlay<'_> {
        if let Some(entry) = self.entries.get(key) {
            return match entry {
                Some(value) => Overlay::Value(value),
                None => Overlay::Deleted,
            };
        }
        if self.prefixes.iter().any(|prefix| key.starts_with(prefix)) {
            return Overlay::Deleted;
        }
        Overlay::Absent
    }

    /// True when the write set decides `key`, so the committed tree must not be consulted.
    pub fn shadows(&self, key: &[u8]) -> bool {
        !matches!(self.lookup(key), Overlay::Absent)
    }

    /// First live entry inside the bounds, in scan order, for which `accept` holds.
    pub fn next_entry<'a>(
        &'a self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
        mut accept: impl FnMut(&[u8]) -> bool,
    ) -> Option<(&'a [u8], &'a [u8])> {
        if !valid_range(lower, upper) {
            return None;
        }
        let mut pick = |(key, value): (&'a Vec<u8>, &'a Option<Vec<u8>>)| {
            let value = value.as_deref()?;
            accept(key.as_slice()).then_some((key.as_slice(), value))
        };
        let range = self.entries.range::<[u8], _>((lower, upper));
        if reverse {
            range.rev().find_map(&mut pick)
        } else {
            range.into_iter().find_map(&mut pick)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.prefixes.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_deref()))
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &[u8]> {
        self.prefixes.iter().map(Vec::as_slice)
    }
}

/// One begin..commit/abort cycle.
#[derive(Debug)]
pub(crate) struct TxnInstance {
    pub id: TxnId,
    pub view: ViewPin,
    pub started: Instant,
    pub writes: HashMap<KvsId, KvsWrites>,
    /// Set by a write conflict; the instance can no longer commit.
    pub doomed: bool,
}

impl TxnInstance {
    pub fn view_seqno(&self) -> Seqno {
        self.view.seqno()
    }
}

#[derive(Debug, Default)]
pub(crate) struct SlotInner {
    pub state: TxnState,
    pub instance: Option<TxnInstance>,
}

/// Reusable engine transaction container.
#[derive(Debug, Default)]
pub(crate) struct TxnSlot {
    inner: Mutex<SlotInner>,
}

impl TxnSlot {
    pub fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> TxnState {
        self.lock().state
    }
}

/// First-writer-wins lock table across all active transactions of a KVDB.
#[derive(Debug, Default)]
pub(crate) struct WriteLocks {
    keys: HashMap<(KvsId, Vec<u8>), TxnId>,
    prefixes: Vec<(KvsId, Vec<u8>, TxnId)>,
}

impl WriteLocks {
    pub fn try_lock_key(&mut self, kvs: KvsId, key: &[u8], txn: TxnId) -> bool {
        let prefix_held = self.prefixes.iter().any(|(owner_kvs, prefix, owner)| {
            *owner_kvs == kvs && *owner != txn && key.starts_with(prefix)
        });
        if prefix_held {
            return false;
        }
        match self.keys.get(&(kvs, key.to_vec())) {
            Some(owner) => *owner == txn,
            None => {
                self.keys.insert((kvs, key.to_vec()), txn);
                true
            }
        }
    }

    pub fn try_lock_prefix(&mut self, kvs: KvsId, prefix: &[u8], txn: TxnId) -> bool {
        let key_held = self.keys.iter().any(|((owner_kvs, key), owner)| {
            *owner_kvs == kvs && *owner != txn && key.starts_with(prefix)
        });
        let prefix_held = self.prefixes.iter().any(|(owner_kvs, held, owner)| {
            *owner_kvs == kvs && *owner != txn && (held.starts_with(prefix) || prefix.starts_with(held))
        });
        if key_held || prefix_held {
            return false;
        }
        self.prefixes.push((kvs, prefix.to_vec(), txn));
        true
    }

    pub fn release(&mut self, txn: TxnId) {
        self.keys.retain(|_, owner| *owner != txn);
        self.prefixes.retain(|(_, _, owner)| *owner != txn);
    }

    pub fn held(&self) -> usize {
        self.keys.len() + self.prefixes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{KvsWrites, Overlay, TxnState, WriteLocks};
    use std::ops::Bound;

    #[test]
    fn write_set_tracks_puts_deletes_and_prefixes() {
        let mut writes = KvsWrites::default();
        assert!(writes.is_empty());
        writes.put(b"abc1".to_vec(), b"v".to_vec());
        writes.put(b"abd".to_vec(), b"w".to_vec());
        writes.delete(b"zz".to_vec());
        assert_eq!(writes.lookup(b"abc1"), Overlay::Value(b"v"));
        assert_eq!(writes.lookup(b"zz"), Overlay::Deleted);
        assert_eq!(writes.lookup(b"other"), Overlay::Absent);

        writes.delete_prefix(b"abc".to_vec());
        assert_eq!(writes.lookup(b"abc1"), Overlay::Deleted);
        assert_eq!(writes.lookup(b"abc9"), Overlay::Deleted);
        assert!(writes.shadows(b"abc9"));
        assert_eq!(writes.lookup(b"abd"), Overlay::Value(b"w"));

        writes.put(b"abc2".to_vec(), b"back".to_vec());
        assert_eq!(writes.lookup(b"abc2"), Overlay::Value(b"back"));
        assert_eq!(writes.prefixes().count(), 1);
    }

    #[test]
    fn next_entry_skips_deletes() {
        let mut writes = KvsWrites::default();
        writes.put(b"a".to_vec(), b"1".to_vec());
        writes.delete(b"b".to_vec());
        writes.put(b"c".to_vec(), b"3".to_vec());

        let next = writes.next_entry(Bound::Excluded(&b"a"[..]), Bound::Unbounded, false, |_| true);
        assert_eq!(next, Some((&b"c"[..], &b"3"[..])));
        let last = writes.next_entry(Bound::Unbounded, Bound::Excluded(&b"c"[..]), true, |_| true);
        assert_eq!(last, Some((&b"a"[..], &b"1"[..])));
    }

    #[test]
    fn first_writer_wins_until_release() {
        let mut locks = WriteLocks::default();
        assert!(locks.try_lock_key(1, b"k", 10));
        assert!(locks.try_lock_key(1, b"k", 10));
        assert!(!locks.try_lock_key(1, b"k", 11));
        assert!(locks.try_lock_key(2, b"k", 11));
        assert!(!locks.try_lock_prefix(1, b"k", 11));
        assert!(locks.try_lock_prefix(1, b"p", 11));
        assert!(!locks.try_lock_key(1, b"p1", 10));

        locks.release(10);
        assert!(locks.try_lock_key(1, b"k", 11));
        locks.release(11);
        assert_eq!(locks.held(), 0);
    }

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(TxnState::default(), TxnState::Invalid);
        assert_eq!(TxnState::Committed.to_string(), "committed");
    }
}
