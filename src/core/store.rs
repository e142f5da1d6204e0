//! Purpose: In-memory multi-version key tree backing one KVS.
//! Exports: `Tree`, `Seqno`, `TreeStats`, `prefix_successor`.
//! Role: Source of truth for committed data; readers select a version by view seqno.
//! Invariants: Versions per key are stored in ascending seqno order.
//! Invariants: A prefix tombstone at seqno `s` hides versions with seqno `< s` only.
use std::collections::BTreeMap;
use std::ops::Bound;

pub(crate) type Seqno = u64;

#[derive(Clone, Debug)]
struct Version {
    seqno: Seqno,
    value: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
struct PrefixTomb {
    prefix: Vec<u8>,
    seqno: Seqno,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct TreeStats {
    pub versions: u64,
    pub live_keys: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Tree {
    map: BTreeMap<Vec<u8>, Vec<Version>>,
    ptombs: Vec<PrefixTomb>,
}

impl Tree {
    pub fn insert(&mut self, key: Vec<u8>, seqno: Seqno, value: Option<Vec<u8>>) {
        let versions = self.map.entry(key).or_default();
        match versions.last_mut() {
            Some(last) if last.seqno == seqno => last.value = value,
            _ => versions.push(Version { seqno, value }),
        }
    }

    pub fn delete_prefix(&mut self, prefix: Vec<u8>, seqno: Seqno) {
        self.ptombs.push(PrefixTomb { prefix, seqno });
    }

    pub fn get(&self, key: &[u8], view: Seqno) -> Option<&[u8]> {
        let versions = self.map.get(key)?;
        self.visible(key, versions, view)
    }

    /// Seqno of the newest committed change touching `key`, prefix deletes included.
    pub fn latest_write(&self, key: &[u8]) -> Option<Seqno> {
        let put = self
            .map
            .get(key)
            .and_then(|versions| versions.last())
            .map(|version| version.seqno);
        let ptomb = self
            .ptombs
            .iter()
            .filter(|tomb| key.starts_with(&tomb.prefix))
            .map(|tomb| tomb.seqno)
            .max();
        put.max(ptomb)
    }

    /// Seqno of the newest committed change to any key under `prefix`, prefix deletes included.
    pub fn latest_write_under(&self, prefix: &[u8]) -> Option<Seqno> {
        let upper = prefix_successor(prefix);
        let upper = match upper.as_deref() {
            Some(upper) => Bound::Excluded(upper),
            None => Bound::Unbounded,
        };
        let put = self
            .map
            .range::<[u8], _>((Bound::Included(prefix), upper))
            .filter_map(|(_, versions)| versions.last())
            .map(|version| version.seqno)
            .max();
        let ptomb = self
            .ptombs
            .iter()
            .filter(|tomb| tomb.prefix.starts_with(prefix) || prefix.starts_with(&tomb.prefix))
            .map(|tomb| tomb.seqno)
            .max();
        put.max(ptomb)
    }

    /// True when a prefix delete newer than `view` may have removed keys under `filter`.
    pub fn prefix_deleted_since(&self, filter: &[u8], view: Seqno) -> bool {
        self.ptombs.iter().any(|tomb| {
            tomb.seqno > view && (tomb.prefix.starts_with(filter) || filter.starts_with(&tomb.prefix))
        })
    }

    /// First key visible at `view` inside the bounds, in scan order, for which `accept` holds.
    pub fn next_visible<'a>(
        &'a self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
        view: Seqno,
        mut accept: impl FnMut(&[u8]) -> bool,
    ) -> Option<(&'a [u8], &'a [u8])> {
        if !valid_range(lower, upper) {
            return None;
        }
        let mut pick = |(key, versions): (&'a Vec<u8>, &'a Vec<Version>)| {
            if !accept(key.as_slice()) {
                return None;
            }
            self.visible(key, versions, view)
                .map(|value| (key.as_slice(), value))
        };
        let range = self.map.range::<[u8], _>((lower, upper));
        if reverse {
            range.rev().find_map(&mut pick)
        } else {
            range.into_iter().find_map(&mut pick)
        }
    }

    /// Drops versions no snapshot at or above `horizon` can observe. Returns how many went.
    pub fn prune(&mut self, horizon: Seqno) -> u64 {
        let ptombs = std::mem::take(&mut self.ptombs);
        let (settled, pending): (Vec<_>, Vec<_>) =
            ptombs.into_iter().partition(|tomb| tomb.seqno <= horizon);
        let mut removed = 0u64;

        self.map.retain(|key, versions| {
            let before = versions.len();
            let keep_from = versions
                .iter()
                .rposition(|version| version.seqno <= horizon)
                .unwrap_or(0);
            versions.drain(..keep_from);

            if let Some(first) = versions.first() {
                if first.seqno <= horizon {
                    let hidden = settled
                        .iter()
                        .any(|tomb| tomb.seqno > first.seqno && key.starts_with(&tomb.prefix));
                    if hidden || first.value.is_none() {
                        versions.remove(0);
                    }
                }
            }
            removed += (before - versions.len()) as u64;
            !versions.is_empty()
        });

        self.ptombs = pending;
        removed
    }

    pub fn stats(&self, view: Seqno) -> TreeStats {
        let mut stats = TreeStats::default();
        for (key, versions) in &self.map {
            stats.versions += versions.len() as u64;
            if self.visible(key, versions, view).is_some() {
                stats.live_keys += 1;
            }
        }
        stats.versions += self.ptombs.len() as u64;
        stats
    }

    pub fn live_records(&self, view: Seqno) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.map.iter().filter_map(move |(key, versions)| {
            self.visible(key, versions, view)
                .map(|value| (key.as_slice(), value))
        })
    }

    fn visible<'a>(&self, key: &[u8], versions: &'a [Version], view: Seqno) -> Option<&'a [u8]> {
        let version = versions.iter().rev().find(|version| version.seqno <= view)?;
        let hidden = self.ptombs.iter().any(|tomb| {
            tomb.seqno <= view && tomb.seqno > version.seqno && key.starts_with(&tomb.prefix)
        });
        if hidden {
            return None;
        }
        version.value.as_deref()
    }
}

/// Smallest byte string greater than every key starting with `prefix`, if one exists.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

/// `BTreeMap::range` panics on inverted or empty-exclusive ranges.
pub(crate) fn valid_range(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo <= hi,
        (Bound::Included(lo), Bound::Excluded(hi))
        | (Bound::Excluded(lo), Bound::Included(hi))
        | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo < hi,
        _ => true,
    }
}
