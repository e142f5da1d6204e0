// Snapshot cursor over one KVS, merging committed versions with an optional transaction overlay.
use std::ops::Bound;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::kvdb::{Db, KvsShared};
use crate::core::limits::check_bound;
use crate::core::store::prefix_successor;
use crate::core::txn::KvsWrites;
use crate::core::view::ViewPin;

/// Which scan strategy a cursor uses. Results never depend on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanPath {
    /// Range-bounded to the filter region.
    Prefix,
    /// Walks from the seek position, testing every key against the filter.
    Full,
}

impl ScanPath {
    pub fn select(prefix_length: usize, filter: &[u8]) -> Self {
        if prefix_length > 0 && !filter.is_empty() && filter.len() >= prefix_length {
            ScanPath::Prefix
        } else {
            ScanPath::Full
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Position {
    Start,
    /// At `key` or beyond it in scan order.
    From(Vec<u8>),
    /// Strictly beyond `key` in scan order.
    After(Vec<u8>),
}

pub(crate) struct EngineCursor {
    db: Arc<Db>,
    kvs: Arc<KvsShared>,
    view: ViewPin,
    filter: Vec<u8>,
    reverse: bool,
    path: ScanPath,
    overlay: Option<KvsWrites>,
    position: Position,
    max: Option<Vec<u8>>,
    eof: bool,
    record: Option<(Vec<u8>, Vec<u8>)>,
    landed: Option<Vec<u8>>,
}

impl EngineCursor {
    pub(crate) fn new(
        db: Arc<Db>,
        kvs: Arc<KvsShared>,
        view: ViewPin,
        filter: Vec<u8>,
        reverse: bool,
        overlay: Option<KvsWrites>,
    ) -> Self {
        let path = ScanPath::select(kvs.prefix_length, &filter);
        tracing::trace!(kvs = %kvs.name, ?path, reverse, view = view.seqno(), "cursor created");
        Self {
            db,
            kvs,
            view,
            filter,
            reverse,
            path,
            overlay,
            position: Position::Start,
            max: None,
            eof: false,
            record: None,
            landed: None,
        }
    }

    pub fn path(&self) -> ScanPath {
        self.path
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn is_txn_bound(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn filter(&self) -> &[u8] {
        &self.filter
    }

    /// Advances and returns the next record, or `None` once the scan is exhausted.
    pub fn read(&mut self) -> Result<Option<(&[u8], &[u8])>, Error> {
        self.check_usable()?;
        if self.eof {
            return Ok(None);
        }
        match self.find()? {
            Some((key, value)) => {
                self.position = Position::After(key.clone());
                self.record = Some((key, value));
            }
            None => {
                self.eof = true;
                self.record = None;
            }
        }
        Ok(self
            .record
            .as_ref()
            .map(|(key, value)| (key.as_slice(), value.as_slice())))
    }

    /// Positions at the first key at or beyond `key` in scan order and returns it.
    pub fn seek(&mut self, key: &[u8]) -> Result<Option<&[u8]>, Error> {
        check_bound(key)?;
        self.max = None;
        self.reposition(key)
    }

    /// Forward-only seek that also caps every later read at `max`, inclusive.
    pub fn seek_range(&mut self, min: &[u8], max: &[u8]) -> Result<Option<&[u8]>, Error> {
        if self.reverse {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("seek_range is only valid on forward cursors")
                .with_kvs(self.kvs.name.clone()));
        }
        check_bound(min)?;
        check_bound(max)?;
        self.max = Some(max.to_vec());
        self.reposition(min)
    }

    /// Moves a non-transactional cursor to the newest published view. Position is kept.
    pub fn update_view(&mut self) -> Result<(), Error> {
        self.db.check_open()?;
        if self.is_txn_bound() {
            return Ok(());
        }
        self.view = self.db.pin_current();
        self.eof = false;
        Ok(())
    }

    fn reposition(&mut self, key: &[u8]) -> Result<Option<&[u8]>, Error> {
        self.check_usable()?;
        self.eof = false;
        self.record = None;
        self.position = Position::From(key.to_vec());
        self.landed = self.find()?.map(|(key, _)| key);
        if let Some(landed) = &self.landed {
            self.position = Position::From(landed.clone());
        }
        Ok(self.landed.as_deref())
    }

    fn check_usable(&self) -> Result<(), Error> {
        self.db.check_open()?;
        if !self.is_txn_bound()
            && !self.filter.is_empty()
            && self.kvs.tree().prefix_deleted_since(&self.filter, self.view.seqno())
        {
            return Err(Error::new(ErrorKind::Busy)
                .with_message("a prefix delete overlapped this cursor's filter; update its view")
                .with_kvs(self.kvs.name.clone()));
        }
        Ok(())
    }

    fn find(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        let (lower, upper) = self.bounds();
        let lower = lower.as_ref().map(Vec::as_slice);
        let upper = upper.as_ref().map(Vec::as_slice);
        let filter = self.filter.as_slice();
        let view = self.view.seqno();

        let tree = self.kvs.tree();
        let committed = tree.next_visible(lower, upper, self.reverse, view, |key| {
            key.starts_with(filter)
                && !self
                    .overlay
                    .as_ref()
                    .is_some_and(|overlay| overlay.shadows(key))
        });
        let pending = self.overlay.as_ref().and_then(|overlay| {
            overlay.next_entry(lower, upper, self.reverse, |key| key.starts_with(filter))
        });

        let chosen = match (committed, pending) {
            (Some(committed), Some(pending)) => {
                let pending_first = if self.reverse {
                    pending.0 >= committed.0
                } else {
                    pending.0 <= committed.0
                };
                Some(if pending_first { pending } else { committed })
            }
            (committed, pending) => committed.or(pending),
        };
        Ok(chosen.map(|(key, value)| (key.to_vec(), value.to_vec())))
    }

    /// Key-order bounds for the next step: position, seek_range cap, and (prefix path) filter.
    fn bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let mut lower = Bound::Unbounded;
        let mut upper = Bound::Unbounded;

        let near = match &self.position {
            Position::Start => Bound::Unbounded,
            Position::From(key) => Bound::Included(key.clone()),
            Position::After(key) => Bound::Excluded(key.clone()),
        };
        if self.reverse {
            upper = near;
        } else {
            lower = near;
        }

        if let Some(max) = &self.max {
            upper = tighter_upper(upper, Bound::Included(max.clone()));
        }
        if self.path == ScanPath::Prefix {
            lower = tighter_lower(lower, Bound::Included(self.filter.clone()));
            if let Some(end) = prefix_successor(&self.filter) {
                upper = tighter_upper(upper, Bound::Excluded(end));
            }
        }
        (lower, upper)
    }
}

fn tighter_lower(current: Bound<Vec<u8>>, other: Bound<Vec<u8>>) -> Bound<Vec<u8>> {
    let replace = match (&current, &other) {
        (Bound::Unbounded, _) => true,
        (_, Bound::Unbounded) => false,
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => {
            b > a || (b == a && matches!(other, Bound::Excluded(_)))
        }
    };
    if replace { other } else { current }
}

fn tighter_upper(current: Bound<Vec<u8>>, other: Bound<Vec<u8>>) -> Bound<Vec<u8>> {
    let replace = match (&current, &other) {
        (Bound::Unbounded, _) => true,
        (_, Bound::Unbounded) => false,
        (Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => {
            b < a || (b == a && matches!(other, Bound::Excluded(_)))
        }
    };
    if replace { other } else { current }
}
