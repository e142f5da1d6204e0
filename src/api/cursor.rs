//! Purpose: Ordered, filtered iteration over one KVS.
//! Exports: `Cursor`, `CursorOptions`, `CursorResult`, `CursorRead`, `ScanPath`.
//! Role: Binds a snapshot at creation (ephemeral or a transaction's) and walks it in one direction.
//! Invariants: End of sequence is `Eof`, a result variant, never an error.
//! Invariants: A cursor is not shared between threads; calls on one instance are serialized.
#![allow(clippy::result_large_err)]

use super::buffer::fill_lookup;
use super::{ApiResult, Lookup, OutputBuffer, RecordLen, Transaction};
use crate::core::cursor::EngineCursor;
use crate::core::error::{Error, ErrorKind};

pub use crate::core::cursor::ScanPath;

#[derive(Clone, Copy, Debug, Default)]
pub struct CursorOptions<'a> {
    pub(crate) filter: Option<&'a [u8]>,
    pub(crate) reverse: bool,
    pub(crate) txn: Option<&'a Transaction>,
}

impl<'a> CursorOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts iteration to keys starting with `filter`. Empty means no constraint.
    pub fn filter<F: AsRef<[u8]> + ?Sized>(mut self, filter: &'a F) -> Self {
        self.filter = Some(filter.as_ref());
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Binds the cursor to an ACTIVE transaction's view and its writes so far.
    pub fn txn(mut self, txn: &'a Transaction) -> Self {
        self.txn = Some(txn);
        self
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum CursorResult<'a> {
    Record { key: &'a [u8], value: &'a [u8] },
    Eof,
}

/// Outcome of [`Cursor::read_into`]: exact lengths, possibly larger than the buffers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CursorRead {
    Record(RecordLen),
    Eof,
}

pub struct Cursor {
    inner: EngineCursor,
}

impl Cursor {
    pub(crate) fn from_engine(inner: EngineCursor) -> Self {
        Self { inner }
    }

    /// True when the fast prefix path was selected at creation.
    pub fn is_prefix(&self) -> bool {
        self.inner.path() == ScanPath::Prefix
    }

    pub fn scan_path(&self) -> ScanPath {
        self.inner.path()
    }

    pub fn is_reverse(&self) -> bool {
        self.inner.is_reverse()
    }

    pub fn filter(&self) -> &[u8] {
        self.inner.filter()
    }

    pub fn read(&mut self) -> ApiResult<CursorResult<'_>> {
        Ok(match self.inner.read()? {
            Some((key, value)) => CursorResult::Record { key, value },
            None => CursorResult::Eof,
        })
    }

    /// Reads the next record into caller buffers. Either may be omitted, not both.
    pub fn read_into(
        &mut self,
        key: Option<&mut dyn OutputBuffer>,
        value: Option<&mut dyn OutputBuffer>,
    ) -> ApiResult<CursorRead> {
        if key.is_none() && value.is_none() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("read_into needs a key buffer, a value buffer, or both"));
        }
        let Some((k, v)) = self.inner.read()? else {
            return Ok(CursorRead::Eof);
        };
        if let Some(out) = key {
            out.fill(k);
        }
        if let Some(out) = value {
            out.fill(v);
        }
        Ok(CursorRead::Record(RecordLen {
            key_len: k.len(),
            value_len: v.len(),
        }))
    }

    /// Moves to the first key at or after `key` (at or before, when reversed) and returns it.
    /// The next `read` yields that key.
    pub fn seek<K: AsRef<[u8]>>(&mut self, key: K) -> ApiResult<Option<&[u8]>> {
        self.inner.seek(key.as_ref())
    }

    pub fn seek_into<K, O>(&mut self, key: K, out: &mut O) -> ApiResult<Lookup>
    where
        K: AsRef<[u8]>,
        O: OutputBuffer + ?Sized,
    {
        let landed = self.inner.seek(key.as_ref())?;
        Ok(fill_lookup(out, landed))
    }

    /// Forward-only seek that limits all later reads to `[min, max]`.
    pub fn seek_range<A: AsRef<[u8]>, B: AsRef<[u8]>>(&mut self, min: A, max: B) -> ApiResult<Option<&[u8]>> {
        self.inner.seek_range(min.as_ref(), max.as_ref())
    }

    pub fn seek_range_into<A, B, O>(&mut self, min: A, max: B, out: &mut O) -> ApiResult<Lookup>
    where
        A: AsRef<[u8]>,
        B: AsRef<[u8]>,
        O: OutputBuffer + ?Sized,
    {
        let landed = self.inner.seek_range(min.as_ref(), max.as_ref())?;
        Ok(fill_lookup(out, landed))
    }

    /// Refreshes a non-transactional cursor to the current data; no-op for transactional ones.
    pub fn update_view(&mut self) -> ApiResult<()> {
        self.inner.update_view()
    }

    pub fn close(self) {
        drop(self)
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("path", &self.scan_path())
            .field("reverse", &self.is_reverse())
            .finish()
    }
}
