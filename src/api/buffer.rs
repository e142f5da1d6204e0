//! Purpose: One buffer abstraction for every byte payload crossing the API.
//! Exports: `OutputBuffer`, `ByteBuf`, `Lookup`, `RecordLen`.
//! Role: Callers either take an allocated result or pre-size a destination and read the exact length.
//! Invariants: `found` is independent of truncation; `len` is always the true length.
//! Invariants: After a fill, a `ByteBuf` limit is `min(limit, position + exact_len)`, never capacity.
use std::fmt;

use crate::core::error::{Error, ErrorKind};

/// Outcome of filling one output buffer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Lookup {
    pub found: bool,
    pub len: usize,
}

impl Lookup {
    pub const NOT_FOUND: Lookup = Lookup { found: false, len: 0 };

    pub fn found(len: usize) -> Self {
        Self { found: true, len }
    }

    /// True when the value was found but did not fit in `capacity` bytes.
    pub fn truncated(&self, capacity: usize) -> bool {
        self.found && self.len > capacity
    }
}

/// Exact key and value lengths of one cursor record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecordLen {
    pub key_len: usize,
    pub value_len: usize,
}

/// A caller-owned destination region.
pub trait OutputBuffer {
    /// Bytes the next fill may write.
    fn capacity(&self) -> usize;

    /// Copies as much of `src` as fits and records `src.len()` as the exact length.
    /// Returns the number of bytes copied.
    fn fill(&mut self, src: &[u8]) -> usize;
}

impl OutputBuffer for [u8] {
    fn capacity(&self) -> usize {
        self.len()
    }

    fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.len());
        self[..n].copy_from_slice(&src[..n]);
        n
    }
}

impl<const N: usize> OutputBuffer for [u8; N] {
    fn capacity(&self) -> usize {
        N
    }

    fn fill(&mut self, src: &[u8]) -> usize {
        OutputBuffer::fill(self.as_mut_slice(), src)
    }
}

/// Capacity is the current length; a shorter result truncates the vector to it.
impl OutputBuffer for Vec<u8> {
    fn capacity(&self) -> usize {
        self.len()
    }

    fn fill(&mut self, src: &[u8]) -> usize {
        let n = OutputBuffer::fill(self.as_mut_slice(), src);
        if src.len() < self.len() {
            self.truncate(src.len());
        }
        n
    }
}

/// A region with a position/limit window, in the style of a NIO byte buffer.
///
/// As input, the payload is `remaining()`. As output, bytes land at `position` and the
/// limit shrinks to the end of what was actually produced.
#[derive(Clone, Eq, PartialEq)]
pub struct ByteBuf<B> {
    data: B,
    position: usize,
    limit: usize,
}

impl<B: AsRef<[u8]>> ByteBuf<B> {
    pub fn new(data: B) -> Self {
        let limit = data.as_ref().len();
        Self {
            data,
            position: 0,
            limit,
        }
    }

    /// A buffer over `data[position..limit]`.
    pub fn window(data: B, position: usize, limit: usize) -> Result<Self, Error> {
        let mut buf = Self::new(data);
        buf.set_limit(limit)?;
        buf.set_position(position)?;
        Ok(buf)
    }

    pub fn with_position(mut self, position: usize) -> Result<Self, Error> {
        self.set_position(position)?;
        Ok(self)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn capacity(&self) -> usize {
        self.data.as_ref().len()
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data.as_ref()[self.position..self.limit]
    }

    pub fn set_position(&mut self, position: usize) -> Result<(), Error> {
        if position > self.limit {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "position {position} is beyond limit {}",
                self.limit
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Moves the limit; a position past the new limit is pulled back to it.
    pub fn set_limit(&mut self, limit: usize) -> Result<(), Error> {
        if limit > self.capacity() {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "limit {limit} is beyond capacity {}",
                self.capacity()
            )));
        }
        self.limit = limit;
        self.position = self.position.min(limit);
        Ok(())
    }

    pub fn into_inner(self) -> B {
        self.data
    }
}

impl<B: AsRef<[u8]>> AsRef<[u8]> for ByteBuf<B> {
    fn as_ref(&self) -> &[u8] {
        self.remaining()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> OutputBuffer for ByteBuf<B> {
    fn capacity(&self) -> usize {
        self.limit - self.position
    }

    fn fill(&mut self, src: &[u8]) -> usize {
        let (position, limit) = (self.position, self.limit);
        let n = OutputBuffer::fill(&mut self.data.as_mut()[position..limit], src);
        self.limit = limit.min(position + src.len());
        n
    }
}

impl<B: AsRef<[u8]>> fmt::Debug for ByteBuf<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuf")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Fills `out` from an optional value, reporting found and the exact length.
pub(crate) fn fill_lookup<O: OutputBuffer + ?Sized>(out: &mut O, value: Option<&[u8]>) -> Lookup {
    match value {
        Some(value) => {
            out.fill(value);
            Lookup::found(value.len())
        }
        None => Lookup::NOT_FOUND,
    }
}
