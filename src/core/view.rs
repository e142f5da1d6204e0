// Registry of live snapshot seqnos; the oldest one bounds what compaction may prune.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::store::Seqno;

#[derive(Debug, Default)]
pub(crate) struct Views {
    pinned: Mutex<BTreeMap<Seqno, usize>>,
}

impl Views {
    /// Pins the currently published seqno. Loading under the registry lock keeps
    /// `horizon` from ever passing a view that is about to be pinned.
    pub fn pin_current(self: &Arc<Self>, published: &AtomicU64) -> ViewPin {
        let mut pinned = self.lock();
        let seqno = published.load(Ordering::Acquire);
        *pinned.entry(seqno).or_insert(0) += 1;
        ViewPin {
            views: Arc::clone(self),
            seqno,
        }
    }

    /// Pins a seqno that an existing pin already protects.
    pub fn pin_shared(self: &Arc<Self>, other: &ViewPin) -> ViewPin {
        *self.lock().entry(other.seqno).or_insert(0) += 1;
        ViewPin {
            views: Arc::clone(self),
            seqno: other.seqno,
        }
    }

    pub fn horizon(&self, published: &AtomicU64) -> Seqno {
        let pinned = self.lock();
        let current = published.load(Ordering::Acquire);
        pinned
            .keys()
            .next()
            .copied()
            .map_or(current, |oldest| oldest.min(current))
    }

    pub fn live(&self) -> usize {
        self.lock().values().sum()
    }

    fn unpin(&self, seqno: Seqno) {
        let mut pinned = self.lock();
        if let Some(count) = pinned.get_mut(&seqno) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&seqno);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Seqno, usize>> {
        self.pinned.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
pub(crate) struct ViewPin {
    views: Arc<Views>,
    seqno: Seqno,
}

impl ViewPin {
    pub fn seqno(&self) -> Seqno {
        self.seqno
    }
}

impl Drop for ViewPin {
    fn drop(&mut self) {
        self.views.unpin(self.seqno);
    }
}

#[cfg(test)]
mod tests {
    use super::Views;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn horizon_follows_oldest_pin() {
        let views = Arc::new(Views::default());
        let published = AtomicU64::new(3);
        assert_eq!(views.horizon(&published), 3);

        let old = views.pin_current(&published);
        published.store(7, Ordering::Release);
        let newer = views.pin_current(&published);
        let shared = views.pin_shared(&old);
        assert_eq!(views.live(), 3);
        assert_eq!(views.horizon(&published), 3);

        drop(old);
        assert_eq!(views.horizon(&published), 3);
        drop(shared);
        assert_eq!(views.horizon(&published), 7);
        assert_eq!(newer.seqno(), 7);
        drop(newer);
        assert_eq!(views.live(), 0);
    }
}
