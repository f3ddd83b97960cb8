use crate::value::{SnapshotId, Tuple, UserKey};

pub type BoxedIterator<'a> = Box<dyn Iterator<Item = crate::Result<Tuple>> + Send + 'a>;

/// Merges multiple sorted tuple iterators
///
/// All sources must run in the same direction; the merge yields their
/// combined tuples in that direction using a simple k-way selection.
///
/// With a snapshot ceiling set, tuples above the ceiling are invisible.
/// With version eviction enabled, only the newest visible version of each
/// user key survives; shadowed versions and losers of duplicate-key ties
/// are advanced past.
pub struct MergeIterator<'a> {
    sources: Vec<std::iter::Peekable<BoxedIterator<'a>>>,
    descending: bool,
    evict_old_versions: bool,
    snapshot: Option<SnapshotId>,

    /// Ascending: user key that was already emitted
    emitted_key: Option<UserKey>,

    /// Descending: newest visible version of the key being collected
    pending: Option<Tuple>,
}

impl<'a> MergeIterator<'a> {
    /// Initializes a new ascending merge iterator.
    #[must_use]
    pub fn new(sources: Vec<BoxedIterator<'a>>) -> Self {
        Self::with_direction(sources, false)
    }

    /// Initializes a new merge iterator over same-direction sources.
    #[must_use]
    pub fn with_direction(sources: Vec<BoxedIterator<'a>>, descending: bool) -> Self {
        let sources = sources.into_iter().map(Iterator::peekable).collect();

        Self {
            sources,
            descending,
            evict_old_versions: false,
            snapshot: None,
            emitted_key: None,
            pending: None,
        }
    }

    /// Evict old versions by skipping over them.
    #[must_use]
    pub fn evict_old_versions(mut self, v: bool) -> Self {
        self.evict_old_versions = v;
        self
    }

    /// Hides tuples whose snapshot id is above `v`.
    #[must_use]
    pub fn snapshot(mut self, v: SnapshotId) -> Self {
        self.snapshot = Some(v);
        self
    }

    /// Pops the next tuple in merge order, propagating source errors.
    fn pop_next(&mut self) -> Option<crate::Result<Tuple>> {
        let mut idx_with_err = None;

        for (idx, item) in self.sources.iter_mut().map(|x| x.peek()).enumerate() {
            if let Some(Err(_)) = item {
                idx_with_err = Some(idx);
            }
        }

        if let Some(idx) = idx_with_err {
            let item = self.sources.get_mut(idx)?.next()?;

            if let Err(e) = item {
                return Some(Err(e));
            }

            unreachable!("peeked item was an error");
        }

        let descending = self.descending;
        let mut best: Option<(usize, &Tuple)> = None;

        for (idx, item) in self.sources.iter_mut().map(|x| x.peek()).enumerate() {
            if let Some(Ok(tuple)) = item {
                let better = match &best {
                    Some((_, best_tuple)) => {
                        if descending {
                            tuple.key > best_tuple.key
                        } else {
                            tuple.key < best_tuple.key
                        }
                    }
                    None => true,
                };

                if better {
                    best = Some((idx, tuple));
                }
            }
        }

        let (idx, _) = best?;
        self.sources.get_mut(idx)?.next()
    }

    fn is_visible(&self, tuple: &Tuple) -> bool {
        match self.snapshot {
            Some(ceiling) => tuple.key.snapshot_id <= ceiling,
            None => true,
        }
    }

    fn next_ascending(&mut self) -> Option<crate::Result<Tuple>> {
        loop {
            let tuple = match self.pop_next()? {
                Ok(tuple) => tuple,
                Err(e) => return Some(Err(e)),
            };

            if !self.is_visible(&tuple) {
                continue;
            }

            if self.evict_old_versions {
                // Duplicate user keys arrive newest-visible first, so
                // everything after the first hit is shadowed
                if self.emitted_key.as_ref() == Some(&tuple.key.user_key) {
                    continue;
                }

                self.emitted_key = Some(tuple.key.user_key.clone());
            }

            return Some(Ok(tuple));
        }
    }

    fn next_descending(&mut self) -> Option<crate::Result<Tuple>> {
        loop {
            let tuple = match self.pop_next() {
                Some(Ok(tuple)) => tuple,
                Some(Err(e)) => return Some(Err(e)),

                // Sources are exhausted; emit the tuple still being collected
                None => return self.pending.take().map(Ok),
            };

            if !self.is_visible(&tuple) {
                continue;
            }

            if !self.evict_old_versions {
                return Some(Ok(tuple));
            }

            // Walking backwards, versions of a user key arrive oldest
            // first; keep replacing until the key changes, then the
            // last replacement was the newest visible version
            let same_key = self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.key.user_key == tuple.key.user_key);

            if same_key || self.pending.is_none() {
                self.pending = Some(tuple);
            } else {
                let done = self.pending.replace(tuple);
                return done.map(Ok);
            }
        }
    }
}

impl<'a> Iterator for MergeIterator<'a> {
    type Item = crate::Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.descending {
            self.next_descending()
        } else {
            self.next_ascending()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    macro_rules! iter_closed {
        ($iter:expr) => {
            assert!($iter.next().is_none(), "iterator should be closed (done)");
        };
    }

    fn boxed(tuples: &[Tuple]) -> BoxedIterator<'static> {
        Box::new(tuples.to_vec().into_iter().map(Ok))
    }

    fn boxed_rev(tuples: &[Tuple]) -> BoxedIterator<'static> {
        let mut tuples = tuples.to_vec();
        tuples.reverse();
        Box::new(tuples.into_iter().map(Ok))
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn merge_no_evict_interleaves_versions() -> crate::Result<()> {
        let vec0 = [
            Tuple::from_components(*b"a", *b"old", 1),
            Tuple::from_components(*b"b", *b"old", 1),
            Tuple::from_components(*b"c", *b"old", 1),
        ];

        let vec1 = [
            Tuple::from_components(*b"a", *b"new", 2),
            Tuple::from_components(*b"b", *b"new", 2),
            Tuple::from_components(*b"c", *b"new", 2),
        ];

        let mut iter = MergeIterator::new(vec![boxed(&vec0), boxed(&vec1)]);

        assert_eq!(Tuple::from_components(*b"a", *b"new", 2), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"a", *b"old", 1), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"b", *b"new", 2), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"b", *b"old", 1), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"c", *b"new", 2), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"c", *b"old", 1), iter.next().unwrap()?);

        iter_closed!(iter);

        Ok(())
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn merge_evict_keeps_newest() -> crate::Result<()> {
        let vec0 = [
            Tuple::from_components(*b"a", *b"old", 1),
            Tuple::from_components(*b"b", *b"old", 1),
            Tuple::from_components(*b"c", *b"old", 1),
        ];

        let vec1 = [
            Tuple::from_components(*b"a", *b"new", 2),
            Tuple::from_components(*b"b", *b"new", 2),
            Tuple::from_components(*b"c", *b"new", 2),
        ];

        let mut iter =
            MergeIterator::new(vec![boxed(&vec0), boxed(&vec1)]).evict_old_versions(true);

        assert_eq!(Tuple::from_components(*b"a", *b"new", 2), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"b", *b"new", 2), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"c", *b"new", 2), iter.next().unwrap()?);

        iter_closed!(iter);

        Ok(())
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn merge_evict_descending_keeps_newest() -> crate::Result<()> {
        let vec0 = [
            Tuple::from_components(*b"a", *b"old", 1),
            Tuple::from_components(*b"b", *b"old", 1),
            Tuple::from_components(*b"c", *b"old", 1),
        ];

        let vec1 = [
            Tuple::from_components(*b"a", *b"new", 2),
            Tuple::from_components(*b"b", *b"new", 2),
            Tuple::from_components(*b"c", *b"new", 2),
        ];

        let mut iter = MergeIterator::with_direction(
            vec![boxed_rev(&vec0), boxed_rev(&vec1)],
            true,
        )
        .evict_old_versions(true);

        assert_eq!(Tuple::from_components(*b"c", *b"new", 2), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"b", *b"new", 2), iter.next().unwrap()?);
        assert_eq!(Tuple::from_components(*b"a", *b"new", 2), iter.next().unwrap()?);

        iter_closed!(iter);

        Ok(())
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn merge_snapshot_hides_future_writes() -> crate::Result<()> {
        let vec0 = [
            Tuple::from_components(*b"a", *b"v4", 4),
            Tuple::from_components(*b"a", *b"v3", 3),
            Tuple::from_components(*b"a", *b"v2", 2),
            Tuple::from_components(*b"a", *b"v1", 1),
        ];

        {
            let mut iter = MergeIterator::new(vec![boxed(&vec0)])
                .snapshot(1)
                .evict_old_versions(true);

            assert_eq!(Tuple::from_components(*b"a", *b"v1", 1), iter.next().unwrap()?);
            iter_closed!(iter);
        }

        {
            let mut iter = MergeIterator::new(vec![boxed(&vec0)])
                .snapshot(2)
                .evict_old_versions(true);

            assert_eq!(Tuple::from_components(*b"a", *b"v2", 2), iter.next().unwrap()?);
            iter_closed!(iter);
        }

        {
            let mut iter = MergeIterator::with_direction(vec![boxed_rev(&vec0)], true)
                .snapshot(2)
                .evict_old_versions(true);

            assert_eq!(Tuple::from_components(*b"a", *b"v2", 2), iter.next().unwrap()?);
            iter_closed!(iter);
        }

        Ok(())
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn merge_evict_tombstone_shadows() -> crate::Result<()> {
        let vec0 = [
            Tuple::from_components(*b"a", *b"old", 2),
            Tuple::from_components(*b"a", *b"old", 1),
        ];

        let vec1 = [Tuple::new_tombstone(*b"a", 3)];

        let mut iter =
            MergeIterator::new(vec![boxed(&vec0), boxed(&vec1)]).evict_old_versions(true);

        assert_eq!(Tuple::new_tombstone(*b"a", 3), iter.next().unwrap()?);

        iter_closed!(iter);

        Ok(())
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn merge_snapshot_tombstone_too_new() -> crate::Result<()> {
        let vec0 = [
            Tuple::new_tombstone(*b"a", 2),
            Tuple::from_components(*b"a", *b"v", 1),
            Tuple::new_tombstone(*b"b", 2),
            Tuple::from_components(*b"b", *b"v", 1),
        ];

        let mut iter = MergeIterator::new(vec![boxed(&vec0)])
            .snapshot(1)
            .evict_old_versions(true);

        assert_eq!(*b"a", &*iter.next().unwrap()?.key.user_key);
        assert_eq!(*b"b", &*iter.next().unwrap()?.key.user_key);

        iter_closed!(iter);

        Ok(())
    }

    #[test]
    fn merge_non_overlapping() -> crate::Result<()> {
        let iter0 = (0u64..5).map(|x| Tuple::from_components(x.to_be_bytes(), *b"old", 1));
        let iter1 = (5u64..10).map(|x| Tuple::from_components(x.to_be_bytes(), *b"new", 3));
        let iter2 = (10u64..15).map(|x| Tuple::new_tombstone(x.to_be_bytes(), 2));

        let iter0: BoxedIterator<'_> = Box::new(iter0.map(Ok));
        let iter1: BoxedIterator<'_> = Box::new(iter1.map(Ok));
        let iter2: BoxedIterator<'_> = Box::new(iter2.map(Ok));

        let merge_iter = MergeIterator::new(vec![iter0, iter1, iter2]);

        for (idx, item) in merge_iter.enumerate() {
            let item = item?;
            assert_eq!(*item.key.user_key, (idx as u64).to_be_bytes());
        }

        Ok(())
    }
}
