//! Weakly consistent iterators over the entries of a [`LurchTable`](crate::LurchTable).

use std::fmt::{self, Debug};
use std::iter::FusedIterator;

use crate::hash_table::HashTable;
use crate::order_list::HEAD;

/// [`Cursor`] walks the entries of a table one at a time without holding any lock in between.
///
/// An ordered table is walked along its order list; the cursor pins the node it stands on, so the
/// walk resumes from the successor of a removed node. Nodes linked after the cursor was created
/// terminate the walk. An unordered table is walked stripe by stripe in slot order.
pub(crate) struct Cursor<'t, K, V, C> {
    table: &'t HashTable<K, V, C>,
    state: State,
}

#[derive(Clone, Copy, Debug)]
enum State {
    Ordered { node: usize, start: u64 },
    Unordered { stripe: usize, slot: usize },
    Done,
}

impl<'t, K, V, C> Cursor<'t, K, V, C> {
    pub(crate) fn new(table: &'t HashTable<K, V, C>) -> Self {
        let state = if table.order().is_ordered() {
            State::Ordered {
                node: HEAD,
                start: table.with_order_list(|l| l.cursor_start()),
            }
        } else {
            State::Unordered { stripe: 0, slot: 0 }
        };
        Self { table, state }
    }

    /// Moves to the next entry, and invokes `f` with it.
    ///
    /// Returns `None` when the walk is over.
    pub(crate) fn advance<R, F: FnMut(&K, &V) -> R>(&mut self, mut f: F) -> Option<R> {
        loop {
            match self.state {
                State::Ordered { node, start } => {
                    match self.table.with_order_list(|l| l.advance(node, start)) {
                        Some((next, target)) => {
                            self.state = State::Ordered { node: next, start };
                            if let Some(result) = self.table.with_target(target, |k, v| f(k, v))
                            {
                                return Some(result);
                            }
                        }
                        None => self.state = State::Done,
                    }
                }
                State::Unordered { stripe, slot } => {
                    if stripe >= self.table.num_stripes() {
                        self.finish();
                        continue;
                    }
                    match self.table.with_next_occupied(stripe, slot, |k, v| f(k, v)) {
                        Some((found, result)) => {
                            self.state = State::Unordered {
                                stripe,
                                slot: found + 1,
                            };
                            return Some(result);
                        }
                        None => {
                            self.state = State::Unordered {
                                stripe: stripe + 1,
                                slot: 0,
                            };
                        }
                    }
                }
                State::Done => return None,
            }
        }
    }

    fn finish(&mut self) {
        if let State::Ordered { node, .. } = self.state {
            self.table.with_order_list(|l| l.unpin(node));
        }
        self.state = State::Done;
    }
}

impl<K, V, C> Drop for Cursor<'_, K, V, C> {
    #[inline]
    fn drop(&mut self) {
        self.finish();
    }
}

impl<K, V, C> Debug for Cursor<'_, K, V, C> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").field("state", &self.state).finish()
    }
}

/// An iterator over the entries of a [`LurchTable`](crate::LurchTable).
///
/// Entries are cloned one at a time; no lock is held between two calls to [`Iterator::next`].
#[derive(Debug)]
pub struct Iter<'t, K, V, C> {
    cursor: Cursor<'t, K, V, C>,
}

/// An iterator over the keys of a [`LurchTable`](crate::LurchTable).
#[derive(Debug)]
pub struct Keys<'t, K, V, C> {
    cursor: Cursor<'t, K, V, C>,
}

/// An iterator over the values of a [`LurchTable`](crate::LurchTable).
#[derive(Debug)]
pub struct Values<'t, K, V, C> {
    cursor: Cursor<'t, K, V, C>,
}

impl<'t, K, V, C> Iter<'t, K, V, C> {
    pub(crate) fn new(cursor: Cursor<'t, K, V, C>) -> Self {
        Self { cursor }
    }
}

impl<'t, K, V, C> Keys<'t, K, V, C> {
    pub(crate) fn new(cursor: Cursor<'t, K, V, C>) -> Self {
        Self { cursor }
    }
}

impl<'t, K, V, C> Values<'t, K, V, C> {
    pub(crate) fn new(cursor: Cursor<'t, K, V, C>) -> Self {
        Self { cursor }
    }
}

impl<K: Clone, V: Clone, C> Iterator for Iter<'_, K, V, C> {
    type Item = (K, V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(|k, v| (k.clone(), v.clone()))
    }
}

impl<K: Clone, V, C> Iterator for Keys<'_, K, V, C> {
    type Item = K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(|k, _| k.clone())
    }
}

impl<K, V: Clone, C> Iterator for Values<'_, K, V, C> {
    type Item = V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(|_, v| v.clone())
    }
}

impl<K: Clone, V: Clone, C> FusedIterator for Iter<'_, K, V, C> {}

impl<K: Clone, V, C> FusedIterator for Keys<'_, K, V, C> {}

impl<K, V: Clone, C> FusedIterator for Values<'_, K, V, C> {}

#[cfg(test)]
mod test {
    use crate::{LurchTable, Order};

    #[test]
    fn removed_node_resumes() {
        let table: LurchTable<u64, u64> = LurchTable::with_order(Order::Insertion);
        for k in 0..8 {
            assert!(table.try_add(k, k));
        }
        let mut iter = table.keys();
        assert_eq!(iter.next(), Some(0));
        assert_eq!(iter.next(), Some(1));

        // The cursor stands on `1`.
        assert!(table.remove(&1).is_some());
        assert!(table.remove(&2).is_some());
        assert!(table.try_add(8, 8));
        assert!(table.try_add(1, 1));
        assert_eq!(iter.collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn relinked_entries_are_not_repeated() {
        let table: LurchTable<u64, u64> = LurchTable::with_order(Order::Access);
        for k in 0..4 {
            assert!(table.try_add(k, k));
        }
        let mut iter = table.keys();
        assert_eq!(iter.next(), Some(0));

        // `0` was yielded, and `2` is relinked ahead of the cursor: neither is yielded again.
        assert_eq!(table.try_get(&0), Some(0));
        assert_eq!(table.try_get(&2), Some(2));
        assert_eq!(iter.collect::<Vec<_>>(), vec![1, 3]);

        // Promotion moves unpinned nodes in place.
        assert_eq!(table.keys().collect::<Vec<_>>(), vec![1, 3, 0, 2]);
        assert_eq!(table.try_get(&1), Some(1));
        assert_eq!(table.keys().collect::<Vec<_>>(), vec![3, 0, 2, 1]);
    }

    #[test]
    fn unordered_walk() {
        let table: LurchTable<u64, u64> = LurchTable::builder().stripes(4).build().unwrap();
        for k in 0..64 {
            assert!(table.try_add(k, k));
        }
        let mut iter = table.iter();
        let first = iter.next().unwrap();
        assert!(table.remove(&first.0).is_some());
        let mut rest: Vec<u64> = iter.map(|(k, _)| k).collect();
        rest.push(first.0);
        rest.sort_unstable();
        assert_eq!(rest, (0..64).collect::<Vec<_>>());
    }
}
