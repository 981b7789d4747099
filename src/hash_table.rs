pub(crate) mod stripe;

use std::borrow::Borrow;
use std::ops::DerefMut;
use std::sync::atomic::Ordering::{Acquire, Relaxed};

use stripe::{Entry, Stripe, NIL};

use crate::comparer::KeyComparer;
use crate::config::Order;
use crate::order_list::{OrderList, Target};
use crate::sync::{yield_now, AtomicUsize, Mutex, RwLock};

/// The average number of entries per bucket that triggers doubling the bucket array.
pub(crate) const MAX_LOAD: usize = 2;

/// The maximum number of buckets per stripe.
const MAX_LOCAL_BUCKETS: usize = 1_usize << (usize::BITS / 2);

/// The maximum total number of buckets allocated up front; larger tables grow on demand.
const MAX_INITIAL_BUCKETS: usize = 1_usize << 20;

/// [`HashTable`] is the striped hash table engine shared by every table operation.
///
/// ## Lock order
///
/// `stripes` (shared for point operations, exclusive for resizing) → stripe mutexes in ascending
/// stripe index → `order_list`. No lock is acquired against this order, therefore no cycle can be
/// formed.
pub(crate) struct HashTable<K, V, C> {
    /// The structural lock and the stripes it protects.
    stripes: RwLock<Box<[Mutex<Stripe<K, V>>]>>,
    order_list: Mutex<OrderList>,
    /// The number of entries.
    ///
    /// If the table is ordered, it is only modified while `order_list` is locked, and then it is
    /// equal to the length of `order_list` whenever the lock is free.
    count: AtomicUsize,
    /// The total number of buckets across all stripes.
    num_buckets: AtomicUsize,
    stripe_bits: u32,
    order: Order,
    limit: Option<usize>,
    comparer: C,
}

/// Whether an operation reads or writes the value of an entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Touch {
    Read,
    Write,
}

/// [`Locked`] grants access to a locked stripe.
pub(crate) struct Locked<'l, K, V, C> {
    table: &'l HashTable<K, V, C>,
    stripe: &'l mut Stripe<K, V>,
}

/// The result of locating a key for insertion.
enum Plan {
    Occupied(usize),
    /// A new entry can be inserted; the count has been reserved.
    Reserved,
    /// The entry in the target has to be evicted for the new entry to be inserted.
    Evict(usize, Target),
}

impl<K, V, C> HashTable<K, V, C> {
    /// Creates a new [`HashTable`].
    ///
    /// `num_stripes` must be a power of two.
    pub(crate) fn new(
        order: Order,
        limit: Option<usize>,
        capacity: usize,
        num_stripes: usize,
        comparer: C,
    ) -> Self {
        debug_assert!(num_stripes.is_power_of_two());
        let stripe_bits = num_stripes.trailing_zeros();
        let per_stripe = MAX_LOAD * num_stripes;
        let local_buckets = (capacity.saturating_add(per_stripe - 1) / per_stripe)
            .max(1)
            .min(MAX_INITIAL_BUCKETS / num_stripes)
            .max(1)
            .next_power_of_two()
            .min(MAX_LOCAL_BUCKETS);
        let stripes = (0..num_stripes)
            .map(|_| Mutex::new(Stripe::new(local_buckets, stripe_bits)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            stripes: RwLock::new(stripes),
            order_list: Mutex::new(OrderList::new()),
            count: AtomicUsize::new(0),
            num_buckets: AtomicUsize::new(local_buckets * num_stripes),
            stripe_bits,
            order,
            limit,
            comparer,
        }
    }

    #[inline]
    pub(crate) fn order(&self) -> Order {
        self.order
    }

    #[inline]
    pub(crate) fn limit(&self) -> Option<usize> {
        self.limit
    }

    #[inline]
    pub(crate) fn comparer(&self) -> &C {
        &self.comparer
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count.load(Acquire)
    }

    #[inline]
    pub(crate) fn num_stripes(&self) -> usize {
        1_usize << self.stripe_bits
    }

    /// Returns the number of entries the table can hold without resizing.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.num_buckets.load(Relaxed).saturating_mul(MAX_LOAD)
    }

    /// Returns the hash value of the key.
    #[inline]
    pub(crate) fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        self.comparer.hash(key)
    }

    #[inline]
    fn stripe_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.num_stripes() - 1)
    }

    /// Locks the stripe owning `hash`, and invokes `f` with it.
    #[inline]
    pub(crate) fn with_stripe<R, F: FnOnce(&mut Locked<'_, K, V, C>) -> R>(
        &self,
        hash: u64,
        f: F,
    ) -> R {
        let index = self.stripe_index(hash);
        let stripes = self.stripes.read();
        let mut guard = stripes[index].lock();
        f(&mut Locked {
            table: self,
            stripe: &mut guard,
        })
    }

    /// Locks the stripe, and invokes `f` with the entry pointed by `target` if it is still alive.
    #[inline]
    pub(crate) fn with_target<R, F: FnOnce(&K, &V) -> R>(&self, target: Target, f: F) -> Option<R> {
        let stripes = self.stripes.read();
        let guard = stripes.get(target.stripe)?.lock();
        guard
            .get_if_generation(target.slot, target.generation)
            .map(|e| f(e.key(), e.val()))
    }

    /// Invokes `f` with the first entry at or after `slot` in the stripe.
    ///
    /// Returns the slot of the entry and the result of `f`.
    #[inline]
    pub(crate) fn with_next_occupied<R, F: FnOnce(&K, &V) -> R>(
        &self,
        stripe: usize,
        slot: usize,
        f: F,
    ) -> Option<(usize, R)> {
        let stripes = self.stripes.read();
        let guard = stripes.get(stripe)?.lock();
        let slot = guard.next_occupied(slot)?;
        guard.get(slot).map(|e| (slot, f(e.key(), e.val())))
    }

    /// Invokes `f` with the oldest entry.
    ///
    /// Returns `None` if the table is unordered or empty.
    pub(crate) fn with_front<R, F: FnMut(&K, &V) -> R>(&self, mut f: F) -> Option<R> {
        loop {
            let (_, target) = self.order_list.lock().front()?;
            if let Some(result) = self.with_target(target, |k, v| f(k, v)) {
                return Some(result);
            }
        }
    }

    /// Locks the order list, and invokes `f` with it.
    #[inline]
    pub(crate) fn with_order_list<R, F: FnOnce(&mut OrderList) -> R>(&self, f: F) -> R {
        f(&mut self.order_list.lock())
    }

    /// Inserts a new entry unless the key exists.
    ///
    /// If the key exists, `occupied` is invoked with the slot of the entry and the supplied
    /// key-value pair; otherwise the entry is inserted and `vacant` is invoked with the inserted
    /// entry and the evicted entry if the limit was reached. Both closures are invoked with the
    /// stripe locked.
    pub(crate) fn insert_or<R, O, N>(&self, key: K, val: V, hash: u64, occupied: O, vacant: N) -> R
    where
        C: KeyComparer<K>,
        O: FnOnce(&mut Locked<'_, K, V, C>, usize, K, V) -> R,
        N: FnOnce(&Entry<K, V>, Option<(K, V)>) -> R,
    {
        let result = self.insert_locked(key, val, hash, occupied, vacant);
        self.grow_if_needed();
        result
    }

    fn insert_locked<R, O, N>(&self, key: K, val: V, hash: u64, occupied: O, vacant: N) -> R
    where
        C: KeyComparer<K>,
        O: FnOnce(&mut Locked<'_, K, V, C>, usize, K, V) -> R,
        N: FnOnce(&Entry<K, V>, Option<(K, V)>) -> R,
    {
        let home = self.stripe_index(hash);
        let stripes = self.stripes.read();
        let mut victim_stripe: Option<usize> = None;
        let (mut home_guard, mut other_guard, order_guard, plan) = loop {
            // Stripes are locked in ascending index order.
            let (home_guard, other_guard) = match victim_stripe {
                Some(other) if other < home => {
                    let other_guard = stripes[other].lock();
                    (stripes[home].lock(), Some(other_guard))
                }
                Some(other) if other > home => {
                    let home_guard = stripes[home].lock();
                    (home_guard, Some(stripes[other].lock()))
                }
                _ => (stripes[home].lock(), None),
            };
            if let Some(slot) = home_guard.find(hash, |k| self.comparer.equals(k, &key)) {
                break (home_guard, other_guard, None, Plan::Occupied(slot));
            }
            if !self.order.is_ordered() {
                self.count.fetch_add(1, Relaxed);
                break (home_guard, other_guard, None, Plan::Reserved);
            }
            let order_guard = self.order_list.lock();
            if self.try_reserve() {
                break (home_guard, other_guard, Some(order_guard), Plan::Reserved);
            }
            match order_guard.front() {
                Some((node, target)) if target.stripe == home => {
                    break (
                        home_guard,
                        other_guard,
                        Some(order_guard),
                        Plan::Evict(node, target),
                    );
                }
                Some((node, target)) if Some(target.stripe) == victim_stripe => {
                    break (
                        home_guard,
                        other_guard,
                        Some(order_guard),
                        Plan::Evict(node, target),
                    );
                }
                Some((_, target)) => {
                    // The oldest entry belongs to another stripe: relock both stripes in order.
                    victim_stripe = Some(target.stripe);
                }
                None => yield_now(),
            }
        };

        match plan {
            Plan::Occupied(slot) => {
                drop(other_guard);
                occupied(
                    &mut Locked {
                        table: self,
                        stripe: &mut home_guard,
                    },
                    slot,
                    key,
                    val,
                )
            }
            Plan::Reserved => {
                drop(other_guard);
                let entry = self.link_new(&mut home_guard, home, order_guard, key, val, hash);
                vacant(entry, None)
            }
            Plan::Evict(node, target) => {
                let victim = if target.stripe == home {
                    home_guard.remove(target.slot)
                } else {
                    other_guard
                        .as_mut()
                        .and_then(|guard| guard.remove(target.slot))
                };
                drop(other_guard);
                let mut order_guard = order_guard;
                if let Some(order_list) = order_guard.as_mut() {
                    // The count is unchanged as one entry replaces another.
                    order_list.unlink(node);
                }
                tracing::trace!(
                    stripe = target.stripe,
                    slot = target.slot,
                    "evicted the oldest entry"
                );
                let entry = self.link_new(&mut home_guard, home, order_guard, key, val, hash);
                vacant(entry, victim.map(Entry::into_pair))
            }
        }
    }

    /// Inserts the entry into the stripe, and links it to the order list if ordered.
    fn link_new<'s, G: DerefMut<Target = OrderList>>(
        &self,
        stripe: &'s mut Stripe<K, V>,
        index: usize,
        order_guard: Option<G>,
        key: K,
        val: V,
        hash: u64,
    ) -> &'s Entry<K, V> {
        let mut entry = Entry::new(key, val, hash);
        if let Some(mut order_list) = order_guard {
            let (slot, generation) = stripe.vacant();
            entry.order_node = order_list.push_back(Target {
                stripe: index,
                slot,
                generation,
            });
        }
        stripe.insert(entry).1
    }

    /// Tries to increment the count without exceeding the limit.
    #[inline]
    fn try_reserve(&self) -> bool {
        match self.limit {
            None => {
                self.count.fetch_add(1, Relaxed);
                true
            }
            Some(limit) => self
                .count
                .fetch_update(Relaxed, Relaxed, |c| (c < limit).then_some(c + 1))
                .is_ok(),
        }
    }

    /// Removes the oldest entry.
    ///
    /// Returns `None` if the table is unordered or empty.
    pub(crate) fn remove_front(&self) -> Option<(K, V)> {
        if !self.order.is_ordered() {
            return None;
        }
        loop {
            let (node, target) = self.order_list.lock().front()?;
            let stripes = self.stripes.read();
            let mut guard = stripes[target.stripe].lock();
            let mut order_list = self.order_list.lock();
            if order_list.front() != Some((node, target)) {
                // The oldest entry has changed.
                continue;
            }
            let Some(entry) = guard.remove(target.slot) else {
                continue;
            };
            order_list.unlink(node);
            self.count.fetch_sub(1, Relaxed);
            drop(order_list);
            drop(guard);
            tracing::trace!(stripe = target.stripe, slot = target.slot, "dequeued the oldest entry");
            return Some(entry.into_pair());
        }
    }

    /// Removes every entry, and returns them.
    pub(crate) fn drain(&self) -> Vec<(K, V)> {
        let stripes = self.stripes.read();
        let mut guards: Vec<_> = stripes.iter().map(|s| s.lock()).collect();
        let mut order_list = self.order_list.lock();
        order_list.clear();
        let mut drained = Vec::new();
        for guard in &mut guards {
            drained.extend(guard.drain().into_iter().map(Entry::into_pair));
        }
        self.count.store(0, Relaxed);
        drained
    }

    /// Doubles the number of buckets if the table is overloaded.
    fn grow_if_needed(&self) {
        let num_buckets = self.num_buckets.load(Relaxed);
        if self.len() <= num_buckets.saturating_mul(MAX_LOAD) {
            return;
        }
        let local_buckets = num_buckets / self.num_stripes();
        if local_buckets >= MAX_LOCAL_BUCKETS {
            return;
        }
        let stripes = self.stripes.write();
        if self.num_buckets.load(Relaxed) != num_buckets {
            // Another thread has resized the table.
            return;
        }
        for stripe in stripes.iter() {
            stripe.lock().rehash(local_buckets * 2);
        }
        self.num_buckets.store(num_buckets * 2, Relaxed);
        tracing::debug!(
            from = num_buckets,
            to = num_buckets * 2,
            len = self.len(),
            "resized the bucket array"
        );
    }

    /// Returns the number of entries per stripe.
    #[cfg(test)]
    pub(crate) fn stripe_lens(&self) -> Vec<usize> {
        self.stripes.read().iter().map(|s| s.lock().len()).collect()
    }

    /// Returns the number of linked order-list nodes.
    #[cfg(test)]
    pub(crate) fn order_len(&self) -> usize {
        self.order_list.lock().len()
    }

    /// Returns the number of allocated order-list nodes.
    #[cfg(test)]
    pub(crate) fn order_nodes(&self) -> usize {
        self.order_list.lock().allocated()
    }
}

impl<K, V, C> Locked<'_, K, V, C> {
    /// Finds the slot of the key.
    #[inline]
    pub(crate) fn find<Q>(&self, key: &Q, hash: u64) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        self.stripe
            .find(hash, |k| self.table.comparer.equals(k.borrow(), key))
    }

    #[inline]
    pub(crate) fn entry(&self, slot: usize) -> Option<&Entry<K, V>> {
        self.stripe.get(slot)
    }

    #[inline]
    pub(crate) fn entry_mut(&mut self, slot: usize) -> Option<&mut Entry<K, V>> {
        self.stripe.get_mut(slot)
    }

    /// Moves the entry to the tail of the order list if the policy requires it.
    #[inline]
    pub(crate) fn touch(&mut self, slot: usize, touch: Touch) {
        let order = self.table.order;
        let promote = match touch {
            Touch::Read => order == Order::Access,
            Touch::Write => matches!(order, Order::Access | Order::Modified),
        };
        if !promote {
            return;
        }
        if let Some(entry) = self.stripe.get_mut(slot) {
            if entry.order_node != NIL {
                entry.order_node = self.table.order_list.lock().promote(entry.order_node);
            }
        }
    }

    /// Removes the entry.
    pub(crate) fn remove(&mut self, slot: usize) -> Option<(K, V)> {
        let entry = self.stripe.remove(slot)?;
        if entry.order_node == NIL {
            self.table.count.fetch_sub(1, Relaxed);
        } else {
            let mut order_list = self.table.order_list.lock();
            order_list.unlink(entry.order_node);
            self.table.count.fetch_sub(1, Relaxed);
        }
        Some(entry.into_pair())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comparer::DefaultComparer;
    use crate::iter::Cursor;

    fn table(order: Order, limit: Option<usize>, stripes: usize) -> HashTable<u64, u64, DefaultComparer> {
        HashTable::new(order, limit, 0, stripes, DefaultComparer::default())
    }

    fn insert(table: &HashTable<u64, u64, DefaultComparer>, k: u64) -> Option<(u64, u64)> {
        let hash = table.hash(&k);
        table.insert_or(k, k, hash, |_, _, _, _| None, |_, evicted| evicted)
    }

    #[test]
    fn eviction_across_stripes() {
        for stripes in [1, 2, 8, 64] {
            let table = table(Order::Insertion, Some(3), stripes);
            for k in 0..3 {
                assert!(insert(&table, k).is_none());
            }
            for k in 3..64 {
                assert_eq!(insert(&table, k), Some((k - 3, k - 3)));
                assert_eq!(table.len(), 3);
                assert_eq!(table.order_len(), 3);
            }
            assert_eq!(table.stripe_lens().iter().sum::<usize>(), 3);
        }
    }

    #[test]
    fn resize_keeps_order() {
        let table = table(Order::Insertion, None, 4);
        let initial = table.capacity();
        for k in 0..1024 {
            assert!(insert(&table, k).is_none());
        }
        assert!(table.capacity() > initial);
        assert!(table.capacity() >= table.len());
        let mut keys = Vec::new();
        while let Some(k) = table.remove_front().map(|(k, _)| k) {
            keys.push(k);
        }
        assert_eq!(keys, (0..1024).collect::<Vec<_>>());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn touch_policies() {
        for (order, read_moves, write_moves) in [
            (Order::Insertion, false, false),
            (Order::Access, true, true),
            (Order::Modified, false, true),
        ] {
            let table = table(order, None, 2);
            for k in 0..3 {
                insert(&table, k);
            }
            let hash = table.hash(&0);
            table.with_stripe(hash, |locked| {
                let slot = locked.find(&0, hash).unwrap();
                locked.touch(slot, Touch::Read);
            });
            let front = table.remove_front().map(|(k, _)| k).unwrap();
            assert_eq!(front == 1, read_moves);
            insert(&table, front);

            let hash = table.hash(&2);
            table.with_stripe(hash, |locked| {
                let slot = locked.find(&2, hash).unwrap();
                locked.touch(slot, Touch::Write);
            });
            let mut rest = Vec::new();
            while let Some(k) = table.remove_front().map(|(k, _)| k) {
                rest.push(k);
            }
            assert_eq!(rest.last() == Some(&2), write_moves);
        }
    }

    #[test]
    fn idle_cursor_keeps_order_list_bounded() {
        for order in [Order::Access, Order::Modified] {
            let table = table(order, Some(2), 2);
            assert!(insert(&table, 0).is_none());
            assert!(insert(&table, 1).is_none());
            let mut cursor = Cursor::new(&table);
            assert_eq!(cursor.advance(|k, _| *k), Some(0));

            for _ in 0..100_000 {
                for k in [0, 1] {
                    let hash = table.hash(&k);
                    table.with_stripe(hash, |locked| {
                        let slot = locked.find(&k, hash).unwrap();
                        locked.touch(slot, Touch::Write);
                    });
                }
            }
            assert_eq!(table.len(), 2);
            assert!(table.order_nodes() <= 2 + 3, "{}", table.order_nodes());

            // Both entries were relinked after the cursor started.
            assert!(cursor.advance(|k, _| *k).is_none());
            drop(cursor);
            assert_eq!(table.order_len(), 2);
        }
    }

    #[test]
    fn initial_buckets_are_bounded() {
        for stripes in [1, 4, 1 << 16] {
            let table: HashTable<u64, u64, DefaultComparer> =
                HashTable::new(Order::None, None, usize::MAX, stripes, DefaultComparer::default());
            assert_eq!(table.capacity(), MAX_INITIAL_BUCKETS.max(stripes) * MAX_LOAD);
            assert!(insert(&table, 1).is_none());
        }
    }
}
