//! [`LurchTable`] is a concurrent hash map that keeps its entries in a policy order and evicts the
//! oldest entry when the number of entries reaches its limit.

use std::borrow::Borrow;
use std::fmt::{self, Debug};
use std::iter::FromIterator;

use crate::comparer::{DefaultComparer, KeyComparer};
use crate::config::{default_stripes, Builder, Order};
use crate::error::{Error, Result};
use crate::hash_table::stripe::Entry;
use crate::hash_table::{HashTable, Touch};
use crate::iter::{Cursor, Iter, Keys, Values};

/// The number of version conflicts tolerated by [`LurchTable::add_or_update`] before the update
/// closure is invoked with the stripe locked.
pub const MAX_OPTIMISTIC_RETRY: usize = 8;

/// Scalable concurrent hash map with an optional order policy and size limit.
///
/// [`LurchTable`] partitions its buckets into stripes that are locked independently, and, unless
/// the [`Order`] is [`Order::None`], threads every entry through an order list. When the table is
/// full, inserting a new entry evicts the oldest entry under the same critical section, therefore
/// the number of entries never exceeds the limit.
///
/// ## Notes
///
/// * User-supplied closures of compound operations are invoked without any lock held, except for
///   [`LurchTable::read`], [`LurchTable::update`], [`LurchTable::scan`], and the fallback path of
///   [`LurchTable::add_or_update`]; such closures must not access the same table.
/// * Iteration is weakly consistent: it never yields an entry twice, and yields every entry that
///   was neither removed nor relinked during the walk.
pub struct LurchTable<K, V, C = DefaultComparer> {
    table: HashTable<K, V, C>,
}

impl<K, V> LurchTable<K, V, DefaultComparer> {
    /// Returns a [`Builder`] to configure a new [`LurchTable`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::builder()
    ///     .order(Order::Insertion)
    ///     .capacity(64)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(table.order(), Order::Insertion);
    /// ```
    #[inline]
    #[must_use]
    pub fn builder() -> Builder<K, V> {
        Builder::new()
    }

    /// Creates an empty unordered [`LurchTable`] without a limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert_eq!(table.order(), Order::None);
    /// assert!(table.limit().is_none());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_order(Order::None)
    }

    /// Creates an empty [`LurchTable`] with the specified [`Order`] and no limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::with_order(Order::Modified);
    /// assert_eq!(table.order(), Order::Modified);
    /// ```
    #[inline]
    #[must_use]
    pub fn with_order(order: Order) -> Self {
        Self::from_table(HashTable::new(
            order,
            None,
            0,
            default_stripes(),
            DefaultComparer::default(),
        ))
    }

    /// Creates an empty [`LurchTable`] with the specified [`Order`] and limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the limit is `0` or the [`Order`] is [`Order::None`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::with_limit(Order::Insertion, 2).unwrap();
    /// assert_eq!(table.limit(), Some(2));
    /// assert!(LurchTable::<u64, u32>::with_limit(Order::None, 2).is_err());
    /// ```
    #[inline]
    pub fn with_limit(order: Order, limit: usize) -> Result<Self>
    where
        DefaultComparer: KeyComparer<K>,
    {
        Builder::new().order(order).limit(limit).build()
    }
}

impl<K, V, C> LurchTable<K, V, C> {
    #[inline]
    pub(crate) fn from_table(table: HashTable<K, V, C>) -> Self {
        Self { table }
    }

    /// Returns the [`Order`] policy of the table.
    #[inline]
    pub fn order(&self) -> Order {
        self.table.order()
    }

    /// Returns the maximum number of entries, if any.
    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.table.limit()
    }

    /// Returns the number of entries the table can hold without resizing.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::builder().capacity(1000).build().unwrap();
    /// assert!(table.capacity() >= 1000);
    /// ```
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the number of entries.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.try_add(1, 0));
    /// assert_eq!(table.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the table is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a reference to the [`KeyComparer`] of the table.
    #[inline]
    pub fn comparer(&self) -> &C {
        self.table.comparer()
    }

    /// Removes every entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.try_add(1, 0));
    /// table.clear();
    /// assert!(table.is_empty());
    /// ```
    #[inline]
    pub fn clear(&self) {
        drop(self.table.drain());
    }

    /// Returns the oldest entry without removing it.
    ///
    /// Returns `None` if the table is empty or unordered.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::with_order(Order::Insertion);
    /// assert!(table.peek().is_none());
    /// assert!(table.try_add(1, 10));
    /// assert!(table.try_add(2, 20));
    /// assert_eq!(table.peek(), Some((1, 10)));
    /// ```
    #[inline]
    pub fn peek(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.table.with_front(|k, v| (k.clone(), v.clone()))
    }

    /// Removes the oldest entry and returns it.
    ///
    /// Returns `None` if the table is empty or unordered.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::with_order(Order::Insertion);
    /// assert!(table.try_add(1, 10));
    /// assert!(table.try_add(2, 20));
    /// assert_eq!(table.try_dequeue(), Some((1, 10)));
    /// assert_eq!(table.try_dequeue(), Some((2, 20)));
    /// assert!(table.try_dequeue().is_none());
    /// ```
    #[inline]
    pub fn try_dequeue(&self) -> Option<(K, V)> {
        self.table.remove_front()
    }

    /// Scans every entry in order.
    ///
    /// The closure is invoked with the stripe of the entry locked; the scan stops when it returns
    /// `false`. Returns `true` if every entry was scanned.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::with_order(Order::Insertion);
    /// assert!(table.try_add(1, 10));
    /// assert!(table.try_add(2, 20));
    ///
    /// let mut sum = 0;
    /// assert!(table.scan(|_, v| {
    ///     sum += *v;
    ///     true
    /// }));
    /// assert_eq!(sum, 30);
    /// assert!(!table.scan(|k, _| *k != 1));
    /// ```
    #[inline]
    pub fn scan<F: FnMut(&K, &V) -> bool>(&self, mut f: F) -> bool {
        let mut cursor = Cursor::new(&self.table);
        while let Some(proceed) = cursor.advance(&mut f) {
            if !proceed {
                return false;
            }
        }
        true
    }

    /// Returns an iterator over cloned entries.
    ///
    /// Ordered tables are iterated from the oldest entry to the newest.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::with_order(Order::Insertion);
    /// assert!(table.try_add(2, 20));
    /// assert!(table.try_add(1, 10));
    /// assert_eq!(table.iter().collect::<Vec<_>>(), vec![(2, 20), (1, 10)]);
    /// ```
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, V, C>
    where
        K: Clone,
        V: Clone,
    {
        Iter::new(Cursor::new(&self.table))
    }

    /// Returns an iterator over cloned keys.
    #[inline]
    pub fn keys(&self) -> Keys<'_, K, V, C>
    where
        K: Clone,
    {
        Keys::new(Cursor::new(&self.table))
    }

    /// Returns an iterator over cloned values.
    #[inline]
    pub fn values(&self) -> Values<'_, K, V, C>
    where
        V: Clone,
    {
        Values::new(Cursor::new(&self.table))
    }

    /// Collects the entries into a [`Vec`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.try_add(1, 10));
    /// assert_eq!(table.to_vec(), vec![(1, 10)]);
    /// ```
    #[inline]
    pub fn to_vec(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let mut entries = Vec::with_capacity(self.len());
        entries.extend(self.iter());
        entries
    }

    /// Copies the entries into `dest` starting at `index`, and returns the number of copied
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `index` is out of the bounds of `dest`, or `dest`
    /// cannot accommodate [`LurchTable::len`] entries from `index`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.try_add(1, 10));
    ///
    /// let mut dest = vec![(0, 0); 2];
    /// assert_eq!(table.copy_to(&mut dest, 1), Ok(1));
    /// assert_eq!(dest, vec![(0, 0), (1, 10)]);
    /// assert!(table.copy_to(&mut dest, 2).is_err());
    /// ```
    #[inline]
    pub fn copy_to(&self, dest: &mut [(K, V)], index: usize) -> Result<usize>
    where
        K: Clone,
        V: Clone,
    {
        self.copy_with(dest, index, |k, v| (k, v))
    }

    /// Copies the entries converted by `convert` into `dest` starting at `index`.
    pub(crate) fn copy_with<T, F: FnMut(K, V) -> T>(
        &self,
        dest: &mut [T],
        index: usize,
        mut convert: F,
    ) -> Result<usize>
    where
        K: Clone,
        V: Clone,
    {
        if index > dest.len() {
            return Err(Error::InvalidArgument {
                name: "index",
                reason: "the index is out of the bounds of the destination",
            });
        }
        if dest.len() - index < self.len() {
            return Err(Error::InvalidArgument {
                name: "dest",
                reason: "the destination is too small",
            });
        }
        let mut copied = 0;
        for (slot, (k, v)) in dest[index..].iter_mut().zip(self.iter()) {
            *slot = convert(k, v);
            copied += 1;
        }
        Ok(copied)
    }
}

impl<K, V, C> LurchTable<K, V, C>
where
    C: KeyComparer<K>,
{
    /// Returns a clone of the value associated with the key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the key does not exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{Error, LurchTable};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert_eq!(table.get(&1), Err(Error::KeyNotFound));
    /// assert!(table.try_add(1, 10));
    /// assert_eq!(table.get(&1), Ok(10));
    /// ```
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
        V: Clone,
    {
        self.try_get(key).ok_or(Error::KeyNotFound)
    }

    /// Returns a clone of the value associated with the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<String, u32> = LurchTable::new();
    /// assert!(table.try_add("one".to_string(), 1));
    /// assert_eq!(table.try_get("one"), Some(1));
    /// assert!(table.try_get("two").is_none());
    /// ```
    #[inline]
    pub fn try_get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
        V: Clone,
    {
        self.read(key, |_, v| v.clone())
    }

    /// Reads the entry associated with the key.
    ///
    /// The reader is invoked with the stripe locked.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, String> = LurchTable::new();
    /// assert!(table.try_add(1, "one".to_string()));
    /// assert_eq!(table.read(&1, |_, v| v.len()), Some(3));
    /// ```
    #[inline]
    pub fn read<Q, R, F: FnOnce(&K, &V) -> R>(&self, key: &Q, reader: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        let hash = self.table.hash(key);
        self.table.with_stripe(hash, |locked| {
            let slot = locked.find(key, hash)?;
            locked.touch(slot, Touch::Read);
            locked.entry(slot).map(|e| reader(e.key(), e.val()))
        })
    }

    /// Returns `true` if the key exists.
    ///
    /// Under [`Order::Access`], the entry becomes the newest.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(!table.contains_key(&1));
    /// assert!(table.try_add(1, 0));
    /// assert!(table.contains_key(&1));
    /// ```
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        self.read(key, |_, _| ()).is_some()
    }

    /// Sets the value associated with the key, and returns the old value.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.set(1, 10).is_none());
    /// assert_eq!(table.set(1, 11), Some(10));
    /// assert_eq!(table.get(&1), Ok(11));
    /// ```
    #[inline]
    pub fn set(&self, key: K, val: V) -> Option<V> {
        let hash = self.table.hash(&key);
        let (old, evicted) = self.table.insert_or(
            key,
            val,
            hash,
            |locked, slot, _, val| {
                let old = locked.entry_mut(slot).map(|e| e.replace_val(val));
                locked.touch(slot, Touch::Write);
                (old, None)
            },
            |_, evicted| (None, evicted),
        );
        drop(evicted);
        old
    }

    /// Inserts a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateKey`] if the key exists.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{Error, LurchTable};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.add(1, 10).is_ok());
    /// assert_eq!(table.add(1, 11), Err(Error::DuplicateKey));
    /// ```
    #[inline]
    pub fn add(&self, key: K, val: V) -> Result<()> {
        if self.try_add(key, val) {
            Ok(())
        } else {
            Err(Error::DuplicateKey)
        }
    }

    /// Inserts a new entry.
    ///
    /// Returns `false` if the key exists; the table is left unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.try_add(1, 10));
    /// assert!(!table.try_add(1, 11));
    /// assert_eq!(table.get(&1), Ok(10));
    /// ```
    #[inline]
    pub fn try_add(&self, key: K, val: V) -> bool {
        self.put(key, val).is_ok()
    }

    /// Inserts a new entry, and returns the entry evicted to make room for it.
    ///
    /// # Errors
    ///
    /// Returns the supplied key-value pair if the key exists.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{LurchTable, Order};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::with_limit(Order::Insertion, 1).unwrap();
    /// assert_eq!(table.put(1, 10), Ok(None));
    /// assert_eq!(table.put(1, 11), Err((1, 11)));
    /// assert_eq!(table.put(2, 20), Ok(Some((1, 10))));
    /// ```
    #[inline]
    pub fn put(&self, key: K, val: V) -> std::result::Result<Option<(K, V)>, (K, V)> {
        let hash = self.table.hash(&key);
        self.table.insert_or(
            key,
            val,
            hash,
            |_, _, key, val| Err((key, val)),
            |_, evicted| Ok(evicted),
        )
    }

    /// Removes the entry associated with the key, and returns it.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.remove(&1).is_none());
    /// assert!(table.try_add(1, 10));
    /// assert_eq!(table.remove(&1), Some((1, 10)));
    /// ```
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        let hash = self.table.hash(key);
        self.table.with_stripe(hash, |locked| {
            let slot = locked.find(key, hash)?;
            locked.remove(slot)
        })
    }

    /// Removes the entry associated with the key, and returns the value.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.try_add(1, 10));
    /// assert_eq!(table.try_remove(&1), Some(10));
    /// assert!(table.try_remove(&1).is_none());
    /// ```
    #[inline]
    pub fn try_remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        self.remove(key).map(|(_, v)| v)
    }

    /// Removes the entry if both the key and the value match.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(table.try_add(1, 10));
    /// assert!(!table.try_remove_entry(&1, &11));
    /// assert!(table.try_remove_entry(&1, &10));
    /// assert!(table.is_empty());
    /// ```
    #[inline]
    pub fn try_remove_entry<Q>(&self, key: &Q, val: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
        V: PartialEq,
    {
        let hash = self.table.hash(key);
        self.table
            .with_stripe(hash, |locked| {
                let slot = locked.find(key, hash)?;
                if locked.entry(slot)?.val() != val {
                    return None;
                }
                locked.remove(slot)
            })
            .is_some()
    }

    /// Returns the value associated with the key, or inserts the supplied value.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert_eq!(table.get_or_add(1, 10), 10);
    /// assert_eq!(table.get_or_add(1, 11), 10);
    /// ```
    #[inline]
    pub fn get_or_add(&self, key: K, val: V) -> V
    where
        V: Clone,
    {
        let hash = self.table.hash(&key);
        let (stored, evicted) = self.table.insert_or(
            key,
            val,
            hash,
            |locked, slot, _, val| {
                locked.touch(slot, Touch::Read);
                let stored = locked.entry(slot).map_or(val, |e| e.val().clone());
                (stored, None)
            },
            |entry, evicted| (entry.val().clone(), evicted),
        );
        drop(evicted);
        stored
    }

    /// Returns the value associated with the key, or inserts the value made by the factory.
    ///
    /// The factory is invoked at most once per call, without any lock held. Concurrent callers
    /// may each invoke their factory for the same key; exactly one of the results is stored, and
    /// every caller returns the stored value.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u64> = LurchTable::new();
    /// assert_eq!(table.get_or_add_with(1, |k| k * 10), 10);
    /// assert_eq!(table.get_or_add_with(1, |_| unreachable!()), 10);
    /// ```
    #[inline]
    pub fn get_or_add_with<F: FnOnce(&K) -> V>(&self, key: K, factory: F) -> V
    where
        V: Clone,
    {
        if let Some(val) = self.try_get(&key) {
            return val;
        }
        let val = factory(&key);
        self.get_or_add(key, val)
    }

    /// Inserts the supplied value if the key does not exist, otherwise replaces the value with
    /// the result of the update closure; returns the stored value.
    ///
    /// The update closure receives the current value, and may be invoked more than once when the
    /// entry is concurrently modified.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert_eq!(table.add_or_update(1, 1, |_, v| v + 1), 1);
    /// assert_eq!(table.add_or_update(1, 1, |_, v| v + 1), 2);
    /// ```
    #[inline]
    pub fn add_or_update<U: FnMut(&K, &V) -> V>(&self, key: K, val: V, update: U) -> V
    where
        V: Clone,
    {
        self.add_or_update_inner(key, Addition::<V, fn(&K) -> V>::Value(val), update)
    }

    /// Inserts the value made by the add factory if the key does not exist, otherwise replaces
    /// the value with the result of the update closure; returns the stored value.
    ///
    /// The add factory is invoked at most once, without any lock held.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u64> = LurchTable::new();
    /// assert_eq!(table.add_or_update_with(2, |k| k * 2, |_, v| v + 1), 4);
    /// assert_eq!(table.add_or_update_with(2, |_| unreachable!(), |_, v| v + 1), 5);
    /// ```
    #[inline]
    pub fn add_or_update_with<A: FnOnce(&K) -> V, U: FnMut(&K, &V) -> V>(
        &self,
        key: K,
        add: A,
        update: U,
    ) -> V
    where
        V: Clone,
    {
        self.add_or_update_inner(key, Addition::Factory(add), update)
    }

    /// Replaces the value with `new` if the current value is equal to `comparison`.
    ///
    /// Returns `false` if the key does not exist or the current value is different.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::new();
    /// assert!(!table.try_update(&1, 11, &10));
    /// assert!(table.try_add(1, 10));
    /// assert!(!table.try_update(&1, 11, &9));
    /// assert!(table.try_update(&1, 11, &10));
    /// assert_eq!(table.get(&1), Ok(11));
    /// ```
    #[inline]
    pub fn try_update<Q>(&self, key: &Q, new: V, comparison: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
        V: PartialEq,
    {
        let hash = self.table.hash(key);
        let result = self.table.with_stripe(hash, |locked| {
            let Some(slot) = locked.find(key, hash) else {
                return Err(new);
            };
            if !locked.entry(slot).is_some_and(|e| e.val() == comparison) {
                return Err(new);
            }
            let old = locked.entry_mut(slot).map(|e| e.replace_val(new));
            locked.touch(slot, Touch::Write);
            Ok(old)
        });
        result.is_ok()
    }

    /// Updates the value associated with the key in place, and returns the result of the
    /// updater.
    ///
    /// The updater is invoked with the stripe locked.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, Vec<u32>> = LurchTable::new();
    /// assert!(table.update(&1, |_, v| v.push(1)).is_none());
    /// assert!(table.try_add(1, Vec::new()));
    /// assert_eq!(table.update(&1, |_, v| { v.push(1); v.len() }), Some(1));
    /// ```
    #[inline]
    pub fn update<Q, R, F: FnOnce(&K, &mut V) -> R>(&self, key: &Q, updater: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        let hash = self.table.hash(key);
        self.table.with_stripe(hash, |locked| {
            let slot = locked.find(key, hash)?;
            let result = locked.entry_mut(slot).map(|e| {
                let (k, v) = e.pair_mut();
                updater(k, v)
            })?;
            locked.touch(slot, Touch::Write);
            Some(result)
        })
    }

    fn add_or_update_inner<A, U>(&self, key: K, addition: Addition<V, A>, mut update: U) -> V
    where
        A: FnOnce(&K) -> V,
        U: FnMut(&K, &V) -> V,
        V: Clone,
    {
        let hash = self.table.hash(&key);
        let mut key = key;
        let mut addition = addition;
        let mut conflicts = 0;
        loop {
            // Optimistically read the current value.
            let snapshot = self.table.with_stripe(hash, |locked| {
                let slot = locked.find(&key, hash)?;
                locked.entry(slot).map(|e| (e.version(), e.val().clone()))
            });

            let Some((version, current)) = snapshot else {
                let val = match addition {
                    Addition::Value(val) => val,
                    Addition::Factory(factory) => factory(&key),
                };
                let result = self.table.insert_or(
                    key,
                    val,
                    hash,
                    |_, _, key, val| Err((key, val)),
                    |entry, evicted| Ok((entry.val().clone(), evicted)),
                );
                match result {
                    Ok((stored, evicted)) => {
                        drop(evicted);
                        return stored;
                    }
                    Err((k, v)) => {
                        // Inserted by another thread in the meantime.
                        key = k;
                        addition = Addition::Value(v);
                        continue;
                    }
                }
            };

            if conflicts >= MAX_OPTIMISTIC_RETRY {
                let updated = self.table.with_stripe(hash, |locked| {
                    let slot = locked.find(&key, hash)?;
                    let entry = locked.entry_mut(slot)?;
                    let new = update(entry.key(), entry.val());
                    let old = entry.replace_val(new.clone());
                    locked.touch(slot, Touch::Write);
                    Some((new, old))
                });
                if let Some((new, old)) = updated {
                    drop(old);
                    return new;
                }
                continue;
            }

            let new = update(&key, &current);
            drop(current);
            let outcome = self.table.with_stripe(hash, |locked| {
                let Some(slot) = locked.find(&key, hash) else {
                    return Outcome::Vanished;
                };
                if locked.entry(slot).map(Entry::version) != Some(version) {
                    return Outcome::Conflict;
                }
                let old = locked.entry_mut(slot).map(|e| e.replace_val(new.clone()));
                locked.touch(slot, Touch::Write);
                Outcome::Updated(old)
            });
            match outcome {
                Outcome::Updated(old) => {
                    drop(old);
                    return new;
                }
                Outcome::Conflict => conflicts += 1,
                Outcome::Vanished => (),
            }
        }
    }
}

/// The value to insert when the key does not exist.
enum Addition<V, F> {
    Value(V),
    Factory(F),
}

/// The result of a version-checked update.
enum Outcome<V> {
    Updated(Option<V>),
    Conflict,
    Vanished,
}

impl<K, V, C> Clone for LurchTable<K, V, C>
where
    K: Clone,
    V: Clone,
    C: KeyComparer<K> + Clone,
{
    #[inline]
    fn clone(&self) -> Self {
        let cloned = Self::from_table(HashTable::new(
            self.table.order(),
            self.table.limit(),
            self.len(),
            self.table.num_stripes(),
            self.table.comparer().clone(),
        ));
        for (k, v) in self.iter() {
            let _result = cloned.put(k, v);
        }
        cloned
    }
}

impl<K, V, C> Debug for LurchTable<K, V, C>
where
    K: Debug,
    V: Debug,
{
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        self.scan(|k, v| {
            map.entry(k, v);
            true
        });
        map.finish()
    }
}

impl<K, V, C> Default for LurchTable<K, V, C>
where
    C: Default,
{
    /// Creates an empty unordered [`LurchTable`] without a limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::LurchTable;
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::default();
    /// assert!(table.is_empty());
    /// ```
    #[inline]
    fn default() -> Self {
        Self::from_table(HashTable::new(
            Order::None,
            None,
            0,
            default_stripes(),
            C::default(),
        ))
    }
}

impl<K, V, C> PartialEq for LurchTable<K, V, C>
where
    K: Clone,
    V: Clone + PartialEq,
    C: KeyComparer<K>,
{
    /// Compares two tables as maps, regardless of their order.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        // No lock of `self` is held while `other` is locked.
        self.iter().all(|(k, v)| {
            let hash = other.table.hash(&k);
            other
                .table
                .with_stripe(hash, |locked| {
                    let slot = locked.find(&k, hash)?;
                    locked.entry(slot).map(|e| *e.val() == v)
                })
                .unwrap_or(false)
        })
    }
}

impl<K, V, C> FromIterator<(K, V)> for LurchTable<K, V, C>
where
    C: KeyComparer<K> + Default,
{
    #[inline]
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::default();
        table.extend(iter);
        table
    }
}

impl<K, V, C> Extend<(K, V)> for LurchTable<K, V, C>
where
    C: KeyComparer<K>,
{
    /// Sets every key-value pair; later pairs overwrite earlier ones.
    #[inline]
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.set(k, v);
        }
    }
}
