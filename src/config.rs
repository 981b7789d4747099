//! [`Order`] policies and the [`Builder`] of [`LurchTable`].

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::thread::available_parallelism;

use crate::comparer::{DefaultComparer, KeyComparer};
use crate::error::{Error, Result};
use crate::hash_table::HashTable;
use crate::LurchTable;

/// The maximum number of stripes.
pub const MAX_STRIPES: usize = 1 << 16;

/// [`Order`] determines which entry is the oldest, for eviction and for ordered iteration.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Order {
    /// Entries are not ordered, and the table cannot have a limit.
    #[default]
    None,

    /// Entries are ordered by the time they were inserted.
    Insertion,

    /// Entries are ordered by the time they were last read or written.
    Access,

    /// Entries are ordered by the time they were last inserted or updated.
    Modified,
}

impl Order {
    /// Returns `true` if entries are linked in an order list.
    #[inline]
    pub fn is_ordered(self) -> bool {
        self != Order::None
    }
}

/// [`Builder`] configures and creates a [`LurchTable`].
///
/// # Examples
///
/// ```
/// use lurch::{LurchTable, Order};
///
/// let table: LurchTable<u64, u32> = LurchTable::builder()
///     .order(Order::Access)
///     .limit(2)
///     .build()
///     .unwrap();
///
/// assert!(table.try_add(1, 1));
/// assert!(table.try_add(2, 2));
/// assert_eq!(table.try_get(&1), Some(1));
/// assert!(table.try_add(3, 3));
/// assert!(!table.contains_key(&2));
/// ```
pub struct Builder<K, V, C = DefaultComparer> {
    order: Order,
    limit: Option<usize>,
    capacity: usize,
    stripes: Option<usize>,
    comparer: C,
    marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Builder<K, V, DefaultComparer> {
    /// Creates a [`Builder`] with the default configuration.
    ///
    /// The table is unordered, unbounded, and uses [`DefaultComparer`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: Order::None,
            limit: None,
            capacity: 0,
            stripes: None,
            comparer: DefaultComparer::default(),
            marker: PhantomData,
        }
    }
}

impl<K, V> Default for Builder<K, V, DefaultComparer> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C: Debug> Debug for Builder<K, V, C> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity)
            .field("stripes", &self.stripes)
            .field("comparer", &self.comparer)
            .finish()
    }
}

impl<K, V, C> Builder<K, V, C> {
    /// Sets the [`Order`] policy.
    #[inline]
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Sets the maximum number of entries.
    ///
    /// The limit must be at least `1`, and the [`Order`] must not be [`Order::None`].
    #[inline]
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the initial capacity.
    #[inline]
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the number of stripes; it must be a power of two.
    ///
    /// By default, the number of stripes is derived from the available parallelism.
    #[inline]
    #[must_use]
    pub fn stripes(mut self, stripes: usize) -> Self {
        self.stripes = Some(stripes);
        self
    }

    /// Sets the [`KeyComparer`].
    #[inline]
    pub fn comparer<D>(self, comparer: D) -> Builder<K, V, D> {
        Builder {
            order: self.order,
            limit: self.limit,
            capacity: self.capacity,
            stripes: self.stripes,
            comparer,
            marker: PhantomData,
        }
    }

    /// Creates an empty [`LurchTable`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the limit is `0`, if a limit is set on an unordered
    /// table, or if the number of stripes is not a power of two within `1..=MAX_STRIPES`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{Error, LurchTable, Order};
    ///
    /// assert!(LurchTable::<u64, u64>::builder()
    ///     .limit(0)
    ///     .order(Order::Insertion)
    ///     .build()
    ///     .is_err());
    /// assert!(matches!(
    ///     LurchTable::<u64, u64>::builder().limit(1).build(),
    ///     Err(Error::InvalidArgument { name: "order", .. })
    /// ));
    /// ```
    pub fn build(self) -> Result<LurchTable<K, V, C>>
    where
        C: KeyComparer<K>,
    {
        let stripes = self.validate()?;
        let table = HashTable::new(self.order, self.limit, self.capacity, stripes, self.comparer);
        Ok(LurchTable::from_table(table))
    }

    /// Creates a [`LurchTable`] populated with the supplied entries.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Builder::build`], and [`Error::DuplicateKey`] if the supplied
    /// entries contain the same key more than once.
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::{Error, LurchTable};
    ///
    /// let table: LurchTable<u64, u32> = LurchTable::builder().build_from([(1, 1), (2, 2)]).unwrap();
    /// assert_eq!(table.len(), 2);
    ///
    /// let result = LurchTable::<u64, u32>::builder().build_from([(1, 1), (1, 2)]);
    /// assert_eq!(result.unwrap_err(), Error::DuplicateKey);
    /// ```
    pub fn build_from<I>(self, entries: I) -> Result<LurchTable<K, V, C>>
    where
        C: KeyComparer<K>,
        I: IntoIterator<Item = (K, V)>,
    {
        let entries = entries.into_iter();
        let capacity = self.capacity.max(entries.size_hint().0);
        let table = self.capacity(capacity).build()?;
        for (key, val) in entries {
            table.add(key, val)?;
        }
        Ok(table)
    }

    /// Validates the configuration, and returns the number of stripes.
    fn validate(&self) -> Result<usize> {
        if self.limit == Some(0) {
            return Err(Error::InvalidArgument {
                name: "limit",
                reason: "the limit must be at least 1",
            });
        }
        if self.limit.is_some() && !self.order.is_ordered() {
            return Err(Error::InvalidArgument {
                name: "order",
                reason: "a limit requires the entries to be ordered",
            });
        }
        match self.stripes {
            Some(stripes) if stripes.is_power_of_two() && stripes <= MAX_STRIPES => Ok(stripes),
            Some(_) => Err(Error::InvalidArgument {
                name: "stripes",
                reason: "the number of stripes must be a power of two no greater than MAX_STRIPES",
            }),
            None => Ok(default_stripes()),
        }
    }
}

/// Returns the default number of stripes: four per available hardware thread.
pub(crate) fn default_stripes() -> usize {
    available_parallelism()
        .map_or(1, |n| n.get())
        .saturating_mul(4)
        .next_power_of_two()
        .min(MAX_STRIPES)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation() {
        assert!(Builder::<u64, u64>::new().build().is_ok());
        assert!(Builder::<u64, u64>::new().stripes(3).build().is_err());
        assert!(Builder::<u64, u64>::new().stripes(0).build().is_err());
        assert!(Builder::<u64, u64>::new()
            .stripes(MAX_STRIPES * 2)
            .build()
            .is_err());
        assert_eq!(
            Builder::<u64, u64>::new()
                .order(Order::Modified)
                .limit(0)
                .build()
                .err(),
            Some(Error::InvalidArgument {
                name: "limit",
                reason: "the limit must be at least 1",
            })
        );
        assert!(Builder::<u64, u64>::new()
            .order(Order::Modified)
            .limit(1)
            .stripes(1)
            .build()
            .is_ok());
        assert!(default_stripes().is_power_of_two());
    }
}
