//! [`UntypedMap`] exposes a [`LurchTable`] to code that only deals with [`Any`] values.

use std::any::{type_name, Any};

use crate::comparer::KeyComparer;
use crate::error::{Error, Result};
use crate::LurchTable;

/// Dynamically typed access to a map.
///
/// Lookups with a key of an unexpected type find nothing, whereas insertions of a key or a value
/// of an unexpected type fail with [`Error::TypeMismatch`].
///
/// # Examples
///
/// ```
/// use lurch::{Error, LurchTable, UntypedMap};
///
/// let table: LurchTable<String, u32> = LurchTable::new();
/// let untyped: &dyn UntypedMap = &table;
///
/// assert!(untyped.add_any(Box::new("1".to_string()), Box::new(1_u32)).is_ok());
/// assert!(untyped.contains_any(&"1".to_string()));
/// assert!(!untyped.contains_any(&1_u32));
/// assert!(matches!(
///     untyped.add_any(Box::new(1_u32), Box::new(1_u32)),
///     Err(Error::TypeMismatch { name: "key", .. })
/// ));
/// ```
pub trait UntypedMap {
    /// Returns a clone of the value associated with the key.
    fn get_any(&self, key: &dyn Any) -> Option<Box<dyn Any>>;

    /// Sets the value associated with the key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the key or the value is of an unexpected type.
    fn set_any(&self, key: Box<dyn Any>, val: Box<dyn Any>) -> Result<()>;

    /// Inserts a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the key or the value is of an unexpected type, and
    /// [`Error::DuplicateKey`] if the key exists.
    fn add_any(&self, key: Box<dyn Any>, val: Box<dyn Any>) -> Result<()>;

    /// Returns `true` if the key exists.
    fn contains_any(&self, key: &dyn Any) -> bool;

    /// Removes the entry associated with the key, and returns `true` if it existed.
    fn remove_any(&self, key: &dyn Any) -> bool;

    /// Returns the number of entries.
    fn len_any(&self) -> usize;

    /// Returns an iterator over boxed clones of the keys and values.
    fn iter_any(&self) -> Box<dyn Iterator<Item = (Box<dyn Any>, Box<dyn Any>)> + '_>;

    /// Copies the entries into `dest` starting at `index` as boxed key-value tuples, and returns
    /// the number of copied entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `index` is out of the bounds of `dest`, or `dest`
    /// cannot accommodate every entry from `index`.
    fn copy_to_any(&self, dest: &mut [Box<dyn Any>], index: usize) -> Result<usize>;
}

impl<K, V, C> LurchTable<K, V, C>
where
    K: 'static,
    V: 'static,
{
    fn downcast(key: Box<dyn Any>, val: Box<dyn Any>) -> Result<(K, V)> {
        let key = key.downcast::<K>().map_err(|_| Error::TypeMismatch {
            name: "key",
            expected: type_name::<K>(),
        })?;
        let val = val.downcast::<V>().map_err(|_| Error::TypeMismatch {
            name: "value",
            expected: type_name::<V>(),
        })?;
        Ok((*key, *val))
    }
}

impl<K, V, C> UntypedMap for LurchTable<K, V, C>
where
    K: 'static + Clone,
    V: 'static + Clone,
    C: KeyComparer<K>,
{
    #[inline]
    fn get_any(&self, key: &dyn Any) -> Option<Box<dyn Any>> {
        let key = key.downcast_ref::<K>()?;
        self.try_get(key).map(|v| Box::new(v) as Box<dyn Any>)
    }

    #[inline]
    fn set_any(&self, key: Box<dyn Any>, val: Box<dyn Any>) -> Result<()> {
        let (key, val) = Self::downcast(key, val)?;
        self.set(key, val);
        Ok(())
    }

    #[inline]
    fn add_any(&self, key: Box<dyn Any>, val: Box<dyn Any>) -> Result<()> {
        let (key, val) = Self::downcast(key, val)?;
        self.add(key, val)
    }

    #[inline]
    fn contains_any(&self, key: &dyn Any) -> bool {
        key.downcast_ref::<K>()
            .is_some_and(|key| self.contains_key(key))
    }

    #[inline]
    fn remove_any(&self, key: &dyn Any) -> bool {
        key.downcast_ref::<K>()
            .is_some_and(|key| self.remove(key).is_some())
    }

    #[inline]
    fn len_any(&self) -> usize {
        self.len()
    }

    #[inline]
    fn iter_any(&self) -> Box<dyn Iterator<Item = (Box<dyn Any>, Box<dyn Any>)> + '_> {
        Box::new(
            self.iter()
                .map(|(k, v)| (Box::new(k) as Box<dyn Any>, Box::new(v) as Box<dyn Any>)),
        )
    }

    #[inline]
    fn copy_to_any(&self, dest: &mut [Box<dyn Any>], index: usize) -> Result<usize> {
        self.copy_with(dest, index, |k, v| Box::new((k, v)) as Box<dyn Any>)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn type_mismatch() {
        let table: LurchTable<String, i32> = LurchTable::new();
        let untyped: &dyn UntypedMap = &table;
        for i in 0..10 {
            assert!(untyped
                .add_any(Box::new(i.to_string()), Box::new(i))
                .is_ok());
        }
        assert_eq!(untyped.len_any(), 10);
        assert_eq!(
            untyped.add_any(Box::new("1".to_string()), Box::new(1)),
            Err(Error::DuplicateKey)
        );
        assert_eq!(
            untyped.add_any(Box::new(1), Box::new(1)),
            Err(Error::TypeMismatch {
                name: "key",
                expected: type_name::<String>(),
            })
        );
        assert_eq!(
            untyped.set_any(Box::new("1".to_string()), Box::new("1")),
            Err(Error::TypeMismatch {
                name: "value",
                expected: type_name::<i32>(),
            })
        );

        assert!(untyped.set_any(Box::new("1".to_string()), Box::new(100)).is_ok());
        let val = untyped.get_any(&"1".to_string()).unwrap();
        assert_eq!(val.downcast_ref::<i32>(), Some(&100));
        assert!(untyped.get_any(&"NotAKey".to_string()).is_none());
        assert!(untyped.get_any(&1).is_none());

        assert!(!untyped.remove_any(&9));
        assert!(untyped.remove_any(&"9".to_string()));
        assert!(!untyped.contains_any(&"9".to_string()));
        assert_eq!(untyped.len_any(), 9);
    }

    #[test]
    fn enumerate_and_copy() {
        let table: LurchTable<u32, String> = LurchTable::with_order(crate::Order::Insertion);
        let untyped: &dyn UntypedMap = &table;
        for i in 0..4_u32 {
            assert!(untyped
                .add_any(Box::new(i), Box::new(i.to_string()))
                .is_ok());
        }

        let mut keys = Vec::new();
        for (k, v) in untyped.iter_any() {
            let k = *k.downcast::<u32>().unwrap();
            assert_eq!(v.downcast_ref::<String>(), Some(&k.to_string()));
            keys.push(k);
        }
        assert_eq!(keys, vec![0, 1, 2, 3]);
        assert_eq!(untyped.iter_any().count(), untyped.len_any());

        let mut dest: Vec<Box<dyn Any>> = (0..5).map(|_| Box::new(()) as Box<dyn Any>).collect();
        assert_eq!(untyped.copy_to_any(&mut dest, 1), Ok(4));
        assert!(dest[0].is::<()>());
        for (i, entry) in dest[1..].iter().enumerate() {
            let (k, v) = entry.downcast_ref::<(u32, String)>().unwrap();
            assert_eq!(*k as usize, i);
            assert_eq!(*v, i.to_string());
        }

        assert!(matches!(
            untyped.copy_to_any(&mut dest, 2),
            Err(Error::InvalidArgument { name: "dest", .. })
        ));
        assert!(matches!(
            untyped.copy_to_any(&mut dest, 6),
            Err(Error::InvalidArgument { name: "index", .. })
        ));
        assert!(dest[4].is::<(u32, String)>());
    }
}
