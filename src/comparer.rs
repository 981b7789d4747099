//! Key comparison used by [`LurchTable`](super::LurchTable).

use std::collections::hash_map::RandomState;
use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hash, Hasher};

/// Key hashing and equality trait.
///
/// Two keys that are equal according to [`KeyComparer::equals`] must produce the same
/// [`KeyComparer::hash`] value. Lookups accept any `Q` the stored key borrows as, therefore a
/// comparer that is meant to be used with borrowed forms of the key type has to hash and compare
/// them consistently with the owned form.
pub trait KeyComparer<Q: ?Sized> {
    /// Returns the hash value of `key`.
    fn hash(&self, key: &Q) -> u64;

    /// Compares two keys and returns `true` if they are equal.
    fn equals(&self, a: &Q, b: &Q) -> bool;
}

/// [`DefaultComparer`] relies on the [`Eq`] and [`Hash`] implementations of the key type.
#[derive(Clone, Default)]
pub struct DefaultComparer<S = RandomState> {
    build_hasher: S,
}

impl<S: BuildHasher> DefaultComparer<S> {
    /// Creates a [`DefaultComparer`] with the given [`BuildHasher`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lurch::DefaultComparer;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let comparer = DefaultComparer::with_hasher(RandomState::new());
    /// ```
    #[inline]
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }

    /// Returns a reference to the [`BuildHasher`].
    #[inline]
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }
}

impl<S> Debug for DefaultComparer<S> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DefaultComparer")
    }
}

impl<Q, S> KeyComparer<Q> for DefaultComparer<S>
where
    Q: Eq + Hash + ?Sized,
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, key: &Q) -> u64 {
        let mut h = self.build_hasher.build_hasher();
        key.hash(&mut h);
        h.finish()
    }

    #[inline]
    fn equals(&self, a: &Q, b: &Q) -> bool {
        PartialEq::eq(a, b)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_comparer_borrowed_form() {
        let comparer = DefaultComparer::<RandomState>::default();
        let owned = String::from("lurch");
        assert_eq!(
            KeyComparer::<String>::hash(&comparer, &owned),
            KeyComparer::<str>::hash(&comparer, "lurch")
        );
        assert!(KeyComparer::<str>::equals(&comparer, owned.as_str(), "lurch"));
        assert!(!KeyComparer::<str>::equals(&comparer, owned.as_str(), "Lurch"));
    }
}
