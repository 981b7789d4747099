//! [`Stripe`] is an independently lockable partition of the bucket array.

use std::mem::replace;

/// Index value representing the absence of a slot.
pub(crate) const NIL: usize = usize::MAX;

/// [`Entry`] is a key-value pair stored in a [`Stripe`] slot.
///
/// A single [`Entry`] belongs to one bucket chain of its [`Stripe`] and, when the table is
/// ordered, to one node of the order list.
pub(crate) struct Entry<K, V> {
    key: K,
    val: V,
    hash: u64,
    /// Next slot in the bucket chain.
    bucket_next: usize,
    /// Order-list node of the entry, or [`NIL`] if the table is unordered.
    pub(crate) order_node: usize,
    /// Incremented on every value mutation.
    version: u64,
}

/// A slot in the entry arena.
struct Slot<K, V> {
    /// Incremented each time the slot is vacated.
    generation: u32,
    entry: Option<Entry<K, V>>,
}

/// [`Stripe`] owns the buckets `b` satisfying `b % num_stripes == stripe_index`, and the entries
/// chained to them.
///
/// The entry arena is addressed by slot index; a slot index is stable for the lifetime of the
/// entry, resizing only re-chains entries.
pub(crate) struct Stripe<K, V> {
    /// Head slot of each local bucket chain.
    buckets: Vec<usize>,
    slots: Vec<Slot<K, V>>,
    /// Vacant slots.
    free: Vec<usize>,
    len: usize,
    /// Number of hash bits consumed by stripe selection.
    shift: u32,
}

impl<K, V> Entry<K, V> {
    #[inline]
    pub(crate) fn new(key: K, val: V, hash: u64) -> Self {
        Self {
            key,
            val,
            hash,
            bucket_next: NIL,
            order_node: NIL,
            version: 0,
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub(crate) fn val(&self) -> &V {
        &self.val
    }

    #[inline]
    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    /// Returns a mutable reference to the value, bumping the version.
    #[inline]
    pub(crate) fn val_mut(&mut self) -> &mut V {
        self.version = self.version.wrapping_add(1);
        &mut self.val
    }

    /// Returns the key and a mutable reference to the value, bumping the version.
    #[inline]
    pub(crate) fn pair_mut(&mut self) -> (&K, &mut V) {
        self.version = self.version.wrapping_add(1);
        (&self.key, &mut self.val)
    }

    /// Replaces the value, and returns the old one.
    #[inline]
    pub(crate) fn replace_val(&mut self, val: V) -> V {
        replace(self.val_mut(), val)
    }

    #[inline]
    pub(crate) fn into_pair(self) -> (K, V) {
        (self.key, self.val)
    }
}

impl<K, V> Stripe<K, V> {
    /// Creates a [`Stripe`] with `num_buckets` local buckets.
    pub(crate) fn new(num_buckets: usize, shift: u32) -> Self {
        debug_assert!(num_buckets.is_power_of_two());
        Self {
            buckets: vec![NIL; num_buckets],
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            shift,
        }
    }

    /// Returns the number of entries in the [`Stripe`].
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns the number of local buckets.
    #[cfg(test)]
    pub(crate) fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn bucket_index(&self, hash: u64) -> usize {
        // The shift can be equal to `u64::BITS` only when there is a single bucket.
        (hash.checked_shr(self.shift).unwrap_or(0) as usize) & (self.buckets.len() - 1)
    }

    /// Returns a reference to the entry in the slot.
    #[inline]
    pub(crate) fn get(&self, slot: usize) -> Option<&Entry<K, V>> {
        self.slots.get(slot).and_then(|s| s.entry.as_ref())
    }

    /// Returns a mutable reference to the entry in the slot.
    #[inline]
    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut Entry<K, V>> {
        self.slots.get_mut(slot).and_then(|s| s.entry.as_mut())
    }

    /// Returns the generation of the slot.
    #[cfg(test)]
    pub(crate) fn generation(&self, slot: usize) -> u32 {
        self.slots.get(slot).map_or(0, |s| s.generation)
    }

    /// Returns the entry in the slot if the slot has not been vacated since `generation`.
    #[inline]
    pub(crate) fn get_if_generation(&self, slot: usize, generation: u32) -> Option<&Entry<K, V>> {
        self.slots
            .get(slot)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.entry.as_ref())
    }

    /// Finds the slot of the entry with the given hash accepted by `eq`.
    #[inline]
    pub(crate) fn find<F: FnMut(&K) -> bool>(&self, hash: u64, mut eq: F) -> Option<usize> {
        let mut current = self.buckets[self.bucket_index(hash)];
        while current != NIL {
            let entry = self.get(current)?;
            if entry.hash == hash && eq(&entry.key) {
                return Some(current);
            }
            current = entry.bucket_next;
        }
        None
    }

    /// Returns the slot that the next insertion occupies, and its generation.
    #[inline]
    pub(crate) fn vacant(&self) -> (usize, u32) {
        self.free
            .last()
            .map_or((self.slots.len(), 0), |&slot| (slot, self.slots[slot].generation))
    }

    /// Inserts an entry, and returns the slot and the inserted entry.
    ///
    /// The caller must ensure that the key is not present in the [`Stripe`].
    pub(crate) fn insert(&mut self, mut entry: Entry<K, V>) -> (usize, &mut Entry<K, V>) {
        let bucket = self.bucket_index(entry.hash);
        entry.bucket_next = self.buckets[bucket];
        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else {
            self.slots.push(Slot {
                generation: 0,
                entry: None,
            });
            self.slots.len() - 1
        };
        self.buckets[bucket] = slot;
        self.len += 1;
        (slot, self.slots[slot].entry.insert(entry))
    }

    /// Removes the entry in the slot.
    pub(crate) fn remove(&mut self, slot: usize) -> Option<Entry<K, V>> {
        let (hash, next) = self.get(slot).map(|e| (e.hash, e.bucket_next))?;
        let bucket = self.bucket_index(hash);
        if self.buckets[bucket] == slot {
            self.buckets[bucket] = next;
        } else {
            let mut prev = self.buckets[bucket];
            while prev != NIL {
                let prev_entry = self.get_mut(prev)?;
                if prev_entry.bucket_next == slot {
                    prev_entry.bucket_next = next;
                    break;
                }
                prev = prev_entry.bucket_next;
            }
        }
        let vacated = &mut self.slots[slot];
        vacated.generation = vacated.generation.wrapping_add(1);
        self.free.push(slot);
        self.len -= 1;
        vacated.entry.take()
    }

    /// Returns the first occupied slot at or after `from`.
    #[inline]
    pub(crate) fn next_occupied(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&slot| self.slots[slot].entry.is_some())
    }

    /// Re-chains every entry into `num_buckets` local buckets.
    ///
    /// Slots are untouched, therefore order-list nodes keep pointing at the same entries.
    pub(crate) fn rehash(&mut self, num_buckets: usize) {
        debug_assert!(num_buckets.is_power_of_two());
        self.buckets = vec![NIL; num_buckets];
        for slot in 0..self.slots.len() {
            let Some(hash) = self.slots[slot].entry.as_ref().map(|e| e.hash) else {
                continue;
            };
            let bucket = self.bucket_index(hash);
            let head = replace(&mut self.buckets[bucket], slot);
            if let Some(entry) = self.slots[slot].entry.as_mut() {
                entry.bucket_next = head;
            }
        }
    }

    /// Removes every entry.
    pub(crate) fn drain(&mut self) -> Vec<Entry<K, V>> {
        let mut drained = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
                drained.push(entry);
            }
        }
        self.buckets.fill(NIL);
        self.len = 0;
        drained
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_find_remove() {
        let mut stripe: Stripe<u64, u64> = Stripe::new(2, 0);
        let slots: Vec<usize> = (0..8_u64)
            .map(|k| stripe.insert(Entry::new(k, k * 10, k)).0)
            .collect();
        assert_eq!(stripe.len(), 8);
        for k in 0..8_u64 {
            let slot = stripe.find(k, |key| *key == k).unwrap();
            assert_eq!(slot, slots[k as usize]);
            assert_eq!(*stripe.get(slot).unwrap().val(), k * 10);
        }

        // Removing from the middle of a chain keeps the rest reachable.
        let generation = stripe.generation(slots[2]);
        let removed = stripe.remove(slots[2]).unwrap();
        assert_eq!(removed.into_pair(), (2, 20));
        assert!(stripe.find(2, |key| *key == 2).is_none());
        assert!(stripe.get_if_generation(slots[2], generation).is_none());
        for k in [0_u64, 4, 6] {
            assert!(stripe.find(k, |key| *key == k).is_some());
        }

        // The vacated slot is reused.
        assert_eq!(stripe.vacant(), (slots[2], generation + 1));
        assert_eq!(stripe.insert(Entry::new(10, 100, 10)).0, slots[2]);
        assert_eq!(stripe.len(), 8);
    }

    #[test]
    fn rehash_keeps_slots() {
        let mut stripe: Stripe<u64, u64> = Stripe::new(1, 0);
        let slots: Vec<usize> = (0..32_u64)
            .map(|k| stripe.insert(Entry::new(k, k, k.wrapping_mul(0x9E37_79B9_7F4A_7C15))).0)
            .collect();
        stripe.rehash(16);
        assert_eq!(stripe.num_buckets(), 16);
        for k in 0..32_u64 {
            let hash = k.wrapping_mul(0x9E37_79B9_7F4A_7C15);
            assert_eq!(stripe.find(hash, |key| *key == k), Some(slots[k as usize]));
        }
    }

    #[test]
    fn version_and_drain() {
        let mut stripe: Stripe<u64, u64> = Stripe::new(4, 0);
        let (slot, _) = stripe.insert(Entry::new(1, 1, 1));
        let entry = stripe.get_mut(slot).unwrap();
        assert_eq!(entry.version(), 0);
        assert_eq!(entry.replace_val(2), 1);
        *entry.val_mut() += 1;
        assert_eq!(entry.version(), 2);
        assert_eq!(*entry.val(), 3);

        let drained = stripe.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(stripe.len(), 0);
        assert!(stripe.next_occupied(0).is_none());
        assert!(stripe.find(1, |key| *key == 1).is_none());
    }
}
