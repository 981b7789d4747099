use super::{KeyComparer, LurchTable};

use serde::de::{Deserialize, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserializer;

use std::fmt;
use std::marker::PhantomData;

/// Builds an unordered [`LurchTable`] out of a serialized map.
pub struct LurchTableVisitor<K, V, C> {
    #[allow(clippy::type_complexity)]
    marker: PhantomData<fn() -> LurchTable<K, V, C>>,
}

impl<K, V, C> LurchTableVisitor<K, V, C> {
    fn new() -> Self {
        LurchTableVisitor {
            marker: PhantomData,
        }
    }
}

impl<'de, K, V, C> Visitor<'de> for LurchTableVisitor<K, V, C>
where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
    C: KeyComparer<K> + Default,
{
    type Value = LurchTable<K, V, C>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a LurchTable")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let table = LurchTable::default();
        while let Some((key, value)) = access.next_entry()? {
            table.set(key, value);
        }
        Ok(table)
    }
}

impl<'de, K, V, C> Deserialize<'de> for LurchTable<K, V, C>
where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
    C: KeyComparer<K> + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(LurchTableVisitor::<K, V, C>::new())
    }
}

impl<K, V, C> Serialize for LurchTable<K, V, C>
where
    K: Serialize,
    V: Serialize,
{
    /// Serializes the entries as a map; ordered tables are serialized from the oldest entry.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        let mut error = None;
        self.scan(|k, v| match map.serialize_entry(k, v) {
            Ok(()) => true,
            Err(e) => {
                error.replace(e);
                false
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        map.end()
    }
}

#[cfg(test)]
mod serde_test {
    use crate::{LurchTable, Order};

    use serde_test::{assert_de_tokens, assert_ser_tokens, assert_tokens, Token};

    #[test]
    fn serde_lurch_table() {
        let table: LurchTable<u64, i16> = LurchTable::new();
        assert!(table.try_add(2, -6));
        assert_tokens(
            &table,
            &[
                Token::Map { len: Some(1) },
                Token::U64(2),
                Token::I16(-6),
                Token::MapEnd,
            ],
        );
    }

    #[test]
    fn serde_order() {
        let table: LurchTable<u64, i16> = LurchTable::with_order(Order::Insertion);
        assert!(table.try_add(3, 1));
        assert!(table.try_add(1, 2));
        assert_ser_tokens(
            &table,
            &[
                Token::Map { len: Some(2) },
                Token::U64(3),
                Token::I16(1),
                Token::U64(1),
                Token::I16(2),
                Token::MapEnd,
            ],
        );

        // Later entries overwrite earlier ones.
        let table: LurchTable<u64, i16> = LurchTable::new();
        assert!(table.try_add(1, 2));
        assert_de_tokens(
            &table,
            &[
                Token::Map { len: Some(2) },
                Token::U64(1),
                Token::I16(1),
                Token::U64(1),
                Token::I16(2),
                Token::MapEnd,
            ],
        );

        assert_tokens(
            &Order::Access,
            &[Token::UnitVariant {
                name: "Order",
                variant: "Access",
            }],
        );
    }
}
