#[cfg(test)]
mod lurch_table_model {
    use proptest::prelude::*;

    use crate::{LurchTable, Order};

    #[derive(Clone, Debug)]
    enum Op {
        Put(u8, u32),
        Set(u8, u32),
        TryGet(u8),
        Remove(u8),
        Dequeue,
        GetOrAdd(u8, u32),
        AddOrUpdate(u8, u32),
        TryUpdate(u8, u32, u32),
    }

    /// A sequential reference implementation keeping the entries in policy order.
    struct Model {
        order: Order,
        limit: Option<usize>,
        entries: Vec<(u8, u32)>,
    }

    impl Model {
        fn position(&self, k: u8) -> Option<usize> {
            self.entries.iter().position(|(key, _)| *key == k)
        }

        fn touch(&mut self, index: usize, write: bool) -> usize {
            let moves = match self.order {
                Order::Access => true,
                Order::Modified => write,
                Order::None | Order::Insertion => false,
            };
            if moves {
                let entry = self.entries.remove(index);
                self.entries.push(entry);
                self.entries.len() - 1
            } else {
                index
            }
        }

        fn insert_new(&mut self, k: u8, v: u32) -> Option<(u8, u32)> {
            let evicted = if self.limit == Some(self.entries.len()) {
                Some(self.entries.remove(0))
            } else {
                None
            };
            self.entries.push((k, v));
            evicted
        }
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0_u8..8, 0_u32..4).prop_map(|(k, v)| Op::Put(k, v)),
            (0_u8..8, 0_u32..4).prop_map(|(k, v)| Op::Set(k, v)),
            (0_u8..8).prop_map(Op::TryGet),
            (0_u8..8).prop_map(Op::Remove),
            Just(Op::Dequeue),
            (0_u8..8, 0_u32..4).prop_map(|(k, v)| Op::GetOrAdd(k, v)),
            (0_u8..8, 0_u32..4).prop_map(|(k, v)| Op::AddOrUpdate(k, v)),
            (0_u8..8, 0_u32..4, 0_u32..4).prop_map(|(k, n, c)| Op::TryUpdate(k, n, c)),
        ]
    }

    fn order_strategy() -> impl Strategy<Value = Order> {
        prop_oneof![
            Just(Order::None),
            Just(Order::Insertion),
            Just(Order::Access),
            Just(Order::Modified),
        ]
    }

    fn apply(table: &LurchTable<u8, u32>, model: &mut Model, op: &Op) {
        match *op {
            Op::Put(k, v) => {
                let expected = if model.position(k).is_some() {
                    Err((k, v))
                } else {
                    Ok(model.insert_new(k, v))
                };
                assert_eq!(table.put(k, v), expected, "{op:?}");
            }
            Op::Set(k, v) => {
                let expected = if let Some(i) = model.position(k) {
                    let old = std::mem::replace(&mut model.entries[i].1, v);
                    model.touch(i, true);
                    Some(old)
                } else {
                    model.insert_new(k, v);
                    None
                };
                assert_eq!(table.set(k, v), expected, "{op:?}");
            }
            Op::TryGet(k) => {
                let expected = model.position(k).map(|i| {
                    let i = model.touch(i, false);
                    model.entries[i].1
                });
                assert_eq!(table.try_get(&k), expected, "{op:?}");
            }
            Op::Remove(k) => {
                let expected = model.position(k).map(|i| model.entries.remove(i));
                assert_eq!(table.remove(&k), expected, "{op:?}");
            }
            Op::Dequeue => {
                let expected = if model.order.is_ordered() && !model.entries.is_empty() {
                    Some(model.entries.remove(0))
                } else {
                    None
                };
                assert_eq!(table.try_dequeue(), expected, "{op:?}");
            }
            Op::GetOrAdd(k, v) => {
                let expected = if let Some(i) = model.position(k) {
                    let i = model.touch(i, false);
                    model.entries[i].1
                } else {
                    model.insert_new(k, v);
                    v
                };
                assert_eq!(table.get_or_add(k, v), expected, "{op:?}");
            }
            Op::AddOrUpdate(k, v) => {
                let expected = if let Some(i) = model.position(k) {
                    let new = model.entries[i].1.wrapping_add(v);
                    model.entries[i].1 = new;
                    model.touch(i, true);
                    new
                } else {
                    model.insert_new(k, v);
                    v
                };
                let stored = table.add_or_update(k, v, |_, old| old.wrapping_add(v));
                assert_eq!(stored, expected, "{op:?}");
            }
            Op::TryUpdate(k, new, comparison) => {
                let expected = match model.position(k) {
                    Some(i) if model.entries[i].1 == comparison => {
                        model.entries[i].1 = new;
                        model.touch(i, true);
                        true
                    }
                    _ => false,
                };
                assert_eq!(table.try_update(&k, new, &comparison), expected, "{op:?}");
            }
        }
    }

    proptest! {
        #[cfg_attr(miri, ignore)]
        #[test]
        fn sequential_model(
            order in order_strategy(),
            limit in proptest::option::of(1_usize..6),
            stripes in prop::sample::select(vec![1_usize, 2, 8]),
            ops in prop::collection::vec(op_strategy(), 0..128),
        ) {
            let limit = if order.is_ordered() { limit } else { None };
            let mut builder = LurchTable::builder().order(order).stripes(stripes);
            if let Some(limit) = limit {
                builder = builder.limit(limit);
            }
            let table: LurchTable<u8, u32> = builder.build().unwrap();
            let mut model = Model { order, limit, entries: Vec::new() };

            for op in &ops {
                apply(&table, &mut model, op);
                prop_assert_eq!(table.len(), model.entries.len());
            }

            let mut entries = table.to_vec();
            if !order.is_ordered() {
                entries.sort_unstable();
                model.entries.sort_unstable();
            }
            prop_assert_eq!(entries, model.entries);
        }
    }
}
