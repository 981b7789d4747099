//! Concurrent, order-aware, capacity-bounded hash map.
//!
//! # lurch::LurchTable
//! A concurrent hash map partitioned into independently locked stripes. Entries can be kept in
//! insertion, access, or modification order, and the oldest entry is evicted when the table
//! reaches its limit.
//!
//! ```
//! use lurch::{LurchTable, Order};
//!
//! let table: LurchTable<u64, u32> = LurchTable::with_limit(Order::Insertion, 2).unwrap();
//! for k in 1..=3 {
//!     assert!(table.try_add(k, k as u32));
//! }
//! assert_eq!(table.keys().collect::<Vec<_>>(), vec![2, 3]);
//! ```

mod comparer;
pub use comparer::{DefaultComparer, KeyComparer};

mod config;
pub use config::{Builder, Order, MAX_STRIPES};

mod error;
pub use error::{Error, Result};

mod iter;
pub use iter::{Iter, Keys, Values};

mod lurch_table;
pub use lurch_table::{LurchTable, MAX_OPTIMISTIC_RETRY};

mod untyped;
pub use untyped::UntypedMap;

mod hash_table;
mod order_list;
mod sync;

#[cfg(feature = "serde")]
mod serde;

#[cfg(test)]
mod tests;
