//! Property-based test generators using proptest.
//!
//! Workloads draw from a deliberately small key space so that overwrites,
//! deletes and scope deletes collide often.

use crate::model::{Key, KvOp};
use proptest::prelude::*;

/// Strategy for keys over three scopes and five names.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    (0u64..3, 0usize..5).prop_map(|(scope, name)| Key::new(scope, format!("k{name}")))
}

/// Strategy for short values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..32)
}

/// Strategy for a single store operation, mostly puts.
pub fn op_strategy() -> impl Strategy<Value = KvOp> {
    prop_oneof![
        6 => (key_strategy(), value_strategy()).prop_map(|(key, value)| KvOp::Put { key, value }),
        3 => key_strategy().prop_map(|key| KvOp::Delete { key }),
        1 => (0u64..3).prop_map(|scope| KvOp::DeleteScope { scope }),
    ]
}

/// Strategy for a workload: operations paired with a sync request flag.
pub fn workload_strategy(max_len: usize) -> impl Strategy<Value = Vec<(KvOp, bool)>> {
    prop::collection::vec((op_strategy(), prop::bool::weighted(0.1)), 1..max_len)
}
