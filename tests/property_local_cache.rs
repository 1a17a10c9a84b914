//! Property-based tests for the local (L1) cache
//!
//! Replays random operation sequences against a reference model of the
//! replacement order and checks the cache agrees after every step.

use arcade_cache::{EvictionPolicy, LocalCache};
use bytes::Bytes;
use proptest::prelude::*;

const MAX_SIZE: usize = 4;

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: u8 },
    Get { key: u8 },
    Delete { key: u8 },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    // A small key space keeps the cache at capacity most of the time
    prop_oneof![
        3 => (0u8..8).prop_map(|key| CacheOp::Set { key }),
        3 => (0u8..8).prop_map(|key| CacheOp::Get { key }),
        1 => (0u8..8).prop_map(|key| CacheOp::Delete { key }),
    ]
}

fn key(k: u8) -> String {
    format!("auth:op{k}:app")
}

/// Reference replacement order: front is the next victim
struct Model {
    order: Vec<String>,
    touch_on_read: bool,
}

impl Model {
    fn bump(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push(key.to_string());
    }

    fn set(&mut self, key: &str) -> Option<String> {
        if self.order.iter().any(|k| k == key) {
            self.bump(key);
            return None;
        }
        let victim = (self.order.len() >= MAX_SIZE).then(|| self.order.remove(0));
        self.order.push(key.to_string());
        victim
    }

    fn get(&mut self, key: &str) -> bool {
        let present = self.order.iter().any(|k| k == key);
        if present && self.touch_on_read {
            self.bump(key);
        }
        present
    }

    fn delete(&mut self, key: &str) -> bool {
        let before = self.order.len();
        self.order.retain(|k| k != key);
        before != self.order.len()
    }
}

fn check_against_model(policy: EvictionPolicy, ops: Vec<CacheOp>) -> Result<(), TestCaseError> {
    let cache = LocalCache::new(MAX_SIZE, policy);
    let mut model = Model {
        order: Vec::new(),
        touch_on_read: policy == EvictionPolicy::Lru,
    };

    for op in ops {
        match op {
            CacheOp::Set { key: k } => {
                let victim = model.set(&key(k));
                cache.set(&key(k), Bytes::from(vec![k]), None);
                if let Some(victim) = victim {
                    prop_assert!(!cache.contains_key(&victim), "expected {victim} evicted");
                }
            }
            CacheOp::Get { key: k } => {
                let expected = model.get(&key(k));
                let actual = cache.get(&key(k));
                prop_assert_eq!(actual.is_some(), expected);
                if let Some(value) = actual {
                    prop_assert_eq!(&value[..], &[k][..]);
                }
            }
            CacheOp::Delete { key: k } => {
                prop_assert_eq!(cache.delete(&key(k)), model.delete(&key(k)));
            }
        }

        prop_assert!(cache.len() <= MAX_SIZE);
        prop_assert_eq!(cache.len(), model.order.len());
        for k in &model.order {
            prop_assert!(cache.contains_key(k), "expected {k} present");
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Under LRU the least recently accessed key is always the one evicted
    #[test]
    fn prop_lru_evicts_least_recently_used(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        check_against_model(EvictionPolicy::Lru, ops)?;
    }

    /// Under FIFO reads never change which key goes next
    #[test]
    fn prop_fifo_evicts_oldest_insert(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        check_against_model(EvictionPolicy::Fifo, ops)?;
    }
}

/// Scenario: capacity 2, `a` touched before `c` arrives, so `b` is evicted
#[test]
fn test_lru_scenario() {
    let cache = LocalCache::new(2, EvictionPolicy::Lru);
    cache.set("a", Bytes::from_static(b"1"), None);
    cache.set("b", Bytes::from_static(b"2"), None);
    assert!(cache.get("a").is_some());
    cache.set("c", Bytes::from_static(b"3"), None);

    assert!(cache.get("b").is_none());
    assert!(cache.get("a").is_some());
    assert!(cache.get("c").is_some());
}
