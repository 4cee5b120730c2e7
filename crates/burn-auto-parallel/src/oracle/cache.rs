use std::sync::{Mutex, PoisonError};

use hashbrown::HashMap;

use super::{LayoutTransition, LayoutTransitionOracle};
use crate::sharding::ShardingSpec;
use crate::tensor::TensorMeta;

type CacheKey = (TensorMeta, ShardingSpec, ShardingSpec);

/// Memoizes the transitions computed by another oracle.
///
/// A planning pass asks for the same `(tensor, source, target)` triple once per consumer
/// strategy, so most queries are repeats. The lock is not held while the inner oracle runs.
pub struct CachedOracle<O> {
    inner: O,
    cache: Mutex<HashMap<CacheKey, LayoutTransition>>,
}

impl<O: LayoutTransitionOracle> CachedOracle<O> {
    /// Wraps `inner` with an empty cache.
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached transitions.
    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<O: LayoutTransitionOracle> LayoutTransitionOracle for CachedOracle<O> {
    fn transition(
        &self,
        meta: &TensorMeta,
        source: &ShardingSpec,
        target: &ShardingSpec,
    ) -> LayoutTransition {
        let key = (meta.clone(), source.clone(), target.clone());

        if let Some(transition) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return transition.clone();
        }

        let transition = self.inner.transition(meta, source, target);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, transition.clone());
        transition
    }
}
