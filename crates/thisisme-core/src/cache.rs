//! Single-flight artifact cache.
//!
//! Artifact sets are keyed by `(n_components, policy)`; mean vectors are
//! keyed by channel and shared across sets. Concurrent misses on one key wait
//! for a single load. A failed load is not remembered: its slot is dropped
//! and a later request retries it.

use crate::artifacts::{ArtifactError, ArtifactId, ArtifactStore, Channel, ClassifierModel, MeanVector, ProjectionModel};
use crate::composer::CombinationPolicy;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArtifactKey {
    pub n_components: u32,
    pub policy: CombinationPolicy,
}

impl ArtifactKey {
    pub fn new(n_components: u32, policy: CombinationPolicy) -> Self {
        Self { n_components, policy }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n_components={}, policy={}", self.n_components, self.policy)
    }
}

/// Everything one [`ArtifactKey`] needs to classify a face.
#[derive(Debug)]
pub struct ArtifactSet {
    key: ArtifactKey,
    projections: BTreeMap<Channel, ProjectionModel>,
    means: BTreeMap<Channel, Arc<MeanVector>>,
    classifier: ClassifierModel,
}

impl ArtifactSet {
    pub fn new(
        key: ArtifactKey,
        projections: BTreeMap<Channel, ProjectionModel>,
        means: BTreeMap<Channel, Arc<MeanVector>>,
        classifier: ClassifierModel,
    ) -> Self {
        Self {
            key,
            projections,
            means,
            classifier,
        }
    }

    pub fn key(&self) -> ArtifactKey {
        self.key
    }

    pub fn projection(&self, channel: Channel) -> Option<&ProjectionModel> {
        self.projections.get(&channel)
    }

    pub fn mean(&self, channel: Channel) -> Option<&MeanVector> {
        self.means.get(&channel).map(Arc::as_ref)
    }

    pub fn classifier(&self) -> &ClassifierModel {
        &self.classifier
    }
}

/// One key's value plus the lock that serializes its load.
struct Slot<V> {
    value: OnceLock<Arc<V>>,
    loading: Mutex<()>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            value: OnceLock::new(),
            loading: Mutex::new(()),
        }
    }
}

/// Map of lazily filled slots. Only successful loads keep their slot.
pub struct SingleFlight<K, V> {
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, running `load` on a miss.
    /// The boolean is true when this call performed the load.
    pub fn get_or_load<E>(&self, key: &K, load: impl FnOnce() -> Result<V, E>) -> Result<(Arc<V>, bool), E> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        if let Some(cached) = slot.value.get() {
            return Ok((Arc::clone(cached), false));
        }

        let result = {
            let _loading = slot.loading.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = slot.value.get() {
                return Ok((Arc::clone(cached), false));
            }
            load().map(|v| {
                let loaded = Arc::new(v);
                let _ = slot.value.set(Arc::clone(&loaded));
                loaded
            })
        };

        match result {
            Ok(loaded) => Ok((loaded, true)),
            Err(e) => {
                self.evict_if_unused(key, slot);
                Err(e)
            }
        }
    }

    /// Drop an empty slot once no other caller is waiting on it.
    fn evict_if_unused(&self, key: &K, slot: Arc<Slot<V>>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = slots.get(key) else {
            return;
        };
        let same = Arc::ptr_eq(current, &slot);
        // Slots are cloned and, on failure, released only under the map lock,
        // so a count of one means no caller is still waiting on this slot.
        drop(slot);
        if same && current.value.get().is_none() && Arc::strong_count(current) == 1 {
            slots.remove(key);
        }
    }

    /// Keys whose value is present.
    pub fn keys(&self) -> Vec<K> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .filter(|(_, slot)| slot.value.get().is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Process-wide artifact cache in front of an [`ArtifactStore`].
pub struct ArtifactCache {
    store: Arc<dyn ArtifactStore>,
    sets: SingleFlight<ArtifactKey, ArtifactSet>,
    means: SingleFlight<Channel, MeanVector>,
}

impl ArtifactCache {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            sets: SingleFlight::new(),
            means: SingleFlight::new(),
        }
    }

    pub fn get_or_load(&self, key: ArtifactKey) -> Result<Arc<ArtifactSet>, ArtifactError> {
        let (set, loaded) = self.sets.get_or_load(&key, || self.load_set(key))?;
        if !loaded {
            tracing::debug!(%key, "artifact cache hit");
        }
        Ok(set)
    }

    /// Keys currently cached, in ascending order.
    pub fn cached_keys(&self) -> Vec<ArtifactKey> {
        let mut keys = self.sets.keys();
        keys.sort();
        keys
    }

    fn mean(&self, channel: Channel) -> Result<Arc<MeanVector>, ArtifactError> {
        let (mean, loaded) = self.means.get_or_load(&channel, || self.store.mean(channel))?;
        if loaded {
            tracing::info!(%channel, "loaded mean vector");
        }
        Ok(mean)
    }

    fn load_set(&self, key: ArtifactKey) -> Result<ArtifactSet, ArtifactError> {
        tracing::info!(%key, "artifact cache miss, loading from store");
        let start = Instant::now();

        let mut projections = BTreeMap::new();
        let mut means = BTreeMap::new();
        for &channel in key.policy.channels() {
            projections.insert(channel, self.store.projection(channel, key.n_components)?);
            if key.policy.subtracts_means() {
                means.insert(channel, self.mean(channel)?);
            }
        }

        let classifier = self.store.classifier(key.policy, key.n_components)?;
        let expected: usize = projections.values().map(ProjectionModel::n_components).sum();
        if classifier.n_features() != expected {
            return Err(ArtifactError::Invalid {
                id: ArtifactId::Classifier {
                    policy: key.policy,
                    n_components: key.n_components,
                },
                reason: format!(
                    "expects {} features, projections produce {expected}",
                    classifier.n_features()
                ),
            });
        }

        tracing::info!(
            %key,
            classes = classifier.n_classes(),
            ms = start.elapsed().as_millis() as u64,
            "artifact set loaded"
        );

        Ok(ArtifactSet::new(key, projections, means, classifier))
    }
}
