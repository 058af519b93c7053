//! Shared set of content fingerprints seen by the pipeline.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use curator_shared::Fingerprint;

#[derive(Debug, Default)]
pub struct DedupStore {
    seen: Mutex<HashSet<Fingerprint>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().contains(fingerprint)
    }

    /// Returns `true` if the fingerprint was not present before.
    ///
    /// Check and insert happen under one lock, so of several concurrent
    /// callers with the same fingerprint exactly one gets `true`.
    pub fn insert(&self, fingerprint: Fingerprint) -> bool {
        self.lock().insert(fingerprint)
    }

    /// Forget a fingerprint. Returns `true` if it was present.
    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted copy for serialization.
    pub fn to_sorted(&self) -> BTreeSet<Fingerprint> {
        self.lock().iter().cloned().collect()
    }

    pub fn replace(&self, fingerprints: impl IntoIterator<Item = Fingerprint>) {
        let mut seen = self.lock();
        seen.clear();
        seen.extend(fingerprints);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Fingerprint>> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
