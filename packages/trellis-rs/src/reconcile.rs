//! Keyed reconciliation shared by children and workers.
//!
//! A [`Reconciler`] keeps two generations of handles:
//!
//! - **active**: everything the previous render pass asked for.
//! - **staging**: everything the current render pass has asked for so far.
//!
//! During a pass each request [`claim`](Reconciler::claim)s its key from
//! `active` (reusing the running instance) or starts a fresh one, then
//! [`stage`](Reconciler::stage)s it. When the pass ends,
//! [`commit`](Reconciler::commit) disposes whatever is left in `active` and
//! promotes `staging`. Disposal therefore happens once, after the whole
//! request list, and before the render pass returns.

use std::collections::HashMap;

use crate::error::WorkflowError;
use crate::key::Key;

pub(crate) struct Reconciler<H> {
    active: Vec<(Key, H)>,
    staging: Vec<(Key, H)>,
    requested: HashMap<Key, usize>,
    duplicated: Vec<Key>,
}

impl<H> Default for Reconciler<H> {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            staging: Vec::new(),
            requested: HashMap::new(),
            duplicated: Vec::new(),
        }
    }
}

impl<H> Reconciler<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request for `key` and take its handle out of the previous
    /// generation, if it had one.
    ///
    /// A key requested twice in one pass fails immediately; the full list of
    /// duplicates is also available from [`duplicates`](Self::duplicates).
    pub fn claim(&mut self, key: &Key) -> Result<Option<H>, WorkflowError> {
        let count = {
            let count = self.requested.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if count > 1 {
            if count == 2 {
                self.duplicated.push(key.clone());
            }
            return Err(WorkflowError::DuplicateKeys {
                keys: self.duplicates(),
            });
        }
        Ok(self
            .active
            .iter()
            .position(|(k, _)| k == key)
            .map(|idx| self.active.remove(idx).1))
    }

    /// Add a handle to the current generation and return it for use.
    pub fn stage(&mut self, key: Key, handle: H) -> &mut H {
        self.staging.push((key, handle));
        let last = self.staging.len() - 1;
        &mut self.staging[last].1
    }

    /// Every key requested more than once this pass, with its request count,
    /// in the order the duplicates were first seen.
    pub fn duplicates(&self) -> Vec<(String, usize)> {
        self.duplicated
            .iter()
            .map(|key| (key.to_string(), self.requested.get(key).copied().unwrap_or(0)))
            .collect()
    }

    /// End the pass: dispose every handle not requested, promote the rest.
    pub fn commit(&mut self, mut dispose: impl FnMut(Key, H)) {
        for (key, handle) in self.active.drain(..) {
            dispose(key, handle);
        }
        std::mem::swap(&mut self.active, &mut self.staging);
        self.reset_requests();
    }

    /// Abandon the pass: keep every handle, claimed or not, running.
    pub fn rollback(&mut self) {
        self.active.append(&mut self.staging);
        self.reset_requests();
    }

    fn reset_requests(&mut self) {
        self.requested.clear();
        self.duplicated.clear();
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut (Key, H)> {
        self.active.get_mut(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Key, H)> {
        self.active.iter()
    }

    /// Remove every handle from both generations.
    pub fn drain_all(&mut self) -> Vec<(Key, H)> {
        let mut all: Vec<(Key, H)> = self.active.drain(..).collect();
        all.append(&mut self.staging);
        self.reset_requests();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Child;
    struct Job;

    fn pass(r: &mut Reconciler<u32>, keys: &[&str], next_id: &mut u32) -> Vec<(String, u32)> {
        for name in keys {
            let key = Key::of::<Child>(*name);
            let handle = match r.claim(&key).expect("unique keys") {
                Some(existing) => existing,
                None => {
                    *next_id += 1;
                    *next_id
                }
            };
            r.stage(key, handle);
        }
        let mut disposed = Vec::new();
        r.commit(|key, id| disposed.push((key.name().to_string(), id)));
        disposed
    }

    #[test]
    fn test_reused_keys_keep_their_handles() {
        let mut r = Reconciler::new();
        let mut ids = 0;
        assert!(pass(&mut r, &["a", "b"], &mut ids).is_empty());
        assert!(pass(&mut r, &["b", "a"], &mut ids).is_empty());

        let held: Vec<_> = r.iter().map(|(k, id)| (k.name().to_string(), *id)).collect();
        assert_eq!(held, vec![("b".to_string(), 2), ("a".to_string(), 1)]);
        assert_eq!(ids, 2);
    }

    #[test]
    fn test_missing_keys_are_disposed_once_on_commit() {
        let mut r = Reconciler::new();
        let mut ids = 0;
        pass(&mut r, &["a", "b", "c"], &mut ids);
        let disposed = pass(&mut r, &["b", "d"], &mut ids);
        assert_eq!(disposed, vec![("a".to_string(), 1), ("c".to_string(), 3)]);
        assert_eq!(r.len(), 2);

        let disposed = pass(&mut r, &["b", "d"], &mut ids);
        assert!(disposed.is_empty());
    }

    #[test]
    fn test_duplicate_key_is_rejected_with_counts() {
        let mut r: Reconciler<u32> = Reconciler::new();
        let dup = Key::of::<Child>("dup");
        assert!(r.claim(&dup).unwrap().is_none());
        r.stage(dup.clone(), 1);
        assert!(matches!(
            r.claim(&dup),
            Err(WorkflowError::DuplicateKeys { .. })
        ));
        let _ = r.claim(&dup);

        let dups = r.duplicates();
        assert_eq!(dups.len(), 1);
        assert!(dups[0].0.ends_with("Child:dup"));
        assert_eq!(dups[0].1, 3);
    }

    #[test]
    fn test_same_name_different_type_is_not_a_duplicate() {
        let mut r: Reconciler<u32> = Reconciler::new();
        assert!(r.claim(&Key::of::<Child>("x")).is_ok());
        assert!(r.claim(&Key::of::<Job>("x")).is_ok());
        assert!(r.duplicates().is_empty());
    }

    #[test]
    fn test_rollback_keeps_everything() {
        let mut r = Reconciler::new();
        let mut ids = 0;
        pass(&mut r, &["a", "b"], &mut ids);

        let a = Key::of::<Child>("a");
        let handle = r.claim(&a).unwrap().expect("a is active");
        r.stage(a, handle);
        r.stage(Key::of::<Child>("new"), 99);
        r.rollback();

        assert_eq!(r.len(), 3);
        // Request counts reset, so the next pass may claim "a" again.
        assert!(r.claim(&Key::of::<Child>("a")).unwrap().is_some());
    }

    #[test]
    fn test_drain_all_takes_both_generations() {
        let mut r = Reconciler::new();
        let mut ids = 0;
        pass(&mut r, &["a"], &mut ids);
        r.stage(Key::of::<Child>("b"), 7);
        let drained = r.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(r.is_empty());
    }
}
