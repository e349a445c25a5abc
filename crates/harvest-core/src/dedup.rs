use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Run-scoped set of job IDs already accepted for detail fetching.
///
/// [`Deduplicator::admit`] is an atomic check-and-insert, so two workers that
/// see the same ID concurrently cannot both win.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashSet<String>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_seen(&self) -> MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned dedup mutex");
            poisoned.into_inner()
        })
    }

    /// Returns true exactly once per ID.
    pub fn admit(&self, job_id: &str) -> bool {
        let mut seen = self.lock_seen();
        if seen.contains(job_id) {
            return false;
        }
        seen.insert(job_id.to_string())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock_seen().contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock_seen().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
