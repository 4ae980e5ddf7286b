use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Job ids currently executing in this process.
#[derive(Debug, Clone, Default)]
pub struct LeaseTable {
    held: Arc<Mutex<HashSet<String>>>,
}

/// Held while a job executes; releases its id on drop.
#[derive(Debug)]
pub struct Lease {
    job_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease for `job_id`, or `None` if it is already held.
    pub fn try_acquire(&self, job_id: &str) -> Option<Lease> {
        if !lock(&self.held).insert(job_id.to_string()) {
            return None;
        }
        Some(Lease {
            job_id: job_id.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, job_id: &str) -> bool {
        lock(&self.held).contains(job_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.held).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Lease {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.job_id);
    }
}

// The set stays consistent even if a holder panicked.
fn lock(held: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
