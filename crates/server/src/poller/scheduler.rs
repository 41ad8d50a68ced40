//! Poll task lifecycle management.
//!
//! One background task per actively-subscribed resource. The registry is
//! what serializes checks per resource: the driving loop only starts a task
//! for a resource that has none, so two concurrent checks for the same id
//! cannot be scheduled.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Type alias for poll task futures.
pub type PollTask = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct PollTaskManager {
    pub(crate) running: RwLock<HashMap<i64, Arc<AtomicBool>>>,
}

impl Default for PollTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PollTaskManager {
    pub fn new() -> Self {
        Self {
            running: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_running(&self, resource_id: i64) -> bool {
        self.running.read().await.contains_key(&resource_id)
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Starts a task for the given resource, stopping any previous one first.
    #[tracing::instrument(skip(self, f))]
    pub async fn start_task<F>(&self, resource_id: i64, f: F)
    where
        F: FnOnce(Arc<AtomicBool>) -> PollTask + Send + 'static,
    {
        let mut running = self.running.write().await;
        if let Some(flag) = running.get(&resource_id) {
            flag.store(false, Ordering::SeqCst); // stop old
        }
        let flag = Arc::new(AtomicBool::new(true));
        running.insert(resource_id, flag.clone());
        let task = f(flag.clone());
        tokio::spawn(task);
    }

    /// Drop the registry entry for a task that exited on its own
    /// (self-pruning on terminal resources).
    pub async fn finish_task(&self, resource_id: i64) {
        self.running.write().await.remove(&resource_id);
    }

    pub async fn stop_task(&self, resource_id: i64) {
        let mut running = self.running.write().await;
        if let Some(flag) = running.remove(&resource_id) {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// Stop every task whose resource is no longer in the active set.
    pub async fn stop_missing(&self, active: &HashSet<i64>) {
        let mut running = self.running.write().await;
        let stale: Vec<i64> = running
            .keys()
            .filter(|id| !active.contains(id))
            .copied()
            .collect();
        for resource_id in stale {
            if let Some(flag) = running.remove(&resource_id) {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }

    pub async fn stop_all(&self) {
        let mut running = self.running.write().await;
        for flag in running.values() {
            flag.store(false, Ordering::SeqCst);
        }
        running.clear();
    }
}
