//! Shared dispatch concurrency bound.
//!
//! One semaphore shared across every orchestration's driver — the bound is
//! global to the control plane, not per orchestration.

use std::sync::Arc;

use tokio::sync::Semaphore;

pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 32;

#[derive(Clone)]
pub struct DispatchPool {
    semaphore: Arc<Semaphore>,
}

impl DispatchPool {
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    #[must_use]
    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }
}

impl Default for DispatchPool {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCH_CONCURRENCY)
    }
}
