//! Reset serialization.
//!
//! The reset control of a physical transceiver quad may be reached from more than one engine.
//! Each engine takes the lock of its GT index for the duration of a reset write and the
//! settle tick that follows, never across a measurement.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Registry of reset locks keyed by GT index. Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct ResetLocks {
    domains: Arc<Mutex<HashMap<u32, Arc<Mutex<()>>>>>,
}

impl ResetLocks {
    pub fn new() -> ResetLocks {
        ResetLocks::default()
    }

    pub fn domain(&self, gt_index: u32) -> ResetDomain {
        let mut domains = self
            .domains
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = domains.entry(gt_index).or_default().clone();
        ResetDomain { gt_index, lock }
    }
}

/// The reset lock of one GT.
#[derive(Debug, Clone)]
pub struct ResetDomain {
    gt_index: u32,
    lock: Arc<Mutex<()>>,
}

impl ResetDomain {
    pub fn gt_index(&self) -> u32 {
        self.gt_index
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        log::trace!("Acquiring reset lock of GT {}", self.gt_index);
        // The guarded data is (), so a panic while holding the lock leaves nothing inconsistent.
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
