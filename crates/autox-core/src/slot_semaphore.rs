//! Per-slot concurrency limiting.
//!
//! Keeps one bounded semaphore per living slot (typically a registrable
//! domain), so concurrency is limited within each slot without limiting
//! concurrency between slots. A slot is created on first use and dropped
//! from the map as soon as no task is waiting on or running in it, so the
//! map never grows with the number of distinct slots ever seen.
//!
//! # Example
//!
//! ```rust,no_run
//! use autox_core::slot_semaphore::SlotSemaphore;
//!
//! # async fn run() -> Result<(), autox_core::AppError> {
//! let sem = SlotSemaphore::new(2)?;
//! let body = sem
//!     .run("example.com".to_string(), async { Ok("fetched".to_string()) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;

#[derive(Debug)]
struct SlotMeta {
    semaphore: Arc<Semaphore>,
    /// Waiting plus running tasks.
    registered_tasks: usize,
}

type SlotMap<K> = Mutex<HashMap<K, SlotMeta>>;

fn lock_slots<K>(slots: &SlotMap<K>) -> MutexGuard<'_, HashMap<K, SlotMeta>> {
    slots.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned slot map");
        poisoned.into_inner()
    })
}

/// A semaphore per slot, created lazily and freed when idle.
#[derive(Clone)]
pub struct SlotSemaphore<K> {
    concurrency_per_slot: usize,
    slots: Arc<SlotMap<K>>,
}

impl<K> SlotSemaphore<K>
where
    K: Eq + Hash + Clone,
{
    /// `concurrency_per_slot` is the maximum number of tasks that can run
    /// at the same time within one slot. Zero is rejected.
    pub fn new(concurrency_per_slot: usize) -> Result<Self, AppError> {
        if concurrency_per_slot == 0 {
            return Err(AppError::ConfigError(
                "slot concurrency must be at least 1".into(),
            ));
        }
        Ok(Self {
            concurrency_per_slot,
            slots: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn concurrency_per_slot(&self) -> usize {
        self.concurrency_per_slot
    }

    /// Number of slots currently alive.
    pub fn slot_count(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    /// Tasks waiting on or running in `slot`. Zero for unknown slots.
    pub fn registered(&self, slot: &K) -> usize {
        lock_slots(&self.slots)
            .get(slot)
            .map(|meta| meta.registered_tasks)
            .unwrap_or(0)
    }

    /// Register a task for `slot`, creating the slot if needed.
    ///
    /// Registration happens before waiting on the semaphore, so the slot is
    /// visible (and kept alive) while tasks are blocked on it.
    fn register(&self, slot: K) -> (SlotRegistration<K>, Arc<Semaphore>) {
        let mut slots = lock_slots(&self.slots);
        let meta = slots.entry(slot.clone()).or_insert_with(|| SlotMeta {
            semaphore: Arc::new(Semaphore::new(self.concurrency_per_slot)),
            registered_tasks: 0,
        });
        meta.registered_tasks += 1;
        let semaphore = Arc::clone(&meta.semaphore);
        drop(slots);

        let registration = SlotRegistration {
            slots: Arc::clone(&self.slots),
            slot,
        };
        (registration, semaphore)
    }

    /// Wait until `slot` has room, returning a permit that frees the room
    /// when dropped.
    ///
    /// Dropping the returned future while it waits also unregisters the task.
    pub async fn acquire(&self, slot: K) -> Result<SlotPermit<K>, AppError> {
        let (registration, semaphore) = self.register(slot);
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| AppError::Generic("slot semaphore closed".into()))?;
        Ok(SlotPermit {
            _permit: permit,
            _registration: registration,
        })
    }

    /// Run `work` respecting the concurrency limit of `slot`.
    pub async fn run<F, T>(&self, slot: K, work: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let _permit = self.acquire(slot).await?;
        work.await
    }
}

impl<K> fmt::Display for SlotSemaphore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = lock_slots(&self.slots);
        if slots.is_empty() {
            return write!(f, "SlotSemaphore({}) empty", self.concurrency_per_slot);
        }
        let counts: Vec<String> = slots
            .values()
            .map(|meta| meta.registered_tasks.to_string())
            .collect();
        write!(
            f,
            "SlotSemaphore({}) {} slots. Tasks counts {}",
            self.concurrency_per_slot,
            slots.len(),
            counts.join(",")
        )
    }
}

/// Keeps a slot registered while alive.
struct SlotRegistration<K: Eq + Hash> {
    slots: Arc<SlotMap<K>>,
    slot: K,
}

impl<K: Eq + Hash> Drop for SlotRegistration<K> {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        let now_idle = match slots.get_mut(&self.slot) {
            Some(meta) => {
                meta.registered_tasks = meta.registered_tasks.saturating_sub(1);
                meta.registered_tasks == 0
            }
            None => false,
        };
        if now_idle {
            slots.remove(&self.slot);
        }
    }
}

/// Room in a slot. Fields drop in order: the permit is returned to the
/// semaphore before the registration is released.
pub struct SlotPermit<K: Eq + Hash> {
    _permit: OwnedSemaphorePermit,
    _registration: SlotRegistration<K>,
}
