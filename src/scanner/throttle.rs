//! Bounds the number of hosts probed at the same time.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("throttle was closed")]
pub struct ThrottleClosed;

/// A counting gate with `capacity` permits.
///
/// Every running probe owns exactly one [`ThrottlePermit`]; dropping it is the
/// only way to give the slot back, so a release without a matching acquire
/// cannot be expressed. Cloning a `Throttle` yields another handle to the
/// same gate.
#[derive(Debug, Clone)]
pub struct Throttle {
    semaphore: Arc<Semaphore>,
    capacity: u32,
    drained: Arc<AtomicBool>,
}

/// One slot of the throttle, held for the lifetime of one probe.
#[derive(Debug)]
#[must_use = "dropping the permit immediately releases the slot"]
pub struct ThrottlePermit(#[allow(dead_code)] OwnedSemaphorePermit);

impl ThrottlePermit {
    /// Hands the slot back. Same as dropping the permit.
    pub fn release(self) {}
}

impl Throttle {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "throttle needs at least one permit");
        let capacity = capacity
            .min(Semaphore::MAX_PERMITS)
            .min(u32::MAX as usize) as u32;

        Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            drained: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<ThrottlePermit, ThrottleClosed> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(ThrottlePermit)
            .map_err(|_| ThrottleClosed)
    }

    /// Waits until every slot has been handed back, then keeps all of them.
    ///
    /// While drained nobody can acquire; [`Throttle::refill_all`] undoes it.
    pub async fn drain_all(&self) -> Result<(), ThrottleClosed> {
        let all = self
            .semaphore
            .acquire_many(self.capacity)
            .await
            .map_err(|_| ThrottleClosed)?;
        all.forget();
        self.drained.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Gives back every slot taken by [`Throttle::drain_all`].
    ///
    /// Does nothing if the throttle is not drained, so the number of slots
    /// never grows past `capacity`.
    pub fn refill_all(&self) {
        if self.drained.swap(false, Ordering::SeqCst) {
            self.semaphore.add_permits(self.capacity as usize);
        }
    }

    /// Fails every pending and future acquire and drain.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }

    pub const fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held by probes (or by a drain).
    pub fn in_flight(&self) -> usize {
        self.capacity().saturating_sub(self.available())
    }
}
