// Fixed-capacity admission gate bounding how many removals hold the model at once.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_CAPACITY: usize = 3;

/// Counting limiter shared by all request tasks.
///
/// Cloning is cheap and every clone admits against the same capacity.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One unit of gate capacity. Dropping it returns the unit to the gate,
/// so release happens on every path including panics and early returns.
#[derive(Debug)]
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
}

/// Returned when the gate was closed while a task was waiting for admission.
#[derive(Debug)]
pub struct GateClosed;

impl std::fmt::Display for GateClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "admission gate is closed")
    }
}

impl std::error::Error for GateClosed {}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "admission gate capacity must be at least 1");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits until fewer than `capacity` tokens are outstanding, then admits the caller.
    ///
    /// Tokio's semaphore queues waiters in FIFO order, so no waiter starves.
    pub async fn acquire(&self) -> Result<AdmissionToken, GateClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        Ok(AdmissionToken { _permit: permit })
    }

    /// Stops admitting new work. Pending and future `acquire` calls fail with `GateClosed`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_gate_admits_up_to_capacity() {
        let gate = AdmissionGate::new(3);

        let t1 = gate.acquire().await.unwrap();
        let _t2 = gate.acquire().await.unwrap();
        let _t3 = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 3);

        let mut fourth = task::spawn(gate.acquire());
        assert_pending!(fourth.poll());

        drop(t1);
        assert!(fourth.is_woken());
        let token = assert_ready!(fourth.poll());
        assert!(token.is_ok());
        assert_eq!(gate.in_flight(), 3);
    }

    #[tokio::test]
    async fn test_token_released_when_guarded_work_fails() {
        let gate = AdmissionGate::new(1);

        let result: Result<(), &str> = async {
            let _token = gate.acquire().await.unwrap();
            Err("removal failed")
        }
        .await;

        assert!(result.is_err());
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_token_released_when_blocking_work_panics() {
        let gate = AdmissionGate::new(1);
        let token = gate.acquire().await.unwrap();

        let joined = tokio::task::spawn_blocking(move || {
            let _token = token;
            panic!("model crashed");
        })
        .await;

        assert!(joined.is_err());
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_closed_gate_rejects_waiters() {
        let gate = AdmissionGate::new(1);
        let _held = gate.acquire().await.unwrap();

        let mut waiter = task::spawn(gate.acquire());
        assert_pending!(waiter.poll());

        gate.close();
        assert!(assert_ready!(waiter.poll()).is_err());
        assert!(gate.acquire().await.is_err());
    }

    #[test]
    fn test_default_capacity() {
        let gate = AdmissionGate::default();
        assert_eq!(gate.capacity(), 3);
        assert_eq!(gate.in_flight(), 0);
    }
}
