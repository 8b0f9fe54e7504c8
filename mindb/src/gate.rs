//! C4: execution gate. A counting semaphore bounding concurrent engine
//! calls (invariant I5). Built on `tokio::sync::Semaphore`, which already
//! gives us cancellation-aware `acquire` and idempotent-by-construction
//! release (dropping the permit releases exactly once).

use crate::error::{ApiError, ApiResult};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

pub struct ExecutionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Held by the caller for the duration of one engine call. Dropping it
/// releases the permit — this is what makes "every exit path releases
/// exactly once" (spec.md I5) trivial to satisfy.
pub struct Permit(#[allow(dead_code)] OwnedSemaphorePermit);

impl ExecutionGate {
    pub fn new(capacity: usize) -> Self {
        ExecutionGate {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Block until a permit is available or `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> ApiResult<Permit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::GateUnavailable),
            permit = self.semaphore.clone().acquire_owned() => {
                let permit = permit.map_err(|_| ApiError::GateUnavailable)?;
                Ok(Permit(permit))
            }
        }
    }

    /// Non-blocking variant used where backpressure should surface
    /// immediately (503) rather than queue.
    pub fn try_acquire(&self) -> ApiResult<Permit> {
        self.semaphore.clone().try_acquire_owned().map(Permit).map_err(|_| ApiError::GateUnavailable)
    }

    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_in_use_and_available() {
        let gate = ExecutionGate::new(2);
        assert_eq!(gate.available(), 2);

        let cancel = CancellationToken::new();
        let p1 = gate.acquire(&cancel).await.unwrap();
        assert_eq!(gate.in_use(), 1);
        assert_eq!(gate.available(), 1);

        let p2 = gate.acquire(&cancel).await.unwrap();
        assert_eq!(gate.in_use(), 2);
        assert_eq!(gate.available(), 0);

        drop(p1);
        assert_eq!(gate.in_use(), 1);
        drop(p2);
        assert_eq!(gate.in_use(), 0);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn try_acquire_fails_at_capacity() {
        let gate = ExecutionGate::new(1);
        let _p = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_err());
    }

    #[tokio::test]
    async fn acquire_is_cancellable() {
        let gate = ExecutionGate::new(1);
        let _held = gate.try_acquire().unwrap();

        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            cancel2.cancel();
        });

        let result = gate.acquire(&cancel).await;
        assert!(result.is_err());
    }
}
