//! Settle-once signal used to hand a pause or cancel decision to a parked worker.
//!
//! One [`Rendezvous`] exists per pause or cancel episode. The worker parks in
//! [`Rendezvous::wait`], the command side watches [`Rendezvous::parked`] to learn
//! that the worker reached its suspension point, then settles the signal with a
//! value or a hook failure. Dropping the sender without settling (see
//! [`Rendezvous::withdraw`]) releases the worker with
//! [`RendezvousError::Withdrawn`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};

use super::state::PauseOrCancel;
use crate::error::{HookError, RendezvousError};

type Settlement = Result<PauseOrCancel, HookError>;

struct Slots {
    tx: Option<oneshot::Sender<Settlement>>,
    rx: Option<oneshot::Receiver<Settlement>>,
}

pub struct Rendezvous {
    slots: Mutex<Slots>,
    awaited: watch::Sender<bool>,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        let (awaited, _) = watch::channel(false);
        Self {
            slots: Mutex::new(Slots {
                tx: Some(tx),
                rx: Some(rx),
            }),
            awaited,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True while a worker is parked in [`wait`](Self::wait).
    pub fn is_awaited(&self) -> bool {
        *self.awaited.borrow()
    }

    /// Resolves once a worker is parked in [`wait`](Self::wait).
    pub async fn parked(&self) {
        let mut rx = self.awaited.subscribe();
        // The sender lives as long as `self`, so this only returns once parked.
        let _ = rx.wait_for(|awaited| *awaited).await;
    }

    /// Parks the caller until the signal is settled.
    pub async fn wait(&self) -> Result<PauseOrCancel, RendezvousError> {
        let rx = self.slots().rx.take().ok_or(RendezvousError::AlreadyAwaited)?;
        self.awaited.send_replace(true);
        let settled = rx.await;
        self.awaited.send_replace(false);
        match settled {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(RendezvousError::Hook(err)),
            Err(_) => Err(RendezvousError::Withdrawn),
        }
    }

    pub fn set_result(&self, value: PauseOrCancel) -> Result<(), RendezvousError> {
        self.settle(Ok(value))
    }

    /// Settles the signal by raising `err` at the waiter.
    pub fn set_exception(&self, err: HookError) -> Result<(), RendezvousError> {
        self.settle(Err(err))
    }

    /// Releases any waiter without a decision. No-op once settled.
    pub fn withdraw(&self) {
        self.slots().tx.take();
    }

    fn settle(&self, settlement: Settlement) -> Result<(), RendezvousError> {
        let tx = self.slots().tx.take().ok_or(RendezvousError::AlreadySettled)?;
        self.awaited.send_replace(false);
        // A waiter that went away (its run was abandoned) has nothing to learn.
        let _ = tx.send(settlement);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::Hook;

    #[tokio::test]
    async fn delivers_value_to_parked_waiter() {
        let signal = Arc::new(Rendezvous::new());
        assert!(!signal.is_awaited());

        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };

        signal.parked().await;
        assert!(signal.is_awaited());

        signal.set_result(PauseOrCancel::Resumed).unwrap();
        assert!(!signal.is_awaited());
        assert_eq!(waiter.await.unwrap().unwrap(), PauseOrCancel::Resumed);
    }

    #[tokio::test]
    async fn delivers_exception_to_waiter() {
        let signal = Arc::new(Rendezvous::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        signal.parked().await;

        let err = HookError::new(Hook::Resume, anyhow::anyhow!("resume broke"));
        signal.set_exception(err.clone()).unwrap();

        match waiter.await.unwrap() {
            Err(RendezvousError::Hook(received)) => assert!(received.same_cause(&err)),
            other => panic!("expected hook error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn settled_before_wait_is_still_observed() {
        let signal = Rendezvous::new();
        signal.set_result(PauseOrCancel::Canceled).unwrap();
        assert_eq!(signal.wait().await.unwrap(), PauseOrCancel::Canceled);
    }

    #[tokio::test]
    async fn settling_twice_is_rejected() {
        let signal = Rendezvous::new();
        signal.set_result(PauseOrCancel::Resumed).unwrap();
        assert!(matches!(
            signal.set_result(PauseOrCancel::Canceled),
            Err(RendezvousError::AlreadySettled)
        ));
    }

    #[tokio::test]
    async fn second_waiter_is_rejected() {
        let signal = Arc::new(Rendezvous::new());
        let first = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        signal.parked().await;
        assert!(matches!(
            signal.wait().await,
            Err(RendezvousError::AlreadyAwaited)
        ));
        signal.set_result(PauseOrCancel::Resumed).unwrap();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn withdraw_releases_waiter() {
        let signal = Arc::new(Rendezvous::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        signal.parked().await;
        signal.withdraw();

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
        assert!(matches!(outcome, Err(RendezvousError::Withdrawn)));
    }
}
