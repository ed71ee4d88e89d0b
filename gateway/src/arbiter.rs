//! Exclusive use of the single radio.
//!
//! The scanner holds the radio only while a scan session is being set up;
//! the actuator holds it from its first selection until the queue drains.
//! Release happens when the guard drops, so every exit path frees it.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

const FREE: u8 = 0;
const SCANNER: u8 = 1;
const ACTUATOR: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioUser {
    Scanner,
    Actuator,
}

impl RadioUser {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scanner => "scanner",
            Self::Actuator => "actuator",
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Scanner => SCANNER,
            Self::Actuator => ACTUATOR,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            SCANNER => Some(Self::Scanner),
            ACTUATOR => Some(Self::Actuator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RadioArbiter {
    lock: Arc<Mutex<()>>,
    holder: Arc<AtomicU8>,
}

/// Proof of exclusive radio use. Dropping it wakes the next waiter.
#[derive(Debug)]
pub struct RadioGuard {
    _lock: OwnedMutexGuard<()>,
    holder: Arc<AtomicU8>,
    user: RadioUser,
}

impl RadioArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the radio is free. Waiters are served in arrival order.
    pub async fn acquire(&self, user: RadioUser) -> RadioGuard {
        let lock = self.lock.clone().lock_owned().await;
        let previous = self.holder.swap(user.code(), Ordering::AcqRel);
        debug_assert_eq!(previous, FREE, "radio handed out while held");
        debug!("radio acquired by {}", user.as_str());
        RadioGuard {
            _lock: lock,
            holder: self.holder.clone(),
            user,
        }
    }

    pub fn holder(&self) -> Option<RadioUser> {
        RadioUser::from_code(self.holder.load(Ordering::Acquire))
    }
}

impl RadioGuard {
    pub fn user(&self) -> RadioUser {
        self.user
    }
}

impl Drop for RadioGuard {
    fn drop(&mut self) {
        self.holder.store(FREE, Ordering::Release);
        debug!("radio released by {}", self.user.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::atomic::AtomicUsize, time::Duration};

    #[tokio::test]
    async fn guard_drop_frees_the_radio() {
        let arbiter = RadioArbiter::new();
        assert_eq!(arbiter.holder(), None);

        let guard = arbiter.acquire(RadioUser::Scanner).await;
        assert_eq!(arbiter.holder(), Some(RadioUser::Scanner));
        assert_eq!(guard.user(), RadioUser::Scanner);
        drop(guard);

        assert_eq!(arbiter.holder(), None);
        let _guard = arbiter.acquire(RadioUser::Actuator).await;
        assert_eq!(arbiter.holder(), Some(RadioUser::Actuator));
    }

    #[tokio::test]
    async fn failed_setup_still_releases() {
        async fn setup(arbiter: &RadioArbiter) -> Result<(), &'static str> {
            let _radio = arbiter.acquire(RadioUser::Scanner).await;
            let started: Result<(), &'static str> = Err("radio busy");
            started?;
            Ok(())
        }

        let arbiter = RadioArbiter::new();
        assert!(setup(&arbiter).await.is_err());
        assert_eq!(arbiter.holder(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_two_holders() {
        let arbiter = RadioArbiter::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for index in 0..16 {
            let arbiter = arbiter.clone();
            let inside = inside.clone();
            let user = if index % 2 == 0 {
                RadioUser::Scanner
            } else {
                RadioUser::Actuator
            };
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let _radio = arbiter.acquire(user).await;
                    let concurrent = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    assert_eq!(concurrent, 1);
                    tokio::time::sleep(Duration::from_micros(50)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(arbiter.holder(), None);
    }
}
