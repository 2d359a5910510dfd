//! Arbitration of the shared two-wire bus.
//!
//! Every device hanging off the bus (both converters, the current-source
//! driver, the multiplexer and the IMU) lives inside [`SharedBus`], which is
//! owned by a [`BusArbiter`]. The only way to reach a device is through a
//! [`BusSession`], so a transaction can never happen outside a critical
//! section and the grant is returned on every exit path when the session
//! drops.

use core::ops::{Deref, DerefMut};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration};

/// Everything reachable over the two-wire bus.
///
/// `bus` is the raw transport; drivers borrow it for the duration of one
/// call, which lets two devices be used back to back inside one session.
pub struct SharedBus<B, C, S, X, O> {
    pub bus: B,
    pub converter_a: C,
    pub converter_b: C,
    pub current_source: S,
    pub mux: X,
    pub orientation: O,
}

/// Mutual-exclusion gate around the bus and its devices.
///
/// No fairness beyond what the executor gives waiting tasks: whoever is
/// woken first after a release gets the grant.
pub struct BusArbiter<M: RawMutex, T> {
    inner: Mutex<M, T>,
}

impl<M: RawMutex, T> BusArbiter<M, T> {
    pub const fn new(devices: T) -> Self {
        Self {
            inner: Mutex::new(devices),
        }
    }

    /// Wait up to `timeout` for an exclusive grant.
    ///
    /// `None` means the caller must not touch the bus this tick; it is a
    /// transient condition and the caller retries on its next slot.
    pub async fn acquire(&self, timeout: Duration) -> Option<BusSession<'_, M, T>> {
        if let Ok(guard) = self.inner.try_lock() {
            return Some(BusSession { guard });
        }
        with_timeout(timeout, self.inner.lock())
            .await
            .ok()
            .map(|guard| BusSession { guard })
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> Option<BusSession<'_, M, T>> {
        self.inner.try_lock().ok().map(|guard| BusSession { guard })
    }
}

/// An exclusive grant on the bus. Dropping it releases the bus.
pub struct BusSession<'a, M: RawMutex, T> {
    guard: MutexGuard<'a, M, T>,
}

impl<M: RawMutex, T> BusSession<'_, M, T> {
    /// Give the bus back. Never blocks.
    pub fn release(self) {}
}

impl<M: RawMutex, T> Deref for BusSession<'_, M, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<M: RawMutex, T> DerefMut for BusSession<'_, M, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type Arbiter = BusArbiter<CriticalSectionRawMutex, u32>;

    #[test]
    fn acquire_on_idle_bus_succeeds() {
        let arbiter = Arbiter::new(7);
        let session = block_on(arbiter.acquire(Duration::from_millis(1)));
        assert_eq!(session.as_deref(), Some(&7));
    }

    #[test]
    fn acquire_times_out_while_held() {
        let arbiter = Arbiter::new(0);
        let held = arbiter.try_acquire().unwrap();

        let second = block_on(arbiter.acquire(Duration::from_millis(2)));
        assert!(second.is_none());

        held.release();
        assert!(block_on(arbiter.acquire(Duration::from_millis(2))).is_some());
    }

    #[test]
    fn session_mutation_survives_release() {
        let arbiter = Arbiter::new(1);
        {
            let mut session = arbiter.try_acquire().unwrap();
            *session += 41;
        }
        assert_eq!(*arbiter.try_acquire().unwrap(), 42);
    }

    #[test]
    fn early_return_releases_grant() {
        fn bump(arbiter: &Arbiter, bail: bool) -> Option<()> {
            let mut session = arbiter.try_acquire()?;
            if bail {
                return None;
            }
            *session += 1;
            Some(())
        }

        let arbiter = Arbiter::new(0);
        assert!(bump(&arbiter, true).is_none());
        assert!(bump(&arbiter, false).is_some());
        assert_eq!(*arbiter.try_acquire().unwrap(), 1);
    }
}
