use crate::DeviceAddress;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// One exclusive lock per remote device, so a session is never advanced twice at once.
///
/// Per-device holders share `gate`; [`SessionLocks::with_all_locked`] takes it
/// exclusively to wait out every holder. Entries are dropped once unused.
#[derive(Default)]
pub(crate) struct SessionLocks {
    gate: RwLock<()>,
    locks: Mutex<HashMap<DeviceAddress, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    /// Runs `f` while holding the lock of `device`.
    ///
    /// A poisoned lock is taken over: the guarded data is `()`, and sessions
    /// are only written back after a cipher call succeeds.
    pub(crate) fn with_lock<T>(&self, device: &DeviceAddress, f: impl FnOnce() -> T) -> T {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device.clone())
            .or_default()
            .clone();

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(device, lock);

        result
    }

    /// Runs `f` while no device lock is held.
    pub(crate) fn with_all_locked<T>(&self, f: impl FnOnce() -> T) -> T {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Drops the entry of `device` unless another caller still holds it.
    fn release(&self, device: &DeviceAddress, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(device);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_device_is_serialized() {
        let locks = Arc::new(SessionLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let device = DeviceAddress::new("bob@example.org", 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let device = device.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        locks.with_lock(&device, || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_panicking_holder_does_not_block_device() {
        let locks = SessionLocks::default();
        let device = DeviceAddress::new("bob@example.org", 1);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            locks.with_lock::<()>(&device, || panic!("cipher blew up"))
        }));
        assert!(result.is_err());

        assert_eq!(locks.with_lock(&device, || 7), 7);
    }

    #[test]
    fn test_unused_entries_are_dropped() {
        let locks = Arc::new(SessionLocks::default());

        let handles: Vec<_> = (0..8u32)
            .map(|id| {
                let locks = locks.clone();
                thread::spawn(move || {
                    for round in 0..50 {
                        let device = DeviceAddress::new("bob@example.org", (id + round) % 4);
                        locks.with_lock(&device, || ());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_all_locked_waits_for_device_holders() {
        let locks = Arc::new(SessionLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4u32)
            .map(|id| {
                let locks = locks.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    let device = DeviceAddress::new("bob@example.org", id);
                    for _ in 0..100 {
                        locks.with_lock(&device, || {
                            inside.fetch_add(1, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                        locks.with_all_locked(|| {
                            assert_eq!(inside.load(Ordering::SeqCst), 0);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
