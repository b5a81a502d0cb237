//! Counting Semaphore
//!
//! Thin wrapper over the OS semaphore used for the start/finish barrier
//! between the driver callback and the worker threads. `post` never blocks
//! and is safe to call from the render callback.
//!
//! # Platform Support
//!
//! - **macOS / iOS**: Mach semaphores (`semaphore_create`)
//! - **Linux / BSD**: POSIX unnamed semaphores (`sem_init`)
//! - **Other**: `parking_lot` mutex + condition variable

use crate::{RealtimeError, RealtimeResult};

/// Counting semaphore starting at zero
pub struct Semaphore {
    inner: imp::RawSemaphore,
}

impl Semaphore {
    pub fn new() -> RealtimeResult<Self> {
        Ok(Self {
            inner: imp::RawSemaphore::new()?,
        })
    }

    /// Increment the count, waking at most one waiter
    #[inline]
    pub fn post(&self) -> RealtimeResult<()> {
        self.inner.post()
    }

    /// Block until the count is positive, then decrement it.
    ///
    /// Interrupted waits are retried transparently.
    #[inline]
    pub fn wait(&self) -> RealtimeResult<()> {
        self.inner.wait()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Apple: Mach semaphores
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(target_vendor = "apple")]
mod imp {
    use super::*;

    type KernReturn = i32;
    type MachPort = u32;

    const KERN_SUCCESS: KernReturn = 0;
    const KERN_ABORTED: KernReturn = 14;
    const SYNC_POLICY_FIFO: i32 = 0;

    unsafe extern "C" {
        static mach_task_self_: MachPort;
        fn semaphore_create(
            task: MachPort,
            semaphore: *mut MachPort,
            policy: i32,
            value: i32,
        ) -> KernReturn;
        fn semaphore_destroy(task: MachPort, semaphore: MachPort) -> KernReturn;
        fn semaphore_signal(semaphore: MachPort) -> KernReturn;
        fn semaphore_wait(semaphore: MachPort) -> KernReturn;
    }

    fn kern_error(result: KernReturn) -> std::io::Error {
        std::io::Error::other(format!("kern_return_t {}", result))
    }

    pub(super) struct RawSemaphore {
        port: MachPort,
    }

    impl RawSemaphore {
        pub(super) fn new() -> RealtimeResult<Self> {
            let mut port: MachPort = 0;
            let result =
                unsafe { semaphore_create(mach_task_self_, &mut port, SYNC_POLICY_FIFO, 0) };
            if result != KERN_SUCCESS {
                return Err(RealtimeError::SemaphoreCreate(kern_error(result)));
            }
            Ok(Self { port })
        }

        pub(super) fn post(&self) -> RealtimeResult<()> {
            let result = unsafe { semaphore_signal(self.port) };
            if result != KERN_SUCCESS {
                return Err(RealtimeError::Semaphore {
                    op: "signal",
                    source: kern_error(result),
                });
            }
            Ok(())
        }

        pub(super) fn wait(&self) -> RealtimeResult<()> {
            loop {
                match unsafe { semaphore_wait(self.port) } {
                    KERN_SUCCESS => return Ok(()),
                    KERN_ABORTED => continue,
                    result => {
                        return Err(RealtimeError::Semaphore {
                            op: "wait",
                            source: kern_error(result),
                        });
                    }
                }
            }
        }
    }

    impl Drop for RawSemaphore {
        fn drop(&mut self) {
            let result = unsafe { semaphore_destroy(mach_task_self_, self.port) };
            if result != KERN_SUCCESS {
                log::warn!("semaphore_destroy failed: {}", result);
            }
        }
    }

    // SAFETY: Mach semaphore ports may be used from any thread
    unsafe impl Send for RawSemaphore {}
    unsafe impl Sync for RawSemaphore {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// Linux / BSD: POSIX unnamed semaphores
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(all(unix, not(target_vendor = "apple")))]
mod imp {
    use super::*;
    use std::cell::UnsafeCell;
    use std::io;

    pub(super) struct RawSemaphore {
        // sem_t must not move after sem_init
        sem: Box<UnsafeCell<libc::sem_t>>,
    }

    impl RawSemaphore {
        pub(super) fn new() -> RealtimeResult<Self> {
            // SAFETY: sem_t is plain data, sem_init initializes it in place
            let sem: Box<UnsafeCell<libc::sem_t>> =
                Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
            if unsafe { libc::sem_init(sem.get(), 0, 0) } != 0 {
                return Err(RealtimeError::SemaphoreCreate(io::Error::last_os_error()));
            }
            Ok(Self { sem })
        }

        pub(super) fn post(&self) -> RealtimeResult<()> {
            if unsafe { libc::sem_post(self.sem.get()) } != 0 {
                return Err(RealtimeError::Semaphore {
                    op: "post",
                    source: io::Error::last_os_error(),
                });
            }
            Ok(())
        }

        pub(super) fn wait(&self) -> RealtimeResult<()> {
            loop {
                if unsafe { libc::sem_wait(self.sem.get()) } == 0 {
                    return Ok(());
                }
                let error = io::Error::last_os_error();
                if error.kind() != io::ErrorKind::Interrupted {
                    return Err(RealtimeError::Semaphore {
                        op: "wait",
                        source: error,
                    });
                }
            }
        }
    }

    impl Drop for RawSemaphore {
        fn drop(&mut self) {
            unsafe { libc::sem_destroy(self.sem.get()) };
        }
    }

    // SAFETY: POSIX semaphores are designed for concurrent access
    unsafe impl Send for RawSemaphore {}
    unsafe impl Sync for RawSemaphore {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fallback: mutex + condition variable
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(not(unix))]
mod imp {
    use super::*;
    use parking_lot::{Condvar, Mutex};

    pub(super) struct RawSemaphore {
        count: Mutex<usize>,
        available: Condvar,
    }

    impl RawSemaphore {
        pub(super) fn new() -> RealtimeResult<Self> {
            Ok(Self {
                count: Mutex::new(0),
                available: Condvar::new(),
            })
        }

        pub(super) fn post(&self) -> RealtimeResult<()> {
            *self.count.lock() += 1;
            self.available.notify_one();
            Ok(())
        }

        pub(super) fn wait(&self) -> RealtimeResult<()> {
            let mut count = self.count.lock();
            while *count == 0 {
                self.available.wait(&mut count);
            }
            *count -= 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_post_before_wait_leaves_credit() {
        let semaphore = Semaphore::new().unwrap();
        semaphore.post().unwrap();
        semaphore.post().unwrap();
        semaphore.wait().unwrap();
        semaphore.wait().unwrap();
    }

    #[test]
    fn test_wait_blocks_until_post() {
        let semaphore = Arc::new(Semaphore::new().unwrap());
        let woke = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let semaphore = Arc::clone(&semaphore);
            let woke = Arc::clone(&woke);
            thread::spawn(move || {
                semaphore.wait().unwrap();
                woke.fetch_add(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(woke.load(Ordering::SeqCst), 0);

        semaphore.post().unwrap();
        waiter.join().unwrap();
        assert_eq!(woke.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_finish_barrier() {
        const NUM_WORKERS: usize = 4;
        const NUM_ROUNDS: usize = 200;

        let start = Arc::new(Semaphore::new().unwrap());
        let finished = Arc::new(Semaphore::new().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..NUM_WORKERS)
            .map(|_| {
                let start = Arc::clone(&start);
                let finished = Arc::clone(&finished);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..NUM_ROUNDS {
                        start.wait().unwrap();
                        counter.fetch_add(1, Ordering::SeqCst);
                        finished.post().unwrap();
                    }
                })
            })
            .collect();

        for round in 1..=NUM_ROUNDS {
            for _ in 0..NUM_WORKERS {
                start.post().unwrap();
            }
            for _ in 0..NUM_WORKERS {
                finished.wait().unwrap();
            }
            assert_eq!(counter.load(Ordering::SeqCst), round * NUM_WORKERS);
        }

        for worker in workers {
            worker.join().unwrap();
        }
    }
}
