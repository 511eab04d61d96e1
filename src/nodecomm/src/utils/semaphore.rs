use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, Thread};

struct Waiter {
    thread: Thread,
    woken: AtomicBool,
}

struct SemaphoreState {
    // negative values count the queued waiters
    count: isize,
    waiters: VecDeque<Arc<Waiter>>,
}

/// Counting semaphore whose blocked callers are parked and resumed in
/// the order they called [`Semaphore::wait`].
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore {
    pub fn new() -> Self {
        Semaphore {
            state: Mutex::new(SemaphoreState {
                count: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SemaphoreState> {
        // the state stays balanced even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn wait(&self) {
        let waiter = {
            let mut state = self.lock();
            state.count -= 1;
            if state.count >= 0 {
                return;
            }
            let waiter = Arc::new(Waiter {
                thread: thread::current(),
                woken: AtomicBool::new(false),
            });
            state.waiters.push_back(Arc::clone(&waiter));
            waiter
        };
        while !waiter.woken.load(Ordering::Acquire) {
            thread::park();
        }
    }

    pub fn signal(&self) {
        let mut state = self.lock();
        state.count += 1;
        if let Some(waiter) = state.waiters.pop_front() {
            waiter.woken.store(true, Ordering::Release);
            waiter.thread.unpark();
        }
    }

    pub fn count(&self) -> isize {
        self.lock().count
    }
}

/// Signals the semaphore when dropped, so a role that returns early or
/// panics still releases its waiter.
pub struct SignalOnDrop(pub Arc<Semaphore>);

impl Drop for SignalOnDrop {
    fn drop(&mut self) {
        self.0.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_until_count(sem: &Semaphore, count: isize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while sem.count() != count {
            assert!(Instant::now() < deadline, "count stuck at {}", sem.count());
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn signal_before_wait_is_not_lost() {
        let sem = Semaphore::new();
        sem.signal();
        sem.signal();
        assert_eq!(sem.count(), 2);
        sem.wait();
        sem.wait();
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn wait_before_signal_is_resumed() {
        let sem = Arc::new(Semaphore::new());
        let (tx, rx) = crossbeam::channel::unbounded();
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                sem.wait();
                tx.send(()).unwrap();
            })
        };
        wait_until_count(&sem, -1);
        assert!(rx.try_recv().is_err());
        sem.signal();
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        waiter.join().unwrap();
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn waiters_resume_in_fifo_order() {
        let sem = Arc::new(Semaphore::new());
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut handles = Vec::new();
        for id in 0..4 {
            let sem_thread = Arc::clone(&sem);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                sem_thread.wait();
                tx.send(id).unwrap();
            }));
            // enqueue strictly one after another
            wait_until_count(&sem, -(id + 1));
        }
        for expected in 0..4 {
            sem.signal();
            let id = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            assert_eq!(id, expected);
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn extra_signals_raise_count() {
        let sem = Arc::new(Semaphore::new());
        let handle = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };
        wait_until_count(&sem, -1);
        sem.signal();
        sem.signal();
        sem.signal();
        handle.join().unwrap();
        assert_eq!(sem.count(), 2);
    }

    #[test]
    fn balanced_under_concurrency() {
        let sem = Arc::new(Semaphore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sem = Arc::clone(&sem);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    sem.wait();
                }
            }));
        }
        for _ in 0..8 {
            let sem = Arc::clone(&sem);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    sem.signal();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn guard_signals_on_panic() {
        let sem = Arc::new(Semaphore::new());
        let guard_sem = Arc::clone(&sem);
        let result = thread::spawn(move || {
            let _guard = SignalOnDrop(guard_sem);
            panic!("role failed");
        })
        .join();
        assert!(result.is_err());
        sem.wait();
        assert_eq!(sem.count(), 0);
    }
}
