//! SQL connection pool collaborator.
//!
//! This core has no MySQL driver; `SqlHandle` is an opaque id standing in
//! for a live connection. What's preserved from the original is the pool's
//! concurrency discipline: a fixed number of handles, a counting semaphore
//! of availability, and a guard that returns its handle to the pool on drop
//! regardless of how the caller's scope exits.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use tracing::warn;

/// Opaque handle standing in for a live database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlHandle(u32);

struct State {
    available: VecDeque<SqlHandle>,
}

/// A fixed-size pool of [`SqlHandle`]s, acquired and released under a
/// mutex with a condvar standing in for the original's counting semaphore:
/// `acquire` blocks while the queue is empty, `release` pushes back and
/// wakes one waiter.
pub struct SqlPool {
    state: Mutex<State>,
    not_empty: Condvar,
    capacity: usize,
}

impl SqlPool {
    /// Builds a pool of `size` handles, numbered `0..size`. A real driver
    /// would dial `host`/`port` here; this core only records the intent to
    /// (host, port, user, db are accepted for interface parity and
    /// otherwise unused).
    pub fn new(size: usize, _host: &str, _port: u16, _user: &str, _pwd: &str, _db: &str) -> Self {
        assert!(size > 0, "sql pool needs at least one handle");
        let available = (0..size as u32).map(SqlHandle).collect();
        SqlPool { state: Mutex::new(State { available }), not_empty: Condvar::new(), capacity: size }
    }

    /// Blocks until a handle is available, then returns a guard that
    /// releases it back to the pool on drop.
    pub fn acquire(&self) -> SqlGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while state.available.is_empty() {
            state = self.not_empty.wait(state).unwrap();
        }
        let handle = state.available.pop_front().expect("non-empty by loop condition");
        SqlGuard { pool: self, handle: Some(handle) }
    }

    /// Non-blocking variant: `None` if the pool is momentarily exhausted.
    pub fn try_acquire(&self) -> Option<SqlGuard<'_>> {
        let mut state = self.state.lock().unwrap();
        if state.available.is_empty() {
            warn!("sql pool busy, no handles available");
            return None;
        }
        let handle = state.available.pop_front().expect("checked non-empty above");
        Some(SqlGuard { pool: self, handle: Some(handle) })
    }

    fn release(&self, handle: SqlHandle) {
        let mut state = self.state.lock().unwrap();
        state.available.push_back(handle);
        drop(state);
        self.not_empty.notify_one();
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap().available.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// RAII guard returned by [`SqlPool::acquire`]. Returns its handle on drop
/// no matter how the holding scope exits (early return, panic unwind, `?`).
pub struct SqlGuard<'a> {
    pool: &'a SqlPool,
    handle: Option<SqlHandle>,
}

impl SqlGuard<'_> {
    pub fn handle(&self) -> SqlHandle {
        self.handle.expect("handle present for the guard's lifetime")
    }
}

impl Drop for SqlGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_then_drop_returns_handle_to_pool() {
        let pool = SqlPool::new(2, "localhost", 3306, "u", "p", "db");
        assert_eq!(pool.free_count(), 2);
        {
            let _guard = pool.acquire();
            assert_eq!(pool.free_count(), 1);
        }
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn try_acquire_returns_none_when_exhausted() {
        let pool = SqlPool::new(1, "localhost", 3306, "u", "p", "db");
        let g1 = pool.try_acquire();
        assert!(g1.is_some());
        assert!(pool.try_acquire().is_none());
    }

    #[test]
    fn guards_hand_out_distinct_handles_up_to_capacity() {
        let pool = SqlPool::new(3, "localhost", 3306, "u", "p", "db");
        let g1 = pool.acquire();
        let g2 = pool.acquire();
        let g3 = pool.acquire();
        assert_ne!(g1.handle(), g2.handle());
        assert_ne!(g2.handle(), g3.handle());
        assert_ne!(g1.handle(), g3.handle());
    }

    #[test]
    fn acquire_blocks_until_a_concurrent_release() {
        let pool = Arc::new(SqlPool::new(1, "localhost", 3306, "u", "p", "db"));
        let held = pool.acquire();
        let pool2 = pool.clone();
        let handle = std::thread::spawn(move || {
            let _g = pool2.acquire();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        drop(held);
        handle.join().unwrap();
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn panic_while_holding_guard_still_releases_handle() {
        let pool = Arc::new(SqlPool::new(1, "localhost", 3306, "u", "p", "db"));
        let p = pool.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = p.acquire();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(pool.free_count(), 1);
    }
}
