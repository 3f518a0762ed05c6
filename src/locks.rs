//! Per-channel concurrency guard.
//!
//! Each channel gets at most one in-flight generation. A mention arriving
//! while the channel is busy is dropped, not queued. Lock entries for idle
//! channels are swept periodically; a lock that is currently held is never
//! evicted regardless of age.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

struct LockEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    last_used: Instant,
}

struct Inner {
    locks: HashMap<u64, LockEntry>,
    last_sweep: Instant,
}

pub struct ChannelLockManager {
    inner: Mutex<Inner>,
    idle_evict: Duration,
    sweep_interval: Duration,
}

/// Held for the duration of one generation; dropping it frees the channel.
pub struct ChannelGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ChannelLockManager {
    pub fn new(idle_evict_secs: u64) -> Self {
        Self::with_intervals(Duration::from_secs(idle_evict_secs), SWEEP_INTERVAL)
    }

    fn with_intervals(idle_evict: Duration, sweep_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                locks: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            idle_evict,
            sweep_interval,
        }
    }

    /// Try to claim the channel. Returns None without waiting when a
    /// generation is already in flight there.
    pub fn try_acquire(&self, channel_id: u64) -> Option<ChannelGuard> {
        let lock = {
            let mut inner = self.inner.lock().unwrap();
            if inner.last_sweep.elapsed() >= self.sweep_interval {
                Self::sweep(&mut inner, self.idle_evict);
            }
            let entry = inner.locks.entry(channel_id).or_insert_with(|| LockEntry {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                last_used: Instant::now(),
            });
            entry.last_used = Instant::now();
            Arc::clone(&entry.lock)
        };

        match lock.try_lock_owned() {
            Ok(guard) => Some(ChannelGuard { _guard: guard }),
            Err(_) => None,
        }
    }

    fn sweep(inner: &mut Inner, idle_evict: Duration) {
        let before = inner.locks.len();
        inner
            .locks
            .retain(|_, entry| entry.last_used.elapsed() < idle_evict || entry.lock.try_lock().is_err());
        let evicted = before - inner.locks.len();
        if evicted > 0 {
            debug!("Evicted {} idle channel locks", evicted);
        }
        inner.last_sweep = Instant::now();
    }

    /// (tracked channels, channels with a generation in flight)
    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        let held = inner
            .locks
            .values()
            .filter(|entry| entry.lock.try_lock().is_err())
            .count();
        (inner.locks.len(), held)
    }
}
