use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{CounterError, CounterStore, WindowCount};

/// Expired windows are swept once the map grows past this many keys.
const SWEEP_THRESHOLD: usize = 10_000;

/// Minimum time between two sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

#[derive(Debug)]
struct Counters {
    windows: HashMap<String, Window>,
    last_sweep: Instant,
}

impl Counters {
    fn sweep_if_due(&mut self, now: Instant, threshold: usize, interval: Duration) {
        if self.windows.len() < threshold || now.duration_since(self.last_sweep) < interval {
            return;
        }
        self.windows.retain(|_, w| w.expires_at > now);
        self.last_sweep = now;
    }
}

/// Process-local counter store.
///
/// Each increment runs under one mutex, so concurrent hits on the same key
/// are never lost.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    counters: Mutex<Counters>,
    sweep_threshold: usize,
    sweep_interval: Duration,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_sweep(SWEEP_THRESHOLD, SWEEP_INTERVAL)
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep(threshold: usize, interval: Duration) -> Self {
        Self {
            counters: Mutex::new(Counters {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            sweep_threshold: threshold,
            sweep_interval: interval,
        }
    }

    /// Keys currently held, expired or not.
    pub fn len(&self) -> usize {
        self.counters.lock().map(|c| c.windows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Counters>, CounterError> {
        self.counters
            .lock()
            .map_err(|_| CounterError::Unavailable("counter lock poisoned".into()))
    }
}

#[async_trait::async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError> {
        let now = Instant::now();
        let mut counters = self.lock()?;
        counters.sweep_if_due(now, self.sweep_threshold, self.sweep_interval);

        let entry = counters.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });
        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now + window,
            };
        }
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            resets_in: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn current(&self, key: &str) -> Result<Option<WindowCount>, CounterError> {
        let now = Instant::now();
        let counters = self.lock()?;
        Ok(counters
            .windows
            .get(key)
            .filter(|w| w.expires_at > now)
            .map(|w| WindowCount {
                count: w.count,
                resets_in: w.expires_at.saturating_duration_since(now),
            }))
    }
}
