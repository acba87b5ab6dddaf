//! Instrumented [`Store`] implementations.
//!
//! All stores count their calls, which allows tests to verify that exactly one write was issued
//! per record.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etcdstress_filler::Store;

/// A store backed by a map, for inspecting what was written.
///
/// The store is [`Clone`], so tests can keep a handle while the filler owns a copy.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Returns all stored keys in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Returns the number of write calls, including overwrites.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// A store that deterministically fails every `n`-th call.
///
/// Calls are numbered from one, so with `n = 20` calls 20, 40, 60 and so on fail.
#[derive(Debug)]
pub struct FailEvery {
    n: usize,
    calls: AtomicUsize,
}

impl FailEvery {
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "n must be positive");
        Self {
            n,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Store for FailEvery {
    async fn write(&self, key: &str, _value: &str) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.n == 0 {
            anyhow::bail!("injected failure writing `{key}` on call {call}");
        }
        Ok(())
    }
}

/// A store that panics on every `n`-th call.
#[derive(Debug)]
pub struct PanicEvery {
    n: usize,
    calls: AtomicUsize,
}

impl PanicEvery {
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "n must be positive");
        Self {
            n,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Store for PanicEvery {
    async fn write(&self, key: &str, _value: &str) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.n == 0 {
            panic!("injected panic writing `{key}` on call {call}");
        }
        Ok(())
    }
}

/// A store that records how many writes were in flight at the same time.
#[derive(Debug)]
pub struct ConcurrencyProbe {
    delay: Duration,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Creates a probe that holds every write open for `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// The largest number of writes observed in flight at once.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Store for ConcurrencyProbe {
    async fn write(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
