//! Reply-channel name allocation.
//!
//! Every call that carries functions needs a base name for its private
//! reply channels. Calls with few functions lease a name from a bounded
//! pool; calls with many get a freshly minted one so they don't drain it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Prefix used for reply channels unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "ipcx_fn";

/// The direct generator's counter wraps back to zero at this value.
pub const COUNTER_WRAP: u32 = 10_000;

/// Mints `prefix_<unix millis>_<counter>` names with a 4-digit counter.
#[derive(Debug)]
pub struct DirectGenerator {
    prefix: String,
    counter: AtomicU32,
}

impl DirectGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU32::new(0),
        }
    }

    pub fn generate(&self) -> String {
        let count = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some((n + 1) % COUNTER_WRAP)
            })
            .unwrap_or_default();
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let suffix = format!("{millis}_{count:04}");
        if self.prefix.is_empty() {
            suffix
        } else {
            format!("{}_{suffix}", self.prefix)
        }
    }
}

impl Default for DirectGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

/// Pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Names minted up front. Idle names beyond twice this are discarded.
    pub pool_size: usize,
    /// Refill an empty pool with `expand_size` names instead of minting one.
    pub auto_expand: bool,
    pub expand_size: usize,
    pub prefix: String,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pool_size: 10,
            auto_expand: true,
            expand_size: 5,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<String>,
    in_use: HashSet<String>,
    minted: u64,
}

/// Bounded pool of reusable channel names.
#[derive(Debug)]
pub struct ChannelPool {
    options: PoolOptions,
    state: Mutex<PoolState>,
}

impl ChannelPool {
    pub fn new(options: PoolOptions) -> Self {
        let pool = Self {
            options,
            state: Mutex::new(PoolState::default()),
        };
        {
            let mut state = pool.lock();
            let count = pool.options.pool_size;
            pool.expand(&mut state, count);
        }
        pool
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint(&self, state: &mut PoolState) -> String {
        state.minted += 1;
        if self.options.prefix.is_empty() {
            format!("pool_{:04}", state.minted)
        } else {
            format!("{}_pool_{:04}", self.options.prefix, state.minted)
        }
    }

    fn expand(&self, state: &mut PoolState, count: usize) {
        for _ in 0..count {
            let name = self.mint(state);
            state.idle.push(name);
        }
    }

    /// Take a name out of the pool.
    pub fn acquire(&self) -> String {
        let mut state = self.lock();
        if state.idle.is_empty() && self.options.auto_expand {
            debug!(by = self.options.expand_size, "expanding channel pool");
            self.expand(&mut state, self.options.expand_size);
        }
        let name = match state.idle.pop() {
            Some(name) => name,
            None => self.mint(&mut state),
        };
        state.in_use.insert(name.clone());
        name
    }

    /// Return a name. Names this pool did not hand out are ignored.
    pub fn release(&self, name: &str) -> bool {
        let mut state = self.lock();
        if !state.in_use.remove(name) {
            return false;
        }
        if state.idle.len() < self.options.pool_size * 2 {
            state.idle.push(name.to_string());
        }
        true
    }

    pub fn release_all<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.release(name.as_ref());
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            idle: state.idle.len(),
            in_use: state.in_use.len(),
            total: state.idle.len() + state.in_use.len(),
        }
    }

    /// Forget every idle and in-use name.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.idle.clear();
        state.in_use.clear();
    }
}

/// A base channel name held for the duration of one call.
///
/// Pooled names go back to their pool when the lease is released or dropped.
#[derive(Debug)]
pub struct ChannelLease {
    channel: String,
    pool: Option<Arc<ChannelPool>>,
}

impl ChannelLease {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(&self.channel);
        }
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.give_back();
    }
}

/// Picks pooled or minted names by the number of functions in a call.
#[derive(Debug)]
pub struct HybridProvider {
    pool: Arc<ChannelPool>,
    generator: DirectGenerator,
    threshold: usize,
}

impl HybridProvider {
    pub fn new(options: PoolOptions, threshold: usize) -> Self {
        let generator = DirectGenerator::new(options.prefix.clone());
        Self {
            pool: Arc::new(ChannelPool::new(options)),
            generator,
            threshold,
        }
    }

    /// Pooled when `function_count <= threshold`, minted otherwise.
    pub fn acquire(&self, function_count: usize) -> ChannelLease {
        if function_count > self.threshold {
            return ChannelLease {
                channel: self.generator.generate(),
                pool: None,
            };
        }
        ChannelLease {
            channel: self.pool.acquire(),
            pool: Some(self.pool.clone()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
