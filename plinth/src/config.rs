use std::time::Duration;

/// Bytes per page, including the slot header.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages the buffer pool may cache.
pub const DEFAULT_POOL_CAPACITY: usize = 50;

/// Runtime knobs for a database instance. Tests shrink `page_size` and
/// `pool_capacity` to force page splits and eviction with little data.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub page_size: usize,
    pub pool_capacity: usize,
    /// How long a blocked lock acquire sleeps before re-checking.
    pub lock_wait_unit: Duration,
    /// How many timed-out wait rounds a single acquire tolerates before it
    /// is aborted as a deadlock backstop.
    pub lock_max_rounds: u32,
    /// Seed for the random eviction choice; `None` seeds from entropy.
    pub eviction_seed: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            lock_wait_unit: Duration::from_secs(10),
            lock_max_rounds: 2,
            eviction_seed: None,
        }
    }
}

impl DbConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    pub fn with_lock_wait(mut self, unit: Duration, max_rounds: u32) -> Self {
        self.lock_wait_unit = unit;
        self.lock_max_rounds = max_rounds;
        self
    }

    pub fn with_eviction_seed(mut self, seed: u64) -> Self {
        self.eviction_seed = Some(seed);
        self
    }
}
