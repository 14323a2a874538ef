//! Buffer pool configuration.

use granite_common::constants::{
    EVICT_BATCH_RATIO, EVICT_MAX_ROUNDS, MIN_POOL_FRAMES, UNSWIZZLE_BATCH_SIZE,
};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of usable page frames (frame 0 is reserved on top of this).
    pub num_frames: usize,
    /// Whether to swizzle non-root child pointers. Runtime switch; the
    /// pool behaves identically, just slower, with it off.
    pub enable_swizzling: bool,
    /// Fraction of the pool targeted per eviction batch.
    pub evict_batch_ratio: f64,
    /// Cap on clock-sweep rounds per eviction request.
    pub evict_max_rounds: u16,
    /// Pointers unswizzled per unswizzle pass under high urgency.
    pub unswizzle_batch: u32,
}

impl BufferPoolConfig {
    /// Creates a configuration with the given pool size.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            enable_swizzling: true,
            evict_batch_ratio: EVICT_BATCH_RATIO,
            evict_max_rounds: EVICT_MAX_ROUNDS,
            unswizzle_batch: UNSWIZZLE_BATCH_SIZE,
        }
    }

    /// Enables or disables pointer swizzling.
    #[must_use]
    pub fn with_swizzling(mut self, enabled: bool) -> Self {
        self.enable_swizzling = enabled;
        self
    }

    /// Sets the eviction batch ratio.
    #[must_use]
    pub fn with_evict_batch_ratio(mut self, ratio: f64) -> Self {
        self.evict_batch_ratio = ratio;
        self
    }

    /// Target batch size for one eviction request.
    pub fn evict_batch(&self) -> u32 {
        ((self.num_frames as f64 * self.evict_batch_ratio).ceil() as u32).max(1)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_frames < MIN_POOL_FRAMES {
            return Err(format!("pool needs at least {MIN_POOL_FRAMES} frames"));
        }
        if !(0.0..=1.0).contains(&self.evict_batch_ratio) || self.evict_batch_ratio == 0.0 {
            return Err("evict batch ratio must be in (0, 1]".to_string());
        }
        if self.evict_max_rounds == 0 {
            return Err("evict max rounds must be positive".to_string());
        }
        Ok(())
    }
}
