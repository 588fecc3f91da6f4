//! Size-based decision of whether work is worth spreading across threads.
//!
//! Below the threshold, coordination costs more than it saves (a 32×32
//! multiply runs several times slower when tiled across workers); the
//! break-even sits near 128×128.

use crate::core::runtime::GemmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelPolicy {
    threshold: usize,
    small_m_max: usize,
    column_threshold: usize,
}

impl ParallelPolicy {
    pub fn new(config: &GemmConfig) -> Self {
        Self {
            threshold: config.parallel_threshold,
            small_m_max: config.small_m_max,
            column_threshold: config.gemv_par_threshold,
        }
    }

    /// Row blocks across workers: both M and K at or above the threshold.
    #[inline]
    pub fn fan_out_blocked(&self, m: usize, k: usize) -> bool {
        m >= self.threshold && k >= self.threshold
    }

    /// Column chunks across workers for decode-shaped multiplies.
    #[inline]
    pub fn fan_out_columns(&self, m: usize, n: usize) -> bool {
        m > 0 && m <= self.small_m_max && n >= self.column_threshold
    }

    /// Independent units (attention heads, sessions) across workers.
    #[inline]
    pub fn fan_out_units(&self, units: usize, elems_per_unit: usize) -> bool {
        units > 1 && elems_per_unit >= self.threshold.saturating_mul(self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let policy = ParallelPolicy::new(&GemmConfig::default());
        assert!(!policy.fan_out_blocked(32, 32));
        assert!(!policy.fan_out_blocked(4096, 64));
        assert!(policy.fan_out_blocked(128, 128));
        assert!(policy.fan_out_columns(1, 8192));
        assert!(!policy.fan_out_columns(1, 1024));
        assert!(!policy.fan_out_columns(16, 8192));
        assert!(!policy.fan_out_units(8, 64 * 64));
        assert!(policy.fan_out_units(8, 256 * 256));
        assert!(!policy.fan_out_units(1, 256 * 256));
    }

    #[test]
    fn test_disabled_threshold_never_fans_out() {
        let config = GemmConfig {
            parallel_threshold: usize::MAX,
            gemv_par_threshold: usize::MAX,
            ..GemmConfig::default()
        };
        let policy = ParallelPolicy::new(&config);
        assert!(!policy.fan_out_blocked(1 << 20, 1 << 20));
        assert!(!policy.fan_out_units(64, usize::MAX - 1));
    }
}
