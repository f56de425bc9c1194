// 帧率估计

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// 最近若干帧的到达时间
#[derive(Debug)]
pub struct FpsSample {
    arrivals: VecDeque<Instant>,
    capacity: usize,
    stale_after: Duration,
}

impl FpsSample {
    pub fn new(capacity: usize, stale_after: Duration) -> Self {
        let capacity = capacity.max(2);
        Self {
            arrivals: VecDeque::with_capacity(capacity),
            capacity,
            stale_after,
        }
    }

    pub fn record(&mut self, at: Instant) {
        if self.arrivals.len() == self.capacity {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(at);
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }

    /// 当前估计值，窗口过旧时为 0
    pub fn estimate(&self, now: Instant) -> f64 {
        let (Some(first), Some(last)) = (self.arrivals.front(), self.arrivals.back()) else {
            return 0.0;
        };

        if now.saturating_duration_since(*last) > self.stale_after {
            return 0.0;
        }

        let span = last.saturating_duration_since(*first).as_secs_f64();
        if self.arrivals.len() < 2 || span <= 0.0 {
            return 0.0;
        }

        (self.arrivals.len() - 1) as f64 / span
    }
}

/// 可跨任务共享的 FPS 读数
#[derive(Debug, Clone, Default)]
pub struct FpsGauge {
    bits: Arc<AtomicU64>,
}

impl FpsGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, fps: f64) {
        self.bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
