// 自适应帧率控制
//
// 采集+编码周期超过当前帧间隔时降低 1 fps（不低于下限），
// 连续若干个周期都低于标称间隔时再提升 1 fps（不超过标称值）。

use std::time::Duration;
use tracing::{debug, info};

/// 单次周期后的调整结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAdjustment {
    Unchanged,
    Decreased(u32),
    Increased(u32),
}

/// 自适应帧率控制器
#[derive(Debug, Clone)]
pub struct AdaptiveRateController {
    /// 标称帧率
    nominal_fps: u32,
    /// 帧率下限
    min_fps: u32,
    /// 当前目标帧率
    current_fps: u32,
    /// 连续低于标称间隔的周期数
    fast_streak: u32,
    /// 提升帧率所需的连续周期数
    recovery_cycles: u32,
}

impl AdaptiveRateController {
    pub fn new(nominal_fps: u32, min_fps: u32, recovery_cycles: u32) -> Self {
        let min_fps = min_fps.max(1);
        let nominal_fps = nominal_fps.max(min_fps);

        debug!(
            "Creating AdaptiveRateController: nominal={}fps, floor={}fps, recovery={} cycles",
            nominal_fps, min_fps, recovery_cycles
        );

        Self {
            nominal_fps,
            min_fps,
            current_fps: nominal_fps,
            fast_streak: 0,
            recovery_cycles: recovery_cycles.max(1),
        }
    }

    pub fn current_fps(&self) -> u32 {
        self.current_fps
    }

    pub fn nominal_fps(&self) -> u32 {
        self.nominal_fps
    }

    pub fn min_fps(&self) -> u32 {
        self.min_fps
    }

    /// 当前目标帧间隔
    pub fn current_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.current_fps as u64)
    }

    pub fn nominal_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.nominal_fps as u64)
    }

    /// 记录一个周期的耗时并调整目标帧率
    pub fn record_cycle(&mut self, elapsed: Duration) -> RateAdjustment {
        if elapsed > self.current_interval() {
            self.fast_streak = 0;
            if self.current_fps > self.min_fps {
                self.current_fps -= 1;
                info!(
                    "Cycle took {:.1}ms, lowering target to {}fps",
                    elapsed.as_secs_f64() * 1000.0,
                    self.current_fps
                );
                return RateAdjustment::Decreased(self.current_fps);
            }
            return RateAdjustment::Unchanged;
        }

        if elapsed < self.nominal_interval() {
            self.fast_streak += 1;
            if self.fast_streak >= self.recovery_cycles && self.current_fps < self.nominal_fps {
                self.fast_streak = 0;
                self.current_fps += 1;
                info!("Sustained headroom, raising target to {}fps", self.current_fps);
                return RateAdjustment::Increased(self.current_fps);
            }
        } else {
            self.fast_streak = 0;
        }

        RateAdjustment::Unchanged
    }

    /// 当前间隔内剩余需要等待的时间
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.current_interval().saturating_sub(elapsed)
    }
}
