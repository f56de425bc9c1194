// 单个摄像头的运行统计

use chrono::{DateTime, Utc};
use common::{CameraFeed, CameraRunState, StatsResponse};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// 摄像头统计（采集任务写入，HTTP 处理读取）
#[derive(Debug)]
pub struct CameraStats {
    clients: AtomicUsize,
    target_fps: AtomicU32,
    actual_fps_bits: AtomicU64,
    frames_captured: AtomicU64,
    capture_errors: AtomicU64,
    running: AtomicBool,
    has_camera: AtomicBool,
    started_at: DateTime<Utc>,
}

impl CameraStats {
    pub fn new(target_fps: u32) -> Arc<Self> {
        Arc::new(Self {
            clients: AtomicUsize::new(0),
            target_fps: AtomicU32::new(target_fps),
            actual_fps_bits: AtomicU64::new(0f64.to_bits()),
            frames_captured: AtomicU64::new(0),
            capture_errors: AtomicU64::new(0),
            running: AtomicBool::new(false),
            has_camera: AtomicBool::new(false),
            started_at: Utc::now(),
        })
    }

    pub fn set_target_fps(&self, fps: u32) {
        self.target_fps.store(fps, Ordering::Relaxed);
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps.load(Ordering::Relaxed)
    }

    pub fn set_actual_fps(&self, fps: f64) {
        self.actual_fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn actual_fps(&self) -> f64 {
        f64::from_bits(self.actual_fps_bits.load(Ordering::Relaxed))
    }

    pub fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn record_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn capture_errors(&self) -> u64 {
        self.capture_errors.load(Ordering::Relaxed)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_has_camera(&self, has_camera: bool) {
        self.has_camera.store(has_camera, Ordering::Relaxed);
    }

    pub fn has_camera(&self) -> bool {
        self.has_camera.load(Ordering::Relaxed)
    }

    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// 登记一个读取方，guard 释放时自动注销
    pub fn client_guard(self: &Arc<Self>) -> ClientGuard {
        self.clients.fetch_add(1, Ordering::Relaxed);
        ClientGuard {
            stats: self.clone(),
        }
    }

    pub fn run_state(&self) -> CameraRunState {
        match (self.is_running(), self.has_camera()) {
            (false, _) => CameraRunState::Stopped,
            (true, true) => CameraRunState::Running,
            (true, false) => CameraRunState::Degraded,
        }
    }

    pub fn snapshot(&self, camera: CameraFeed) -> StatsResponse {
        StatsResponse {
            camera,
            clients: self.clients(),
            target_fps: self.target_fps() as f64,
            actual_fps: self.actual_fps(),
            frames_captured: self.frames_captured(),
            capture_errors: self.capture_errors(),
            running: self.is_running(),
            has_camera: self.has_camera(),
            started_at: self.started_at,
        }
    }
}

/// 读取方计数守卫
#[derive(Debug)]
pub struct ClientGuard {
    stats: Arc<CameraStats>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.stats.clients.fetch_sub(1, Ordering::Relaxed);
    }
}
