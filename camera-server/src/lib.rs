// 多摄像头 MJPEG 采集服务器
pub mod capture;
pub mod config;
pub mod publisher;
pub mod rig;
pub mod slot;
pub mod stats;

pub use config::{CameraConfig, CaptureSource, ServerConfig};
pub use rig::CameraRig;
pub use slot::{FrameSlot, FrameSlotWriter, FrameSnapshot};
