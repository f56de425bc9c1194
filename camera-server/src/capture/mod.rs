// 采集与编码
pub mod device;
pub mod encoder;
pub mod rate;
pub mod worker;

pub use device::{CaptureDevice, DefaultDeviceFactory, DeviceFactory, RawFrame, SyntheticDevice};
pub use encoder::JpegFrameEncoder;
pub use rate::AdaptiveRateController;
pub use worker::{CaptureEncodeWorker, WorkerHandle};

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture stream ended")]
    EndOfStream,

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Capture did not finish within {0:?}")]
    Stalled(Duration),

    #[error("Capture task aborted: {0}")]
    Aborted(String),
}
