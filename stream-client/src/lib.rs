// 多路 MJPEG 流接收客户端
pub mod config;
pub mod fps;
pub mod manager;
pub mod parser;
pub mod state;
pub mod supervisor;
pub mod transport;

pub use config::{ClientConfig, ProbePolicy, RemoteCamera};
pub use manager::{FeedStatus, StreamManager};
pub use parser::{FrameBoundaryParser, ParserStats};
pub use state::{FailureReason, StateChange, StreamConnectionState};
pub use transport::{HttpTransport, StreamTransport, TransportError};
