pub mod types;
pub mod protocol;
pub mod error;
pub mod command;

pub use types::*;
pub use protocol::*;
pub use error::*;
pub use command::*;
