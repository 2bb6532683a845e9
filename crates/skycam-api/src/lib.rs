// skycam-api: Async wire clients for In-Sight cameras (Telnet commands + FTP frames)

pub mod command;
pub mod error;
mod ftp;
pub mod protocol;
pub mod retrieval;
mod transport;

pub use command::{CameraInfo, CommandChannel, CommandSettings};
pub use error::Error;
pub use protocol::{CommandRequest, CommandResponse, Dialect, ResponseStatus};
pub use retrieval::{FrameLocator, RemoteFrame, RetrievalChannel, RetrievalSettings};
