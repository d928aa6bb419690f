pub mod cli;
pub mod protocol;

pub use cli::{Command, prompt};
pub use protocol::{Connection, ConnectionConfig, ConnectionError, Frame, Transport};
