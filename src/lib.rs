pub mod cli;
pub mod config;
pub mod protocol;

pub use cli::{Command, prompt};
pub use config::{ChannelConfig, ConfigError};
pub use protocol::{Channel, ChannelError, ChannelServer, RemoteFault, Rid};
