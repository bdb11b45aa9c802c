//! winksock client
//!
//! Opens numbered channels on winksock/1 servers. Channels that target the
//! same host, port and auth share one TCP connection, which is created on
//! the first OPEN and closed when its last channel goes away.

pub mod address;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
mod open_request;
pub mod registry;

pub use address::{Address, EndpointKey};
pub use channel::{Channel, ChannelState};
pub use config::{default_config_dir, default_config_path, load_config, ClientConfig};
pub use connection::ConnectionHandle;
pub use error::{ChannelError, ConfigError};
pub use event::{ChannelData, ChannelEvent, ChannelSignal};
pub use open_request::OpenOutcome;
pub use registry::ConnectionRegistry;

pub use winksock_protocol::{ChannelId, ChannelMode};
