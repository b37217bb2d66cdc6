mod auth;
mod connection;
mod device;
mod error;
mod mux;
mod services;
mod stream;
mod sync;
mod transport;
mod wire;

pub use auth::{Signer, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE, AUTH_TOKEN, TOKEN_SIZE};
pub use connection::{Banner, ConnectOptions, SessionInfo};
pub use device::{DeviceInfo, DeviceState};
pub use error::{AdbError, AdbResult};
pub use mux::Session;
pub use services::{HostStatus, Service};
pub use stream::AdbStream;
pub use sync::{DentEntry, StatResponse, SyncClient, SyncHeader, SyncId, SYNC_DATA_MAX};
pub use transport::Transport;
pub use wire::{Command, Message, MessageHeader, WirePolicy, MAX_PAYLOAD, VERSION};
