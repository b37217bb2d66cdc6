use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed by peer")]
    TransportClosed,

    #[error("Bad magic in message header: command {command:#010x}, magic {magic:#010x}")]
    BadMagic { command: u32, magic: u32 },

    #[error("Payload checksum mismatch: header says {expected:#010x}, computed {actual:#010x}")]
    BadChecksum { expected: u32, actual: u32 },

    #[error("Invalid response: expected {expected}, got {actual}")]
    InvalidResponse { expected: String, actual: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol version mismatch: peer speaks {peer:#010x}")]
    ProtocolVersionMismatch { peer: u32 },

    #[error("Authentication failed: device did not accept any key")]
    AuthenticationFailed,

    #[error("Service rejected by peer: {0}")]
    ServiceRejected(String),

    #[error("Stream closed: {0}")]
    StreamClosed(String),

    #[error("Payload too large: {len} bytes exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Sync protocol failure: {0}")]
    SyncFailure(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type AdbResult<T> = Result<T, AdbError>;
