use crate::error::{AdbError, AdbResult};
use tokio::io::{AsyncRead, AsyncReadExt};

// ADB message framing: every message is a 24-byte header of six little-endian
// u32 fields, followed by `length` payload bytes:
//
//   command  arg0  arg1  length  checksum  magic
//
// magic is always command XOR 0xFFFFFFFF. checksum is the wrapping sum of the
// payload bytes under the legacy protocol, or 0 once both peers have
// negotiated a version that skips checksums.

/// Protocol version this client speaks.
pub const VERSION: u32 = 0x0100_0001;

/// Oldest peer version the client will talk to.
pub const VERSION_MIN: u32 = 0x0100_0000;

/// First version at which payload checksums are no longer sent.
pub const VERSION_SKIP_CHECKSUM: u32 = 0x0100_0001;

/// Hard upper bound on a message payload (1 MiB).
pub const MAX_PAYLOAD: u32 = 1024 * 1024;

/// Lower bound a peer may negotiate the max payload down to.
pub const MAX_PAYLOAD_MIN: u32 = 4096;

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// ADB message command codes — 4 ASCII characters, read as a little-endian u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Connection handshake (banner exchange).
    Connect,
    /// Authentication round (token / signature / public key).
    Auth,
    /// TLS upgrade request.
    StartTls,
    /// Open a stream to a named service.
    Open,
    /// Stream ready / write acknowledgement.
    Okay,
    /// Close a stream (or reject an open).
    Close,
    /// Stream payload data.
    Write,
    /// Legacy internal message; never expected from a device.
    Sync,
}

impl Command {
    /// The 4-byte ASCII representation of this command.
    pub fn as_bytes(&self) -> &[u8; 4] {
        match self {
            Command::Connect => b"CNXN",
            Command::Auth => b"AUTH",
            Command::StartTls => b"STLS",
            Command::Open => b"OPEN",
            Command::Okay => b"OKAY",
            Command::Close => b"CLSE",
            Command::Write => b"WRTE",
            Command::Sync => b"SYNC",
        }
    }

    /// The little-endian u32 wire value of this command.
    pub fn as_u32(&self) -> u32 {
        u32::from_le_bytes(*self.as_bytes())
    }

    /// Parse a wire value into a `Command`. Unknown codes are a protocol error.
    pub fn from_u32(value: u32) -> AdbResult<Command> {
        match &value.to_le_bytes() {
            b"CNXN" => Ok(Command::Connect),
            b"AUTH" => Ok(Command::Auth),
            b"STLS" => Ok(Command::StartTls),
            b"OPEN" => Ok(Command::Open),
            b"OKAY" => Ok(Command::Okay),
            b"CLSE" => Ok(Command::Close),
            b"WRTE" => Ok(Command::Write),
            b"SYNC" => Ok(Command::Sync),
            other => Err(AdbError::Protocol(format!(
                "Unknown command code: {:?} ({value:#010x})",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// Wrapping byte sum of a payload, as carried in the header checksum field.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |sum, b| sum.wrapping_add(u32::from(*b)))
}

/// Encode/decode policy negotiated by the connection handshake.
#[derive(Debug, Clone, Copy)]
pub struct WirePolicy {
    /// Whether outgoing messages carry a payload checksum.
    pub checksums: bool,
    /// Negotiated maximum payload for outgoing messages.
    pub max_payload: u32,
}

impl Default for WirePolicy {
    /// The pre-handshake policy: checksums on, payload capped at the protocol
    /// maximum. CNXN and AUTH messages always travel under this policy.
    fn default() -> Self {
        Self {
            checksums: true,
            max_payload: MAX_PAYLOAD,
        }
    }
}

/// The six-field message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub length: u32,
    pub checksum: u32,
}

impl MessageHeader {
    /// Serialize to exactly 24 bytes, deriving the magic field.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let command = self.command.as_u32();
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&command.to_le_bytes());
        buf[4..8].copy_from_slice(&self.arg0.to_le_bytes());
        buf[8..12].copy_from_slice(&self.arg1.to_le_bytes());
        buf[12..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf[20..24].copy_from_slice(&(command ^ 0xFFFF_FFFF).to_le_bytes());
        buf
    }

    /// Parse a 24-byte header, validating magic before anything else.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> AdbResult<Self> {
        let field = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let command = field(0);
        let magic = field(20);
        if magic != command ^ 0xFFFF_FFFF {
            return Err(AdbError::BadMagic { command, magic });
        }
        Ok(Self {
            command: Command::from_u32(command)?,
            arg0: field(4),
            arg1: field(8),
            length: field(12),
            checksum: field(16),
        })
    }
}

/// A complete ADB message: header arguments plus owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: Vec<u8>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload,
        }
    }

    /// Encode header and payload into one buffer.
    ///
    /// The checksum field is computed or zeroed according to `policy`;
    /// payloads over `policy.max_payload` fail with `PayloadTooLarge`.
    pub fn encode(&self, policy: WirePolicy) -> AdbResult<Vec<u8>> {
        if self.payload.len() > policy.max_payload as usize {
            return Err(AdbError::PayloadTooLarge {
                len: self.payload.len(),
                max: policy.max_payload as usize,
            });
        }
        let header = MessageHeader {
            command: self.command,
            arg0: self.arg0,
            arg1: self.arg1,
            length: self.payload.len() as u32,
            checksum: if policy.checksums {
                payload_checksum(&self.payload)
            } else {
                0
            },
        };
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Read one message from `reader`.
    ///
    /// Validates magic unconditionally. The checksum is verified when the
    /// negotiated policy still requires checksums, or whenever the peer sent
    /// a nonzero checksum anyway. EOF maps to `TransportClosed`.
    pub async fn read_from<R>(reader: &mut R, policy: WirePolicy) -> AdbResult<Message>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; HEADER_SIZE];
        read_exact_or_closed(reader, &mut head).await?;
        let header = MessageHeader::from_bytes(&head)?;

        if header.length > MAX_PAYLOAD {
            return Err(AdbError::Protocol(format!(
                "Message payload of {} bytes exceeds protocol maximum {}",
                header.length, MAX_PAYLOAD
            )));
        }

        let mut payload = vec![0u8; header.length as usize];
        read_exact_or_closed(reader, &mut payload).await?;

        if policy.checksums || header.checksum != 0 {
            let actual = payload_checksum(&payload);
            if actual != header.checksum {
                return Err(AdbError::BadChecksum {
                    expected: header.checksum,
                    actual,
                });
            }
        }

        Ok(Message {
            command: header.command,
            arg0: header.arg0,
            arg1: header.arg1,
            payload,
        })
    }
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> AdbResult<()>
where
    R: AsyncRead + Unpin,
{
    reader.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            AdbError::TransportClosed
        } else {
            AdbError::Io(e)
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_all_variants_round_trip() {
        let variants = [
            (Command::Connect, b"CNXN"),
            (Command::Auth, b"AUTH"),
            (Command::StartTls, b"STLS"),
            (Command::Open, b"OPEN"),
            (Command::Okay, b"OKAY"),
            (Command::Close, b"CLSE"),
            (Command::Write, b"WRTE"),
            (Command::Sync, b"SYNC"),
        ];
        for (cmd, bytes) in &variants {
            assert_eq!(cmd.as_bytes(), *bytes);
            assert_eq!(Command::from_u32(cmd.as_u32()).unwrap(), *cmd);
        }
    }

    #[test]
    fn test_command_known_wire_values() {
        // Spot-check against the values adbd uses.
        assert_eq!(Command::Connect.as_u32(), 0x4e58_4e43);
        assert_eq!(Command::Okay.as_u32(), 0x5941_4b4f);
        assert_eq!(Command::Write.as_u32(), 0x4554_5257);
    }

    #[test]
    fn test_command_unknown() {
        assert!(Command::from_u32(u32::from_le_bytes(*b"WHAT")).is_err());
    }

    #[test]
    fn test_payload_checksum() {
        assert_eq!(payload_checksum(b""), 0);
        assert_eq!(payload_checksum(b"\x01\x02\x03"), 6);
        assert_eq!(payload_checksum(b"hi\n"), 0x68 + 0x69 + 0x0a);
        assert_eq!(payload_checksum(&[0xFF; 4]), 1020);
    }

    #[test]
    fn test_header_round_trip() {
        let header = MessageHeader {
            command: Command::Open,
            arg0: 1,
            arg1: 0,
            length: 14,
            checksum: 1234,
        };
        let bytes = header.to_bytes();
        let parsed = MessageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_header_magic_is_complement() {
        let header = MessageHeader {
            command: Command::Connect,
            arg0: 0,
            arg1: 0,
            length: 0,
            checksum: 0,
        };
        let bytes = header.to_bytes();
        let command = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let magic = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        assert_eq!(magic, command ^ 0xFFFF_FFFF);
    }

    #[test]
    fn test_header_bad_magic() {
        let mut bytes = MessageHeader {
            command: Command::Connect,
            arg0: 0,
            arg1: 0,
            length: 0,
            checksum: 0,
        }
        .to_bytes();
        // Corrupt the magic to equal the command itself.
        bytes[20..24].copy_from_slice(&Command::Connect.as_u32().to_le_bytes());
        match MessageHeader::from_bytes(&bytes) {
            Err(AdbError::BadMagic { command, magic }) => {
                assert_eq!(command, magic);
            }
            other => panic!("Expected BadMagic, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_too_large() {
        let msg = Message::new(Command::Write, 1, 2, vec![0u8; 5000]);
        let policy = WirePolicy {
            checksums: false,
            max_payload: 4096,
        };
        match msg.encode(policy) {
            Err(AdbError::PayloadTooLarge { len, max }) => {
                assert_eq!(len, 5000);
                assert_eq!(max, 4096);
            }
            other => panic!("Expected PayloadTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_encode_decode_round_trip() {
        let msg = Message::new(Command::Write, 17, 1, b"hi\n".to_vec());
        let encoded = msg.encode(WirePolicy::default()).unwrap();
        let decoded = Message::read_from(&mut encoded.as_slice(), WirePolicy::default())
            .await
            .unwrap();
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn test_decode_no_checksum_when_skipped() {
        let msg = Message::new(Command::Write, 1, 2, b"payload".to_vec());
        let policy = WirePolicy {
            checksums: false,
            max_payload: MAX_PAYLOAD,
        };
        let encoded = msg.encode(policy).unwrap();
        // Checksum field is zero on the wire.
        assert_eq!(&encoded[16..20], &[0, 0, 0, 0]);
        let decoded = Message::read_from(&mut encoded.as_slice(), policy)
            .await
            .unwrap();
        assert_eq!(decoded.payload, b"payload");
    }

    #[tokio::test]
    async fn test_decode_nonzero_checksum_always_verified() {
        let msg = Message::new(Command::Write, 1, 2, b"payload".to_vec());
        let mut encoded = msg.encode(WirePolicy::default()).unwrap();
        // Corrupt one payload byte; the stale checksum must be caught even
        // under a policy that no longer requires checksums.
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let policy = WirePolicy {
            checksums: false,
            max_payload: MAX_PAYLOAD,
        };
        match Message::read_from(&mut encoded.as_slice(), policy).await {
            Err(AdbError::BadChecksum { .. }) => {}
            other => panic!("Expected BadChecksum, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_truncated_header() {
        let bytes = [0u8; 10];
        match Message::read_from(&mut bytes.as_slice(), WirePolicy::default()).await {
            Err(AdbError::TransportClosed) => {}
            other => panic!("Expected TransportClosed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_oversized_length_rejected() {
        let header = MessageHeader {
            command: Command::Write,
            arg0: 0,
            arg1: 0,
            length: MAX_PAYLOAD + 1,
            checksum: 0,
        };
        let bytes = header.to_bytes();
        match Message::read_from(&mut bytes.as_slice(), WirePolicy::default()).await {
            Err(AdbError::Protocol(msg)) => assert!(msg.contains("exceeds")),
            other => panic!("Expected Protocol error, got {:?}", other),
        }
    }
}
