use crate::error::{AdbError, AdbResult};
use crate::wire::{Message, WirePolicy};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Message-granular duplex channel to a device.
///
/// Wraps any byte-oriented duplex stream and frames ADB messages over it.
/// The checksum/max-payload policy starts at the pre-handshake default and is
/// updated once the connection handshake has negotiated the session values.
pub struct Transport {
    reader: MessageReader,
    writer: MessageWriter,
}

impl Transport {
    /// Connect to a device's adbd over TCP (`host:port`, usually port 5555).
    pub async fn tcp(addr: &str) -> AdbResult<Transport> {
        debug!("Connecting to adbd at {}", addr);
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                AdbError::ConnectionFailed(format!("{addr}: connection refused"))
            } else {
                AdbError::Io(e)
            }
        })?;
        stream.set_nodelay(true).ok();
        Ok(Self::from_stream(stream))
    }

    /// Open a USB transport to the device with the given serial.
    ///
    /// Not implemented: ADB-over-USB reads and writes whole messages on a
    /// paired bulk IN/OUT endpoint, and any OUT transfer whose size is a
    /// multiple of the endpoint max packet size must be followed by a
    /// zero-length packet.
    pub fn usb(_serial: &str) -> AdbResult<Transport> {
        Err(AdbError::Unsupported("USB transport"))
    }

    /// Wrap an already-open duplex stream (in-memory pipes in tests, or a
    /// socket obtained elsewhere).
    pub fn from_stream<S>(stream: S) -> Transport
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: MessageReader {
                inner: Box::new(read_half),
                policy: WirePolicy::default(),
            },
            writer: MessageWriter {
                inner: Box::new(write_half),
                policy: WirePolicy::default(),
            },
        }
    }

    /// Read the next message from the device.
    pub async fn read_message(&mut self) -> AdbResult<Message> {
        self.reader.read_message().await
    }

    /// Write one message to the device.
    pub async fn write_message(&mut self, message: &Message) -> AdbResult<()> {
        self.writer.write_message(message).await
    }

    /// Install the policy negotiated by the handshake on both directions.
    pub fn set_policy(&mut self, policy: WirePolicy) {
        self.reader.policy = policy;
        self.writer.policy = policy;
    }

    pub fn policy(&self) -> WirePolicy {
        self.writer.policy
    }

    /// Shut down the write side of the channel.
    pub async fn close(&mut self) -> AdbResult<()> {
        self.writer.inner.shutdown().await?;
        Ok(())
    }

    /// Split into independent halves for the multiplexer's reader task and
    /// writer task.
    pub fn into_split(self) -> (MessageReader, MessageWriter) {
        (self.reader, self.writer)
    }
}

/// Read half of a transport: yields whole ADB messages.
pub struct MessageReader {
    inner: BoxedReader,
    policy: WirePolicy,
}

impl MessageReader {
    pub async fn read_message(&mut self) -> AdbResult<Message> {
        Message::read_from(&mut self.inner, self.policy).await
    }
}

/// Write half of a transport: frames and sends whole ADB messages.
pub struct MessageWriter {
    inner: BoxedWriter,
    policy: WirePolicy,
}

impl MessageWriter {
    pub async fn write_message(&mut self, message: &Message) -> AdbResult<()> {
        let encoded = message.encode(self.policy)?;
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> AdbResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Command;

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut a = Transport::from_stream(client);
        let mut b = Transport::from_stream(server);

        let msg = Message::new(Command::Open, 1, 0, b"shell:echo hi\0".to_vec());
        a.write_message(&msg).await.unwrap();
        let received = b.read_message().await.unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_peer_close_maps_to_transport_closed() {
        let (client, server) = tokio::io::duplex(1024);
        let mut a = Transport::from_stream(client);
        drop(server);
        match a.read_message().await {
            Err(AdbError::TransportClosed) => {}
            other => panic!("Expected TransportClosed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_policy_applies_after_negotiation() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut a = Transport::from_stream(client);
        let mut b = Transport::from_stream(server);

        let negotiated = WirePolicy {
            checksums: false,
            max_payload: 4096,
        };
        a.set_policy(negotiated);
        b.set_policy(negotiated);

        let msg = Message::new(Command::Write, 1, 2, vec![0xAB; 4096]);
        a.write_message(&msg).await.unwrap();
        let received = b.read_message().await.unwrap();
        assert_eq!(received.payload.len(), 4096);

        let too_big = Message::new(Command::Write, 1, 2, vec![0xAB; 4097]);
        assert!(matches!(
            a.write_message(&too_big).await,
            Err(AdbError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_usb_is_unsupported() {
        match Transport::usb("emulator-5554") {
            Err(AdbError::Unsupported(what)) => assert!(what.contains("USB")),
            other => panic!("Expected Unsupported, got {:?}", other.map(|_| ())),
        }
    }
}
