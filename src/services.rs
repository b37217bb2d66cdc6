use crate::device::DeviceInfo;
use crate::error::{AdbError, AdbResult};
use crate::mux::Session;
use crate::stream::AdbStream;
use crate::sync::SyncClient;
use tracing::debug;

/// Named services addressable through an OPEN payload.
///
/// The wire form is the ASCII service string, NUL-terminated by the
/// multiplexer when it builds the OPEN message.
#[derive(Debug, Clone)]
pub enum Service {
    /// Execute a shell command on the device.
    Shell(String),
    /// Open an interactive shell session.
    ShellInteractive,
    /// Stream logcat output.
    Logcat,
    /// Enter file sync mode.
    Sync,
    /// Query the peer's version.
    HostVersion,
    /// List known devices, short or long format.
    HostDevices { long: bool },
    /// Connect the peer to a networked device.
    HostConnect(String, u16),
    /// Disconnect the peer from a networked device.
    HostDisconnect(String, u16),
    /// Restart adbd listening on TCP on the given port.
    Tcpip(u16),
}

impl Service {
    /// The canonical wire string for this service.
    pub fn to_wire(&self) -> String {
        match self {
            Service::Shell(cmd) => format!("shell:{}", cmd),
            Service::ShellInteractive => "shell:".to_string(),
            Service::Logcat => "shell:logcat".to_string(),
            Service::Sync => "sync:".to_string(),
            Service::HostVersion => "host:version".to_string(),
            Service::HostDevices { long: false } => "host:devices".to_string(),
            Service::HostDevices { long: true } => "host:devices-l".to_string(),
            Service::HostConnect(host, port) => format!("host:connect:{}:{}", host, port),
            Service::HostDisconnect(host, port) => format!("host:disconnect:{}:{}", host, port),
            Service::Tcpip(port) => format!("tcpip:{}", port),
        }
    }
}

/// Status prefix on `host:*` service replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostStatus {
    Okay,
    Fail,
}

/// Parse a 4-byte status prefix (`OKAY` or `FAIL`).
pub fn parse_status(buf: &[u8]) -> AdbResult<HostStatus> {
    if buf.len() < 4 {
        return Err(AdbError::Protocol(format!(
            "Status too short: {} bytes, need 4",
            buf.len()
        )));
    }
    match &buf[..4] {
        b"OKAY" => Ok(HostStatus::Okay),
        b"FAIL" => Ok(HostStatus::Fail),
        other => Err(AdbError::InvalidResponse {
            expected: "OKAY or FAIL".into(),
            actual: String::from_utf8_lossy(other).to_string(),
        }),
    }
}

/// Parse a 4-character ASCII hex length into a `usize`.
pub fn parse_hex_length(buf: &[u8]) -> AdbResult<usize> {
    if buf.len() < 4 {
        return Err(AdbError::Protocol(format!(
            "Hex length too short: {} bytes, need 4",
            buf.len()
        )));
    }
    let hex_str = std::str::from_utf8(&buf[..4])
        .map_err(|_| AdbError::Protocol(format!("Invalid UTF-8 in hex length: {:?}", &buf[..4])))?;
    usize::from_str_radix(hex_str, 16)
        .map_err(|_| AdbError::Protocol(format!("Invalid hex length: {:?}", hex_str)))
}

/// Read a `host:*` reply body: 4-hex-digit length, then that many bytes.
async fn read_length_prefixed(stream: &mut AdbStream) -> AdbResult<Vec<u8>> {
    let len_buf = stream.read_exact(4).await?;
    let len = parse_hex_length(&len_buf)?;
    if len == 0 {
        return Ok(Vec::new());
    }
    stream.read_exact(len).await
}

/// Read a status-prefixed `host:*` reply. An `OKAY` with an empty body is
/// success; anything else carries a message.
async fn read_status_reply(stream: &mut AdbStream) -> AdbResult<()> {
    let status_buf = stream.read_exact(4).await?;
    let status = parse_status(&status_buf)?;
    let body = read_length_prefixed(stream).await?;
    match status {
        HostStatus::Okay if body.is_empty() => Ok(()),
        HostStatus::Okay | HostStatus::Fail => Err(AdbError::ServiceRejected(
            String::from_utf8_lossy(&body).to_string(),
        )),
    }
}

/// Convenience helpers over the stream multiplexer: open named services and
/// consume their replies.
impl Session {
    /// Open a stream to a canonical service.
    pub async fn open_service(&self, service: &Service) -> AdbResult<AdbStream> {
        self.open(&service.to_wire()).await
    }

    /// Run a shell command and collect its output until the peer closes the
    /// stream.
    pub async fn shell(&self, command: &str) -> AdbResult<Vec<u8>> {
        let mut stream = self
            .open_service(&Service::Shell(command.to_string()))
            .await?;
        stream.read_to_end().await
    }

    /// Open a logcat stream; the caller reads until it has seen enough.
    pub async fn logcat(&self) -> AdbResult<AdbStream> {
        self.open_service(&Service::Logcat).await
    }

    /// Enter sync mode on a fresh stream.
    pub async fn sync(&self) -> AdbResult<SyncClient> {
        let stream = self.open_service(&Service::Sync).await?;
        Ok(SyncClient::new(stream))
    }

    /// List the peer's known devices.
    pub async fn list_devices(&self, long: bool) -> AdbResult<Vec<DeviceInfo>> {
        let mut stream = self.open_service(&Service::HostDevices { long }).await?;
        let body = read_length_prefixed(&mut stream).await?;
        stream.close();
        let text = String::from_utf8_lossy(&body);
        Ok(DeviceInfo::parse_device_list(&text))
    }

    /// Query the peer's version.
    pub async fn host_version(&self) -> AdbResult<u32> {
        let mut stream = self.open_service(&Service::HostVersion).await?;
        let body = read_length_prefixed(&mut stream).await?;
        stream.close();
        let hex_str = std::str::from_utf8(&body)
            .map_err(|_| AdbError::Protocol("Invalid UTF-8 in version reply".into()))?;
        u32::from_str_radix(hex_str, 16)
            .map_err(|_| AdbError::Protocol(format!("Invalid version hex: {:?}", hex_str)))
    }

    /// Ask the peer to connect to a networked device.
    pub async fn host_connect(&self, host: &str, port: u16) -> AdbResult<()> {
        debug!("host:connect {}:{}", host, port);
        let mut stream = self
            .open_service(&Service::HostConnect(host.to_string(), port))
            .await?;
        let result = read_status_reply(&mut stream).await;
        stream.close();
        result
    }

    /// Ask the peer to drop a networked device.
    pub async fn host_disconnect(&self, host: &str, port: u16) -> AdbResult<()> {
        debug!("host:disconnect {}:{}", host, port);
        let mut stream = self
            .open_service(&Service::HostDisconnect(host.to_string(), port))
            .await?;
        let result = read_status_reply(&mut stream).await;
        stream.close();
        result
    }

    /// Restart adbd listening on TCP. Returns the peer's confirmation text.
    pub async fn tcpip(&self, port: u16) -> AdbResult<String> {
        let mut stream = self.open_service(&Service::Tcpip(port)).await?;
        let reply = stream.read_to_end().await?;
        Ok(String::from_utf8_lossy(&reply).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_wire_strings() {
        assert_eq!(Service::Shell("ls -la".into()).to_wire(), "shell:ls -la");
        assert_eq!(Service::ShellInteractive.to_wire(), "shell:");
        assert_eq!(Service::Logcat.to_wire(), "shell:logcat");
        assert_eq!(Service::Sync.to_wire(), "sync:");
        assert_eq!(Service::HostVersion.to_wire(), "host:version");
        assert_eq!(
            Service::HostDevices { long: false }.to_wire(),
            "host:devices"
        );
        assert_eq!(
            Service::HostDevices { long: true }.to_wire(),
            "host:devices-l"
        );
        assert_eq!(
            Service::HostConnect("192.168.1.5".into(), 5555).to_wire(),
            "host:connect:192.168.1.5:5555"
        );
        assert_eq!(
            Service::HostDisconnect("192.168.1.5".into(), 5555).to_wire(),
            "host:disconnect:192.168.1.5:5555"
        );
        assert_eq!(Service::Tcpip(5555).to_wire(), "tcpip:5555");
    }

    #[test]
    fn test_parse_status_okay() {
        assert_eq!(parse_status(b"OKAY").unwrap(), HostStatus::Okay);
    }

    #[test]
    fn test_parse_status_fail() {
        assert_eq!(parse_status(b"FAIL").unwrap(), HostStatus::Fail);
    }

    #[test]
    fn test_parse_status_unknown() {
        assert!(parse_status(b"WHAT").is_err());
    }

    #[test]
    fn test_parse_status_too_short() {
        assert!(parse_status(b"OK").is_err());
    }

    #[test]
    fn test_parse_hex_length() {
        assert_eq!(parse_hex_length(b"000C").unwrap(), 12);
        assert_eq!(parse_hex_length(b"0000").unwrap(), 0);
        assert_eq!(parse_hex_length(b"FFFF").unwrap(), 65535);
        assert_eq!(parse_hex_length(b"001a").unwrap(), 26);
    }

    #[test]
    fn test_parse_hex_length_invalid() {
        assert!(parse_hex_length(b"ZZZZ").is_err());
    }

    #[test]
    fn test_parse_hex_length_too_short() {
        assert!(parse_hex_length(b"00").is_err());
    }
}
