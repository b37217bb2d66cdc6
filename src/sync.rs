use crate::error::{AdbError, AdbResult};
use crate::stream::AdbStream;
use tracing::debug;

/// Maximum chunk size for DATA frames in the sync protocol (64 KiB). This
/// bound is independent of the outer negotiated max payload.
pub const SYNC_DATA_MAX: u32 = 64 * 1024;

/// Sync protocol frame IDs — 4 ASCII characters.
///
/// Every sync frame has an 8-byte header: a 4-byte ASCII ID followed by a
/// 4-byte little-endian u32 value (a length, mode, or mtime depending on
/// the ID).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncId {
    /// Query file metadata.
    Stat,
    /// List directory contents.
    List,
    /// Send (push) a file to the device.
    Send,
    /// Receive (pull) a file from the device.
    Recv,
    /// Data chunk within a send/recv transfer.
    Data,
    /// Marks the end of a transfer; value carries the mtime on SEND.
    Done,
    /// Success acknowledgment.
    Okay,
    /// Error response; value is the message length.
    Fail,
    /// Directory entry (response to LIST); value is the entry mode.
    Dent,
    /// Leave sync mode.
    Quit,
}

impl SyncId {
    /// The 4-byte ASCII representation of this frame ID.
    pub fn as_bytes(&self) -> &[u8; 4] {
        match self {
            SyncId::Stat => b"STAT",
            SyncId::List => b"LIST",
            SyncId::Send => b"SEND",
            SyncId::Recv => b"RECV",
            SyncId::Data => b"DATA",
            SyncId::Done => b"DONE",
            SyncId::Okay => b"OKAY",
            SyncId::Fail => b"FAIL",
            SyncId::Dent => b"DENT",
            SyncId::Quit => b"QUIT",
        }
    }

    /// Parse a 4-byte ASCII slice into a `SyncId`.
    pub fn from_bytes(bytes: &[u8]) -> AdbResult<SyncId> {
        if bytes.len() < 4 {
            return Err(AdbError::Protocol(format!(
                "Sync ID too short: {} bytes, need 4",
                bytes.len()
            )));
        }
        match &bytes[..4] {
            b"STAT" => Ok(SyncId::Stat),
            b"LIST" => Ok(SyncId::List),
            b"SEND" => Ok(SyncId::Send),
            b"RECV" => Ok(SyncId::Recv),
            b"DATA" => Ok(SyncId::Data),
            b"DONE" => Ok(SyncId::Done),
            b"OKAY" => Ok(SyncId::Okay),
            b"FAIL" => Ok(SyncId::Fail),
            b"DENT" => Ok(SyncId::Dent),
            b"QUIT" => Ok(SyncId::Quit),
            other => Err(AdbError::Protocol(format!(
                "Unknown sync ID: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// The 8-byte sync header: 4-byte frame ID + 4-byte little-endian u32 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncHeader {
    pub id: SyncId,
    pub value: u32,
}

impl SyncHeader {
    pub fn new(id: SyncId, value: u32) -> Self {
        Self { id, value }
    }

    /// Serialize to exactly 8 bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(self.id.as_bytes());
        buf[4..8].copy_from_slice(&self.value.to_le_bytes());
        buf
    }

    /// Parse from a byte slice (must be at least 8 bytes).
    pub fn from_bytes(buf: &[u8]) -> AdbResult<Self> {
        if buf.len() < 8 {
            return Err(AdbError::Protocol(format!(
                "Sync header too short: {} bytes, need 8",
                buf.len()
            )));
        }
        let id = SyncId::from_bytes(&buf[0..4])?;
        let value = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Self { id, value })
    }
}

/// File metadata returned by STAT: `STAT` + mode (4) + size (4) + mtime (4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatResponse {
    /// Unix file mode (type + permissions).
    pub mode: u32,
    /// File size in bytes.
    pub size: u32,
    /// Last modification time (Unix timestamp).
    pub mtime: u32,
}

impl StatResponse {
    /// Whether this is a regular file (S_IFREG = 0o100000).
    pub fn is_file(&self) -> bool {
        (self.mode & 0o170000) == 0o100000
    }

    /// Whether this is a directory (S_IFDIR = 0o040000).
    pub fn is_directory(&self) -> bool {
        (self.mode & 0o170000) == 0o040000
    }

    /// Extract the permission bits (lower 12 bits).
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// A mode of all zeroes means the path does not exist.
    pub fn exists(&self) -> bool {
        self.mode != 0 || self.size != 0 || self.mtime != 0
    }
}

/// One directory entry from a LIST response:
/// `DENT` + mode (4) + size (4) + mtime (4) + namelen (4) + name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DentEntry {
    /// Unix file mode.
    pub mode: u32,
    /// File size in bytes.
    pub size: u32,
    /// Last modification time.
    pub mtime: u32,
    /// File/directory name.
    pub name: String,
}

/// Encode a path-carrying request: ID + LE path length + path bytes.
fn encode_path_request(id: SyncId, path: &str) -> Vec<u8> {
    let path_bytes = path.as_bytes();
    let mut buf = Vec::with_capacity(8 + path_bytes.len());
    buf.extend_from_slice(&SyncHeader::new(id, path_bytes.len() as u32).to_bytes());
    buf.extend_from_slice(path_bytes);
    buf
}

/// Encode a STAT request.
pub fn encode_stat_request(remote_path: &str) -> Vec<u8> {
    encode_path_request(SyncId::Stat, remote_path)
}

/// Encode a LIST request.
pub fn encode_list_request(remote_path: &str) -> Vec<u8> {
    encode_path_request(SyncId::List, remote_path)
}

/// Encode a RECV request.
pub fn encode_recv_request(remote_path: &str) -> Vec<u8> {
    encode_path_request(SyncId::Recv, remote_path)
}

/// Encode a SEND request: `SEND` + LE length + `{remote_path},{octal mode}`.
pub fn encode_send_request(remote_path: &str, mode: u32) -> Vec<u8> {
    let payload = format!("{},{:o}", remote_path, mode);
    let payload_bytes = payload.as_bytes();
    let mut buf = Vec::with_capacity(8 + payload_bytes.len());
    buf.extend_from_slice(&SyncHeader::new(SyncId::Send, payload_bytes.len() as u32).to_bytes());
    buf.extend_from_slice(payload_bytes);
    buf
}

/// Encode a DATA chunk: `DATA` + LE data length + data bytes.
pub fn encode_data_chunk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + data.len());
    buf.extend_from_slice(&SyncHeader::new(SyncId::Data, data.len() as u32).to_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Encode a DONE frame carrying the file's modification time.
pub fn encode_done(mtime: u32) -> [u8; 8] {
    SyncHeader::new(SyncId::Done, mtime).to_bytes()
}

/// Encode a QUIT frame.
pub fn encode_quit() -> [u8; 8] {
    SyncHeader::new(SyncId::Quit, 0).to_bytes()
}

/// Client for the sync sub-protocol, speaking over a stream opened with the
/// `sync:` service.
///
/// One `SyncClient` can run any number of transfers back to back; `quit`
/// ends sync mode and closes the stream.
pub struct SyncClient {
    stream: AdbStream,
}

impl SyncClient {
    pub(crate) fn new(stream: AdbStream) -> Self {
        Self { stream }
    }

    async fn read_header(&mut self) -> AdbResult<SyncHeader> {
        let buf = self.stream.read_exact(8).await?;
        SyncHeader::from_bytes(&buf)
    }

    /// Read a FAIL frame's message, close the stream, surface the failure.
    async fn fail(&mut self, len: u32) -> AdbError {
        let message = match self.stream.read_exact(len as usize).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
            Err(_) => "(failure message truncated)".to_string(),
        };
        self.stream.close();
        AdbError::SyncFailure(message)
    }

    fn unexpected(&self, expected: &str, header: &SyncHeader) -> AdbError {
        AdbError::Protocol(format!(
            "Expected {} in sync reply, got {:?}",
            expected, header.id
        ))
    }

    /// Stat a remote path.
    pub async fn stat(&mut self, remote_path: &str) -> AdbResult<StatResponse> {
        self.stream.write(&encode_stat_request(remote_path)).await?;
        let header = self.read_header().await?;
        match header.id {
            SyncId::Stat => {
                let rest = self.stream.read_exact(8).await?;
                Ok(StatResponse {
                    mode: header.value,
                    size: u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]),
                    mtime: u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]),
                })
            }
            SyncId::Fail => Err(self.fail(header.value).await),
            _ => Err(self.unexpected("STAT", &header)),
        }
    }

    /// List a remote directory.
    pub async fn list(&mut self, remote_path: &str) -> AdbResult<Vec<DentEntry>> {
        self.stream.write(&encode_list_request(remote_path)).await?;
        let mut entries = Vec::new();
        loop {
            let header = self.read_header().await?;
            match header.id {
                SyncId::Dent => {
                    let rest = self.stream.read_exact(12).await?;
                    let namelen =
                        u32::from_le_bytes([rest[8], rest[9], rest[10], rest[11]]) as usize;
                    let name = self.stream.read_exact(namelen).await?;
                    entries.push(DentEntry {
                        mode: header.value,
                        size: u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]),
                        mtime: u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]),
                        name: String::from_utf8_lossy(&name).to_string(),
                    });
                }
                SyncId::Done => return Ok(entries),
                SyncId::Fail => return Err(self.fail(header.value).await),
                _ => return Err(self.unexpected("DENT or DONE", &header)),
            }
        }
    }

    /// Push `data` to `remote_path` with the given mode and mtime.
    pub async fn push(
        &mut self,
        remote_path: &str,
        mode: u32,
        mtime: u32,
        data: &[u8],
    ) -> AdbResult<()> {
        debug!("Sync push {} bytes to {}", data.len(), remote_path);
        self.stream
            .write(&encode_send_request(remote_path, mode))
            .await?;
        for chunk in data.chunks(SYNC_DATA_MAX as usize) {
            self.stream.write(&encode_data_chunk(chunk)).await?;
        }
        self.stream.write(&encode_done(mtime)).await?;

        let header = self.read_header().await?;
        match header.id {
            SyncId::Okay => Ok(()),
            SyncId::Fail => Err(self.fail(header.value).await),
            _ => Err(self.unexpected("OKAY", &header)),
        }
    }

    /// Pull `remote_path` and return its contents.
    pub async fn pull(&mut self, remote_path: &str) -> AdbResult<Vec<u8>> {
        self.stream.write(&encode_recv_request(remote_path)).await?;
        let mut data = Vec::new();
        loop {
            let header = self.read_header().await?;
            match header.id {
                SyncId::Data => {
                    if header.value > SYNC_DATA_MAX {
                        return Err(AdbError::Protocol(format!(
                            "Sync DATA chunk of {} bytes exceeds limit {}",
                            header.value, SYNC_DATA_MAX
                        )));
                    }
                    let chunk = self.stream.read_exact(header.value as usize).await?;
                    data.extend_from_slice(&chunk);
                }
                SyncId::Done => {
                    debug!("Sync pull of {} complete: {} bytes", remote_path, data.len());
                    return Ok(data);
                }
                SyncId::Fail => return Err(self.fail(header.value).await),
                _ => return Err(self.unexpected("DATA or DONE", &header)),
            }
        }
    }

    /// Leave sync mode and close the underlying stream.
    pub async fn quit(mut self) -> AdbResult<()> {
        self.stream.write(&encode_quit()).await?;
        self.stream.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_id_all_variants_round_trip() {
        let variants = [
            (SyncId::Stat, b"STAT"),
            (SyncId::List, b"LIST"),
            (SyncId::Send, b"SEND"),
            (SyncId::Recv, b"RECV"),
            (SyncId::Data, b"DATA"),
            (SyncId::Done, b"DONE"),
            (SyncId::Okay, b"OKAY"),
            (SyncId::Fail, b"FAIL"),
            (SyncId::Dent, b"DENT"),
            (SyncId::Quit, b"QUIT"),
        ];
        for (id, bytes) in &variants {
            assert_eq!(id.as_bytes(), *bytes);
            assert_eq!(SyncId::from_bytes(*bytes).unwrap(), *id);
        }
    }

    #[test]
    fn test_sync_id_unknown() {
        assert!(SyncId::from_bytes(b"XXXX").is_err());
    }

    #[test]
    fn test_sync_id_too_short() {
        assert!(SyncId::from_bytes(b"ST").is_err());
    }

    #[test]
    fn test_sync_header_round_trip() {
        let header = SyncHeader::new(SyncId::Stat, 42);
        let parsed = SyncHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_sync_header_zero_value() {
        let header = SyncHeader::new(SyncId::Quit, 0);
        assert_eq!(&header.to_bytes(), b"QUIT\x00\x00\x00\x00");
    }

    #[test]
    fn test_sync_header_too_short() {
        assert!(SyncHeader::from_bytes(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_stat_response_regular_file() {
        // mode = 0o100644 (regular file, rw-r--r--)
        let stat = StatResponse {
            mode: 0o100644,
            size: 1024,
            mtime: 1_700_000_000,
        };
        assert!(stat.is_file());
        assert!(!stat.is_directory());
        assert!(stat.exists());
        assert_eq!(stat.permissions(), 0o644);
    }

    #[test]
    fn test_stat_response_directory() {
        let stat = StatResponse {
            mode: 0o040755,
            size: 4096,
            mtime: 1_700_000_000,
        };
        assert!(!stat.is_file());
        assert!(stat.is_directory());
        assert_eq!(stat.permissions(), 0o755);
    }

    #[test]
    fn test_stat_response_nonexistent() {
        let stat = StatResponse {
            mode: 0,
            size: 0,
            mtime: 0,
        };
        assert!(!stat.exists());
        assert!(!stat.is_file());
        assert!(!stat.is_directory());
    }

    #[test]
    fn test_encode_stat_request() {
        let encoded = encode_stat_request("/sdcard/test.txt");
        let header = SyncHeader::from_bytes(&encoded[0..8]).unwrap();
        assert_eq!(header.id, SyncId::Stat);
        assert_eq!(header.value, 16);
        assert_eq!(&encoded[8..], b"/sdcard/test.txt");
    }

    #[test]
    fn test_encode_list_request() {
        let encoded = encode_list_request("/sdcard/");
        let header = SyncHeader::from_bytes(&encoded[0..8]).unwrap();
        assert_eq!(header.id, SyncId::List);
        assert_eq!(header.value, 8);
        assert_eq!(&encoded[8..], b"/sdcard/");
    }

    #[test]
    fn test_encode_recv_request() {
        let encoded = encode_recv_request("/data/local/tmp/file");
        let header = SyncHeader::from_bytes(&encoded[0..8]).unwrap();
        assert_eq!(header.id, SyncId::Recv);
        assert_eq!(&encoded[8..], b"/data/local/tmp/file");
    }

    #[test]
    fn test_encode_send_request_octal_mode() {
        let encoded = encode_send_request("/sdcard/x", 0o644);
        let header = SyncHeader::from_bytes(&encoded[0..8]).unwrap();
        assert_eq!(header.id, SyncId::Send);
        assert_eq!(&encoded[8..], b"/sdcard/x,644");
        assert_eq!(header.value as usize, encoded.len() - 8);
    }

    #[test]
    fn test_encode_data_chunk() {
        let encoded = encode_data_chunk(b"hello world");
        let header = SyncHeader::from_bytes(&encoded[0..8]).unwrap();
        assert_eq!(header.id, SyncId::Data);
        assert_eq!(header.value, 11);
        assert_eq!(&encoded[8..], b"hello world");
    }

    #[test]
    fn test_encode_data_chunk_empty() {
        let encoded = encode_data_chunk(b"");
        assert_eq!(encoded.len(), 8);
        let header = SyncHeader::from_bytes(&encoded).unwrap();
        assert_eq!(header.value, 0);
    }

    #[test]
    fn test_encode_done() {
        let encoded = encode_done(1_700_000_000);
        let header = SyncHeader::from_bytes(&encoded).unwrap();
        assert_eq!(header.id, SyncId::Done);
        assert_eq!(header.value, 1_700_000_000);
    }

    #[test]
    fn test_encode_quit() {
        let encoded = encode_quit();
        let header = SyncHeader::from_bytes(&encoded).unwrap();
        assert_eq!(header.id, SyncId::Quit);
        assert_eq!(header.value, 0);
    }
}
