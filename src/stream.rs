use crate::error::{AdbError, AdbResult};
use crate::mux::SessionCore;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events routed to a stream handle by the session's reader task.
pub(crate) enum StreamEvent {
    /// Payload of an inbound WRTE frame.
    Data(Vec<u8>),
    /// Peer acknowledged our last WRTE; the next chunk may be sent.
    Ack,
    /// The stream is finished: `None` for an orderly peer close, `Some`
    /// with the cause when the whole session failed.
    Closed(Option<String>),
}

/// A logical bidirectional byte channel multiplexed over the session.
///
/// Handles are sequential: reads and writes take `&mut self`, which is how
/// the per-stream serialization the protocol requires is enforced. Every
/// blocking operation is bounded by the session's I/O timeout; on timeout
/// the stream is closed and `Timeout` returned.
pub struct AdbStream {
    local_id: u32,
    remote_id: u32,
    core: Arc<SessionCore>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    /// Inbound chunks delivered but not yet consumed. `offset` tracks how
    /// much of the front chunk `read_exact` has already taken.
    pending: VecDeque<Vec<u8>>,
    offset: usize,
    can_write: bool,
    peer_closed: bool,
    fail_cause: Option<String>,
    local_closed: bool,
}

impl AdbStream {
    pub(crate) fn new(
        local_id: u32,
        remote_id: u32,
        core: Arc<SessionCore>,
        events: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Self {
        Self {
            local_id,
            remote_id,
            core,
            events,
            pending: VecDeque::new(),
            offset: 0,
            can_write: true,
            peer_closed: false,
            fail_cause: None,
            local_closed: false,
        }
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    /// Read the next chunk of inbound data. `Ok(None)` means the peer closed
    /// the stream (EOF).
    pub async fn read(&mut self) -> AdbResult<Option<Vec<u8>>> {
        match tokio::time::timeout(self.core.io_timeout(), self.read_inner()).await {
            Ok(result) => result,
            Err(_) => {
                self.close();
                Err(AdbError::Timeout)
            }
        }
    }

    async fn read_inner(&mut self) -> AdbResult<Option<Vec<u8>>> {
        loop {
            self.check_open()?;
            if let Some(front) = self.pending.pop_front() {
                let chunk = if self.offset > 0 {
                    front[self.offset..].to_vec()
                } else {
                    front
                };
                self.offset = 0;
                return Ok(Some(chunk));
            }
            if self.peer_closed {
                return Ok(None);
            }
            self.wait_event().await;
        }
    }

    /// Read exactly `n` bytes, spanning chunk boundaries. A stream that ends
    /// early is a protocol error.
    pub async fn read_exact(&mut self, n: usize) -> AdbResult<Vec<u8>> {
        match tokio::time::timeout(self.core.io_timeout(), self.read_exact_inner(n)).await {
            Ok(result) => result,
            Err(_) => {
                self.close();
                Err(AdbError::Timeout)
            }
        }
    }

    async fn read_exact_inner(&mut self, n: usize) -> AdbResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            self.check_open()?;
            if let Some(front) = self.pending.front() {
                let available = &front[self.offset..];
                let take = available.len().min(n - out.len());
                out.extend_from_slice(&available[..take]);
                self.offset += take;
                if self.offset == front.len() {
                    self.pending.pop_front();
                    self.offset = 0;
                }
                continue;
            }
            if self.peer_closed {
                return Err(AdbError::Protocol(format!(
                    "Stream ended early: got {} of {} bytes",
                    out.len(),
                    n
                )));
            }
            self.wait_event().await;
        }
        Ok(out)
    }

    /// Read until the peer closes the stream.
    pub async fn read_to_end(&mut self) -> AdbResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Write `data`, split into chunks of at most the negotiated max payload.
    ///
    /// Each chunk waits for the peer's acknowledgement of the previous one:
    /// at most one WRTE is ever in flight.
    pub async fn write(&mut self, data: &[u8]) -> AdbResult<()> {
        match tokio::time::timeout(self.core.io_timeout(), self.write_inner(data)).await {
            Ok(result) => result,
            Err(_) => {
                self.close();
                Err(AdbError::Timeout)
            }
        }
    }

    async fn write_inner(&mut self, data: &[u8]) -> AdbResult<()> {
        for chunk in data.chunks(self.core.max_payload()) {
            loop {
                self.check_open()?;
                if self.peer_closed {
                    return Err(AdbError::StreamClosed("closed by peer".to_string()));
                }
                if self.can_write {
                    break;
                }
                self.wait_event().await;
            }
            self.core
                .send_write(self.local_id, self.remote_id, chunk.to_vec())?;
            self.can_write = false;
        }
        Ok(())
    }

    /// Close the stream: sends CLSE and discards any buffered inbound data.
    /// Further reads and writes fail with `StreamClosed`.
    pub fn close(&mut self) {
        if self.local_closed {
            return;
        }
        self.local_closed = true;
        self.pending.clear();
        self.offset = 0;
        self.core.close_stream(self.local_id);
    }

    fn check_open(&self) -> AdbResult<()> {
        if self.local_closed {
            return Err(AdbError::StreamClosed("stream closed locally".to_string()));
        }
        if let Some(cause) = &self.fail_cause {
            return Err(AdbError::StreamClosed(cause.clone()));
        }
        Ok(())
    }

    async fn wait_event(&mut self) {
        match self.events.recv().await {
            Some(StreamEvent::Data(chunk)) => self.pending.push_back(chunk),
            Some(StreamEvent::Ack) => self.can_write = true,
            Some(StreamEvent::Closed(None)) => self.peer_closed = true,
            Some(StreamEvent::Closed(Some(cause))) => self.fail_cause = Some(cause),
            None => self.fail_cause = Some("session closed".to_string()),
        }
    }
}

impl Drop for AdbStream {
    fn drop(&mut self) {
        if !self.local_closed {
            self.core.close_stream(self.local_id);
        }
    }
}
