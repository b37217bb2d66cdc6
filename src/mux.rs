use crate::auth::Signer;
use crate::connection::{handshake, ConnectOptions, SessionInfo};
use crate::error::{AdbError, AdbResult};
use crate::stream::{AdbStream, StreamEvent};
use crate::transport::{MessageReader, MessageWriter, Transport};
use crate::wire::{Command, Message};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// OPEN sent, waiting for the peer's OKAY.
    Opening,
    /// Both sides established.
    Open,
    /// We sent CLSE; the entry absorbs late frames until the peer's CLSE.
    Closing,
}

struct StreamEntry {
    remote_id: u32,
    state: StreamState,
    service: String,
    events: mpsc::UnboundedSender<StreamEvent>,
    opened: Option<oneshot::Sender<AdbResult<u32>>>,
}

struct MuxState {
    streams: HashMap<u32, StreamEntry>,
    next_local_id: u32,
    /// Set once when the session dies; all later operations fail with it.
    fail_cause: Option<String>,
}

/// Shared state behind a session: the stream table and the outbound queue.
///
/// The multiplexer owns every stream; `AdbStream` handles hold their local id
/// plus a reference back here. The std mutex is only ever held across
/// non-awaiting sections.
pub(crate) struct SessionCore {
    info: SessionInfo,
    io_timeout: Duration,
    outbound: mpsc::UnboundedSender<Message>,
    state: Mutex<MuxState>,
}

impl SessionCore {
    pub(crate) fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub(crate) fn max_payload(&self) -> usize {
        self.info.max_payload as usize
    }

    fn send(&self, message: Message) -> AdbResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| AdbError::StreamClosed("session closed".to_string()))
    }

    pub(crate) fn send_write(&self, local_id: u32, remote_id: u32, chunk: Vec<u8>) -> AdbResult<()> {
        self.send(Message::new(Command::Write, local_id, remote_id, chunk))
    }

    /// Locally close a stream: transition to `Closing` and queue our CLSE.
    /// Called from handles (including on drop), so it never awaits.
    pub(crate) fn close_stream(&self, local_id: u32) {
        let remote_id = {
            let mut state = self.state.lock().unwrap();
            match state.streams.get_mut(&local_id) {
                Some(entry) if entry.state != StreamState::Closing => {
                    entry.state = StreamState::Closing;
                    entry.opened = None;
                    entry.remote_id
                }
                // Already closing, or the peer's CLSE got here first.
                _ => return,
            }
        };
        let _ = self
            .outbound
            .send(Message::new(Command::Close, local_id, remote_id, Vec::new()));
    }
}

/// An online ADB session: the connection handshake's result plus the stream
/// multiplexer running on top of the transport.
///
/// One spawned reader task routes every inbound message to the owning stream;
/// one spawned writer task drains the outbound queue. Dropping the session
/// stops both and severs all streams.
pub struct Session {
    core: Arc<SessionCore>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Session {
    /// Run the connection handshake on `transport` and bring the
    /// multiplexer online.
    pub async fn connect(
        transport: Transport,
        signers: &[Arc<dyn Signer>],
        opts: ConnectOptions,
    ) -> AdbResult<Session> {
        let (transport, info) = handshake(transport, signers, &opts).await?;
        Ok(Self::online(transport, info, opts.io_timeout))
    }

    fn online(transport: Transport, info: SessionInfo, io_timeout: Duration) -> Session {
        let (reader, writer) = transport.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let core = Arc::new(SessionCore {
            info,
            io_timeout,
            outbound,
            state: Mutex::new(MuxState {
                streams: HashMap::new(),
                next_local_id: 1,
                fail_cause: None,
            }),
        });
        let writer_task = tokio::spawn(write_loop(writer, outbound_rx, Arc::clone(&core)));
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&core)));
        Session {
            core,
            reader_task,
            writer_task,
        }
    }

    /// Negotiated session parameters.
    pub fn info(&self) -> &SessionInfo {
        &self.core.info
    }

    /// Open a stream to the named service (`shell:ls`, `sync:`, ...).
    ///
    /// Resolves once the peer acknowledges the OPEN; a peer CLSE instead is
    /// `ServiceRejected`.
    pub async fn open(&self, service: &str) -> AdbResult<AdbStream> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = oneshot::channel();

        let local_id = {
            let mut state = self.core.state.lock().unwrap();
            if let Some(cause) = &state.fail_cause {
                return Err(AdbError::StreamClosed(cause.clone()));
            }
            let id = alloc_local_id(&mut state);
            state.streams.insert(
                id,
                StreamEntry {
                    remote_id: 0,
                    state: StreamState::Opening,
                    service: service.to_string(),
                    events: events_tx,
                    opened: Some(opened_tx),
                },
            );
            id
        };

        let mut payload = service.as_bytes().to_vec();
        payload.push(0);
        debug!("OPEN {:?} as stream {}", service, local_id);
        self.core
            .send(Message::new(Command::Open, local_id, 0, payload))?;

        match tokio::time::timeout(self.core.io_timeout, opened_rx).await {
            Ok(Ok(Ok(remote_id))) => Ok(AdbStream::new(
                local_id,
                remote_id,
                Arc::clone(&self.core),
                events_rx,
            )),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(AdbError::StreamClosed("session closed".to_string())),
            Err(_) => {
                self.core.close_stream(local_id);
                Err(AdbError::Timeout)
            }
        }
    }

    /// Tear the session down: every live stream fails with `StreamClosed`
    /// and the transport is dropped.
    pub fn close(self) {
        poison(&self.core, "session closed".to_string());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

fn alloc_local_id(state: &mut MuxState) -> u32 {
    loop {
        let id = state.next_local_id;
        state.next_local_id = state.next_local_id.wrapping_add(1);
        if id != 0 && !state.streams.contains_key(&id) {
            return id;
        }
    }
}

/// Fail the session: record the cause and sever every live stream.
fn poison(core: &SessionCore, cause: String) {
    let mut state = core.state.lock().unwrap();
    if state.fail_cause.is_some() {
        return;
    }
    state.fail_cause = Some(cause.clone());
    for (_, mut entry) in state.streams.drain() {
        if let Some(tx) = entry.opened.take() {
            let _ = tx.send(Err(AdbError::StreamClosed(cause.clone())));
        }
        let _ = entry.events.send(StreamEvent::Closed(Some(cause.clone())));
    }
}

async fn write_loop(
    mut writer: MessageWriter,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    core: Arc<SessionCore>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = writer.write_message(&message).await {
            debug!("Writer task ending: {}", e);
            poison(&core, format!("transport write failed: {e}"));
            return;
        }
    }
}

async fn read_loop(mut reader: MessageReader, core: Arc<SessionCore>) {
    loop {
        let message = match reader.read_message().await {
            Ok(message) => message,
            Err(e) => {
                debug!("Reader task ending: {}", e);
                poison(&core, e.to_string());
                return;
            }
        };
        if let Err(cause) = route(&core, message) {
            poison(&core, cause);
            return;
        }
    }
}

/// Dispatch one inbound message to its stream. Runs on the reader task;
/// never awaits, so acknowledgements enter the writer queue in frame order.
fn route(core: &SessionCore, message: Message) -> Result<(), String> {
    let local_id = message.arg1;
    match message.command {
        Command::Okay => {
            let mut state = core.state.lock().unwrap();
            match state.streams.get_mut(&local_id) {
                Some(entry) if entry.state == StreamState::Opening => {
                    entry.remote_id = message.arg0;
                    entry.state = StreamState::Open;
                    debug!("Stream {} open (remote {})", local_id, message.arg0);
                    if let Some(tx) = entry.opened.take() {
                        let _ = tx.send(Ok(message.arg0));
                    }
                }
                Some(entry) => {
                    // Write acknowledgement.
                    let _ = entry.events.send(StreamEvent::Ack);
                }
                None => warn!("OKAY for unknown stream {}", local_id),
            }
            Ok(())
        }
        Command::Write => {
            let reply = {
                let mut state = core.state.lock().unwrap();
                match state.streams.get_mut(&local_id) {
                    Some(entry) if entry.state == StreamState::Open => {
                        let remote_id = entry.remote_id;
                        let _ = entry.events.send(StreamEvent::Data(message.payload));
                        // Per-frame acknowledgement; this is the peer's flow control.
                        Some(Message::new(Command::Okay, local_id, remote_id, Vec::new()))
                    }
                    Some(entry) if entry.state == StreamState::Closing => {
                        // Locally closed: acknowledge and discard.
                        Some(Message::new(
                            Command::Okay,
                            local_id,
                            entry.remote_id,
                            Vec::new(),
                        ))
                    }
                    Some(_) => {
                        warn!("WRTE for stream {} before it is open", local_id);
                        None
                    }
                    None => Some(Message::new(Command::Close, 0, message.arg0, Vec::new())),
                }
            };
            if let Some(reply) = reply {
                let _ = core.outbound.send(reply);
            }
            Ok(())
        }
        Command::Close => {
            let mut state = core.state.lock().unwrap();
            if let Some(mut entry) = state.streams.remove(&local_id) {
                match entry.state {
                    StreamState::Opening => {
                        debug!("OPEN of {:?} rejected by peer", entry.service);
                        if let Some(tx) = entry.opened.take() {
                            let _ = tx.send(Err(AdbError::ServiceRejected(entry.service)));
                        }
                    }
                    StreamState::Open => {
                        let _ = entry.events.send(StreamEvent::Closed(None));
                        drop(state);
                        // Complete the close from our side.
                        let _ = core.outbound.send(Message::new(
                            Command::Close,
                            local_id,
                            entry.remote_id,
                            Vec::new(),
                        ));
                    }
                    StreamState::Closing => {
                        let _ = entry.events.send(StreamEvent::Closed(None));
                    }
                }
            } else {
                debug!("CLSE for unknown stream {}", local_id);
            }
            Ok(())
        }
        Command::Sync => {
            // Legacy internal message; nothing routes on it.
            warn!("Ignoring SYNC message from peer");
            Ok(())
        }
        Command::Connect | Command::Auth | Command::StartTls | Command::Open => Err(format!(
            "Unexpected {:?} message after handshake",
            message.command
        )),
    }
}
