use crate::auth::{Signer, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE, AUTH_TOKEN, TOKEN_SIZE};
use crate::error::{AdbError, AdbResult};
use crate::transport::Transport;
use crate::wire::{
    Command, Message, WirePolicy, MAX_PAYLOAD, MAX_PAYLOAD_MIN, VERSION, VERSION_MIN,
    VERSION_SKIP_CHECKSUM,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Options for establishing a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Deadline for the whole handshake, including the wait for operator
    /// approval after the public key has been published.
    pub handshake_timeout: Duration,
    /// Deadline applied to each blocking stream operation after the session
    /// is online.
    pub io_timeout: Duration,
    /// Features advertised in the host banner.
    pub features: Vec<String>,
    /// Identity announced in the host banner (conventionally `host`).
    pub identity: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(30),
            features: vec![
                "shell_v2".to_string(),
                "cmd".to_string(),
                "stat_v2".to_string(),
            ],
            identity: "host".to_string(),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    fn banner_payload(&self) -> Vec<u8> {
        let mut banner = format!("{}::", self.identity);
        if !self.features.is_empty() {
            banner.push_str("features=");
            banner.push_str(&self.features.join(","));
        }
        banner.push('\0');
        banner.into_bytes()
    }
}

/// Parsed CNXN banner: `<state>::<k=v;k=v;...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    /// Connection state announced by the peer (`device`, `host`, ...).
    pub state: String,
    /// The `k=v` property pairs, in banner order. Malformed pairs are skipped.
    pub properties: Vec<(String, String)>,
}

impl Banner {
    pub fn parse(payload: &[u8]) -> Banner {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end_matches('\0');
        let (state, props) = match text.split_once("::") {
            Some((state, props)) => (state, props),
            None => (text, ""),
        };
        let properties = props
            .split(';')
            .filter(|p| !p.is_empty())
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k.to_string(), v.to_string()))
            })
            .collect();
        Banner {
            state: state.to_string(),
            properties,
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `features=` property split into a set of identifiers.
    pub fn features(&self) -> HashSet<String> {
        self.property("features")
            .map(|list| {
                list.split(',')
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Negotiated session parameters, produced by the handshake.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Peer protocol version from its CNXN.
    pub protocol_version: u32,
    /// Peer max payload, clamped to the supported range.
    pub max_payload: u32,
    /// Parsed peer banner.
    pub banner: Banner,
    /// Feature identifiers shared by the peer.
    pub features: HashSet<String>,
    /// Whether messages on this session still carry payload checksums.
    pub checksums: bool,
}

impl SessionInfo {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn wire_policy(&self) -> WirePolicy {
        WirePolicy {
            checksums: self.checksums,
            max_payload: self.max_payload,
        }
    }
}

/// Drive the CNXN/AUTH exchange until the peer reports online.
///
/// Returns the transport (with the negotiated wire policy installed) and the
/// session parameters. The handshake owns the transport exclusively; the
/// stream multiplexer takes over afterwards.
pub async fn handshake(
    mut transport: Transport,
    signers: &[Arc<dyn Signer>],
    opts: &ConnectOptions,
) -> AdbResult<(Transport, SessionInfo)> {
    let deadline = Instant::now() + opts.handshake_timeout;

    let cnxn = Message::new(
        Command::Connect,
        VERSION,
        MAX_PAYLOAD,
        opts.banner_payload(),
    );
    debug!("Sending CNXN (version {:#010x})", VERSION);
    transport.write_message(&cnxn).await?;

    let mut next_key = 0usize;
    let mut sent_public_key = false;
    let mut auth_started = false;

    loop {
        let message = match tokio::time::timeout_at(deadline, transport.read_message()).await {
            Ok(result) => result?,
            Err(_) if auth_started => return Err(AdbError::AuthenticationFailed),
            Err(_) => return Err(AdbError::Timeout),
        };

        match message.command {
            Command::Connect => {
                let info = parse_peer_cnxn(&message)?;
                debug!(
                    "Session online: version {:#010x}, max payload {}, features {:?}",
                    info.protocol_version, info.max_payload, info.features
                );
                transport.set_policy(info.wire_policy());
                return Ok((transport, info));
            }
            Command::Auth if message.arg0 == AUTH_TOKEN => {
                auth_started = true;
                let token: &[u8; TOKEN_SIZE] =
                    message.payload.as_slice().try_into().map_err(|_| {
                        AdbError::Protocol(format!(
                            "AUTH token of {} bytes, expected {}",
                            message.payload.len(),
                            TOKEN_SIZE
                        ))
                    })?;

                if let Some(signer) = signers.get(next_key) {
                    next_key += 1;
                    debug!("Answering AUTH token with key {}", next_key);
                    let signature = signer.sign(token)?;
                    transport
                        .write_message(&Message::new(Command::Auth, AUTH_SIGNATURE, 0, signature))
                        .await?;
                } else if sent_public_key {
                    // The device re-issued a token after seeing our public
                    // key: it rejected the host.
                    return Err(AdbError::AuthenticationFailed);
                } else {
                    let Some(signer) = signers.first() else {
                        return Err(AdbError::AuthenticationFailed);
                    };
                    debug!("Keys exhausted; publishing public key and waiting for approval");
                    let mut key = signer.public_key()?;
                    key.push(0);
                    transport
                        .write_message(&Message::new(Command::Auth, AUTH_RSAPUBLICKEY, 0, key))
                        .await?;
                    sent_public_key = true;
                }
            }
            Command::Auth => {
                return Err(AdbError::InvalidResponse {
                    expected: format!("AUTH type {AUTH_TOKEN} (token)"),
                    actual: format!("AUTH type {}", message.arg0),
                });
            }
            Command::StartTls => {
                // The peer demands a TLS upgrade before going online; this
                // client does not speak TLS.
                return Err(AdbError::Unsupported("TLS upgrade (STLS)"));
            }
            other => {
                return Err(AdbError::InvalidResponse {
                    expected: "CNXN or AUTH".to_string(),
                    actual: format!("{:?}", other),
                });
            }
        }
    }
}

fn parse_peer_cnxn(message: &Message) -> AdbResult<SessionInfo> {
    let protocol_version = message.arg0;
    if protocol_version < VERSION_MIN {
        return Err(AdbError::ProtocolVersionMismatch {
            peer: protocol_version,
        });
    }
    let max_payload = message.arg1.clamp(MAX_PAYLOAD_MIN, MAX_PAYLOAD);
    let banner = Banner::parse(&message.payload);
    let features = banner.features();
    let checksums = !(VERSION >= VERSION_SKIP_CHECKSUM && protocol_version >= VERSION_SKIP_CHECKSUM);
    Ok(SessionInfo {
        protocol_version,
        max_payload,
        banner,
        features,
        checksums,
    })
}
