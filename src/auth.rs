use crate::error::AdbResult;

/// AUTH message type: peer sent a random token to sign.
pub const AUTH_TOKEN: u32 = 1;
/// AUTH message type: host answers with a signature over the token.
pub const AUTH_SIGNATURE: u32 = 2;
/// AUTH message type: host publishes its public key for operator approval.
pub const AUTH_RSAPUBLICKEY: u32 = 3;

/// Size of the random token the device sends in an AUTH round.
pub const TOKEN_SIZE: usize = 20;

/// Signing capability consumed by the connection handshake.
///
/// Key discovery and parsing happen outside the core: callers load whatever
/// key material they manage (conventionally PEM files on disk) and hand the
/// handshake a list of signers to try in order.
pub trait Signer: Send + Sync {
    /// Sign the device's auth token with this key.
    fn sign(&self, token: &[u8; TOKEN_SIZE]) -> AdbResult<Vec<u8>>;

    /// The public half of this key, in the form adbd expects to persist
    /// when the operator approves the host.
    fn public_key(&self) -> AdbResult<Vec<u8>>;
}
