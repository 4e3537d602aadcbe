//! Stream-open negotiation.
//!
//! Before any frame is sent, the dialer names the protocol it wants along with
//! its public key and a random nonce. The listener answers with its own public
//! key, a signature over that nonce and a nonce of its own, so the dialer can
//! check it reached the peer id it dialed. If the protocol was accepted the
//! dialer closes the exchange with a signature over the listener's nonce, which
//! binds the inbound stream to the dialer's key. Each message is a 2-byte
//! big-endian length followed by JSON.

use std::time::Duration;

use ed25519_dalek::{Signature, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::NegotiationError;
use crate::identity::{verify, Identity, PeerId};

type Result<T> = std::result::Result<T, NegotiationError>;

/// Domain separators for the two challenge signatures.
const LISTENER_CONTEXT: &[u8] = b"shardlink-negotiate/listener";
const DIALER_CONTEXT: &[u8] = b"shardlink-negotiate/dialer";
const NONCE_LEN: usize = 32;
const MAX_PROTOCOL_LEN: usize = 64;

/// Default cap on a negotiation message: 16 KiB.
pub const DEFAULT_MAX_NEGOTIATION_PAYLOAD: usize = 16 * 1024;

/// Configuration for stream negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Deadline for the whole exchange.
    pub timeout: Duration,
    /// Maximum negotiation message size in bytes.
    pub max_payload: usize,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_payload: DEFAULT_MAX_NEGOTIATION_PAYLOAD,
        }
    }
}

/// Dialer -> listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NegotiationRequest {
    pub protocol: String,
    pub peer_id: String,
    /// Hex Ed25519 public key.
    pub public_key: String,
    /// Hex random challenge.
    pub nonce: String,
}

/// Listener -> dialer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NegotiationResponse {
    pub protocol: String,
    pub accepted: bool,
    pub peer_id: String,
    /// Hex Ed25519 public key.
    pub public_key: String,
    /// Hex signature over the context string and the request nonce.
    pub signature: String,
    /// Hex random challenge for the dialer.
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Dialer -> listener, only after an accepted response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NegotiationProof {
    /// Hex signature over the context string and the response nonce.
    pub signature: String,
}

/// Result of a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub remote_peer: PeerId,
    pub protocol: String,
}

/// Dialer side: request `protocol`, authenticate the listener and prove the
/// local identity.
///
/// When `expected` is set, the listener must prove that peer id.
pub async fn negotiate_outbound<S>(
    io: &mut S,
    identity: &Identity,
    protocol: &str,
    expected: Option<&PeerId>,
    config: &NegotiationConfig,
) -> Result<Negotiated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    validate_protocol(protocol)?;
    with_deadline(config.timeout, async {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let request = NegotiationRequest {
            protocol: protocol.to_string(),
            peer_id: identity.peer_id().to_string(),
            public_key: hex::encode(identity.public_key().as_bytes()),
            nonce: hex::encode(nonce),
        };
        write_message(io, &request, config.max_payload).await?;

        let response: NegotiationResponse = read_message(io, config.max_payload).await?;
        if response.protocol != protocol {
            return Err(NegotiationError::ProtocolMismatch {
                expected: protocol.to_string(),
                actual: response.protocol,
            });
        }
        if !response.accepted {
            return Err(NegotiationError::Rejected(
                response
                    .reason
                    .unwrap_or_else(|| "no reason given".to_string()),
            ));
        }

        let key = decode_public_key(&response.public_key)?;
        let remote_peer = PeerId::from_public_key(&key);
        if remote_peer.to_string() != response.peer_id {
            return Err(NegotiationError::PeerIdMismatch {
                expected: remote_peer.to_string(),
                actual: response.peer_id,
            });
        }

        let signature = decode_signature(&response.signature)?;
        if !verify(&key, &challenge(LISTENER_CONTEXT, &nonce), &signature) {
            return Err(NegotiationError::BadSignature);
        }

        if let Some(expected) = expected {
            if *expected != remote_peer {
                return Err(NegotiationError::PeerIdMismatch {
                    expected: expected.to_string(),
                    actual: remote_peer.to_string(),
                });
            }
        }

        let listener_nonce = decode_nonce(&response.nonce)?;
        let proof = NegotiationProof {
            signature: hex::encode(
                identity
                    .sign(&challenge(DIALER_CONTEXT, &listener_nonce))
                    .to_bytes(),
            ),
        };
        write_message(io, &proof, config.max_payload).await?;

        debug!(peer = %remote_peer, protocol, "outbound negotiation complete");
        Ok(Negotiated {
            remote_peer,
            protocol: protocol.to_string(),
        })
    })
    .await
}

/// Listener side: accept a request if its protocol is in `supported` and the
/// dialer proves the key it claimed.
///
/// Unsupported protocols are answered with a rejection before the error is
/// returned.
pub async fn negotiate_inbound<S>(
    io: &mut S,
    identity: &Identity,
    supported: &[String],
    config: &NegotiationConfig,
) -> Result<Negotiated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    with_deadline(config.timeout, async {
        let request: NegotiationRequest = read_message(io, config.max_payload).await?;
        validate_protocol(&request.protocol)?;

        let key = decode_public_key(&request.public_key)?;
        let remote_peer = PeerId::from_public_key(&key);
        if remote_peer.to_string() != request.peer_id {
            return Err(NegotiationError::PeerIdMismatch {
                expected: remote_peer.to_string(),
                actual: request.peer_id,
            });
        }

        let nonce = decode_nonce(&request.nonce)?;
        let mut own_nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut own_nonce);

        let accepted = supported.iter().any(|p| *p == request.protocol);
        let response = NegotiationResponse {
            protocol: request.protocol.clone(),
            accepted,
            peer_id: identity.peer_id().to_string(),
            public_key: hex::encode(identity.public_key().as_bytes()),
            signature: hex::encode(identity.sign(&challenge(LISTENER_CONTEXT, &nonce)).to_bytes()),
            nonce: hex::encode(own_nonce),
            reason: (!accepted).then(|| format!("protocol '{}' not supported", request.protocol)),
        };
        write_message(io, &response, config.max_payload).await?;

        if !accepted {
            return Err(NegotiationError::Unsupported(request.protocol));
        }

        let proof: NegotiationProof = read_message(io, config.max_payload).await?;
        let signature = decode_signature(&proof.signature)?;
        if !verify(&key, &challenge(DIALER_CONTEXT, &own_nonce), &signature) {
            return Err(NegotiationError::BadSignature);
        }

        debug!(peer = %remote_peer, protocol = %request.protocol, "inbound negotiation complete");
        Ok(Negotiated {
            remote_peer,
            protocol: request.protocol,
        })
    })
    .await
}

async fn with_deadline<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| NegotiationError::Timeout(timeout))?
}

fn challenge(context: &[u8], nonce: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(context.len() + nonce.len());
    message.extend_from_slice(context);
    message.extend_from_slice(nonce);
    message
}

fn decode_nonce(text: &str) -> Result<Vec<u8>> {
    let nonce = hex::decode(text)
        .map_err(|err| NegotiationError::Rejected(format!("invalid nonce: {err}")))?;
    if nonce.len() != NONCE_LEN {
        return Err(NegotiationError::Rejected(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    Ok(nonce)
}

fn validate_protocol(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN || !protocol.starts_with('/') {
        return Err(NegotiationError::Unsupported(protocol.to_string()));
    }
    Ok(())
}

fn decode_public_key(text: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(text).map_err(|err| NegotiationError::InvalidKey(err.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NegotiationError::InvalidKey("expected 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|err| NegotiationError::InvalidKey(err.to_string()))
}

fn decode_signature(text: &str) -> Result<Signature> {
    let bytes = hex::decode(text).map_err(|_| NegotiationError::BadSignature)?;
    Signature::from_slice(&bytes).map_err(|_| NegotiationError::BadSignature)
}

async fn write_message<W, T>(io: &mut W, value: &T, max_payload: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    let max = max_payload.min(u16::MAX as usize);
    if body.len() > max {
        return Err(NegotiationError::PayloadTooLarge {
            size: body.len(),
            max,
        });
    }
    io.write_u16(body.len() as u16).await?;
    io.write_all(&body).await?;
    io.flush().await?;
    Ok(())
}

async fn read_message<R, T>(io: &mut R, max_payload: usize) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = io.read_u16().await? as usize;
    if len > max_payload {
        return Err(NegotiationError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }
    let mut body = vec![0u8; len];
    io.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTOCOL: &str = "/node/1.0.0";

    fn supported() -> Vec<String> {
        vec![PROTOCOL.to_string()]
    }

    #[tokio::test]
    async fn successful_negotiation() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let dialer = Identity::from_seed(1);
        let listener = Identity::from_seed(2);
        let listener_id = listener.peer_id();
        let config = NegotiationConfig::default();

        let server_task = tokio::spawn(async move {
            negotiate_inbound(&mut server, &listener, &supported(), &NegotiationConfig::default())
                .await
        });

        let outbound = negotiate_outbound(&mut client, &dialer, PROTOCOL, Some(&listener_id), &config)
            .await
            .unwrap();
        let inbound = server_task.await.unwrap().unwrap();

        assert_eq!(outbound.remote_peer, listener_id);
        assert_eq!(outbound.protocol, PROTOCOL);
        assert_eq!(inbound.remote_peer, dialer.peer_id());
    }

    #[tokio::test]
    async fn unsupported_protocol_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let dialer = Identity::from_seed(1);
        let listener = Identity::from_seed(2);

        let server_task = tokio::spawn(async move {
            negotiate_inbound(&mut server, &listener, &supported(), &NegotiationConfig::default())
                .await
        });

        let err = negotiate_outbound(
            &mut client,
            &dialer,
            "/other/2.0.0",
            None,
            &NegotiationConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NegotiationError::Rejected(_)));
        assert!(matches!(
            server_task.await.unwrap(),
            Err(NegotiationError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn wrong_expected_peer_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let dialer = Identity::from_seed(1);
        let listener = Identity::from_seed(2);
        let someone_else = Identity::from_seed(3).peer_id();

        tokio::spawn(async move {
            let _ = negotiate_inbound(
                &mut server,
                &listener,
                &supported(),
                &NegotiationConfig::default(),
            )
            .await;
        });

        let err = negotiate_outbound(
            &mut client,
            &dialer,
            PROTOCOL,
            Some(&someone_else),
            &NegotiationConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NegotiationError::PeerIdMismatch { .. }));
    }

    #[tokio::test]
    async fn forged_signature_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let dialer = Identity::from_seed(1);
        let impostor = Identity::from_seed(5);

        tokio::spawn(async move {
            let request: NegotiationRequest =
                read_message(&mut server, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
                    .await
                    .unwrap();
            let response = NegotiationResponse {
                protocol: request.protocol,
                accepted: true,
                peer_id: impostor.peer_id().to_string(),
                public_key: hex::encode(impostor.public_key().as_bytes()),
                // signs the wrong message
                signature: hex::encode(impostor.sign(b"something else").to_bytes()),
                nonce: hex::encode([0u8; NONCE_LEN]),
                reason: None,
            };
            write_message(&mut server, &response, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
                .await
                .unwrap();
        });

        let err = negotiate_outbound(
            &mut client,
            &dialer,
            PROTOCOL,
            None,
            &NegotiationConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NegotiationError::BadSignature));
    }

    #[tokio::test]
    async fn impersonated_dialer_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let listener = Identity::from_seed(2);
        let honest = Identity::from_seed(1);
        let claimed = Identity::from_seed(9).peer_id();

        let request = NegotiationRequest {
            protocol: PROTOCOL.to_string(),
            peer_id: claimed.to_string(),
            public_key: hex::encode(honest.public_key().as_bytes()),
            nonce: hex::encode([0u8; NONCE_LEN]),
        };
        write_message(&mut client, &request, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
            .await
            .unwrap();

        let err = negotiate_inbound(&mut server, &listener, &supported(), &NegotiationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::PeerIdMismatch { .. }));
    }

    #[tokio::test]
    async fn dialer_without_claimed_key_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let listener = Identity::from_seed(2);
        let victim = Identity::from_seed(9);
        let attacker = Identity::from_seed(1);

        let server_task = tokio::spawn(async move {
            negotiate_inbound(&mut server, &listener, &supported(), &NegotiationConfig::default())
                .await
        });

        // claims the victim's key, which it cannot sign for
        let request = NegotiationRequest {
            protocol: PROTOCOL.to_string(),
            peer_id: victim.peer_id().to_string(),
            public_key: hex::encode(victim.public_key().as_bytes()),
            nonce: hex::encode([7u8; NONCE_LEN]),
        };
        write_message(&mut client, &request, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
            .await
            .unwrap();
        let response: NegotiationResponse = read_message(&mut client, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
            .await
            .unwrap();
        assert!(response.accepted);

        let listener_nonce = hex::decode(&response.nonce).unwrap();
        let proof = NegotiationProof {
            signature: hex::encode(
                attacker
                    .sign(&challenge(DIALER_CONTEXT, &listener_nonce))
                    .to_bytes(),
            ),
        };
        write_message(&mut client, &proof, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
            .await
            .unwrap();

        assert!(matches!(
            server_task.await.unwrap(),
            Err(NegotiationError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn replayed_listener_signature_is_not_a_dialer_proof() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let listener = Identity::from_seed(2);
        let dialer = Identity::from_seed(1);

        let server_task = tokio::spawn(async move {
            negotiate_inbound(&mut server, &listener, &supported(), &NegotiationConfig::default())
                .await
        });

        let request = NegotiationRequest {
            protocol: PROTOCOL.to_string(),
            peer_id: dialer.peer_id().to_string(),
            public_key: hex::encode(dialer.public_key().as_bytes()),
            nonce: hex::encode([3u8; NONCE_LEN]),
        };
        write_message(&mut client, &request, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
            .await
            .unwrap();
        let response: NegotiationResponse = read_message(&mut client, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
            .await
            .unwrap();

        // right key, wrong context
        let listener_nonce = hex::decode(&response.nonce).unwrap();
        let proof = NegotiationProof {
            signature: hex::encode(
                dialer
                    .sign(&challenge(LISTENER_CONTEXT, &listener_nonce))
                    .to_bytes(),
            ),
        };
        write_message(&mut client, &proof, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
            .await
            .unwrap();

        assert!(matches!(
            server_task.await.unwrap(),
            Err(NegotiationError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn short_nonce_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let dialer = Identity::from_seed(1);
        let request = NegotiationRequest {
            protocol: PROTOCOL.to_string(),
            peer_id: dialer.peer_id().to_string(),
            public_key: hex::encode(dialer.public_key().as_bytes()),
            nonce: hex::encode([1u8; 4]),
        };
        write_message(&mut client, &request, DEFAULT_MAX_NEGOTIATION_PAYLOAD)
            .await
            .unwrap();

        let err = negotiate_inbound(
            &mut server,
            &Identity::from_seed(2),
            &supported(),
            &NegotiationConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NegotiationError::Rejected(_)));
    }

    #[tokio::test]
    async fn oversized_message_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_u16(60_000).await.unwrap();

        let err = negotiate_inbound(
            &mut server,
            &Identity::from_seed(2),
            &supported(),
            &NegotiationConfig {
                max_payload: 1024,
                ..NegotiationConfig::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NegotiationError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (mut client, _server) = tokio::io::duplex(4096);
        let err = negotiate_outbound(
            &mut client,
            &Identity::from_seed(1),
            PROTOCOL,
            None,
            &NegotiationConfig {
                timeout: Duration::from_millis(50),
                ..NegotiationConfig::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NegotiationError::Timeout(_)));
    }

    #[tokio::test]
    async fn invalid_json_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_u16(3).await.unwrap();
        client.write_all(b"{{{").await.unwrap();

        let err = negotiate_inbound(
            &mut server,
            &Identity::from_seed(2),
            &supported(),
            &NegotiationConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NegotiationError::Json(_)));
    }
}
