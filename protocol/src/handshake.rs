//! Node handshake: mutual authentication in three messages.
//!
//! ```text
//! dialer                                   acceptor
//!   | -- Hello { version, identity } -------> |  version ok, not our identity
//!   | <------ SealedSignature(identity) ----- |  reveals acceptor + proves key
//!   | -- Signature(acceptor identity) ------> |  proves dialer's key
//! ```
//!
//! Neither side needs a pre-shared identity list. [`Acceptor`] and [`Dialer`]
//! are I/O-free state machines; [`accept`] and [`dial`] drive them over a
//! byte stream. Pool registration is left to the caller.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use witness_crypto::{sign_message, verify_signature, SealedSignature};
use witness_types::{Identity, KeyPair, Signature};

use crate::codec::{self, HANDSHAKE_FRAME_LIMIT};
use crate::version::{is_compatible, PROTOCOL_VERSION};
use crate::{HandshakeError, ProtocolError};

/// Stage 0, dialer to acceptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub version: u32,
    pub identity: Identity,
}

/// Progress of one side of the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    SendHello,
    AwaitPeerHello,
    AwaitPeerProof,
    Authenticated(Identity),
    Rejected,
}

/// Acceptor side of the handshake.
pub struct Acceptor<'a> {
    keypair: &'a KeyPair,
    state: HandshakeState,
    claimed: Option<Identity>,
}

impl<'a> Acceptor<'a> {
    pub fn new(keypair: &'a KeyPair) -> Self {
        Self {
            keypair,
            state: HandshakeState::AwaitPeerHello,
            claimed: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Check the hello and produce the challenge: our sealed signature over
    /// the claimed identity.
    pub fn on_hello(&mut self, hello: &Hello) -> Result<SealedSignature, HandshakeError> {
        if self.state != HandshakeState::AwaitPeerHello {
            return self.reject(HandshakeError::OutOfOrder(self.state));
        }
        if !is_compatible(hello.version) {
            return self.reject(HandshakeError::UnsupportedVersion(hello.version));
        }
        if hello.identity == self.keypair.identity {
            return self.reject(HandshakeError::SelfConnect);
        }
        self.claimed = Some(hello.identity);
        self.state = HandshakeState::AwaitPeerProof;
        Ok(SealedSignature::sign(hello.identity.as_bytes(), self.keypair))
    }

    /// Verify the dialer signed our identity with the key it claimed.
    pub fn on_proof(&mut self, proof: &Signature) -> Result<Identity, HandshakeError> {
        let claimed = match (self.state, self.claimed) {
            (HandshakeState::AwaitPeerProof, Some(claimed)) => claimed,
            _ => return self.reject(HandshakeError::OutOfOrder(self.state)),
        };
        if !verify_signature(self.keypair.identity.as_bytes(), proof, &claimed) {
            return self.reject(HandshakeError::InvalidProof);
        }
        self.state = HandshakeState::Authenticated(claimed);
        Ok(claimed)
    }

    fn reject<T>(&mut self, err: HandshakeError) -> Result<T, HandshakeError> {
        self.state = HandshakeState::Rejected;
        Err(err)
    }
}

/// Dialer side of the handshake.
pub struct Dialer<'a> {
    keypair: &'a KeyPair,
    pinned: Option<Identity>,
    state: HandshakeState,
}

impl<'a> Dialer<'a> {
    /// `pinned` is the identity previously discovered at this endpoint, if any.
    pub fn new(keypair: &'a KeyPair, pinned: Option<Identity>) -> Self {
        Self {
            keypair,
            pinned,
            state: HandshakeState::Start,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn hello(&mut self) -> Hello {
        self.state = HandshakeState::SendHello;
        Hello {
            version: PROTOCOL_VERSION,
            identity: self.keypair.identity,
        }
    }

    /// Verify the acceptor's challenge and produce our proof.
    ///
    /// Returns the discovered peer identity and the signature to send back.
    pub fn on_challenge(
        &mut self,
        challenge: &SealedSignature,
    ) -> Result<(Identity, Signature), HandshakeError> {
        if self.state != HandshakeState::SendHello {
            return self.reject(HandshakeError::OutOfOrder(self.state));
        }
        self.state = HandshakeState::AwaitPeerProof;
        if !challenge.verify(self.keypair.identity.as_bytes()) {
            return self.reject(HandshakeError::InvalidChallenge);
        }
        let discovered = *challenge.signer();
        if discovered == self.keypair.identity {
            return self.reject(HandshakeError::SelfConnect);
        }
        if let Some(pinned) = self.pinned {
            if pinned != discovered {
                return self.reject(HandshakeError::IdentityMismatch { pinned, discovered });
            }
        }
        let proof = sign_message(discovered.as_bytes(), &self.keypair.private);
        self.state = HandshakeState::Authenticated(discovered);
        Ok((discovered, proof))
    }

    fn reject<T>(&mut self, err: HandshakeError) -> Result<T, HandshakeError> {
        self.state = HandshakeState::Rejected;
        Err(err)
    }
}

/// Run the acceptor side over `stream`, returning the authenticated peer.
pub async fn accept<S>(stream: &mut S, keypair: &KeyPair) -> Result<Identity, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut acceptor = Acceptor::new(keypair);

    let hello: Hello = codec::decode(&codec::read_frame(stream, HANDSHAKE_FRAME_LIMIT).await?)?;
    let challenge = acceptor.on_hello(&hello)?;
    codec::write_frame(stream, &codec::encode(&challenge)?).await?;

    let proof: Signature =
        codec::decode(&codec::read_frame(stream, HANDSHAKE_FRAME_LIMIT).await?)?;
    let peer = acceptor.on_proof(&proof)?;
    tracing::trace!(peer = %peer, "acceptor handshake complete");
    Ok(peer)
}

/// Run the dialer side over `stream`, returning the discovered peer.
pub async fn dial<S>(
    stream: &mut S,
    keypair: &KeyPair,
    pinned: Option<Identity>,
) -> Result<Identity, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut dialer = Dialer::new(keypair, pinned);

    let hello = dialer.hello();
    codec::write_frame(stream, &codec::encode(&hello)?).await?;

    let challenge: SealedSignature =
        codec::decode(&codec::read_frame(stream, HANDSHAKE_FRAME_LIMIT).await?)?;
    let (peer, proof) = dialer.on_challenge(&challenge)?;
    codec::write_frame(stream, &codec::encode(&proof)?).await?;

    tracing::trace!(peer = %peer, "dialer handshake complete");
    Ok(peer)
}
