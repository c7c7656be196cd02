//! Error types shared by the whole crate.

use crate::PeerId;
use std::io;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("Invalid message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Framing error: {0}")]
    Frame(#[from] LinesCodecError),

    /// Bad membership list or command line.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Peer {0} is not a member of the ring")]
    UnknownPeer(PeerId),

    #[error("Peer {0} is unreachable")]
    Unreachable(PeerId),

    #[error("Call to peer {0} timed out")]
    Timeout(PeerId),

    #[error("Connection to peer {0} closed before a response arrived")]
    ConnectionClosed(PeerId),

    #[error("Peer {0} sent an unexpected response")]
    UnexpectedResponse(PeerId),

    /// The token left this peer but the successor never acknowledged it.
    #[error("Failed to hand the token to {to}: {source}")]
    Handoff {
        to: PeerId,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
