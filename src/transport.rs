//! Request/response transport between peers and the client stubs built on it.

use crate::{peer::Peer, Error, PeerId, Request, Response, Result, Token};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{net::TcpStream, time};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info};

/// Delivers one request to a peer and waits for its response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, to: PeerId, request: Request) -> Result<Response>;
}

/// Typed stubs for the four remote operations, each bounded by a timeout.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn invoke(&self, to: PeerId, request: Request) -> Result<Response> {
        debug!(%to, request = request.name(), "calling peer");
        time::timeout(self.timeout, self.transport.call(to, request))
            .await
            .map_err(|_| Error::Timeout(to))?
    }

    async fn ack(&self, to: PeerId, request: Request) -> Result<()> {
        match self.invoke(to, request).await? {
            Response::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse(to)),
        }
    }

    pub async fn give_token(&self, to: PeerId, token: Token) -> Result<()> {
        self.ack(to, Request::GiveToken(token)).await
    }

    pub async fn done(&self, to: PeerId, from: PeerId) -> Result<()> {
        self.ack(to, Request::Done(from)).await
    }

    /// Returns whether `to` allows `requester` to stop passing the token.
    pub async fn stop_passing_request(&self, to: PeerId, requester: PeerId) -> Result<bool> {
        match self.invoke(to, Request::StopPassingRequest(requester)).await? {
            Response::StopPassing { allow_stop } => Ok(allow_stop),
            _ => Err(Error::UnexpectedResponse(to)),
        }
    }

    pub async fn start_passing(&self, to: PeerId) -> Result<()> {
        self.ack(to, Request::StartPassing).await
    }
}

/// Transport over TCP: one connection per call, one JSON line each way.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: IpAddr,
}

impl TcpTransport {
    pub fn new(host: IpAddr) -> Self {
        Self { host }
    }

    pub fn address(&self, id: PeerId) -> SocketAddr {
        SocketAddr::new(self.host, id.0)
    }

    /// Waits until every peer in `peers` accepts connections.
    pub async fn connect_all(&self, peers: impl IntoIterator<Item = PeerId>) {
        for peer in peers {
            let address = self.address(peer);
            info!(%peer, "Trying to reach peer");
            while TcpStream::connect(address).await.is_err() {
                time::sleep(Duration::from_millis(100)).await;
            }
            debug!(%peer, "peer is up");
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(&self, to: PeerId, request: Request) -> Result<Response> {
        let stream = TcpStream::connect(self.address(to))
            .await
            .map_err(|_| Error::Unreachable(to))?;
        let mut lines = Framed::new(stream, LinesCodec::new());

        lines.send(request.to_json_string()?).await?;

        match lines.next().await {
            Some(line) => Response::from_json_string(&line?),
            None => Err(Error::ConnectionClosed(to)),
        }
    }
}

/// In-process transport that routes calls straight into registered peers.
#[derive(Default)]
pub struct LocalNetwork {
    peers: RwLock<HashMap<PeerId, Weak<Peer>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: &Arc<Peer>) {
        self.peers.write().insert(peer.id(), Arc::downgrade(peer));
    }

    /// Makes `id` unreachable, as if its process had died.
    pub fn disconnect(&self, id: PeerId) {
        self.peers.write().remove(&id);
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn call(&self, to: PeerId, request: Request) -> Result<Response> {
        let peer = self
            .peers
            .read()
            .get(&to)
            .and_then(Weak::upgrade)
            .ok_or(Error::Unreachable(to))?;

        Ok(peer.handle(request).await)
    }
}
