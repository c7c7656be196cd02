use crate::*;
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info};

/// Accepts inbound calls for one peer, each connection served by its own task.
pub struct Server {
    listener: TcpListener,
    peer: Arc<Peer>,
}

impl Server {
    pub fn new(listener: TcpListener, peer: Arc<Peer>) -> Self {
        Self { listener, peer }
    }

    /// Binds the listening address of `peer` on `host`.
    pub async fn bind(host: std::net::IpAddr, peer: Arc<Peer>) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(host, peer.id().0)).await?;
        Ok(Self::new(listener, peer))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    async fn handle(stream: TcpStream, peer: Arc<Peer>) -> Result<()> {
        let mut lines = Framed::new(stream, LinesCodec::new());

        while let Some(line) = lines.next().await {
            let request = Request::from_json_string(&line?)?;
            debug!(peer = %peer.id(), request = request.name(), "serving call");

            let response = peer.handle(request).await;
            lines.send(response.to_json_string()?).await?;
        }

        Ok(())
    }

    pub async fn run(self) -> Result<()> {
        info!(peer = %self.peer.id(), address = %self.local_addr()?, "Listening");

        loop {
            let (stream, address) = self.listener.accept().await?;
            debug!(%address, "accepted a connection");

            let peer = Arc::clone(&self.peer);
            tokio::spawn(async move {
                if let Err(e) = Self::handle(stream, peer).await {
                    error!(%address, "{e}");
                }
            });
        }
    }
}
