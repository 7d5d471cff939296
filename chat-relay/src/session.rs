use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    protocol::{ClientLine, DEFAULT_NAME, ServerLine, display_name, read_line},
    registry::{Peer, SessionId, SessionRegistry},
};

enum Incoming {
    Line(String),
    EndOfStream,
    CloseRequested,
}

/// One connected client: the read half of its transport plus its [`Peer`].
pub struct Session<R> {
    reader: R,
    peer: Arc<Peer>,
    registry: Arc<SessionRegistry>,
    name: String,
    remote: Option<SocketAddr>,
}

impl Session<BufReader<OwnedReadHalf>> {
    /// Wraps an accepted connection. `shutdown` force-closes the session when cancelled.
    pub fn accept(
        stream: TcpStream,
        registry: Arc<SessionRegistry>,
        shutdown: &CancellationToken,
    ) -> Self {
        let remote = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let peer = Peer::new(registry.next_id(), writer, shutdown.child_token());
        Self::new(BufReader::new(reader), peer, registry).with_remote(remote)
    }
}

impl<R> Session<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, peer: Arc<Peer>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            reader,
            peer,
            registry,
            name: DEFAULT_NAME.to_string(),
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Option<SocketAddr>) -> Self {
        self.remote = remote;
        self
    }

    pub fn id(&self) -> SessionId {
        self.peer.id()
    }

    /// Drives the session to completion and always cleans up, whichever way
    /// the conversation ended. I/O errors are returned after cleanup.
    pub async fn run(mut self) -> Result<()> {
        info!(session = %self.id(), remote = ?self.remote, "client connected");
        let outcome = self.converse().await;
        self.close().await;
        outcome
    }

    async fn converse(&mut self) -> Result<()> {
        self.peer.send(&ServerLine::Welcome.to_string()).await?;

        let candidate = match self.next_line().await? {
            Incoming::Line(line) => Some(line),
            Incoming::EndOfStream => None,
            Incoming::CloseRequested => return Ok(()),
        };
        self.name = display_name(candidate.as_deref());

        let greeting = ServerLine::Greeting {
            name: self.name.clone(),
        };
        self.peer
            .activate(&self.registry, &greeting.to_string())
            .await?;

        info!(session = %self.id(), name = %self.name, "client joined");
        let joined = ServerLine::Joined {
            name: self.name.clone(),
        };
        self.registry
            .broadcast_except(&joined.to_string(), self.id())
            .await;

        while let Incoming::Line(line) = self.next_line().await? {
            let text = match ClientLine::parse(line) {
                ClientLine::Quit => break,
                ClientLine::Chat(text) => text,
            };
            let chat = ServerLine::Chat {
                name: self.name.clone(),
                text,
            }
            .to_string();
            info!("{chat}");
            self.registry.broadcast_except(&chat, self.id()).await;
        }

        Ok(())
    }

    /// Reads the next line, giving up early if a close was requested.
    async fn next_line(&mut self) -> Result<Incoming> {
        select! {
            biased;
            _ = self.peer.closed() => Ok(Incoming::CloseRequested),
            line = read_line(&mut self.reader) => Ok(match line? {
                Some(line) => Incoming::Line(line),
                None => Incoming::EndOfStream,
            }),
        }
    }

    async fn close(&mut self) {
        if self.registry.unregister(self.id()).await.is_some() {
            let left = ServerLine::Left {
                name: self.name.clone(),
            };
            self.registry
                .broadcast_except(&left.to_string(), self.id())
                .await;
        }
        self.peer.shutdown().await;
        info!(session = %self.id(), name = %self.name, "client disconnected");
    }
}
