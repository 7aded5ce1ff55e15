use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::handler::{MessageHandler, unix_timestamp};
use crate::message::{HEADER_LEN, Message, MessageError, MessageHeader};
use crate::node::{NodeContext, PeerInfo};
use crate::sync::RemotePeer;
use crate::types::{Direction, Frame, PeerState};

/// Opens outbound connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }
}

/// Accepts and dials TCP connections and runs one reader and one writer
/// task per session.
pub struct Transport<D: Dialer> {
    ctx: Arc<NodeContext>,
    handler: MessageHandler,
    dialer: Arc<D>,
}

impl<D: Dialer> Clone for Transport<D> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            handler: self.handler.clone(),
            dialer: self.dialer.clone(),
        }
    }
}

impl<D: Dialer + 'static> Transport<D> {
    pub fn new(ctx: Arc<NodeContext>, handler: MessageHandler, dialer: D) -> Self {
        Self {
            ctx,
            handler,
            dialer: Arc::new(dialer),
        }
    }

    pub async fn listen(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "listening for peers");

        loop {
            let (stream, remote) = listener.accept().await.context("accept failed")?;
            let max_peers = self.ctx.local.limits().max_peers;
            if self.ctx.neighbors.count() >= max_peers {
                debug!(%remote, max_peers, "peer limit reached, dropping inbound connection");
                self.ctx.metrics.inc_peer_connection(Direction::Inbound.as_str(), "rejected");
                continue;
            }
            self.ctx.metrics.inc_peer_connection(Direction::Inbound.as_str(), "accepted");
            debug!(%remote, "inbound connection");
            self.spawn_session(stream, remote, Direction::Inbound);
        }
    }

    /// Redial disconnected seeds every sync interval while below the
    /// outbound limit. Seeds whose retries are exhausted are skipped.
    pub async fn maintain_outbound(self, seeds: Vec<SocketAddr>) {
        let mut ticker = tokio::time::interval(self.ctx.config.sync_interval());
        loop {
            ticker.tick().await;
            for addr in seeds.iter().copied() {
                if self.outbound_count() >= self.ctx.local.limits().max_outbound {
                    break;
                }
                if self.ctx.neighbors.contains_addr(&addr)
                    || self.ctx.addresses.is_connecting(&addr)
                    || self.ctx.addresses.retries_exhausted(&addr)
                {
                    continue;
                }
                if let Err(err) = self.connect(addr).await {
                    debug!(%addr, %err, "dial failed");
                }
            }
        }
    }

    fn outbound_count(&self) -> usize {
        let established = self
            .ctx
            .neighbors
            .all()
            .iter()
            .filter(|peer| peer.direction() == Direction::Outbound)
            .count();
        established + self.ctx.addresses.connecting_count()
    }

    /// Dial `addr`, start the session and send our version.
    pub async fn connect(&self, addr: SocketAddr) -> Result<Option<Arc<RemotePeer>>> {
        if !self.ctx.addresses.try_begin_connecting(addr) {
            return Ok(None);
        }

        let stream = match self.dialer.dial(addr).await {
            Ok(stream) => stream,
            Err(err) => {
                self.ctx.addresses.finish_connecting(&addr);
                let failures = self.ctx.addresses.record_failure(addr);
                self.ctx.metrics.inc_peer_connection(Direction::Outbound.as_str(), "error");
                warn!(%addr, failures, %err, "outbound connection failed");
                return Err(err).with_context(|| format!("failed to connect to {addr}"));
            }
        };

        self.ctx.addresses.finish_connecting(&addr);
        self.ctx.addresses.reset_retry(&addr);
        self.ctx.metrics.inc_peer_connection(Direction::Outbound.as_str(), "success");

        let peer = self.spawn_session(stream, addr, Direction::Outbound);
        if !self
            .handler
            .node()
            .transition(&peer, PeerState::Init, PeerState::Hand)
            .await
        {
            debug!(%addr, state = %peer.state(), "session left INIT before version was sent");
            return Ok(None);
        }
        peer.send(&Message::Version(self.ctx.version_payload(unix_timestamp())))?;
        Ok(Some(peer))
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr, direction: Direction) -> Arc<RemotePeer> {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%addr, %err, "failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(RemotePeer::new(addr, direction, self.ctx.magic(), tx));

        tokio::spawn(write_loop(writer, rx, addr));
        tokio::spawn(read_loop(self.handler.clone(), self.ctx.clone(), peer.clone(), reader));
        peer
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut frames: mpsc::UnboundedReceiver<Frame>, addr: SocketAddr) {
    while let Some(frame) = frames.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            debug!(%addr, %err, "write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(handler: MessageHandler, ctx: Arc<NodeContext>, peer: Arc<RemotePeer>, reader: OwnedReadHalf) {
    let mut reader = BufReader::new(reader);
    let mut closed = peer.closed_signal();
    let magic = ctx.magic();

    let reason = loop {
        if *closed.borrow() {
            break "closed";
        }
        let frame = tokio::select! {
            _ = closed.changed() => break "closed",
            frame = read_frame(&mut reader, magic) => frame,
        };
        let (header, payload) = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(addr = %peer.addr(), %err, "read failed");
                break "read error";
            }
        };

        match Message::from_payload(&header, &payload) {
            Ok(message) => {
                if let Err(err) = handler.handle(&peer, message).await {
                    warn!(addr = %peer.addr(), err = %format!("{err:#}"), "dropping peer");
                    break "protocol";
                }
            }
            Err(err) => {
                ctx.metrics.inc_rejected(header.command.as_str());
                warn!(addr = %peer.addr(), command = %header.command, %err, "malformed message dropped");
            }
        }
    };

    handler.node().disconnect(&peer, reason);
}

/// Read one frame header and its payload. Any error leaves the stream
/// misaligned, so callers drop the connection.
pub async fn read_frame<R>(reader: &mut R, magic: u32) -> Result<(MessageHeader, Vec<u8>), MessageError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let header = MessageHeader::decode(&raw, magic)?;
    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{InvPayload, MAX_PAYLOAD_LEN};
    use crate::types::InventoryType;
    use containers::Bytes32;
    use pretty_assertions::assert_eq;

    const MAGIC: u32 = 0x7464_6e61;

    #[tokio::test]
    async fn test_read_frame_splits_back_to_back_messages() {
        let first = Message::Ping(7).to_frame(MAGIC);
        let second = Message::Inv(InvPayload::single(InventoryType::Block, Bytes32([3; 32]))).to_frame(MAGIC);
        let stream: Vec<u8> = first.iter().chain(second.iter()).copied().collect();
        let mut reader = stream.as_slice();

        let (header, payload) = read_frame(&mut reader, MAGIC).await.unwrap();
        assert_eq!(Message::from_payload(&header, &payload).unwrap(), Message::Ping(7));
        let (header, payload) = read_frame(&mut reader, MAGIC).await.unwrap();
        assert_eq!(
            Message::from_payload(&header, &payload).unwrap(),
            Message::Inv(InvPayload::single(InventoryType::Block, Bytes32([3; 32])))
        );
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_wrong_magic() {
        let frame = Message::Verack.to_frame(MAGIC);
        let mut reader = frame.as_slice();
        let err = read_frame(&mut reader, MAGIC + 1).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_payload() {
        let mut frame = Message::Verack.to_frame(MAGIC);
        frame[16..20].copy_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        let mut reader = frame.as_slice();
        let err = read_frame(&mut reader, MAGIC).await.unwrap_err();
        assert!(matches!(err, MessageError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_an_io_error() {
        let frame = Message::Ping(1).to_frame(MAGIC);
        let mut reader = &frame[..frame.len() - 2];
        let err = read_frame(&mut reader, MAGIC).await.unwrap_err();
        assert!(matches!(err, MessageError::Io(_)));
    }
}
