//! Output transports
//!
//! Three channel flavors fan announcements and dumps out to controllers:
//!
//! - reply: request/reply messaging over TCP, multipart-framed as
//!   `[len: u32 BE][more: u8][payload]`; a dump is N "more" parts plus a
//!   final terminating part
//! - stream: local unix socket, newline-delimited records
//! - client: one dedicated duplex TCP link to the controller; every
//!   announcement is written there and a short acknowledgement is read
//!   back and logged
//!
//! Each channel keeps one reused transmit buffer; the single-threaded
//! reactor guarantees no two logical sends overlap on a channel. A failed
//! send marks the channel `Error`, the message is dropped and siblings are
//! unaffected. Reconnection is never automatic.

use byteorder::{BigEndian, WriteBytesExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{Result, SdnError};
use crate::types::{ConnectionState, TransportKind};

/// Largest frame either direction will carry
pub const MAX_FRAME: usize = 1024;
/// Frame flag: more parts follow
pub const FRAME_MORE: u8 = 1;
/// Frame flag: final part of the message
pub const FRAME_LAST: u8 = 0;
/// Size of the controller acknowledgement buffer
const ACK_BUF_SIZE: usize = 256;

pub type ChannelId = u64;

/// One registered reply- or stream-kind output channel.
///
/// Owns the write half of the connection; the read half lives in a reader
/// task that only reports request arrival and closure.
pub struct Channel {
    id: ChannelId,
    kind: TransportKind,
    state: ConnectionState,
    tx_buf: Vec<u8>,
    writer: Box<dyn AsyncWrite + Unpin>,
}

impl Channel {
    pub fn new(id: ChannelId, kind: TransportKind, writer: Box<dyn AsyncWrite + Unpin>) -> Self {
        Self {
            id,
            kind,
            state: ConnectionState::Connected,
            tx_buf: Vec::with_capacity(MAX_FRAME),
            writer,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn check_size(&self, payload: &[u8], overhead: usize) -> Result<()> {
        if payload.len() + overhead > MAX_FRAME {
            return Err(SdnError::TransportSend(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds frame limit", payload.len()),
            )));
        }
        Ok(())
    }

    async fn write_buf(&mut self) -> Result<()> {
        let res = async {
            self.writer.write_all(&self.tx_buf).await?;
            self.writer.flush().await
        }
        .await;
        if let Err(e) = res {
            self.state = ConnectionState::Error;
            return Err(SdnError::TransportSend(e));
        }
        Ok(())
    }

    /// Send one multipart frame (reply framing), flushed immediately.
    pub async fn send_part(&mut self, payload: &[u8], more: bool) -> Result<()> {
        self.check_size(payload, 5)?;
        self.tx_buf.clear();
        WriteBytesExt::write_u32::<BigEndian>(&mut self.tx_buf, payload.len() as u32)
            .map_err(SdnError::TransportSend)?;
        self.tx_buf.push(if more { FRAME_MORE } else { FRAME_LAST });
        self.tx_buf.extend_from_slice(payload);
        self.write_buf().await
    }

    /// Send one newline-terminated record (stream framing), flushed
    /// immediately.
    pub async fn send_line(&mut self, payload: &[u8]) -> Result<()> {
        self.check_size(payload, 1)?;
        self.tx_buf.clear();
        self.tx_buf.extend_from_slice(payload);
        self.tx_buf.push(b'\n');
        self.write_buf().await
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish()
    }
}

/// Read one multipart frame from a reply connection.
///
/// Returns `Ok(None)` on clean end of stream at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 5];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(SdnError::TransportRecv(e)),
    }
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_FRAME {
        return Err(SdnError::TransportRecv(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        )));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(SdnError::TransportRecv)?;
    Ok(Some(payload))
}

/// Registry of the currently connected reply/stream channels.
///
/// Dispatch iterates the list and sends to each channel independently; a
/// failure on one channel never prevents delivery to the others. The
/// client-kind link is not part of this set - there is exactly one and the
/// change notifier drives it directly.
#[derive(Debug, Default)]
pub struct TransportSet {
    channels: Vec<Channel>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Channel) {
        debug!(id = channel.id(), kind = %channel.kind(), "Registered channel");
        self.channels.push(channel);
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<Channel> {
        let pos = self.channels.iter().position(|c| c.id() == id)?;
        Some(self.channels.remove(pos))
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Drop every registered channel, closing the connections.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Push one record to every connected stream channel.
    ///
    /// Returns how many channels it was delivered to. Send failures are
    /// logged and skipped; the message is dropped for that channel only.
    pub async fn broadcast_stream(&mut self, record: &[u8]) -> usize {
        let mut delivered = 0;
        for channel in self
            .channels
            .iter_mut()
            .filter(|c| c.kind() == TransportKind::Stream)
        {
            match channel.send_line(record).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(id = channel.id(), error = %e, "Dropping record for failed stream channel");
                }
            }
        }
        delivered
    }
}

/// The dedicated controller link.
///
/// A plain connect-once TCP stream; each announcement is a blocking-style
/// write followed by a bounded read of a response that is logged but not
/// otherwise interpreted.
pub struct ControllerClient {
    stream: TcpStream,
    tx_buf: Vec<u8>,
    ack_buf: [u8; ACK_BUF_SIZE],
}

impl ControllerClient {
    pub async fn connect(addr: std::net::SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SdnError::TransportOpen {
                kind: TransportKind::Client,
                endpoint: addr.to_string(),
                source,
            })?;
        debug!(%addr, "Connected controller client");
        Ok(Self {
            stream,
            tx_buf: Vec::with_capacity(MAX_FRAME),
            ack_buf: [0u8; ACK_BUF_SIZE],
        })
    }

    /// Write one announcement and read back the controller's response.
    ///
    /// No timeout is enforced on either half of the exchange; this stalls
    /// the reactor for its duration.
    pub async fn announce(&mut self, message: &str) -> Result<()> {
        self.tx_buf.clear();
        self.tx_buf.extend_from_slice(message.as_bytes());
        self.tx_buf.push(b'\n');
        self.stream
            .write_all(&self.tx_buf)
            .await
            .map_err(SdnError::TransportSend)?;
        self.stream.flush().await.map_err(SdnError::TransportSend)?;

        let n = self
            .stream
            .read(&mut self.ack_buf)
            .await
            .map_err(SdnError::TransportRecv)?;
        if n == 0 {
            warn!("Controller closed the connection");
        } else {
            debug!(
                response = %String::from_utf8_lossy(&self.ack_buf[..n]).trim_end(),
                "Controller response"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for ControllerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerClient")
            .field("peer", &self.stream.peer_addr().ok())
            .finish()
    }
}
