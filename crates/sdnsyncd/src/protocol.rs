//! Host protocol binding and the event reactor
//!
//! [`RoutingProtocol`] is the capability surface the host routing core
//! invokes; [`SdnProtocol`] implements it once. The protocol instance owns
//! the controller client, the transport set and the listeners as explicit
//! fields with lifecycle tied to initialize/shutdown.
//!
//! All work happens on one thread: connection reader tasks are
//! `spawn_local` helpers that only report request arrival and closure over
//! an in-process channel, and the reactor in [`SdnProtocol::run`] processes
//! host-table events and transport events strictly sequentially.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{tcp, unix, TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SdnConfig;
use crate::error::{Result, SdnError};
use crate::host_feed::FeedReader;
use crate::route_sync::RouteSync;
use crate::snapshot;
use crate::transport::{
    self, Channel, ChannelId, ControllerClient, TransportSet, MAX_FRAME,
};
use crate::types::{
    HostRoute, ImportDecision, InterfaceEvent, RouteAttr, RouteChange, TransportKind,
};

/// Capability surface this protocol exposes to the host routing core.
///
/// Replaces the original's struct of function pointers; the host calls
/// these and nothing else.
#[async_trait(?Send)]
pub trait RoutingProtocol {
    /// Open all transports. A bind failure is fatal and aborts startup.
    async fn initialize(&mut self) -> Result<()>;

    /// Tear down transports and release the stream socket path.
    async fn shutdown(&mut self) -> Result<()>;

    /// Render one of this protocol's extended attributes, or `None` for an
    /// attribute it does not own.
    fn describe_route_attribute(&self, attr: &RouteAttr) -> Option<String>;

    /// Debug-dump connections and shadow table contents to the log.
    fn dump_state(&self);

    /// Whether `new` can replace the running configuration without a
    /// restart.
    fn reconfigure(&mut self, new: &SdnConfig) -> bool;

    /// Import control for candidate routes offered by the host.
    fn accept_route(&self, route: &HostRoute) -> ImportDecision;

    /// Preference comparator between two routes to the same destination.
    fn compare_routes(&self, new: &HostRoute, old: &HostRoute, now: Instant) -> bool;

    /// Host-table change callback: announce, then mirror into the shadow
    /// table. Failures are local; nothing propagates back to the host.
    async fn on_table_change(&mut self, change: RouteChange);

    /// Interface notification stub; the core takes no action.
    fn on_interface_change(&mut self, event: &InterfaceEvent);
}

/// Events reported by connection reader tasks.
#[derive(Debug)]
enum TransportEvent {
    /// A request arrived on a channel; payload content is ignored
    Request { id: ChannelId },
    /// The peer closed the connection
    Closed { id: ChannelId },
}

pub struct SdnProtocol {
    config: SdnConfig,
    sync: RouteSync,
    transports: TransportSet,
    controller: Option<ControllerClient>,
    reply_listener: Option<TcpListener>,
    stream_listener: Option<UnixListener>,
    ev_tx: mpsc::UnboundedSender<TransportEvent>,
    ev_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    next_channel: ChannelId,
}

impl SdnProtocol {
    pub fn new(config: SdnConfig) -> Self {
        let sync = RouteSync::new(&config);
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        Self {
            config,
            sync,
            transports: TransportSet::new(),
            controller: None,
            reply_listener: None,
            stream_listener: None,
            ev_tx,
            ev_rx: Some(ev_rx),
            next_channel: 1,
        }
    }

    pub fn config(&self) -> &SdnConfig {
        &self.config
    }

    pub fn sync(&self) -> &RouteSync {
        &self.sync
    }

    /// The address the reply listener actually bound (port 0 resolves to an
    /// ephemeral port).
    pub fn reply_local_addr(&self) -> Option<std::net::SocketAddr> {
        self.reply_listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn alloc_channel_id(&mut self) -> ChannelId {
        let id = self.next_channel;
        self.next_channel += 1;
        id
    }

    /// Refuse to clobber a live socket; remove a stale file.
    async fn clear_stale_socket(path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        match UnixStream::connect(path).await {
            Ok(_) => Err(SdnError::TransportOpen {
                kind: TransportKind::Stream,
                endpoint: path.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "socket path already in use by another process",
                ),
            }),
            Err(_) => {
                info!(path = %path.display(), "Removing stale socket file");
                tokio::fs::remove_file(path).await?;
                Ok(())
            }
        }
    }

    fn accept_reply(&mut self, accepted: std::io::Result<(TcpStream, std::net::SocketAddr)>) {
        match accepted {
            Ok((stream, peer)) => {
                let (read_half, write_half) = stream.into_split();
                let id = self.alloc_channel_id();
                self.transports
                    .register(Channel::new(id, TransportKind::Reply, Box::new(write_half)));
                spawn_reply_reader(id, read_half, self.ev_tx.clone());
                info!(%peer, id, "Reply client connected");
            }
            Err(e) => warn!(error = %e, "Reply accept failed"),
        }
    }

    fn accept_stream(&mut self, accepted: std::io::Result<(UnixStream, unix::SocketAddr)>) {
        match accepted {
            Ok((stream, _)) => {
                let (read_half, write_half) = stream.into_split();
                let id = self.alloc_channel_id();
                self.transports
                    .register(Channel::new(id, TransportKind::Stream, Box::new(write_half)));
                spawn_stream_reader(id, read_half, self.ev_tx.clone());
                info!(id, "Stream client connected");
            }
            Err(e) => warn!(error = %e, "Stream accept failed"),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Request { id } => {
                let kind = match self.transports.get_mut(id) {
                    Some(channel) => channel.kind(),
                    None => {
                        debug!(id, "Request on already-closed channel");
                        return;
                    }
                };
                let records = match snapshot::dump_records(self.sync.table()) {
                    Ok(records) => records,
                    Err(e) => {
                        error!(error = %e, "Failed to format dump records");
                        return;
                    }
                };
                match kind {
                    TransportKind::Reply => {
                        if let Some(channel) = self.transports.get_mut(id) {
                            if let Err(e) = snapshot::respond_on_reply(channel, &records).await {
                                warn!(id, error = %e, "Dropping dump after reply send failure");
                            }
                        }
                    }
                    TransportKind::Stream => {
                        snapshot::respond_on_streams(&mut self.transports, &records).await;
                    }
                    TransportKind::Client => {}
                }
            }
            TransportEvent::Closed { id } => {
                if self.transports.remove(id).is_some() {
                    info!(id, "Channel closed by peer");
                }
            }
        }
    }

    /// Drive the reactor: host-table events from `feed`, new connections,
    /// and transport requests, one at a time in arrival order.
    ///
    /// Returns when the host feed ends and may only be called after
    /// [`RoutingProtocol::initialize`].
    pub async fn run<R>(&mut self, feed: &mut FeedReader<R>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let not_started = || SdnError::Config("protocol not initialized".into());
        let reply_listener = self.reply_listener.take().ok_or_else(not_started)?;
        let stream_listener = self.stream_listener.take().ok_or_else(not_started)?;
        let mut ev_rx = self.ev_rx.take().ok_or_else(not_started)?;
        let mut feed_done = false;

        loop {
            tokio::select! {
                event = ev_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_transport_event(event).await;
                    }
                }
                accepted = reply_listener.accept() => self.accept_reply(accepted),
                accepted = stream_listener.accept() => self.accept_stream(accepted),
                change = feed.next_change(), if !feed_done => match change {
                    Some(Ok(change)) => self.on_table_change(change).await,
                    Some(Err(e)) => warn!(error = %e, "Skipping malformed host feed event"),
                    None => {
                        info!("Host feed ended; continuing to serve dump requests");
                        feed_done = true;
                    }
                },
            }
            // Once the feed is exhausted and every channel is gone there is
            // nothing left to drive in a test harness; a live daemon keeps
            // listening, so only the feed-forever case exits here.
            if feed_done && self.transports.is_empty() && ev_rx.is_empty() {
                self.reply_listener = Some(reply_listener);
                self.stream_listener = Some(stream_listener);
                self.ev_rx = Some(ev_rx);
                return Ok(());
            }
        }
    }
}

#[async_trait(?Send)]
impl RoutingProtocol for SdnProtocol {
    async fn initialize(&mut self) -> Result<()> {
        info!("Starting SDN protocol instance");

        let reply_addr = self.config.reply_addr();
        let reply_listener =
            TcpListener::bind(reply_addr)
                .await
                .map_err(|source| SdnError::TransportOpen {
                    kind: TransportKind::Reply,
                    endpoint: reply_addr.to_string(),
                    source,
                })?;
        info!(addr = %reply_addr, "Reply socket listening");

        Self::clear_stale_socket(&self.config.unix_socket).await?;
        let stream_listener = UnixListener::bind(&self.config.unix_socket).map_err(|source| {
            SdnError::TransportOpen {
                kind: TransportKind::Stream,
                endpoint: self.config.unix_socket.display().to_string(),
                source,
            }
        })?;
        info!(path = %self.config.unix_socket.display(), "Stream socket listening");

        match ControllerClient::connect(self.config.controller_addr).await {
            Ok(client) => {
                info!(addr = %self.config.controller_addr, "Controller client connected");
                self.controller = Some(client);
            }
            Err(e) => {
                // Not fatal: announcements are dropped until restart.
                error!(error = %e, "Controller connection failed; announcements will be dropped");
            }
        }

        self.reply_listener = Some(reply_listener);
        self.stream_listener = Some(stream_listener);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down SDN protocol instance");
        self.transports.clear();
        self.controller = None;
        self.reply_listener = None;
        self.stream_listener = None;
        match tokio::fs::remove_file(&self.config.unix_socket).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn describe_route_attribute(&self, attr: &RouteAttr) -> Option<String> {
        match attr {
            RouteAttr::Metric(v) => Some(format!("metric: {v}")),
            RouteAttr::Tag(v) => Some(format!("tag: {v}")),
            RouteAttr::Other { .. } => None,
        }
    }

    fn dump_state(&self) {
        debug!(channels = self.transports.len(), "Connected channels");
        for channel in self.transports.iter() {
            debug!(
                id = channel.id(),
                kind = %channel.kind(),
                state = ?channel.state(),
                "Channel"
            );
        }
        for (i, entry) in self.sync.table().walk().enumerate() {
            debug!(
                index = i,
                prefix = %entry.prefix,
                next_hop = ?entry.next_hop,
                metric = entry.metric,
                tag = entry.tag,
                originator = ?entry.originator,
                "Shadow entry"
            );
        }
    }

    fn reconfigure(&mut self, new: &SdnConfig) -> bool {
        let compatible = self.config.compatible_with(new);
        if !compatible {
            info!("Configuration change requires a protocol restart");
        }
        compatible
    }

    fn accept_route(&self, route: &HostRoute) -> ImportDecision {
        self.sync.accept_route(route)
    }

    fn compare_routes(&self, new: &HostRoute, old: &HostRoute, now: Instant) -> bool {
        self.sync.compare_routes(new, old, now)
    }

    async fn on_table_change(&mut self, change: RouteChange) {
        let now = Instant::now();

        // Announce first, mirror second: delivery does not depend on the
        // shadow table outcome.
        match self
            .sync
            .announcement_for(&change.key, change.new.as_ref(), change.old.as_ref())
        {
            Ok(message) => {
                debug!(%message, "Route change");
                match self.controller.as_mut() {
                    Some(client) => {
                        if let Err(e) = client.announce(&message).await {
                            error!(error = %e, "Dropping announcement after controller send failure");
                        }
                    }
                    None => error!("No controller client; dropping announcement"),
                }
            }
            Err(e) => error!(error = %e, "Failed to format announcement"),
        }

        self.sync
            .sync_entry(change.key, change.new.as_ref(), &change.attrs, now);
    }

    fn on_interface_change(&mut self, event: &InterfaceEvent) {
        // Stub: interfaces carry no per-interface sockets in this protocol.
        match event {
            InterfaceEvent::Up { name } => debug!(iface = %name, "Ignoring interface up"),
            InterfaceEvent::Down { name } => debug!(iface = %name, "Ignoring interface down"),
        }
    }
}

/// Render the host's route-info suffix: preference/metric plus a non-zero
/// tag.
pub fn route_info(preference: u32, attrs: &crate::types::RouteAttrs) -> String {
    let metric = attrs.metric.unwrap_or(0);
    let mut out = format!(" ({preference}/{metric})");
    if let Some(tag) = attrs.tag.filter(|t| *t != 0) {
        out.push_str(&format!(" t{tag:04x}"));
    }
    out
}

fn spawn_reply_reader(
    id: ChannelId,
    mut half: tcp::OwnedReadHalf,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    tokio::task::spawn_local(async move {
        loop {
            match transport::read_frame(&mut half).await {
                Ok(Some(payload)) => {
                    debug!(id, bytes = payload.len(), "Reply request received");
                    if tx.send(TransportEvent::Request { id }).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(TransportEvent::Closed { id });
                    break;
                }
                Err(e) => {
                    // Logged only; the channel stays registered.
                    warn!(id, error = %e, "Receive failure on reply channel");
                    break;
                }
            }
        }
    });
}

fn spawn_stream_reader(
    id: ChannelId,
    mut half: unix::OwnedReadHalf,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    tokio::task::spawn_local(async move {
        let mut buf = [0u8; MAX_FRAME];
        loop {
            match half.read(&mut buf).await {
                Ok(0) => {
                    let _ = tx.send(TransportEvent::Closed { id });
                    break;
                }
                Ok(n) => {
                    debug!(id, bytes = n, "Stream request received");
                    if tx.send(TransportEvent::Request { id }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(id, error = %e, "Receive failure on stream channel");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Forwarding, Prefix, RouteAttrs, RouteSource};
    use std::net::IpAddr;

    fn protocol() -> SdnProtocol {
        SdnProtocol::new(SdnConfig::default())
    }

    fn change(prefix: &str, via: Option<&str>) -> RouteChange {
        let key: Prefix = prefix.parse().unwrap();
        let forwarding = match via {
            Some(v) => Forwarding::Router(v.parse::<IpAddr>().unwrap()),
            None => Forwarding::Other,
        };
        RouteChange {
            key,
            new: Some(HostRoute {
                forwarding,
                learned_from: None,
                metric: 1,
                tag: 0,
                source: RouteSource::Foreign,
                last_modified: Instant::now(),
            }),
            old: None,
            attrs: RouteAttrs::default(),
        }
    }

    #[tokio::test]
    async fn test_table_update_proceeds_without_controller() {
        let mut p = protocol();
        p.on_table_change(change("10.0.0.0/24", Some("192.168.1.1"))).await;
        let key: Prefix = "10.0.0.0/24".parse().unwrap();
        let entry = p.sync().table().find(&key).unwrap();
        assert_eq!(entry.next_hop, Some("192.168.1.1".parse::<IpAddr>().unwrap()));
    }

    #[tokio::test]
    async fn test_remove_without_controller() {
        let mut p = protocol();
        p.on_table_change(change("10.0.0.0/24", Some("192.168.1.1"))).await;
        let mut removal = change("10.0.0.0/24", None);
        removal.new = None;
        p.on_table_change(removal).await;
        assert!(p.sync().table().is_empty());
    }

    #[test]
    fn test_describe_route_attribute() {
        let p = protocol();
        assert_eq!(
            p.describe_route_attribute(&RouteAttr::Metric(3)),
            Some("metric: 3".to_string())
        );
        assert_eq!(
            p.describe_route_attribute(&RouteAttr::Tag(9)),
            Some("tag: 9".to_string())
        );
        assert_eq!(
            p.describe_route_attribute(&RouteAttr::Other { id: 99, value: 1 }),
            None
        );
    }

    #[test]
    fn test_route_info_rendering() {
        assert_eq!(route_info(120, &RouteAttrs::new(4, 0)), " (120/4)");
        assert_eq!(route_info(120, &RouteAttrs::new(4, 0x2a)), " (120/4) t002a");
        assert_eq!(route_info(120, &RouteAttrs::default()), " (120/0)");
    }

    #[test]
    fn test_reconfigure_requires_identical_config() {
        let mut p = protocol();
        assert!(p.reconfigure(&SdnConfig::default()));
        let changed = SdnConfig {
            infinity: 32,
            ..SdnConfig::default()
        };
        assert!(!p.reconfigure(&changed));
    }

    #[tokio::test]
    async fn test_run_before_initialize_fails() {
        let mut p = protocol();
        let mut feed = FeedReader::new(&b""[..]);
        assert!(p.run(&mut feed).await.is_err());
    }
}
