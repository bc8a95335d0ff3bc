//! Core types shared across the synchronization engine

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A destination network: address plus prefix length.
///
/// Address-family agnostic; `IpAddr` covers both v4 and v6 where the
/// original used a compile-time switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prefix {
    pub addr: IpAddr,
    pub len: u8,
}

impl Prefix {
    pub fn new(addr: IpAddr, len: u8) -> Self {
        Self { addr, len }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Prefix {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| format!("missing '/' in prefix {s:?}"))?;
        let addr: IpAddr = addr.parse().map_err(|e| format!("bad address in {s:?}: {e}"))?;
        let len: u8 = len.parse().map_err(|e| format!("bad length in {s:?}: {e}"))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if len > max {
            return Err(format!("prefix length {len} out of range for {addr}"));
        }
        Ok(Self { addr, len })
    }
}

/// One tracked route in the shadow table.
///
/// At most one entry exists per prefix at any time; a re-announce replaces
/// the old entry wholesale rather than mutating it in place.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub prefix: Prefix,
    /// Forwarding address; unset for non-router forwarding decisions
    pub next_hop: Option<IpAddr>,
    /// Bounded in `[0, infinity]`; infinity signals unreachability
    pub metric: u32,
    /// Opaque route tag carried end to end
    pub tag: u16,
    /// Peer that last told us this route; unset unless self-originated
    pub originator: Option<IpAddr>,
    pub created_at: Instant,
    pub last_updated_at: Instant,
    /// Reserved; cleared on every (re)install
    pub flags: u8,
}

/// Extended-attribute side channel handed along with table-change events.
///
/// Missing values default silently: metric 1, tag 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteAttrs {
    pub metric: Option<u32>,
    pub tag: Option<u16>,
}

impl RouteAttrs {
    pub fn new(metric: u32, tag: u16) -> Self {
        Self {
            metric: Some(metric),
            tag: Some(tag),
        }
    }
}

/// The host's forwarding decision for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    /// Forward via a gateway; announcements include it as `via`
    Router(IpAddr),
    /// Device route, blackhole, etc. - no usable next hop
    Other,
}

/// Which protocol produced a route, as far as import control cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    /// Originated by this very protocol instance
    ThisInstance,
    /// Another instance of the same protocol; rejected on import
    OtherSdnInstance,
    /// Any other protocol; accepted with synthesized default attributes
    Foreign,
}

/// A route as seen by the host routing core, handed to our callbacks.
#[derive(Debug, Clone)]
pub struct HostRoute {
    pub forwarding: Forwarding,
    /// Announcing peer address, if any
    pub learned_from: Option<IpAddr>,
    pub metric: u32,
    pub tag: u16,
    pub source: RouteSource,
    pub last_modified: Instant,
}

impl HostRoute {
    /// The next hop, when the forwarding decision is router-type.
    pub fn router_next_hop(&self) -> Option<IpAddr> {
        match self.forwarding {
            Forwarding::Router(gw) => Some(gw),
            Forwarding::Other => None,
        }
    }
}

/// One host-table change event: the key plus optional new/old routes and
/// the attribute side channel.
#[derive(Debug, Clone)]
pub struct RouteChange {
    pub key: Prefix,
    /// Present on add/update
    pub new: Option<HostRoute>,
    /// Present when a route was previously installed
    pub old: Option<HostRoute>,
    pub attrs: RouteAttrs,
}

/// Output channel flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Multi-part request/reply messaging socket
    Reply,
    /// Local byte-stream socket with newline-delimited records
    Stream,
    /// Dedicated duplex client link to the controller
    Client,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Reply => "reply",
            TransportKind::Stream => "stream",
            TransportKind::Client => "client",
        };
        f.write_str(s)
    }
}

/// Connection lifecycle state of a transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// A send failed; reconnection is never automatic
    Error,
}

/// Host interface notification, consumed only by the no-op stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEvent {
    Up { name: String },
    Down { name: String },
}

/// Decision returned to the host for every candidate route offered to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDecision {
    /// Accept the route untouched
    Accept,
    /// Accept, attaching these synthesized attributes first
    AcceptWithAttrs(RouteAttrs),
    /// Do not import
    Reject,
}

/// A protocol extended attribute, for rendering in the host's route output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAttr {
    Metric(u32),
    Tag(u16),
    /// An attribute id this protocol does not own
    Other { id: u32, value: u32 },
}
