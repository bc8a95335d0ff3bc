//! SDN controller synchronization daemon
//!
//! Mirrors a host routing daemon's table changes to external SDN
//! controllers and serves on-demand full-table dumps.
//!
//! # Architecture
//!
//! ```text
//! host table change ──▶ RoutingProtocol::on_table_change
//!                             │
//!                             ├──▶ RouteSync (announce + shadow table)
//!                             │          │
//!                             │          └──▶ ControllerClient (TCP, write+ack)
//!                             │
//! dump request ──────▶ SnapshotResponder ──▶ reply socket (multipart frames)
//!   (reply/stream)            │
//!                             └────────────▶ stream sockets (delimited lines)
//! ```
//!
//! Everything runs on one thread: a current-thread tokio reactor processes
//! host-table events and transport requests strictly sequentially, so the
//! shadow table needs no locking and announcement order on the wire matches
//! host event order.

pub mod announce;
pub mod config;
pub mod error;
pub mod host_feed;
pub mod protocol;
pub mod route_sync;
pub mod shadow_table;
pub mod snapshot;
pub mod transport;
pub mod types;

pub use announce::{AnnounceKind, RouteRecord, DUMP_TERMINATOR};
pub use config::SdnConfig;
pub use error::{Result, SdnError};
pub use host_feed::{FeedEvent, FeedReader};
pub use protocol::{route_info, RoutingProtocol, SdnProtocol};
pub use route_sync::{GarbageList, RouteSync};
pub use shadow_table::ShadowTable;
pub use transport::{Channel, ChannelId, ControllerClient, TransportSet};
pub use types::{
    ConnectionState, Forwarding, HostRoute, ImportDecision, InterfaceEvent, Prefix, RouteAttr,
    RouteAttrs, RouteChange, RouteEntry, RouteSource, TransportKind,
};
