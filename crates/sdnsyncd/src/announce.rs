//! Wire message formatter
//!
//! Builds the protocol strings sent to controllers. The grammar is fixed:
//!
//! ```text
//! <SDN_ANNOUNCE> {"added":[{"prefix":"<addr>","mask":<int>,"via":"<addr>"}]}
//! <SDN_ANNOUNCE> {"removed":[{"prefix":"<addr>","mask":<int>}]}
//! <SDN_DUMP> {"prefix":"<addr>","mask":<int>,"via":"<addr>"}
//! done
//! ```
//!
//! Messages are returned without a trailing record terminator; each
//! transport applies its own framing (newline, or a multipart frame).

use std::net::IpAddr;

use serde::Serialize;

use crate::error::Result;
use crate::types::{Prefix, RouteEntry};

/// Announce message prefix token
pub const ANNOUNCE_TOKEN: &str = "<SDN_ANNOUNCE>";
/// Dump record prefix token
pub const DUMP_TOKEN: &str = "<SDN_DUMP>";
/// Sentinel record closing every dump
pub const DUMP_TERMINATOR: &str = "done";

/// One route in a wire message. `via` is omitted when there is no usable
/// next hop, which is what distinguishes the four announce shapes.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct RouteRecord {
    pub prefix: String,
    pub mask: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

impl RouteRecord {
    pub fn new(prefix: &Prefix, via: Option<IpAddr>) -> Self {
        Self {
            prefix: prefix.addr.to_string(),
            mask: prefix.len,
            via: via.map(|a| a.to_string()),
        }
    }
}

/// Whether a route-change event installs or withdraws the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceKind {
    Added,
    Removed,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum AnnounceBody {
    Added([RouteRecord; 1]),
    Removed([RouteRecord; 1]),
}

/// Format one announce message for a route-change event.
pub fn announcement(kind: AnnounceKind, prefix: &Prefix, via: Option<IpAddr>) -> Result<String> {
    let record = RouteRecord::new(prefix, via);
    let body = match kind {
        AnnounceKind::Added => AnnounceBody::Added([record]),
        AnnounceKind::Removed => AnnounceBody::Removed([record]),
    };
    Ok(format!("{ANNOUNCE_TOKEN} {}", serde_json::to_string(&body)?))
}

/// Format one dump record for a stored entry.
pub fn dump_record(entry: &RouteEntry) -> Result<String> {
    let record = RouteRecord::new(&entry.prefix, entry.next_hop);
    Ok(format!("{DUMP_TOKEN} {}", serde_json::to_string(&record)?))
}
