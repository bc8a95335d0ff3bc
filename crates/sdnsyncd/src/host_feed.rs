//! Host-table event feed
//!
//! Stands in for the host routing daemon at the table-change callback
//! boundary: line-delimited JSON events read from stdin or a file, each
//! translated into one [`RouteChange`] for
//! [`RoutingProtocol::on_table_change`](crate::RoutingProtocol::on_table_change).
//!
//! ```text
//! {"op":"add","prefix":"10.0.0.0","mask":24,"via":"192.168.1.1","metric":2,"tag":7}
//! {"op":"remove","prefix":"10.0.0.0","mask":24,"via":"192.168.1.1"}
//! ```

use std::net::IpAddr;
use std::time::Instant;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::error::{Result, SdnError};
use crate::types::{Forwarding, HostRoute, Prefix, RouteAttrs, RouteChange, RouteSource};

/// One host route event on the feed.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum FeedEvent {
    Add {
        prefix: IpAddr,
        mask: u8,
        #[serde(default)]
        via: Option<IpAddr>,
        #[serde(default)]
        metric: Option<u32>,
        #[serde(default)]
        tag: Option<u16>,
        /// Announcing peer, when known
        #[serde(default)]
        from: Option<IpAddr>,
        /// Marks routes originated by this protocol instance
        #[serde(default)]
        self_originated: bool,
    },
    Remove {
        prefix: IpAddr,
        mask: u8,
        /// Next hop of the previously installed route, if it was
        /// router-type
        #[serde(default)]
        via: Option<IpAddr>,
    },
}

impl FeedEvent {
    /// Translate into the callback shape the host core would deliver.
    pub fn into_change(self, now: Instant) -> RouteChange {
        match self {
            FeedEvent::Add {
                prefix,
                mask,
                via,
                metric,
                tag,
                from,
                self_originated,
            } => RouteChange {
                key: Prefix::new(prefix, mask),
                new: Some(HostRoute {
                    forwarding: match via {
                        Some(gw) => Forwarding::Router(gw),
                        None => Forwarding::Other,
                    },
                    learned_from: from,
                    metric: metric.unwrap_or(1),
                    tag: tag.unwrap_or(0),
                    source: if self_originated {
                        RouteSource::ThisInstance
                    } else {
                        RouteSource::Foreign
                    },
                    last_modified: now,
                }),
                old: None,
                attrs: RouteAttrs { metric, tag },
            },
            FeedEvent::Remove { prefix, mask, via } => RouteChange {
                key: Prefix::new(prefix, mask),
                new: None,
                old: via.map(|gw| HostRoute {
                    forwarding: Forwarding::Router(gw),
                    learned_from: None,
                    metric: 1,
                    tag: 0,
                    source: RouteSource::Foreign,
                    last_modified: now,
                }),
                attrs: RouteAttrs::default(),
            },
        }
    }
}

/// Line reader producing route changes; blank lines are skipped, malformed
/// lines surface as errors the caller can log and move past.
pub struct FeedReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> FeedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    pub async fn next_change(&mut self) -> Option<Result<RouteChange>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = serde_json::from_str::<FeedEvent>(line)
                        .map(|event| event.into_change(Instant::now()))
                        .map_err(|e| SdnError::Feed(format!("{line:?}: {e}")));
                    return Some(parsed);
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
