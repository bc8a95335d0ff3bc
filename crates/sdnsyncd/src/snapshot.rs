//! Snapshot responder
//!
//! Serves full-table dumps on request. The request payload is never
//! interpreted; only its arrival matters. Records are formatted up front
//! from one walk of the shadow table, then sent as individually flushed
//! units, and every dump - including one over an empty table - ends with
//! the `done` sentinel.

use tracing::{debug, warn};

use crate::announce::{self, DUMP_TERMINATOR};
use crate::error::Result;
use crate::shadow_table::ShadowTable;
use crate::transport::{Channel, TransportSet};

/// Format one dump record per stored entry, in table order.
pub fn dump_records(table: &ShadowTable) -> Result<Vec<String>> {
    table.walk().map(announce::dump_record).collect()
}

/// Answer a dump request on a reply channel: each record as a "more" part,
/// then the sentinel as the terminating part.
pub async fn respond_on_reply(channel: &mut Channel, records: &[String]) -> Result<()> {
    debug!(id = channel.id(), entries = records.len(), "Answering reply dump request");
    for record in records {
        channel.send_part(record.as_bytes(), true).await?;
    }
    channel.send_part(DUMP_TERMINATOR.as_bytes(), false).await
}

/// Answer a dump request from a stream channel: each record is pushed to
/// every connected stream channel as a delimited line, then the sentinel.
///
/// Per-channel failures are logged inside the broadcast and do not stop
/// delivery to siblings.
pub async fn respond_on_streams(transports: &mut TransportSet, records: &[String]) {
    debug!(entries = records.len(), "Answering stream dump request");
    for record in records {
        let delivered = transports.broadcast_stream(record.as_bytes()).await;
        if delivered == 0 {
            warn!("Dump record delivered to no stream channel");
        }
    }
    transports
        .broadcast_stream(DUMP_TERMINATOR.as_bytes())
        .await;
}
