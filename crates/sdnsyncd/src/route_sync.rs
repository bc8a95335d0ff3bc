//! RouteSync - Core route-change synchronization logic
//!
//! Owns the shadow table and the garbage list, classifies host-table change
//! events into announce messages, and applies the table update rules. The
//! functions here perform no I/O; the protocol layer delivers the returned
//! announcement to the controller link.

use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::announce::{self, AnnounceKind};
use crate::config::SdnConfig;
use crate::error::Result;
use crate::shadow_table::ShadowTable;
use crate::types::{
    HostRoute, ImportDecision, Prefix, RouteAttrs, RouteEntry, RouteSource,
};

/// Metric decoded when the attribute is absent
pub const DEFAULT_DECODED_METRIC: u32 = 1;
/// Metric stored when the decoded value is exactly zero; zero is reserved
/// to mean "let the importer decide" and is never stored live
pub const ZERO_METRIC_REWRITE: u32 = 5;
/// Tag decoded when the attribute is absent
pub const DEFAULT_TAG: u16 = 0;

/// Registry of locally-originated routes.
///
/// Insert/remove bookkeeping only; a periodic expiry sweep over this list is
/// an unimplemented extension point.
#[derive(Debug, Default)]
pub struct GarbageList {
    keys: Vec<Prefix>,
}

impl GarbageList {
    pub fn insert(&mut self, key: Prefix) {
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    pub fn remove(&mut self, key: &Prefix) {
        self.keys.retain(|k| k != key);
    }

    pub fn contains(&self, key: &Prefix) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub struct RouteSync {
    table: ShadowTable,
    garbage: GarbageList,
    infinity: u32,
    timeout: Duration,
}

impl RouteSync {
    pub fn new(config: &SdnConfig) -> Self {
        Self {
            table: ShadowTable::new(),
            garbage: GarbageList::default(),
            infinity: config.infinity,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn table(&self) -> &ShadowTable {
        &self.table
    }

    pub fn garbage(&self) -> &GarbageList {
        &self.garbage
    }

    /// Build the announce message for a change event.
    ///
    /// `new` present means "added", absent means "removed". The next hop is
    /// included only when the relevant route's forwarding decision is
    /// router-type: the new route for adds, the old route (if any) for
    /// removals.
    pub fn announcement_for(
        &self,
        key: &Prefix,
        new: Option<&HostRoute>,
        old: Option<&HostRoute>,
    ) -> Result<String> {
        match new {
            Some(route) => {
                announce::announcement(AnnounceKind::Added, key, route.router_next_hop())
            }
            None => announce::announcement(
                AnnounceKind::Removed,
                key,
                old.and_then(|o| o.router_next_hop()),
            ),
        }
    }

    /// Unconditionally update the shadow table for a change event.
    ///
    /// Any existing entry at the key is deleted first; if a new route is
    /// present a fresh entry is inserted with metric/tag decoded from the
    /// attribute side channel, the metric clamped to the configured
    /// infinity and a decoded zero rewritten to the local default.
    #[instrument(skip_all, fields(key = %key))]
    pub fn sync_entry(
        &mut self,
        key: Prefix,
        new: Option<&HostRoute>,
        attrs: &RouteAttrs,
        now: Instant,
    ) {
        if self.table.remove(&key).is_some() {
            self.garbage.remove(&key);
            debug!("Removed existing shadow entry");
        }

        let Some(route) = new else {
            return;
        };

        let mut metric = attrs.metric.unwrap_or(DEFAULT_DECODED_METRIC);
        if metric > self.infinity {
            metric = self.infinity;
        }
        if metric == 0 {
            metric = ZERO_METRIC_REWRITE;
        }

        let self_originated = route.source == RouteSource::ThisInstance;
        let entry = RouteEntry {
            prefix: key,
            next_hop: route.router_next_hop(),
            metric,
            tag: attrs.tag.unwrap_or(DEFAULT_TAG),
            originator: if self_originated { route.learned_from } else { None },
            created_at: now,
            last_updated_at: now,
            flags: 0,
        };
        debug!(metric, tag = entry.tag, "Installed shadow entry");
        self.table.upsert(entry);

        if self_originated {
            self.garbage.insert(key);
        }
    }

    /// Import control: decide whether to accept a candidate route.
    ///
    /// Our own routes pass untouched; routes from a foreign protocol are
    /// accepted with synthesized default attributes; routes from another
    /// instance of this protocol are rejected.
    pub fn accept_route(&self, route: &HostRoute) -> ImportDecision {
        match route.source {
            RouteSource::ThisInstance => ImportDecision::Accept,
            RouteSource::Foreign => ImportDecision::AcceptWithAttrs(RouteAttrs::new(
                DEFAULT_DECODED_METRIC,
                DEFAULT_TAG,
            )),
            RouteSource::OtherSdnInstance => ImportDecision::Reject,
        }
    }

    /// Comparator the host uses to prefer between two routes to the same
    /// destination.
    ///
    /// Prefer the route whose announcing peer matches exactly; else the
    /// strictly lower metric; else, among equal metrics from the same
    /// source, the incumbent loses if it has not been refreshed within half
    /// the configured timeout.
    pub fn compare_routes(&self, new: &HostRoute, old: &HostRoute, now: Instant) -> bool {
        if old.learned_from == new.learned_from {
            return true;
        }
        if old.metric < new.metric {
            return false;
        }
        if old.metric > new.metric {
            return true;
        }
        if old.source == new.source
            && now.saturating_duration_since(old.last_modified) > self.timeout / 2
        {
            return true;
        }
        false
    }

    /// Merge equality: two routes are the same route iff their metrics are.
    pub fn routes_equal(&self, new: &HostRoute, old: &HostRoute) -> bool {
        new.metric == old.metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Forwarding;
    use std::net::IpAddr;

    fn config() -> SdnConfig {
        SdnConfig::default()
    }

    fn key() -> Prefix {
        "10.0.0.0/24".parse().unwrap()
    }

    fn gw() -> IpAddr {
        "192.168.1.1".parse().unwrap()
    }

    fn route(source: RouteSource, metric: u32) -> HostRoute {
        HostRoute {
            forwarding: Forwarding::Router(gw()),
            learned_from: Some(gw()),
            metric,
            tag: 0,
            source,
            last_modified: Instant::now(),
        }
    }

    #[test]
    fn test_add_stores_entry_with_decoded_attrs() {
        let mut sync = RouteSync::new(&config());
        let r = route(RouteSource::Foreign, 1);
        sync.sync_entry(key(), Some(&r), &RouteAttrs::new(3, 42), Instant::now());

        let entry = sync.table().find(&key()).unwrap();
        assert_eq!(entry.metric, 3);
        assert_eq!(entry.tag, 42);
        assert_eq!(entry.next_hop, Some(gw()));
        assert_eq!(entry.originator, None);
        assert_eq!(entry.flags, 0);
    }

    #[test]
    fn test_absent_metric_decodes_to_one() {
        let mut sync = RouteSync::new(&config());
        let r = route(RouteSource::Foreign, 1);
        sync.sync_entry(key(), Some(&r), &RouteAttrs::default(), Instant::now());
        assert_eq!(sync.table().find(&key()).unwrap().metric, 1);
        assert_eq!(sync.table().find(&key()).unwrap().tag, 0);
    }

    #[test]
    fn test_zero_metric_rewritten_to_local_default() {
        let mut sync = RouteSync::new(&config());
        let r = route(RouteSource::Foreign, 0);
        sync.sync_entry(key(), Some(&r), &RouteAttrs::new(0, 0), Instant::now());
        assert_eq!(sync.table().find(&key()).unwrap().metric, 5);
    }

    #[test]
    fn test_metric_clamped_to_infinity() {
        let mut sync = RouteSync::new(&config());
        let r = route(RouteSource::Foreign, 1);
        sync.sync_entry(key(), Some(&r), &RouteAttrs::new(1000, 0), Instant::now());
        assert_eq!(sync.table().find(&key()).unwrap().metric, 16);
    }

    #[test]
    fn test_originator_set_only_for_self_originated() {
        let mut sync = RouteSync::new(&config());
        let own = route(RouteSource::ThisInstance, 1);
        sync.sync_entry(key(), Some(&own), &RouteAttrs::default(), Instant::now());
        assert_eq!(sync.table().find(&key()).unwrap().originator, Some(gw()));

        let foreign = route(RouteSource::Foreign, 1);
        sync.sync_entry(key(), Some(&foreign), &RouteAttrs::default(), Instant::now());
        assert_eq!(sync.table().find(&key()).unwrap().originator, None);
    }

    #[test]
    fn test_replay_converges_to_last_event() {
        let mut sync = RouteSync::new(&config());
        let now = Instant::now();
        let r = route(RouteSource::Foreign, 1);

        sync.sync_entry(key(), Some(&r), &RouteAttrs::new(2, 7), now);
        sync.sync_entry(key(), Some(&r), &RouteAttrs::new(9, 8), now);
        assert_eq!(sync.table().len(), 1);
        let entry = sync.table().find(&key()).unwrap();
        assert_eq!((entry.metric, entry.tag), (9, 8));

        sync.sync_entry(key(), None, &RouteAttrs::default(), now);
        assert!(sync.table().find(&key()).is_none());
        assert!(sync.table().is_empty());
    }

    #[test]
    fn test_duplicate_add_stores_one_entry() {
        let mut sync = RouteSync::new(&config());
        let r = route(RouteSource::Foreign, 1);
        let attrs = RouteAttrs::new(2, 0);
        sync.sync_entry(key(), Some(&r), &attrs, Instant::now());
        sync.sync_entry(key(), Some(&r), &attrs, Instant::now());
        assert_eq!(sync.table().len(), 1);
    }

    #[test]
    fn test_garbage_tracks_self_originated_routes() {
        let mut sync = RouteSync::new(&config());
        let own = route(RouteSource::ThisInstance, 1);
        sync.sync_entry(key(), Some(&own), &RouteAttrs::default(), Instant::now());
        assert!(sync.garbage().contains(&key()));
        assert_eq!(sync.garbage().len(), 1);

        sync.sync_entry(key(), None, &RouteAttrs::default(), Instant::now());
        assert!(sync.garbage().is_empty());
    }

    #[test]
    fn test_garbage_ignores_foreign_routes() {
        let mut sync = RouteSync::new(&config());
        let r = route(RouteSource::Foreign, 1);
        sync.sync_entry(key(), Some(&r), &RouteAttrs::default(), Instant::now());
        assert!(sync.garbage().is_empty());
    }

    #[test]
    fn test_announcement_shapes() {
        let sync = RouteSync::new(&config());
        let router = route(RouteSource::Foreign, 1);
        let device = HostRoute {
            forwarding: Forwarding::Other,
            ..route(RouteSource::Foreign, 1)
        };

        let added = sync.announcement_for(&key(), Some(&router), None).unwrap();
        assert!(added.contains(r#""added""#) && added.contains(r#""via":"192.168.1.1""#));

        let added_bare = sync.announcement_for(&key(), Some(&device), None).unwrap();
        assert!(added_bare.contains(r#""added""#) && !added_bare.contains("via"));

        let removed = sync.announcement_for(&key(), None, Some(&router)).unwrap();
        assert!(removed.contains(r#""removed""#) && removed.contains(r#""via""#));

        let removed_bare = sync.announcement_for(&key(), None, Some(&device)).unwrap();
        assert!(removed_bare.contains(r#""removed""#) && !removed_bare.contains("via"));

        let removed_no_old = sync.announcement_for(&key(), None, None).unwrap();
        assert!(!removed_no_old.contains("via"));
    }

    #[test]
    fn test_accept_route_decisions() {
        let sync = RouteSync::new(&config());
        assert_eq!(
            sync.accept_route(&route(RouteSource::ThisInstance, 1)),
            ImportDecision::Accept
        );
        assert_eq!(
            sync.accept_route(&route(RouteSource::Foreign, 1)),
            ImportDecision::AcceptWithAttrs(RouteAttrs::new(1, 0))
        );
        assert_eq!(
            sync.accept_route(&route(RouteSource::OtherSdnInstance, 1)),
            ImportDecision::Reject
        );
    }

    #[test]
    fn test_compare_prefers_matching_peer() {
        let sync = RouteSync::new(&config());
        let now = Instant::now();
        let new = route(RouteSource::Foreign, 10);
        let old = route(RouteSource::Foreign, 1);
        // same learned_from: new wins regardless of metric
        assert!(sync.compare_routes(&new, &old, now));
    }

    #[test]
    fn test_compare_prefers_lower_metric() {
        let sync = RouteSync::new(&config());
        let now = Instant::now();
        let peer_a: IpAddr = "192.168.1.2".parse().unwrap();
        let mut new = route(RouteSource::Foreign, 3);
        new.learned_from = Some(peer_a);
        let old = route(RouteSource::Foreign, 5);
        assert!(sync.compare_routes(&new, &old, now));
        assert!(!sync.compare_routes(&old, &new, now));
    }

    #[test]
    fn test_compare_equal_metric_stale_incumbent_loses() {
        let sync = RouteSync::new(&config());
        let peer_a: IpAddr = "192.168.1.2".parse().unwrap();
        let mut new = route(RouteSource::Foreign, 3);
        new.learned_from = Some(peer_a);
        let old = route(RouteSource::Foreign, 3);
        // fresh incumbent keeps its place
        assert!(!sync.compare_routes(&new, &old, Instant::now()));
        // incumbent not refreshed within timeout/2 loses
        let half = Duration::from_secs(SdnConfig::default().timeout_secs) / 2;
        let later = old.last_modified + half + Duration::from_secs(1);
        assert!(sync.compare_routes(&new, &old, later));
    }

    #[test]
    fn test_routes_equal_is_metric_equality() {
        let sync = RouteSync::new(&config());
        let a = route(RouteSource::Foreign, 3);
        let mut b = route(RouteSource::ThisInstance, 3);
        b.learned_from = None;
        assert!(sync.routes_equal(&a, &b));
        b.metric = 4;
        assert!(!sync.routes_equal(&a, &b));
    }
}
