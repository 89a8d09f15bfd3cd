//! Bond Graph - symmetric soul links, auto-pairing and cooldowns.
//!
//! Edges, the waiting pool and pending requests sit behind one lock and
//! are only written through helpers that touch both directions, so no
//! reader can observe `a -> b` without `b -> a`. Cooldowns are independent
//! timestamps and live in their own concurrent maps.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use soulbond_types::PlayerId;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::BondConfig;
use crate::persistence::BondDocument;

/// Result of a manual link request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequestOutcome {
    /// Both sides asked for each other; the bond now exists.
    Linked,
    /// Request stored until the target asks back.
    Requested,
    /// The requester already has a partner.
    AlreadyBonded,
    /// The target already has a partner.
    TargetBonded,
    /// The requester severed a bond recently.
    SeverCooldown { remaining: Duration },
    /// The requester and target were partners recently.
    ExPartnerCooldown { remaining: Duration },
    /// A player cannot bond with themselves.
    SelfLink,
    /// Pair bonding is not the active mode.
    BondingDisabled,
}

#[derive(Debug, Default)]
struct Links {
    partners: HashMap<PlayerId, PlayerId>,
    /// Unpaired players in arrival order.
    waiting: VecDeque<PlayerId>,
    /// requester -> target
    pending: HashMap<PlayerId, PlayerId>,
}

impl Links {
    fn unlink(&mut self, player: &PlayerId) -> Option<PlayerId> {
        let partner = self.partners.remove(player)?;
        self.partners.remove(&partner);
        Some(partner)
    }

    fn link(&mut self, a: PlayerId, b: PlayerId) {
        self.waiting.retain(|p| *p != a && *p != b);
        self.pending.remove(&a);
        self.pending.remove(&b);
        self.partners.insert(a, b);
        self.partners.insert(b, a);
    }

    fn is_symmetric(&self) -> bool {
        self.partners
            .iter()
            .all(|(a, b)| a != b && self.partners.get(b) == Some(a))
            && self
                .waiting
                .iter()
                .all(|p| !self.partners.contains_key(p))
    }
}

/// Pairwise bonds between players.
pub struct BondGraph {
    links: RwLock<Links>,
    sever_cooldown_until: DashMap<PlayerId, DateTime<Utc>>,
    /// Keyed by the ordered pair, so one entry covers both directions.
    ex_partner_cooldown_until: DashMap<(PlayerId, PlayerId), DateTime<Utc>>,
    reassign_cooldown_until: DashMap<PlayerId, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

fn pair_key(a: PlayerId, b: PlayerId) -> (PlayerId, PlayerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl BondGraph {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            links: RwLock::new(Links::default()),
            sever_cooldown_until: DashMap::new(),
            ex_partner_cooldown_until: DashMap::new(),
            reassign_cooldown_until: DashMap::new(),
            clock,
        }
    }

    /// Bond `a` and `b`, taking both out of the waiting pool.
    ///
    /// Existing bonds of either player must already be broken; returns false
    /// and changes nothing when they are not, or when `a == b`.
    pub fn create_link(&self, a: PlayerId, b: PlayerId) -> bool {
        if a == b {
            return false;
        }
        let mut links = self.links.write();
        if links.partners.contains_key(&a) || links.partners.contains_key(&b) {
            return false;
        }
        links.link(a, b);
        debug_assert!(links.is_symmetric());
        drop(links);

        info!(a = %a, b = %b, "Soul link formed");
        true
    }

    /// Break whatever bonds `a` and `b` have, then bond them.
    ///
    /// Returns the pairs that were broken.
    pub fn set_link(&self, a: PlayerId, b: PlayerId) -> Vec<(PlayerId, PlayerId)> {
        if a == b {
            return Vec::new();
        }
        let mut links = self.links.write();
        let mut broken = Vec::new();
        for player in [a, b] {
            if links.partners.get(&player) == Some(if player == a { &b } else { &a }) {
                continue;
            }
            if let Some(old) = links.unlink(&player) {
                broken.push((player, old));
            }
        }
        links.link(a, b);
        debug_assert!(links.is_symmetric());
        drop(links);

        info!(a = %a, b = %b, broken = broken.len(), "Soul link set");
        broken
    }

    /// Remove the player's bond in both directions.
    pub fn break_link(&self, player: &PlayerId) -> Option<PlayerId> {
        let partner = self.links.write().unlink(player)?;
        info!(a = %player, b = %partner, "Soul link broken");
        Some(partner)
    }

    pub fn partner_of(&self, player: &PlayerId) -> Option<PlayerId> {
        self.links.read().partners.get(player).copied()
    }

    pub fn is_bonded(&self, player: &PlayerId) -> bool {
        self.links.read().partners.contains_key(player)
    }

    /// Pair the player with the longest-waiting compatible player, or queue
    /// them when nobody is available.
    ///
    /// Candidates still on ex-partner cooldown with the player are skipped.
    pub fn try_assign_partner(&self, player: PlayerId) -> Option<PlayerId> {
        let mut links = self.links.write();
        if links.partners.contains_key(&player) {
            return None;
        }

        let candidate = links
            .waiting
            .iter()
            .copied()
            .find(|c| *c != player && !self.is_on_ex_partner_cooldown(&player, c));

        match candidate {
            Some(partner) => {
                links.link(player, partner);
                debug_assert!(links.is_symmetric());
                drop(links);
                info!(a = %player, b = %partner, "Soul link assigned");
                Some(partner)
            }
            None => {
                if !links.waiting.contains(&player) {
                    links.waiting.push_back(player);
                    debug!(player_id = %player, "Queued for soul link");
                }
                None
            }
        }
    }

    /// Record a voluntary severance between `a` and `b`.
    ///
    /// Does not break the link; callers sequence both.
    pub fn record_sever(&self, a: PlayerId, b: PlayerId, config: &BondConfig) {
        let now = self.clock.now();
        self.sever_cooldown_until.insert(
            a,
            now + Duration::minutes(i64::from(config.sever_cooldown_minutes)),
        );
        self.ex_partner_cooldown_until.insert(
            pair_key(a, b),
            now + Duration::minutes(i64::from(config.ex_partner_cooldown_minutes)),
        );
    }

    /// Block random reassignment for the player for `minutes`.
    pub fn record_reassign_cooldown(&self, player: PlayerId, minutes: u32) {
        self.reassign_cooldown_until.insert(
            player,
            self.clock.now() + Duration::minutes(i64::from(minutes)),
        );
    }

    pub fn sever_cooldown_remaining(&self, player: &PlayerId) -> Option<Duration> {
        Self::remaining(&self.sever_cooldown_until, player, self.clock.now())
    }

    pub fn ex_partner_cooldown_remaining(&self, a: &PlayerId, b: &PlayerId) -> Option<Duration> {
        Self::remaining(&self.ex_partner_cooldown_until, &pair_key(*a, *b), self.clock.now())
    }

    pub fn is_on_sever_cooldown(&self, player: &PlayerId) -> bool {
        self.sever_cooldown_remaining(player).is_some()
    }

    pub fn is_on_ex_partner_cooldown(&self, a: &PlayerId, b: &PlayerId) -> bool {
        self.ex_partner_cooldown_remaining(a, b).is_some()
    }

    pub fn is_on_random_reassign_cooldown(&self, player: &PlayerId) -> bool {
        Self::remaining(&self.reassign_cooldown_until, player, self.clock.now()).is_some()
    }

    /// Ask to bond with `target`. Mutual requests become a bond.
    pub fn request_link(&self, requester: PlayerId, target: PlayerId) -> LinkRequestOutcome {
        if requester == target {
            return LinkRequestOutcome::SelfLink;
        }
        if let Some(remaining) = self.sever_cooldown_remaining(&requester) {
            return LinkRequestOutcome::SeverCooldown { remaining };
        }
        if let Some(remaining) = self.ex_partner_cooldown_remaining(&requester, &target) {
            return LinkRequestOutcome::ExPartnerCooldown { remaining };
        }

        let mut links = self.links.write();
        if links.partners.contains_key(&requester) {
            return LinkRequestOutcome::AlreadyBonded;
        }
        if links.partners.contains_key(&target) {
            return LinkRequestOutcome::TargetBonded;
        }

        if links.pending.get(&target) == Some(&requester) {
            links.link(requester, target);
            debug_assert!(links.is_symmetric());
            drop(links);
            info!(a = %requester, b = %target, "Soul link formed by mutual request");
            return LinkRequestOutcome::Linked;
        }

        links.pending.insert(requester, target);
        debug!(requester = %requester, target = %target, "Link request stored");
        LinkRequestOutcome::Requested
    }

    /// Withdraw the player's outgoing request.
    pub fn cancel_request(&self, requester: &PlayerId) -> Option<PlayerId> {
        self.links.write().pending.remove(requester)
    }

    pub fn pending_request(&self, requester: &PlayerId) -> Option<PlayerId> {
        self.links.read().pending.get(requester).copied()
    }

    /// Forget waiting-pool membership and requests in both directions.
    ///
    /// The bond itself survives a disconnect.
    pub fn on_disconnect(&self, player: &PlayerId) {
        let mut links = self.links.write();
        links.waiting.retain(|p| p != player);
        links.pending.remove(player);
        links.pending.retain(|_, target| target != player);
    }

    pub fn waiting_pool(&self) -> Vec<PlayerId> {
        self.links.read().waiting.iter().copied().collect()
    }

    /// Every bond once, as `(a, b)` with `a < b`.
    pub fn pairs(&self) -> Vec<(PlayerId, PlayerId)> {
        let links = self.links.read();
        let mut pairs: Vec<_> = links
            .partners
            .iter()
            .filter(|(a, b)| a < b)
            .map(|(a, b)| (*a, *b))
            .collect();
        pairs.sort();
        pairs
    }

    /// Whether every edge has its mirror and nobody bonded is still waiting.
    pub fn check_invariants(&self) -> bool {
        self.links.read().is_symmetric()
    }

    pub fn bond_document(&self) -> BondDocument {
        self.links
            .read()
            .partners
            .iter()
            .map(|(a, b)| (*a, *b))
            .collect()
    }

    /// Replace bonds with a persisted document.
    ///
    /// Only edges confirmed from both sides are restored. Returns the number
    /// of bonds restored.
    pub fn restore(&self, document: BondDocument) -> usize {
        let mut links = self.links.write();
        *links = Links::default();
        for (a, b) in &document {
            if a != b && document.get(b) == Some(a) {
                links.partners.insert(*a, *b);
            }
        }
        debug_assert!(links.is_symmetric());
        links.partners.len() / 2
    }

    fn remaining<K: Eq + std::hash::Hash>(
        map: &DashMap<K, DateTime<Utc>>,
        key: &K,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let expired = map.remove_if(key, |_, until| *until <= now);
        if expired.is_some() {
            return None;
        }
        map.get(key).map(|until| *until - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;

    fn graph() -> (BondGraph, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (BondGraph::new(clock.clone()), clock)
    }

    fn ids(n: usize) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = (0..n).map(|_| PlayerId::generate()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_create_link_is_symmetric() {
        let (graph, _) = graph();
        let p = ids(2);
        assert!(graph.create_link(p[0], p[1]));
        assert_eq!(graph.partner_of(&p[0]), Some(p[1]));
        assert_eq!(graph.partner_of(&p[1]), Some(p[0]));
    }

    #[test]
    fn test_create_link_refuses_bonded_players() {
        let (graph, _) = graph();
        let p = ids(3);
        assert!(graph.create_link(p[0], p[1]));
        assert!(!graph.create_link(p[1], p[2]));
        assert!(!graph.create_link(p[2], p[2]));
        assert_eq!(graph.partner_of(&p[1]), Some(p[0]));
        assert!(graph.check_invariants());
    }

    #[test]
    fn test_set_link_breaks_previous_bonds() {
        let (graph, _) = graph();
        let p = ids(4);
        graph.create_link(p[0], p[1]);
        graph.create_link(p[2], p[3]);

        let broken = graph.set_link(p[0], p[2]);
        assert_eq!(broken.len(), 2);
        assert_eq!(graph.partner_of(&p[0]), Some(p[2]));
        assert_eq!(graph.partner_of(&p[1]), None);
        assert_eq!(graph.partner_of(&p[3]), None);
        assert!(graph.check_invariants());
    }

    #[test]
    fn test_set_link_on_existing_pair_is_stable() {
        let (graph, _) = graph();
        let p = ids(2);
        graph.create_link(p[0], p[1]);
        assert!(graph.set_link(p[0], p[1]).is_empty());
        assert_eq!(graph.partner_of(&p[0]), Some(p[1]));
    }

    #[test]
    fn test_try_assign_is_fifo() {
        let (graph, _) = graph();
        let p = ids(4);
        assert_eq!(graph.try_assign_partner(p[2]), None);
        assert_eq!(graph.try_assign_partner(p[0]), Some(p[2]));
        assert_eq!(graph.try_assign_partner(p[3]), None);
        assert_eq!(graph.try_assign_partner(p[1]), Some(p[3]));
        assert!(graph.waiting_pool().is_empty());
        assert!(graph.check_invariants());
    }

    #[test]
    fn test_try_assign_when_bonded_returns_none() {
        let (graph, _) = graph();
        let p = ids(3);
        graph.create_link(p[0], p[1]);
        graph.try_assign_partner(p[2]);
        assert_eq!(graph.try_assign_partner(p[0]), None);
        assert_eq!(graph.waiting_pool(), vec![p[2]]);
    }

    #[test]
    fn test_requeue_does_not_duplicate() {
        let (graph, _) = graph();
        let p = ids(1);
        graph.try_assign_partner(p[0]);
        graph.try_assign_partner(p[0]);
        assert_eq!(graph.waiting_pool(), vec![p[0]]);
    }

    #[test]
    fn test_sever_cooldown_gates_reassignment_with_ex_partner() {
        let (graph, clock) = graph();
        let config = BondConfig::default();
        let p = ids(2);
        graph.create_link(p[0], p[1]);

        graph.break_link(&p[0]);
        graph.record_sever(p[0], p[1], &config);

        assert_eq!(graph.try_assign_partner(p[1]), None);
        assert_eq!(graph.try_assign_partner(p[0]), None);
        assert_eq!(
            graph.request_link(p[1], p[0]),
            LinkRequestOutcome::ExPartnerCooldown {
                remaining: Duration::minutes(i64::from(config.ex_partner_cooldown_minutes))
            }
        );

        clock.advance(Duration::minutes(i64::from(config.ex_partner_cooldown_minutes)));
        assert!(!graph.is_on_ex_partner_cooldown(&p[0], &p[1]));
        assert_eq!(graph.try_assign_partner(p[0]), Some(p[1]));
    }

    #[test]
    fn test_sever_cooldown_blocks_manual_requests() {
        let (graph, clock) = graph();
        let config = BondConfig::default();
        let p = ids(3);
        graph.record_sever(p[0], p[1], &config);

        assert!(matches!(
            graph.request_link(p[0], p[2]),
            LinkRequestOutcome::SeverCooldown { .. }
        ));
        clock.advance(Duration::minutes(i64::from(config.sever_cooldown_minutes)));
        assert_eq!(graph.request_link(p[0], p[2]), LinkRequestOutcome::Requested);
    }

    #[test]
    fn test_mutual_request_links() {
        let (graph, _) = graph();
        let p = ids(3);
        graph.try_assign_partner(p[0]);

        assert_eq!(graph.request_link(p[0], p[1]), LinkRequestOutcome::Requested);
        assert_eq!(graph.pending_request(&p[0]), Some(p[1]));
        assert_eq!(graph.request_link(p[1], p[0]), LinkRequestOutcome::Linked);

        assert_eq!(graph.partner_of(&p[0]), Some(p[1]));
        assert_eq!(graph.pending_request(&p[0]), None);
        assert!(graph.waiting_pool().is_empty());
        assert_eq!(graph.request_link(p[2], p[0]), LinkRequestOutcome::TargetBonded);
        assert_eq!(graph.request_link(p[0], p[2]), LinkRequestOutcome::AlreadyBonded);
    }

    #[test]
    fn test_disconnect_keeps_bond() {
        let (graph, _) = graph();
        let p = ids(4);
        graph.create_link(p[0], p[1]);
        graph.try_assign_partner(p[2]);
        graph.request_link(p[2], p[3]);
        graph.request_link(p[3], p[0]);

        graph.on_disconnect(&p[0]);
        graph.on_disconnect(&p[2]);

        assert_eq!(graph.partner_of(&p[0]), Some(p[1]));
        assert!(graph.waiting_pool().is_empty());
        assert_eq!(graph.pending_request(&p[2]), None);
        assert_eq!(graph.pending_request(&p[3]), None);
    }

    #[test]
    fn test_restore_discards_one_sided_edges() {
        let (graph, _) = graph();
        let p = ids(4);
        let mut doc = BondDocument::new();
        doc.insert(p[0], p[1]);
        doc.insert(p[1], p[0]);
        doc.insert(p[2], p[3]);

        assert_eq!(graph.restore(doc), 1);
        assert_eq!(graph.partner_of(&p[0]), Some(p[1]));
        assert_eq!(graph.partner_of(&p[2]), None);
        assert!(graph.check_invariants());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(usize, usize),
        Set(usize, usize),
        Break(usize),
        Assign(usize),
        Request(usize, usize),
        Disconnect(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Vec<Op>> {
        let idx = 0usize..6;
        proptest::collection::vec(
            prop_oneof![
                (idx.clone(), idx.clone()).prop_map(|(a, b)| Op::Create(a, b)),
                (idx.clone(), idx.clone()).prop_map(|(a, b)| Op::Set(a, b)),
                idx.clone().prop_map(Op::Break),
                idx.clone().prop_map(Op::Assign),
                (idx.clone(), idx.clone()).prop_map(|(a, b)| Op::Request(a, b)),
                idx.prop_map(Op::Disconnect),
            ],
            0..40,
        )
    }

    proptest! {
        #[test]
        fn property_bonds_stay_symmetric(ops in op_strategy()) {
            let (graph, _) = graph();
            let p = ids(6);
            for op in ops {
                match op {
                    Op::Create(a, b) => { graph.create_link(p[a], p[b]); }
                    Op::Set(a, b) => { graph.set_link(p[a], p[b]); }
                    Op::Break(a) => { graph.break_link(&p[a]); }
                    Op::Assign(a) => { graph.try_assign_partner(p[a]); }
                    Op::Request(a, b) => { graph.request_link(p[a], p[b]); }
                    Op::Disconnect(a) => graph.on_disconnect(&p[a]),
                }
                prop_assert!(graph.check_invariants());
                for a in &p {
                    for b in &p {
                        prop_assert_eq!(
                            graph.partner_of(a) == Some(*b),
                            graph.partner_of(b) == Some(*a)
                        );
                    }
                }
            }
        }
    }
}
