//! State written through the background writer survives an engine restart.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::Harness;
use soulbond_engine::{
    persistence_channel, BondDocument, DocumentSnapshot, EngineConfig, JsonFileStorage,
    MercyConfig, StateStorage,
};
use soulbond_types::{BanEntry, DamageCause, PlayerId, Position};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Engine wired to a writer over `storage`; returns the writer task.
fn persisted(
    config: EngineConfig,
    storage: Arc<JsonFileStorage>,
) -> (Harness, tokio::task::JoinHandle<()>) {
    let h = Harness::new(config);
    let (handle, writer) = persistence_channel(storage);
    h.engine.attach_persistence(handle);
    (h, tokio::spawn(writer.run()))
}

fn ban(player: PlayerId, name: &str, ends_in: Duration) -> BanEntry {
    let now = Utc::now();
    BanEntry {
        player_id: player,
        display_name: name.to_string(),
        tier: 1,
        start_time: now - Duration::hours(1),
        end_time: now + ends_in,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bans_tiers_and_bonds_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(JsonFileStorage::new(dir.path()));

    let (h, writer) = persisted(EngineConfig::default(), storage.clone());
    let (alex, blair) = h.bonded_pair();
    let ghost = h.world.add_player("Ghost");
    h.world.kill(&ghost, DamageCause::Environment);
    h.engine.set_tier(alex, 4);
    drop(h);
    writer.await.unwrap();

    assert!(storage.path_for(soulbond_engine::DocumentKind::Bans).exists());

    let fresh = Harness::new(EngineConfig::default());
    let summary = fresh.engine.restore_from(storage.as_ref()).await.unwrap();

    assert_eq!(summary.bans, 1);
    assert_eq!(summary.tiers, 2);
    assert_eq!(summary.bonds, 1);
    assert!(fresh.engine.is_banned(&ghost));
    assert_eq!(fresh.engine.tier_of(&ghost), 1);
    assert_eq!(fresh.engine.tier_of(&alex), 4);
    assert_eq!(fresh.engine.partner_of(&alex), Some(blair));
    assert_eq!(fresh.engine.partner_of(&blair), Some(alex));
}

#[tokio::test]
async fn one_sided_bonds_and_expired_bans_are_dropped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let storage = JsonFileStorage::new(dir.path());
    let (a, b, c) = (PlayerId::generate(), PlayerId::generate(), PlayerId::generate());

    let mut bonds = BondDocument::new();
    bonds.insert(a, b);
    bonds.insert(c, a);
    storage.store(&DocumentSnapshot::Bonds(bonds)).await.unwrap();

    let mut bans = soulbond_engine::BanDocument::new();
    bans.insert(a, ban(a, "Expired", Duration::hours(-1)));
    bans.insert(b, ban(b, "Active", Duration::hours(1)));
    storage.store(&DocumentSnapshot::Bans(bans)).await.unwrap();

    let h = Harness::new(EngineConfig::default());
    let summary = h.engine.restore_from(&storage).await.unwrap();

    assert_eq!(summary.bonds, 0);
    assert_eq!(h.engine.partner_of(&a), None);
    assert_eq!(h.engine.partner_of(&c), None);
    assert_eq!(summary.bans, 1);
    assert!(!h.engine.is_banned(&a));
    assert!(h.engine.is_banned(&b));
}

#[tokio::test]
async fn corrupt_document_fails_restore() {
    let dir = tempfile::tempdir().unwrap();
    let storage = JsonFileStorage::new(dir.path());
    tokio::fs::write(storage.path_for(soulbond_engine::DocumentKind::Tiers), b"{ nope")
        .await
        .unwrap();

    let h = Harness::new(EngineConfig::default());
    assert!(h.engine.restore_from(&storage).await.is_err());
}

#[tokio::test]
async fn concurrent_deaths_all_reach_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(JsonFileStorage::new(dir.path()));
    let (h, writer) = persisted(EngineConfig::default(), storage.clone());

    let names: Vec<String> = (0..16).map(|i| format!("Player{i}")).collect();
    let players: Vec<PlayerId> = names.iter().map(|n| h.world.add_player(n.as_str())).collect();

    std::thread::scope(|scope| {
        for player in &players {
            let world = &h.world;
            scope.spawn(move || {
                world.kill(player, DamageCause::Environment);
            });
        }
    });

    assert_eq!(h.engine.active_bans().len(), players.len());
    drop(h);
    writer.await.unwrap();

    let bans = storage.load_bans().await.unwrap();
    let tiers = storage.load_tiers().await.unwrap();
    for player in &players {
        assert!(bans.contains_key(player));
        assert_eq!(tiers.get(player), Some(&1));
    }
}

#[tokio::test(start_paused = true)]
async fn mercy_scheduler_runs_on_its_interval() {
    let mut config = EngineConfig::default();
    config.mercy = MercyConfig {
        interval_minutes: 10,
        required_hours: 1,
        ticks_per_hour: 100,
        ..MercyConfig::default()
    };
    let h = Harness::new(config);
    let p = h.world.add_player("Ghost");
    h.world.kill(&p, DamageCause::Environment);
    h.world.respawn(&p);
    assert_eq!(h.engine.tier_of(&p), 1);

    let scheduler = h.engine.spawn_mercy_scheduler();
    h.world.record_activity(&p, Position::new(40.0, 64.0, 0.0), 0, 150);

    tokio::time::sleep(std::time::Duration::from_secs(9 * 60)).await;
    assert_eq!(h.engine.tier_of(&p), 1);

    tokio::time::sleep(std::time::Duration::from_secs(2 * 60)).await;
    assert_eq!(h.engine.tier_of(&p), 0);

    // The task stops once the engine is gone.
    drop(h);
    tokio::time::sleep(std::time::Duration::from_secs(10 * 60)).await;
    scheduler.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn mercy_scheduler_picks_up_a_new_interval() {
    let mut config = EngineConfig::default();
    config.mercy = MercyConfig {
        interval_minutes: 10,
        required_hours: 1,
        ticks_per_hour: 100,
        ..MercyConfig::default()
    };
    let h = Harness::new(config);
    let p = h.world.add_player("Ghost");
    for _ in 0..2 {
        h.world.kill(&p, DamageCause::Environment);
        h.world.respawn(&p);
    }
    assert_eq!(h.engine.tier_of(&p), 2);
    h.world.record_activity(&p, Position::new(40.0, 64.0, 0.0), 0, 150);
    let _scheduler = h.engine.spawn_mercy_scheduler();

    let mut faster = h.engine.config();
    faster.mercy.interval_minutes = 2;
    h.engine.update_config(faster).unwrap();

    // The wait already underway still uses the old interval.
    tokio::time::sleep(std::time::Duration::from_secs(9 * 60)).await;
    assert_eq!(h.engine.tier_of(&p), 2);
    tokio::time::sleep(std::time::Duration::from_secs(2 * 60)).await;
    assert_eq!(h.engine.tier_of(&p), 1);

    h.world.record_activity(&p, Position::new(80.0, 64.0, 0.0), 0, 150);
    tokio::time::sleep(std::time::Duration::from_secs(2 * 60)).await;
    assert_eq!(h.engine.tier_of(&p), 0);
}
