//! End-to-end sync runs through the engine, with fake directories and a
//! file-backed mapping store.

mod support;

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::Semaphore;

use roster_core::config::{Config, SourceConfig, SyncConfig, TargetConfig};
use roster_core::types::{InvitationStatus, MemberRole, RecordKey};
use roster_sync::{
    JsonMappingStore, MappingStore, Outcome, Reconciler, SyncEngine, SyncError,
};

use support::{active_member, org_member, FakeSource, FakeTarget};

const ORG: &str = "acme";
const BASE: &str = "devs@corp.example";
const ELEVATED: &str = "devs-admins@corp.example";
const TTL_DAYS: i64 = 90;

fn config(dry_run: bool, remove_extra_members: bool) -> Config {
    Config {
        source: SourceConfig {
            base_group: BASE.to_string(),
            elevated_group: ELEVATED.to_string(),
        },
        target: TargetConfig {
            organization: ORG.to_string(),
        },
        sync: SyncConfig {
            dry_run,
            ignore_suspended: false,
            remove_extra_members,
        },
        ..Config::default()
    }
}

fn engine_with_store(
    source: Arc<FakeSource>,
    target: Arc<FakeTarget>,
    tmp: &TempDir,
    config: Config,
) -> (SyncEngine, Arc<JsonMappingStore>) {
    let store = Arc::new(
        JsonMappingStore::open(tmp.path().join("mappings.json"), TTL_DAYS).expect("open store"),
    );
    let reconciler = Reconciler::new(store.clone(), target.clone(), ORG, TTL_DAYS);
    let engine = SyncEngine::new(source, target, Some(reconciler), config);
    (engine, store)
}

#[tokio::test]
async fn full_run_invites_and_tracks_new_members() {
    let tmp = TempDir::new().expect("tmp");
    let source = Arc::new(FakeSource::with_groups(
        (
            BASE,
            vec![active_member("alice@x.com"), active_member("bob@x.com")],
        ),
        (ELEVATED, vec![active_member("carol@x.com")]),
    ));
    let target = Arc::new(FakeTarget::with_members(vec![org_member(
        "bob-gh",
        Some("bob@x.com"),
        MemberRole::Member,
    )]));
    let (engine, store) = engine_with_store(source, target.clone(), &tmp, config(false, false));

    let report = engine.sync().await.expect("sync");

    // bob is already present; alice and carol get invited, alphabetically.
    assert_eq!(report.invited, vec!["alice@x.com", "carol@x.com"]);
    assert_eq!(report.summary.invites, 2);
    assert_eq!(report.summary.executed, 2);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(
        target.calls(),
        vec!["invite:alice@x.com", "invite:carol@x.com"]
    );

    // Both invitations are now tracked as pending records.
    let reconciliation = report.reconciliation.expect("reconciliation ran");
    assert_eq!(reconciliation.new_saved, 2);
    let pending = store
        .by_status(ORG, InvitationStatus::Pending)
        .await
        .expect("by_status");
    assert_eq!(pending.len(), 2);
    // The elevated overlay made carol's invite an admin invite.
    assert!(pending
        .iter()
        .any(|r| r.email == "carol@x.com" && r.role == MemberRole::Admin));
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let tmp = TempDir::new().expect("tmp");
    let source = Arc::new(FakeSource::with_groups(
        (BASE, vec![active_member("alice@x.com")]),
        (ELEVATED, vec![]),
    ));
    let target = Arc::new(FakeTarget::with_members(vec![org_member(
        "stranger",
        Some("stranger@x.com"),
        MemberRole::Member,
    )]));
    let (engine, store) = engine_with_store(source, target.clone(), &tmp, config(true, true));

    let report = engine.sync().await.expect("sync");

    assert!(report.dry_run);
    assert!(target.calls().is_empty(), "dry run must not touch the directory");
    assert!(report.outcomes.iter().all(|o| o.outcome == Outcome::Skipped));
    assert!(report.reconciliation.is_none());
    assert_eq!(report.invited, vec!["alice@x.com"]);
    // The planned removal shows up in the summary without being executed.
    assert_eq!(report.summary.removals, 1);
    assert!(store
        .by_status(ORG, InvitationStatus::Pending)
        .await
        .expect("by_status")
        .is_empty());
}

#[tokio::test]
async fn tracked_leaver_is_removed_and_record_transitioned() {
    let tmp = TempDir::new().expect("tmp");
    // dave was synced in earlier and has since left the source groups. His
    // target entry exposes no email; only the store knows who he is.
    let source = Arc::new(FakeSource::with_groups(
        (BASE, vec![active_member("alice@x.com")]),
        (ELEVATED, vec![]),
    ));
    let target = Arc::new(FakeTarget::with_members(vec![
        org_member("alice-gh", Some("alice@x.com"), MemberRole::Member),
        org_member("dave-gh", None, MemberRole::Member),
        org_member("mystery", None, MemberRole::Member),
    ]));
    let (engine, store) = engine_with_store(source, target.clone(), &tmp, config(false, false));
    store
        .save(roster_core::types::InvitationRecord::new_existing(
            ORG,
            "dave-gh",
            "dave@x.com",
            MemberRole::Member,
            TTL_DAYS,
        ))
        .await
        .expect("seed");

    let report = engine.sync().await.expect("sync");

    // Conservative mode: only the store-tracked leaver goes. Both the leaver
    // and the untracked handle trace to no source email, so both are reported
    // orphaned; only the tracked one is removable.
    assert_eq!(report.summary.removals, 1);
    assert!(target.calls().contains(&"remove:dave-gh".to_string()));
    assert!(!target.calls().iter().any(|c| c == "remove:mystery"));
    assert_eq!(
        report.orphaned_members,
        vec!["dave-gh".to_string(), "mystery".to_string()]
    );

    let record = store
        .get(ORG, &RecordKey::Existing("dave-gh".to_string()))
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.status, InvitationStatus::Removed);
}

#[tokio::test]
async fn already_member_invite_upgrades_and_records_the_account() {
    let tmp = TempDir::new().expect("tmp");
    let source = Arc::new(FakeSource::with_groups(
        (BASE, vec![]),
        (ELEVATED, vec![active_member("carol@x.com")]),
    ));
    // carol is a member whose email is hidden, so the diff plans an invite;
    // the directory rejects it and the search resolves her handle.
    let target = Arc::new(FakeTarget {
        already_members: vec!["carol@x.com".to_string()],
        search_results: [("carol@x.com".to_string(), "carol-gh".to_string())]
            .into_iter()
            .collect(),
        ..FakeTarget::default()
    });
    target.members.lock().expect("lock").push(org_member(
        "carol-gh",
        None,
        MemberRole::Member,
    ));
    let (engine, store) = engine_with_store(source, target.clone(), &tmp, config(false, false));

    let report = engine.sync().await.expect("sync");

    assert_eq!(report.already_present, vec!["carol@x.com"]);
    assert!(target
        .calls()
        .contains(&"update_role:carol-gh:admin".to_string()));

    let record = store
        .get(ORG, &RecordKey::Existing("carol-gh".to_string()))
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.status, InvitationStatus::Resolved);
    assert_eq!(record.role, MemberRole::Admin);

    // Next run: the stored mapping suppresses the invite entirely.
    let second = engine.sync().await.expect("second sync");
    assert!(second.invited.is_empty());
    assert!(second.already_present.is_empty());
    assert_eq!(second.summary.total_actions, 0);
}

#[tokio::test]
async fn member_absent_from_all_source_groups_is_reported_orphaned() {
    let tmp = TempDir::new().expect("tmp");
    let source = Arc::new(FakeSource::with_groups((BASE, vec![]), (ELEVATED, vec![])));
    let target = Arc::new(FakeTarget::with_members(vec![org_member(
        "stranger-gh",
        Some("stranger@x.com"),
        MemberRole::Member,
    )]));
    let (engine, _store) = engine_with_store(source, target, &tmp, config(false, false));

    let report = engine.sync().await.expect("sync");

    // Conservative mode leaves the account alone, but the report still flags
    // it: a visible email is not enough, it has to appear in a source group.
    assert_eq!(report.summary.removals, 0);
    assert_eq!(report.orphaned_members, vec!["stranger-gh".to_string()]);
}

#[tokio::test]
async fn overlapping_runs_are_rejected() {
    let tmp = TempDir::new().expect("tmp");
    let gate = Arc::new(Semaphore::new(0));
    let source = Arc::new(FakeSource {
        gate: Some(gate.clone()),
        ..FakeSource::with_groups((BASE, vec![]), (ELEVATED, vec![]))
    });
    let target = Arc::new(FakeTarget::default());
    let (engine, _store) = engine_with_store(source, target, &tmp, config(false, false));
    let engine = Arc::new(engine);

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync().await })
    };
    // Let the first run reach the gated group listing.
    tokio::task::yield_now().await;

    let second = engine.sync().await;
    assert!(matches!(second, Err(SyncError::AlreadyRunning)));

    gate.add_permits(8);
    let first = first.await.expect("join").expect("first run");
    assert_eq!(first.summary.total_actions, 0);

    // The flag clears once the run ends; a fresh run is admitted.
    engine.sync().await.expect("third run");
}
