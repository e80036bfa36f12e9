#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use spichr_lib::cleanup::{CacheResetOutcome, CleanupOutcome, OrphanRecord};
use spichr_lib::confirm::{Confirmation, DestructiveAction, Reversibility};
use spichr_lib::diagnostics::RecordCount;
use spichr_lib::model::{NewItem, RecordId};
use spichr_lib::remote::{RemoteError, RemoteOp, RemoteRecord, RemoteStore, SHARE_RECORD_TYPE};
use spichr_lib::store::ItemFilter;

#[path = "util.rs"]
mod util;

fn with_share_reference() -> ItemFilter {
    ItemFilter {
        has_share_reference: Some(true),
        ..ItemFilter::default()
    }
}

#[tokio::test]
async fn orphaned_share_is_found_deleted_and_gone_on_rescan() -> Result<()> {
    let h = util::harness().await;
    let root = RemoteRecord::new(RecordId::new("Household-1"), "Household");
    let share = h.remote.create_share(&root).await?;
    let healthy = h
        .remote
        .create_share(&RemoteRecord::new(RecordId::new("Household-2"), "Household"))
        .await?;
    assert!(h.remote.remove_record_silently(&root.id));

    let cleanup = h.ctx.cleanup();
    let scan = cleanup.scan_orphaned_shares().await?;
    assert_eq!(scan.scanned, 2);
    assert_eq!(
        scan.orphans,
        vec![OrphanRecord::Share {
            share: share.id.clone(),
            root: Some(root.id.clone()),
        }]
    );

    let results = cleanup.delete_orphaned_shares(&scan.orphans).await;
    assert_eq!(results, vec![(share.id.clone(), CleanupOutcome::Deleted)]);
    assert!(h.remote.fetch_share(&healthy.id).await.is_ok());

    let rescan = cleanup.scan_orphaned_shares().await?;
    assert!(rescan.orphans.is_empty());
    Ok(())
}

#[tokio::test]
async fn already_deleted_share_counts_as_success() -> Result<()> {
    let h = util::harness().await;
    let orphan = OrphanRecord::Share {
        share: RecordId::new("share-that-vanished"),
        root: None,
    };
    let results = h.ctx.cleanup().delete_orphaned_shares(&[orphan]).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].1, CleanupOutcome::AlreadyGone);
    assert!(results[0].1.is_success());
    Ok(())
}

#[tokio::test]
async fn transient_lookup_failures_never_delete() -> Result<()> {
    let h = util::harness().await;
    let root = RemoteRecord::new(RecordId::new("Household-1"), "Household");
    h.remote.create_share(&root).await?;
    h.remote
        .fail(RemoteOp::FetchRecord, RemoteError::Unavailable("timeout".into()));

    let scan = h.ctx.cleanup().scan_orphaned_shares().await?;
    assert!(scan.orphans.is_empty());
    assert_eq!(scan.unresolved.len(), 1);
    assert_eq!(h.remote.share_count(), 1);
    Ok(())
}

#[tokio::test]
async fn dangling_parent_references_are_detached_not_deleted() -> Result<()> {
    let h = util::harness().await;
    let gone = RecordId::new("share-gone");
    h.remote.insert_record(
        RemoteRecord::new(RecordId::new("Household-7"), "Household").with_parent(gone.clone()),
    );
    h.remote
        .insert_record(RemoteRecord::new(RecordId::new("Household-8"), "Household"));

    let repaired = h
        .ctx
        .cleanup()
        .scan_orphaned_record_references("Household")
        .await?;
    assert_eq!(repaired.scan.scanned, 2);
    assert_eq!(repaired.scan.orphans.len(), 1);
    assert_eq!(
        repaired.results,
        vec![(RecordId::new("Household-7"), CleanupOutcome::ReferenceCleared)]
    );
    let record = h.remote.record(&RecordId::new("Household-7")).expect("kept");
    assert!(record.parent.is_none());
    Ok(())
}

#[tokio::test]
async fn local_references_to_vanished_shares_are_cleared() -> Result<()> {
    let h = util::harness().await;
    let store = h.ctx.item_store();
    store.insert(NewItem::named("Rice")).await?;
    store.insert(NewItem::named("Salt")).await?;
    let shared = h.ctx.orchestrator().share_household().await?;
    assert_eq!(store.count(&with_share_reference()).await?, 2);

    // Deleted from another device.
    h.remote.delete_record(&shared.share.id).await?;
    let cleared = h.ctx.cleanup().repair_local_share_references().await?;
    assert_eq!(cleared, 2);
    assert_eq!(store.count(&with_share_reference()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn full_cleanup_keeps_going_past_a_failed_phase() -> Result<()> {
    let h = util::harness().await;
    h.remote.insert_record(
        RemoteRecord::new(RecordId::new("Household-3"), "Household")
            .with_parent(RecordId::new("share-gone")),
    );
    h.ctx.household.profile.mark_joined(&url::Url::parse(
        "https://www.icloud.com/share/0001",
    )?);
    h.remote
        .fail(RemoteOp::ListShares, RemoteError::Unavailable("offline".into()));

    let report = h.ctx.cleanup().perform_full_cleanup().await?;
    assert!(report.shares.is_err());
    let household = report
        .references
        .iter()
        .find(|(t, _)| t == "Household")
        .map(|(_, r)| r.clone())
        .unwrap()
        .unwrap();
    assert_eq!(household.results.len(), 1);
    assert!(report.cache_keys_cleared.contains(&"shareURL".to_string()));
    assert!(!h.ctx.household.profile.is_shared());
    Ok(())
}

#[tokio::test]
async fn nuclear_reset_leaves_a_clean_diagnostic() -> Result<()> {
    let h = util::harness().await;
    let store = h.ctx.item_store();
    store.insert(NewItem::named("Milk")).await?;
    store.insert(NewItem::named("Bread")).await?;
    h.ctx.orchestrator().share_household().await?;
    h.remote
        .insert_record(RemoteRecord::new(RecordId::new("Household-1"), "Household"));

    let cleanup = h.ctx.cleanup();
    let before = cleanup.generate_diagnostic_report().await;
    assert!(!before.is_clean());
    assert_eq!(before.count_for("FoodItem"), Some(RecordCount::Counted(2)));
    assert_eq!(before.count_for(SHARE_RECORD_TYPE), Some(RecordCount::Counted(1)));

    let confirmation =
        Confirmation::acknowledge(DestructiveAction::NuclearReset, "DELETE EVERYTHING")?;
    let report = cleanup.perform_nuclear_reset(&confirmation).await?;
    assert_eq!(report.reversibility, Reversibility::Irreversible);
    assert_eq!(report.local_references_cleared, Ok(2));

    let after = cleanup.generate_diagnostic_report().await;
    assert!(after.is_clean(), "{after}");
    assert_eq!(after.local_share_references, Some(0));
    assert_eq!(after.local_items, Some(2));
    assert!(!h.ctx.household.profile.is_shared());
    Ok(())
}

#[tokio::test]
async fn nuclear_reset_refuses_the_wrong_confirmation() -> Result<()> {
    let h = util::harness().await;
    h.ctx.orchestrator().share_household().await?;
    let wrong = Confirmation::acknowledge(DestructiveAction::StopSharing, "STOP SHARING")?;
    let err = h
        .ctx
        .cleanup()
        .perform_nuclear_reset(&wrong)
        .await
        .unwrap_err();
    assert!(err.has_code("CONFIRM/REQUIRED"));
    assert_eq!(h.remote.share_count(), 1);
    Ok(())
}

#[tokio::test]
async fn unavailable_counts_show_as_minus_one() -> Result<()> {
    let h = util::harness().await;
    h.remote
        .fail(RemoteOp::Query, RemoteError::Unavailable("offline".into()));
    let report = h.ctx.cleanup().generate_diagnostic_report().await;
    assert!(report
        .record_counts
        .iter()
        .all(|(_, count)| *count == RecordCount::Unavailable));
    assert!(report.to_string().contains("FoodItem: -1"));
    Ok(())
}

#[tokio::test]
async fn quick_fix_repairs_household_records_and_drops_the_cache() -> Result<()> {
    let h = util::harness().await;
    h.remote.insert_record(
        RemoteRecord::new(RecordId::new("Household-9"), "Household")
            .with_parent(RecordId::new("share-gone")),
    );
    h.ctx.prefs.set_string("cloudkit_share_url", "https://old.example/x");

    let report = h.ctx.cleanup().quick_fix_orphaned_share_error().await?;
    let references = report.references.unwrap();
    assert_eq!(references.results.len(), 1);
    assert!(report
        .cache_keys_cleared
        .contains(&"cloudkit_share_url".to_string()));
    Ok(())
}

#[tokio::test]
async fn cache_reset_runs_once_per_install() -> Result<()> {
    let h = util::harness().await;
    h.ctx.prefs.set_bool("cloudkit_is_sharing", true);

    let first = h.ctx.startup().await?;
    match first.cache_reset {
        CacheResetOutcome::Cleared { keys } => {
            assert!(keys.contains(&"cloudkit_is_sharing".to_string()))
        }
        other => panic!("expected a reset, got {other:?}"),
    }
    let second = h.ctx.startup().await?;
    assert_eq!(second.cache_reset, CacheResetOutcome::AlreadyDone);
    Ok(())
}

#[tokio::test]
async fn cleanup_waits_for_an_in_flight_share() -> Result<()> {
    let h = util::harness().await;
    h.ctx.household.profile.mark_joined(&url::Url::parse(
        "https://www.icloud.com/share/0002",
    )?);
    let cleanup = h.ctx.cleanup();

    let flight = h.ctx.household.begin_share()?;
    let err = cleanup.perform_full_cleanup().await.unwrap_err();
    assert!(err.has_code("SHARE/IN_PROGRESS"));
    let err = cleanup.quick_fix_orphaned_share_error().await.unwrap_err();
    assert!(err.has_code("SHARE/IN_PROGRESS"));
    assert!(h.ctx.household.profile.is_shared());

    drop(flight);
    cleanup.perform_full_cleanup().await?;
    assert!(!h.ctx.household.profile.is_shared());
    Ok(())
}
